//! Vision Language Model (VLM) inference service.
//!
//! The session engine only sees the [`InferenceService`] trait: a prompt and
//! a UI snapshot go in, free-form text comes out. Two implementations:
//! - [`VlmClient`] talks to an OpenAI-compatible chat-completions endpoint
//!   through `curl`, streaming with an inactivity timeout and a wall-clock
//!   request timeout, falling back to a non-streaming request
//! - [`ScriptedInference`] replays queued responses for tests and dry runs
//!
//! # Configuration
//!
//! Defaults come from [`crate::config`] (`PERSONA_AB_VLM_*` variables).

use base64::Engine;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config;
use crate::snapshot::CaptureResult;

/// Result type for VLM operations
pub type VlmResult<T> = Result<T, VlmError>;

/// Errors that can occur during an inference call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VlmError {
    /// Failed to reach the endpoint, or it answered with a non-retryable error
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// The endpoint signalled rate limiting or quota exhaustion
    #[error("Rate limited: {0}")]
    RateLimited(String),
    /// No streamed data for too long
    #[error("No response for {0:?}")]
    ActivityTimeout(Duration),
    /// The whole call exceeded its wall-clock limit
    #[error("Request exceeded {0:?}")]
    RequestTimeout(Duration),
    /// The endpoint answered with something that is not a completion
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// Spawning or talking to curl failed
    #[error("IO error: {0}")]
    Io(String),
}

impl VlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, VlmError::RateLimited(_))
    }
}

impl From<std::io::Error> for VlmError {
    fn from(e: std::io::Error) -> Self {
        VlmError::Io(e.to_string())
    }
}

/// Opaque text-generation service used by the session engine
pub trait InferenceService {
    /// Generate a completion for `prompt` given the current UI `snapshot`
    fn generate(&self, prompt: &str, snapshot: &CaptureResult) -> VlmResult<String>;
}

/// Configuration for the VLM client
#[derive(Debug, Clone)]
pub struct VlmConfig {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name to use
    pub model: String,
    /// Maximum tokens in response
    pub max_tokens: u32,
    /// Timeout for initial connection (seconds)
    pub connection_timeout: u64,
    /// Timeout for inactivity during streaming (seconds)
    pub activity_timeout: u64,
    /// Wall-clock limit for one call, streaming or not (seconds)
    pub request_timeout: u64,
}

impl Default for VlmConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            endpoint: cfg.vlm.endpoint.clone(),
            model: cfg.vlm.model.clone(),
            max_tokens: cfg.vlm.max_tokens,
            connection_timeout: cfg.vlm.connect_timeout,
            activity_timeout: cfg.vlm.activity_timeout,
            request_timeout: cfg.vlm.request_timeout,
        }
    }
}

impl VlmConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn activity_timeout(mut self, seconds: u64) -> Self {
        self.activity_timeout = seconds;
        self
    }

    pub fn request_timeout(mut self, seconds: u64) -> Self {
        self.request_timeout = seconds;
        self
    }
}

/// Check if a VLM endpoint is reachable (connection-only check).
///
/// This only verifies the server accepts connections - it doesn't wait
/// for a completion since vision requests can take 30+ seconds.
pub fn check_health(endpoint: &str, timeout_secs: u64) -> VlmResult<bool> {
    let url = endpoint
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    let host_port = url.split('/').next().unwrap_or("127.0.0.1:8080");

    let output = Command::new("curl")
        .args([
            "-s",
            "-o",
            "/dev/null",
            "-w",
            "%{http_code}",
            "--connect-timeout",
            &timeout_secs.to_string(),
            "--max-time",
            &timeout_secs.to_string(),
            "-I",
            &format!("http://{}", host_port),
        ])
        .output()?;

    // Any response (even 4xx/5xx) means the server is reachable; 000 means it isn't
    let status = String::from_utf8_lossy(&output.stdout);
    let code: u16 = status.trim().parse().unwrap_or(0);
    Ok(code > 0)
}

/// Classify an error payload returned instead of a completion.
///
/// Rate limiting shows up as HTTP 429, `rate limit` or `quota` wording
/// depending on the provider.
pub fn classify_error_body(body: &str) -> VlmError {
    let lowered = body.to_lowercase();
    if lowered.contains("429")
        || lowered.contains("rate limit")
        || lowered.contains("rate_limit")
        || lowered.contains("quota")
    {
        VlmError::RateLimited(truncate(body, 200))
    } else {
        VlmError::ConnectionFailed(truncate(body, 200))
    }
}

/// Kill an abandoned curl and reap it so it does not linger as a zombie
fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect()
}

/// Client for an OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone)]
pub struct VlmClient {
    config: VlmConfig,
}

impl VlmClient {
    pub fn new(config: VlmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VlmConfig {
        &self.config
    }

    fn request_body(&self, image_data: &[u8], prompt: &str, stream: bool) -> VlmResult<String> {
        let img_base64 = base64::engine::general_purpose::STANDARD.encode(image_data);
        let request = serde_json::json!({
            "model": self.config.model,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:image/png;base64,{}", img_base64)
                        }
                    },
                    {
                        "type": "text",
                        "text": prompt
                    }
                ]
            }],
            "max_tokens": self.config.max_tokens,
            "stream": stream
        });
        serde_json::to_string(&request).map_err(|e| VlmError::InvalidResponse(e.to_string()))
    }

    /// Streaming completion; the response text is assembled from SSE deltas
    fn complete_streaming(&self, image_data: &[u8], prompt: &str) -> VlmResult<String> {
        let request_json = self.request_body(image_data, prompt, true)?;

        let mut child = Command::new("curl")
            .args([
                "-s",
                "-N", // Disable buffering for streaming
                "-X",
                "POST",
                &self.config.endpoint,
                "-H",
                "Content-Type: application/json",
                "--data-binary",
                "@-",
                "--connect-timeout",
                &self.config.connection_timeout.to_string(),
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // The body carries a base64 image, too large for an argument list
        if let Some(mut stdin) = child.stdin.take() {
            use std::io::Write;
            stdin.write_all(request_json.as_bytes())?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VlmError::Io("Failed to capture stdout".to_string()))?;

        let (tx, rx) = mpsc::channel();
        let activity_timeout = Duration::from_secs(self.config.activity_timeout);
        let request_timeout = Duration::from_secs(self.config.request_timeout);

        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        });

        let started = Instant::now();
        let mut full_content = String::new();
        let mut other_lines = String::new();
        let mut last_activity = Instant::now();

        loop {
            if started.elapsed() > request_timeout {
                terminate(&mut child);
                return Err(VlmError::RequestTimeout(request_timeout));
            }
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(line)) => {
                    last_activity = Instant::now();

                    let Some(data) = line.strip_prefix("data: ") else {
                        other_lines.push_str(&line);
                        other_lines.push('\n');
                        continue;
                    };
                    if data == "[DONE]" {
                        break;
                    }
                    if let Ok(json) = serde_json::from_str::<serde_json::Value>(data) {
                        if json.get("error").is_some() {
                            terminate(&mut child);
                            return Err(classify_error_body(data));
                        }
                        if let Some(content) = json["choices"][0]["delta"]["content"].as_str() {
                            full_content.push_str(content);
                        }
                    }
                }
                Ok(Err(e)) => {
                    terminate(&mut child);
                    return Err(e.into());
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if last_activity.elapsed() > activity_timeout {
                        terminate(&mut child);
                        return Err(VlmError::ActivityTimeout(activity_timeout));
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        let status = child.wait()?;

        if full_content.is_empty() {
            let body = other_lines.trim();
            if body.contains("\"error\"") || body.contains("429") {
                return Err(classify_error_body(body));
            }
            if !status.success() {
                return Err(VlmError::ConnectionFailed("curl process failed".to_string()));
            }
            // Endpoint ignored "stream": true; retry as a plain request
            debug!("Streaming returned no content, falling back to non-streaming request");
            let remaining = request_timeout.saturating_sub(started.elapsed());
            return self.complete_non_streaming(image_data, prompt, remaining);
        }

        Ok(full_content)
    }

    /// Non-streaming completion for endpoints that don't support SSE
    fn complete_non_streaming(
        &self,
        image_data: &[u8],
        prompt: &str,
        time_budget: Duration,
    ) -> VlmResult<String> {
        let request_json = self.request_body(image_data, prompt, false)?;
        let max_time = time_budget.as_secs().max(1);

        let mut child = Command::new("curl")
            .args([
                "-s",
                "-X",
                "POST",
                &self.config.endpoint,
                "-H",
                "Content-Type: application/json",
                "--data-binary",
                "@-",
                "--connect-timeout",
                &self.config.connection_timeout.to_string(),
                "--max-time",
                &max_time.to_string(),
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            use std::io::Write;
            stdin.write_all(request_json.as_bytes())?;
        }
        let output = child.wait_with_output()?;

        if !output.status.success() {
            // curl exit code 28 is its own timeout
            if output.status.code() == Some(28) {
                return Err(VlmError::RequestTimeout(time_budget));
            }
            return Err(VlmError::ConnectionFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        let response: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| VlmError::InvalidResponse(e.to_string()))?;

        if response.get("error").is_some() {
            return Err(classify_error_body(&response.to_string()));
        }

        response["choices"][0]["message"]["content"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| VlmError::InvalidResponse("Completion has no content".to_string()))
    }
}

impl InferenceService for VlmClient {
    fn generate(&self, prompt: &str, snapshot: &CaptureResult) -> VlmResult<String> {
        self.complete_streaming(&snapshot.image_data, prompt)
    }
}

/// Replays a queue of scripted responses, one per call.
///
/// Once the queue is drained the optional fallback response is returned for
/// every further call; without one, calls fail with `InvalidResponse`.
#[derive(Debug, Default)]
pub struct ScriptedInference {
    queue: RefCell<VecDeque<VlmResult<String>>>,
    fallback: Option<String>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedInference {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: RefCell::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            ..Default::default()
        }
    }

    /// Always answer with `response`
    pub fn repeating(response: impl Into<String>) -> Self {
        Self {
            fallback: Some(response.into()),
            ..Default::default()
        }
    }

    /// Queue an error for the next unanswered call
    pub fn push_error(&self, error: VlmError) {
        self.queue.borrow_mut().push_back(Err(error));
    }

    /// Queue a response for the next unanswered call
    pub fn push_response(&self, response: impl Into<String>) {
        self.queue.borrow_mut().push_back(Ok(response.into()));
    }

    /// Every prompt received so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl InferenceService for ScriptedInference {
    fn generate(&self, prompt: &str, _snapshot: &CaptureResult) -> VlmResult<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        match self.queue.borrow_mut().pop_front() {
            Some(next) => next,
            None => match &self.fallback {
                Some(text) => Ok(text.clone()),
                None => {
                    warn!("Scripted inference exhausted");
                    Err(VlmError::InvalidResponse("script exhausted".to_string()))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> CaptureResult {
        CaptureResult {
            image_data: vec![],
            width: 0,
            height: 0,
            metadata: None,
        }
    }

    #[test]
    fn test_vlm_config_builder() {
        let config = VlmConfig::new("http://localhost:8080")
            .model("llava")
            .max_tokens(200)
            .activity_timeout(30)
            .request_timeout(90);

        assert_eq!(config.endpoint, "http://localhost:8080");
        assert_eq!(config.model, "llava");
        assert_eq!(config.max_tokens, 200);
        assert_eq!(config.activity_timeout, 30);
        assert_eq!(config.request_timeout, 90);
    }

    #[test]
    fn test_classify_error_body_rate_limit() {
        let err = classify_error_body(r#"{"error": {"code": 429, "message": "Too many"}}"#);
        assert!(err.is_rate_limit());
        let err = classify_error_body("Resource has been exhausted (e.g. check quota).");
        assert!(err.is_rate_limit());
    }

    #[test]
    fn test_classify_error_body_other() {
        let err = classify_error_body(r#"{"error": {"message": "model not found"}}"#);
        assert!(matches!(err, VlmError::ConnectionFailed(_)));
    }

    #[test]
    fn test_scripted_inference_order_and_fallback() {
        let scripted = ScriptedInference::new(["first", "second"]);
        assert_eq!(scripted.generate("p1", &snapshot()).unwrap(), "first");
        assert_eq!(scripted.generate("p2", &snapshot()).unwrap(), "second");
        assert!(scripted.generate("p3", &snapshot()).is_err());
        assert_eq!(scripted.prompts(), vec!["p1", "p2", "p3"]);

        let repeating = ScriptedInference::repeating("same");
        assert_eq!(repeating.generate("a", &snapshot()).unwrap(), "same");
        assert_eq!(repeating.generate("b", &snapshot()).unwrap(), "same");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_terminate_reaps_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        terminate(&mut child);
        assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());
    }

    #[test]
    fn test_scripted_inference_queued_error() {
        let scripted = ScriptedInference::repeating("ok");
        scripted.push_error(VlmError::RateLimited("429".into()));
        assert!(scripted.generate("p", &snapshot()).unwrap_err().is_rate_limit());
        assert_eq!(scripted.generate("p", &snapshot()).unwrap(), "ok");
    }
}
