//! Bounded retry policies for the two failure classes of a session step.
//!
//! - [`InferenceRetryPolicy`] retries transient inference errors with a fixed
//!   backoff, escalated when the endpoint signals rate limiting.
//! - [`ParseRetryPolicy`] re-runs the whole inference call when the response
//!   cannot be parsed, appending a correction notice to the prompt. No backoff.
//!
//! The engine nests the first inside the second, so each bound can be tuned
//! and tested on its own.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{error, warn};

use crate::prompt::CORRECTION_NOTICE;
use crate::snapshot::CaptureResult;
use crate::vlm::{InferenceService, VlmError};

/// Default number of attempts for an inference call
pub const DEFAULT_INFERENCE_ATTEMPTS: u32 = 3;

/// Default delay before retrying a failed inference call (seconds)
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// Default delay before retrying after a rate-limit signal (seconds)
pub const DEFAULT_RATE_LIMIT_DELAY_SECS: u64 = 60;

/// Default number of inference-and-parse attempts per step
pub const DEFAULT_PARSE_ATTEMPTS: u32 = 3;

/// One inference attempt as recorded in the step log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number within the step
    pub attempt: u32,
    /// Seconds spent waiting for the inference service
    pub latency: f64,
    /// Failure text, when the attempt failed
    pub error: Option<String>,
}

/// Outcome of a retried inference call
#[derive(Debug)]
pub struct InferenceOutcome {
    /// The completion, or the last error once attempts were exhausted
    pub result: Result<String, VlmError>,
    /// Sum of latencies over every attempt
    pub total_latency: Duration,
    /// One record per attempt made
    pub attempts: Vec<AttemptRecord>,
}

/// Retry policy for transient inference failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceRetryPolicy {
    pub max_attempts: u32,
    /// Delay before retrying an ordinary failure (seconds)
    pub retry_delay_secs: u64,
    /// Delay before retrying after a rate-limit signal (seconds)
    pub rate_limit_delay_secs: u64,
}

impl Default for InferenceRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_INFERENCE_ATTEMPTS,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            rate_limit_delay_secs: DEFAULT_RATE_LIMIT_DELAY_SECS,
        }
    }
}

impl InferenceRetryPolicy {
    /// A policy that retries without sleeping, for tests and scripted runs
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            retry_delay_secs: 0,
            rate_limit_delay_secs: 0,
        }
    }

    /// How long to wait before retrying after `err`
    pub fn delay_for(&self, err: &VlmError) -> Duration {
        if err.is_rate_limit() {
            Duration::from_secs(self.rate_limit_delay_secs)
        } else {
            Duration::from_secs(self.retry_delay_secs)
        }
    }

    /// Call `service` until it answers or attempts run out
    pub fn call<S: InferenceService + ?Sized>(
        &self,
        service: &S,
        prompt: &str,
        snapshot: &CaptureResult,
    ) -> InferenceOutcome {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = Vec::new();
        let mut total_latency = Duration::ZERO;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let started = Instant::now();
            let result = service.generate(prompt, snapshot);
            let latency = started.elapsed();
            total_latency += latency;

            match result {
                Ok(text) => {
                    attempts.push(AttemptRecord {
                        attempt,
                        latency: latency.as_secs_f64(),
                        error: None,
                    });
                    return InferenceOutcome {
                        result: Ok(text),
                        total_latency,
                        attempts,
                    };
                }
                Err(err) => {
                    attempts.push(AttemptRecord {
                        attempt,
                        latency: latency.as_secs_f64(),
                        error: Some(format!("Inference error: {err}")),
                    });
                    if attempt < max_attempts {
                        let delay = self.delay_for(&err);
                        warn!(attempt, max_attempts, error = %err, ?delay, "Inference call failed, retrying");
                        if !delay.is_zero() {
                            std::thread::sleep(delay);
                        }
                    } else {
                        error!(attempts = max_attempts, error = %err, "Inference call failed on every attempt");
                    }
                    last_error = Some(err);
                }
            }
        }

        InferenceOutcome {
            result: Err(last_error
                .unwrap_or_else(|| VlmError::InvalidResponse("no attempt made".to_string()))),
            total_latency,
            attempts,
        }
    }
}

/// Retry policy for unparseable responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseRetryPolicy {
    pub max_attempts: u32,
}

impl Default for ParseRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_PARSE_ATTEMPTS,
        }
    }
}

impl ParseRetryPolicy {
    /// The prompt for `attempt` (1-based): one correction notice per failed attempt
    pub fn prompt_for_attempt(&self, base_prompt: &str, attempt: u32) -> String {
        let mut prompt = base_prompt.to_string();
        for _ in 1..attempt {
            prompt.push_str("\n\n");
            prompt.push_str(CORRECTION_NOTICE);
        }
        prompt
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vlm::ScriptedInference;

    fn snapshot() -> CaptureResult {
        CaptureResult {
            image_data: vec![],
            width: 0,
            height: 0,
            metadata: None,
        }
    }

    #[test]
    fn test_delay_escalates_on_rate_limit() {
        let policy = InferenceRetryPolicy::default();
        assert_eq!(
            policy.delay_for(&VlmError::ConnectionFailed("reset".into())),
            Duration::from_secs(5)
        );
        assert_eq!(
            policy.delay_for(&VlmError::RateLimited("429".into())),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_call_recovers_after_transient_error() {
        let service = ScriptedInference::repeating("answer");
        service.push_error(VlmError::ConnectionFailed("reset".into()));

        let outcome = InferenceRetryPolicy::immediate(3).call(&service, "prompt", &snapshot());
        assert_eq!(outcome.result.unwrap(), "answer");
        assert_eq!(outcome.attempts.len(), 2);
        assert!(outcome.attempts[0].error.is_some());
        assert!(outcome.attempts[1].error.is_none());
    }

    #[test]
    fn test_call_gives_up_after_max_attempts() {
        let service = ScriptedInference::new(Vec::<String>::new());
        let outcome = InferenceRetryPolicy::immediate(2).call(&service, "prompt", &snapshot());
        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(service.prompts().len(), 2);
    }

    #[test]
    fn test_prompt_for_attempt_appends_one_notice_per_retry() {
        let policy = ParseRetryPolicy::default();
        assert_eq!(policy.prompt_for_attempt("base", 1), "base");
        let third = policy.prompt_for_attempt("base", 3);
        assert_eq!(third.matches(CORRECTION_NOTICE).count(), 2);
        assert!(third.starts_with("base"));
    }
}
