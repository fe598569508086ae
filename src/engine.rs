//! The per-session step loop.
//!
//! Each step: capture a snapshot, build the prompt, run inference and parsing
//! under their retry policies, validate the action and classify the outcome.
//! Non-terminal steps feed the session history for the next prompt. When the
//! session ends its full log is written through a [`SessionLogStore`].
//!
//! Model misbehaviour never surfaces as an [`EngineError`]; it becomes an
//! outcome. Engine errors are reserved for capture and persistence failures.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::elements::{ElementSet, TaskDefinition};
use crate::outcome::{OutcomeClassifier, OutcomeKind, SessionState, StepEvent};
use crate::parser::{ActionIntent, ParsedResponse, parse_response};
use crate::persona::Persona;
use crate::prompt::{HistoryEntry, PromptBuilder};
use crate::retry::{InferenceRetryPolicy, ParseRetryPolicy};
use crate::session::{SessionLog, SessionLogStore, SessionResult, StepLog, sanitize_name};
use crate::snapshot::{CaptureBackend, CaptureResult, SnapshotError};
use crate::validator::validate;
use crate::vlm::InferenceService;

/// Default step cap per session
pub const DEFAULT_MAX_STEPS: u32 = 5;

/// Errors that abort a session without a classified outcome
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Snapshot capture failed: {0}")]
    Capture(#[from] SnapshotError),
    #[error("Failed to write log for {session_id}: {source}")]
    Persist {
        session_id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Knobs for a session run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub max_steps: u32,
    pub inference_retry: InferenceRetryPolicy,
    pub parse_retry: ParseRetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            inference_retry: InferenceRetryPolicy::default(),
            parse_retry: ParseRetryPolicy::default(),
        }
    }
}

/// Runs sessions against an injected inference service
pub struct SessionEngine<'a> {
    service: &'a dyn InferenceService,
    store: &'a dyn SessionLogStore,
    prompts: PromptBuilder,
    classifier: OutcomeClassifier,
    task: TaskDefinition,
    settings: EngineSettings,
}

impl<'a> SessionEngine<'a> {
    pub fn new(
        service: &'a dyn InferenceService,
        store: &'a dyn SessionLogStore,
        task: TaskDefinition,
        settings: EngineSettings,
    ) -> Self {
        Self {
            service,
            store,
            prompts: PromptBuilder::default(),
            classifier: OutcomeClassifier::new(task.clone(), settings.max_steps),
            task,
            settings,
        }
    }

    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run one session of `persona` against `variant`.
    ///
    /// `capture` is queried once per step. The session log is persisted before
    /// the result is returned.
    pub fn run_session(
        &self,
        persona: &Persona,
        variant: &str,
        elements: &ElementSet,
        capture: &mut dyn CaptureBackend,
        iteration: u32,
    ) -> Result<SessionResult, EngineError> {
        let started_at = Utc::now();
        let session_id = session_id(&started_at, &persona.persona_id, variant, iteration);
        info!(
            session_id = %session_id,
            persona_id = %persona.persona_id,
            persona = %persona.name,
            variant,
            "Starting session"
        );

        let mut history: Vec<HistoryEntry> = Vec::new();
        let mut steps: Vec<StepLog> = Vec::new();
        let mut total_hesitation = 0u32;
        let mut total_processing_time = 0.0f64;
        let mut outcome = OutcomeKind::AbandonedMaxSteps;
        let mut abandonment_reasoning = None;

        for step in 1..=self.settings.max_steps {
            let snapshot = capture.capture()?;
            let base_prompt = self.prompts.build(persona, &history, elements, step);
            let mut step_log = StepLog {
                step_number: step,
                snapshot_source: capture.source_type().to_string(),
                ..Default::default()
            };

            let parsed = self.infer_and_parse(&session_id, step, &base_prompt, &snapshot, &mut step_log);
            total_processing_time += step_log.processing_time;

            let transition = match parsed {
                None => self.classifier.classify(step, StepEvent::Exhausted),
                Some(ParsedResponse {
                    action,
                    reasoning,
                    hesitation,
                    ..
                }) => {
                    let validation = validate(&action, elements, &self.task);
                    if !validation.is_valid() {
                        warn!(session_id = %session_id, step, ?action, "Invalid action, continuing");
                    }
                    total_hesitation += hesitation;

                    let transition = self.classifier.classify(
                        step,
                        StepEvent::Acted {
                            action: &action,
                            validation,
                            reasoning: &reasoning,
                        },
                    );
                    debug!(session_id = %session_id, step, ?action, ?validation, state = ?transition.state, "Step classified");

                    step_log.parsed_action = Some(action.clone());
                    step_log.validation = Some(validation);
                    step_log.valid = Some(validation.is_valid());
                    step_log.reasoning = Some(reasoning.clone());
                    step_log.hesitation_steps = hesitation;

                    if !transition.state.is_terminal() && matches!(action, ActionIntent::Click { .. }) {
                        history.push(HistoryEntry { action, reasoning });
                    }
                    transition
                }
            };
            steps.push(step_log);

            if let SessionState::Finished(kind) = transition.state {
                outcome = kind;
                abandonment_reasoning = transition.abandonment_reasoning;
                break;
            }
        }

        let result = SessionResult {
            session_id: session_id.clone(),
            persona_id: persona.persona_id.clone(),
            variant: variant.to_string(),
            success: outcome.is_success(),
            outcome,
            steps_taken: steps.len() as u32,
            total_hesitation,
            total_processing_time,
            abandonment_reasoning: abandonment_reasoning.clone(),
        };

        let log = SessionLog {
            session_id: session_id.clone(),
            persona_id: persona.persona_id.clone(),
            variant: variant.to_string(),
            started_at,
            finished_at: Utc::now(),
            steps,
            final_outcome: outcome.as_str().to_string(),
            success: result.success,
            abandonment_reasoning,
        };
        let path = self.store.save(&log).map_err(|source| EngineError::Persist {
            session_id: session_id.clone(),
            source,
        })?;

        info!(
            session_id = %session_id,
            outcome = %outcome,
            steps = result.steps_taken,
            hesitation = total_hesitation,
            processing_time_secs = total_processing_time,
            log = %path.display(),
            "Session finished"
        );
        Ok(result)
    }

    /// Parse-retry loop around the inference-retry loop.
    ///
    /// Returns `None` when inference fails outright or every parse attempt
    /// fails. Attempts, latencies and errors are recorded in `step_log`.
    fn infer_and_parse(
        &self,
        session_id: &str,
        step: u32,
        base_prompt: &str,
        snapshot: &CaptureResult,
        step_log: &mut StepLog,
    ) -> Option<ParsedResponse> {
        let parse_attempts = self.settings.parse_retry.attempts();

        for attempt in 1..=parse_attempts {
            let prompt = self.settings.parse_retry.prompt_for_attempt(base_prompt, attempt);
            debug!(session_id, step, attempt, prompt_len = prompt.len(), "Requesting action");

            let outcome = self.settings.inference_retry.call(self.service, &prompt, snapshot);
            step_log.prompt = prompt;
            step_log.processing_time += outcome.total_latency.as_secs_f64();
            let inference_attempts = outcome.attempts.len();
            for mut record in outcome.attempts {
                record.attempt = step_log.attempts.len() as u32 + 1;
                step_log.attempts.push(record);
            }

            let raw = match outcome.result {
                Ok(raw) => raw,
                Err(e) => {
                    error!(session_id, step, error = %e, "Inference failed, ending session");
                    step_log.error = Some(format!(
                        "Inference error after {inference_attempts} attempts: {e}"
                    ));
                    return None;
                }
            };

            match parse_response(&raw) {
                Ok(parsed) => {
                    step_log.raw_response = raw;
                    return Some(parsed);
                }
                Err(e) => {
                    warn!(session_id, step, attempt, parse_attempts, error = %e, "Response parsing failed");
                    let message = format!("Parsing failed on attempt {attempt}: {e}");
                    if let Some(last) = step_log.attempts.last_mut() {
                        last.error = Some(message.clone());
                    }
                    step_log.raw_response = raw;
                    step_log.error = Some(message);
                }
            }
        }

        error!(session_id, step, attempts = parse_attempts, "No parseable response, ending session");
        None
    }
}

/// `session_<YYYYmmddHHMMSS>_<persona>_<variant>_<iteration>`, filename safe
pub fn session_id(
    started_at: &chrono::DateTime<Utc>,
    persona_id: &str,
    variant: &str,
    iteration: u32,
) -> String {
    sanitize_name(&format!(
        "session_{}_{}_{}_{}",
        started_at.format("%Y%m%d%H%M%S"),
        persona_id,
        variant,
        iteration
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::UiElement;
    use crate::session::RunDirectory;
    use crate::snapshot::WireframeBackend;
    use crate::vlm::{ScriptedInference, VlmError};

    fn elements() -> ElementSet {
        ElementSet::new(vec![
            UiElement::new("Checkout button", "cart"),
            UiElement::new("Cart", "header"),
            UiElement::new("Cancel purchase", "footer"),
        ])
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            max_steps: 5,
            inference_retry: InferenceRetryPolicy::immediate(3),
            parse_retry: ParseRetryPolicy::default(),
        }
    }

    fn click(text: &str) -> String {
        format!("REASONING:\n1. Looking around.\n2. Decided.\nACTION:\n{{\"text\": \"{text}\", \"context\": \"\"}}")
    }

    #[test]
    fn test_session_id_is_filename_safe() {
        let ts = chrono::DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(session_id(&ts, "cust 1", "A/B", 2), "session_20260102030405_cust_1_A_B_2");
    }

    #[test]
    fn test_inference_exhaustion_is_parsing_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunDirectory::in_dir(dir.path());
        let service = ScriptedInference::new(Vec::<String>::new());
        for _ in 0..3 {
            service.push_error(VlmError::ConnectionFailed("refused".into()));
        }
        let engine = SessionEngine::new(&service, &store, TaskDefinition::default(), settings());
        let set = elements();
        let mut capture = WireframeBackend::new("A", &set);

        let result = engine
            .run_session(&Persona::new("p1", "Ana"), "A", &set, &mut capture, 0)
            .unwrap();
        assert_eq!(result.outcome, OutcomeKind::ParsingError);
        assert_eq!(result.steps_taken, 1);
        assert_eq!(service.prompts().len(), 3);

        let log = SessionLog::read(&store.session_log_path(&result.session_id)).unwrap();
        assert_eq!(log.steps[0].attempts.len(), 3);
        assert!(log.steps[0].error.as_deref().unwrap().contains("Inference error"));
    }

    #[test]
    fn test_parse_retry_recovers_within_step() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunDirectory::in_dir(dir.path());
        let service = ScriptedInference::new(["not json at all".to_string(), click("Checkout button")]);
        let engine = SessionEngine::new(&service, &store, TaskDefinition::default(), settings());
        let set = elements();
        let mut capture = WireframeBackend::new("A", &set);

        let result = engine
            .run_session(&Persona::new("p1", "Ana"), "A", &set, &mut capture, 0)
            .unwrap();
        assert_eq!(result.outcome, OutcomeKind::Converted);
        assert!(result.success);
        assert_eq!(result.total_hesitation, 2);

        let prompts = service.prompts();
        assert!(!prompts[0].contains(crate::prompt::CORRECTION_NOTICE));
        assert!(prompts[1].contains(crate::prompt::CORRECTION_NOTICE));

        let log = SessionLog::read(&store.session_log_path(&result.session_id)).unwrap();
        assert_eq!(log.steps[0].attempts.len(), 2);
        assert_eq!(log.steps[0].attempts[1].attempt, 2);
        assert!(log.steps[0].attempts[0].error.is_some());
    }
}
