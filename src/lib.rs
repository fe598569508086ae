//! Persona A/B - persona-driven A/B testing of UI variants with a vision model.
//!
//! This crate provides:
//! - Persona loading and prompt construction for simulated users
//! - A tolerant parser turning free-form model output into actions
//! - A session engine with bounded inference and parse retries
//! - Per-variant metrics, comparisons and a suite report
//! - Static-image and wireframe capture backends for variant snapshots
//! - Run directories holding every session log
//!
//! # Example
//!
//! ```rust,no_run
//! use persona_ab::suite::{SuiteConfig, SuiteRunner};
//! use persona_ab::session::RunDirectory;
//! use persona_ab::vlm::{VlmClient, VlmConfig};
//!
//! let config = SuiteConfig::load("suite.json").unwrap();
//! let client = VlmClient::new(VlmConfig::default());
//! let run = RunDirectory::with_name("./results", &config.name);
//! let report = SuiteRunner::new(config, &client, run).run().unwrap();
//! println!("{}", report.to_markdown());
//! ```

pub mod config;
pub mod elements;
pub mod engine;
pub mod metrics;
pub mod outcome;
pub mod parser;
pub mod persona;
pub mod prompt;
pub mod retry;
pub mod session;
pub mod snapshot;
pub mod suite;
pub mod validator;
pub mod vlm;

pub use elements::{ElementSet, TaskDefinition, UiElement};
pub use engine::{EngineError, EngineSettings, SessionEngine};
pub use metrics::{MetricsSummary, VariantMetrics};
pub use outcome::{OutcomeClassifier, OutcomeKind};
pub use parser::{ActionIntent, ParseError, ParsedResponse, parse_response, repair_json};
pub use persona::{Persona, load_personas};
pub use prompt::{CORRECTION_NOTICE, HistoryEntry, PromptBuilder};
pub use retry::{InferenceRetryPolicy, ParseRetryPolicy};
pub use session::{RunDirectory, SessionLog, SessionLogStore, SessionResult, StepLog, cleanup_old_runs, list_runs};
pub use snapshot::{CaptureBackend, CaptureResult, SnapshotError, SnapshotResult, StaticImageBackend, WireframeBackend};
pub use suite::{SuiteConfig, SuiteError, SuiteReport, SuiteResult, SuiteRunner};
pub use validator::{Validation, validate};
pub use vlm::{InferenceService, ScriptedInference, VlmClient, VlmConfig, VlmError, VlmResult, check_health};
