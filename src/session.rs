//! Session records and run directory management.
//!
//! Every suite run gets its own directory under the runs base:
//! - `.run.json` with run metadata
//! - one `session_<id>.json` log per session, written when the session ends
//! - `report.json` once the suite completes
//!
//! Run directories are never removed implicitly; `cleanup_old_runs` prunes
//! them by age.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::outcome::OutcomeKind;
use crate::parser::ActionIntent;
use crate::retry::AttemptRecord;
use crate::validator::Validation;

/// Run metadata written by [`RunDirectory::init`]
pub const RUN_METADATA_FILE: &str = ".run.json";
const REPORT_FILE: &str = "report.json";
const SESSION_LOG_PREFIX: &str = "session_";

/// Summary of a finished session, created once at termination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: String,
    pub persona_id: String,
    pub variant: String,
    pub success: bool,
    pub outcome: OutcomeKind,
    /// Number of steps executed
    pub steps_taken: u32,
    pub total_hesitation: u32,
    /// Seconds spent in inference, every attempt of every step
    pub total_processing_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abandonment_reasoning: Option<String>,
}

/// Full record of one step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepLog {
    pub step_number: u32,
    /// Source of the snapshot shown to the model
    pub snapshot_source: String,
    /// Prompt of the last attempt, correction notices included
    pub prompt: String,
    /// Response of the last attempt that produced one
    pub raw_response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_action: Option<ActionIntent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub hesitation_steps: u32,
    /// Seconds spent in inference for this step, every attempt included
    pub processing_time: f64,
    pub attempts: Vec<AttemptRecord>,
    /// Last error seen in this step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persisted log of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    pub session_id: String,
    pub persona_id: String,
    pub variant: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub steps: Vec<StepLog>,
    /// Outcome label
    pub final_outcome: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abandonment_reasoning: Option<String>,
}

impl SessionLog {
    pub fn steps_taken(&self) -> u32 {
        self.steps.len() as u32
    }

    pub fn total_hesitation(&self) -> u32 {
        self.steps.iter().map(|s| s.hesitation_steps).sum()
    }

    pub fn total_processing_time(&self) -> f64 {
        self.steps.iter().map(|s| s.processing_time).sum()
    }

    /// Read a session log file
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(std::io::Error::from)
    }
}

/// Where finished session logs go
pub trait SessionLogStore {
    /// Persist `log`, returning where it was written
    fn save(&self, log: &SessionLog) -> std::io::Result<PathBuf>;
}

/// A run directory holding session logs and the suite report
#[derive(Debug, Clone)]
pub struct RunDirectory {
    /// Unique run ID
    pub id: String,
    /// Root directory for this run
    pub dir: PathBuf,
}

impl RunDirectory {
    /// A new run named `<name>_<timestamp>` under `base`
    pub fn with_name(base: impl AsRef<Path>, name: &str) -> Self {
        let id = format!("{}_{}", sanitize_name(name), generate_timestamp_suffix());
        let dir = base.as_ref().join(&id);
        Self { id, dir }
    }

    /// An existing (or user-chosen) directory
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("run_{}", generate_timestamp_suffix()));
        Self { id, dir }
    }

    /// Create the directory and write run metadata
    pub fn init(&self, config: &serde_json::Value) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let metadata = serde_json::json!({
            "id": self.id,
            "created": Utc::now().to_rfc3339(),
            "config": config,
        });
        fs::write(
            self.dir.join(RUN_METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;
        Ok(())
    }

    /// Path of the log for `session_id`
    pub fn session_log_path(&self, session_id: &str) -> PathBuf {
        let name = sanitize_name(session_id);
        if name.starts_with(SESSION_LOG_PREFIX) {
            self.dir.join(format!("{name}.json"))
        } else {
            self.dir.join(format!("{SESSION_LOG_PREFIX}{name}.json"))
        }
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join(REPORT_FILE)
    }

    /// All session log files in the run, sorted by name
    pub fn list_session_logs(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut logs = Vec::new();
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let path = entry?.path();
                let is_log = path
                    .file_name()
                    .map(|n| n.to_string_lossy())
                    .map(|n| n.starts_with(SESSION_LOG_PREFIX) && n.ends_with(".json"))
                    .unwrap_or(false);
                if is_log {
                    logs.push(path);
                }
            }
        }
        logs.sort();
        Ok(logs)
    }
}

impl SessionLogStore for RunDirectory {
    fn save(&self, log: &SessionLog) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.session_log_path(&log.session_id);
        fs::write(&path, serde_json::to_string_pretty(log)?)?;
        Ok(path)
    }
}

fn generate_timestamp_suffix() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Sanitize a name for use in filenames
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Remove run directories under `base` last modified at least `max_age` ago
pub fn cleanup_old_runs(base: &Path, max_age: Duration) -> std::io::Result<usize> {
    if !base.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut cleaned = 0;

    for entry in fs::read_dir(base)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if matches!(age, Some(age) if age >= max_age) && fs::remove_dir_all(&path).is_ok() {
            cleaned += 1;
        }
    }

    Ok(cleaned)
}

/// List run directories under `base`
pub fn list_runs(base: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    for entry in fs::read_dir(base)? {
        let path = entry?.path();
        if path.is_dir() {
            runs.push(path);
        }
    }
    runs.sort();
    Ok(runs)
}
