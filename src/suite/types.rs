use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::elements::TaskDefinition;
use crate::engine::{DEFAULT_MAX_STEPS, EngineError, EngineSettings};
use crate::prompt::PromptBuilder;
use crate::retry::{InferenceRetryPolicy, ParseRetryPolicy};
use crate::snapshot::SnapshotError;

/// Default persona attributes used for the demographic breakdown
pub const DEFAULT_DEMOGRAPHICS: &[&str] = &["age_group", "gender", "income_group"];

/// One UI variant under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantConfig {
    /// Short label used in session ids and reports (e.g., "A")
    pub label: String,

    /// Human-readable name (e.g., "Control")
    #[serde(default)]
    pub name: String,

    /// JSON file with the variant's clickable elements
    pub elements: PathBuf,

    /// Screenshot of the variant; a wireframe is rendered when absent
    #[serde(default)]
    pub image: Option<PathBuf>,
}

impl VariantConfig {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.label } else { &self.name }
    }
}

/// Configuration for a suite run, loaded from a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Run name, used as the run directory prefix
    #[serde(default = "default_name")]
    pub name: String,

    /// Directory of persona JSON files
    pub personas_dir: PathBuf,

    /// Number of personas to sample; all of them when absent
    #[serde(default)]
    pub persona_count: Option<usize>,

    /// Seed for persona sampling
    #[serde(default)]
    pub seed: Option<u64>,

    /// Sessions per persona per variant
    #[serde(default = "default_iterations")]
    pub iterations: u32,

    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Variants in run order; the first one is the baseline for comparisons
    pub variants: Vec<VariantConfig>,

    #[serde(default)]
    pub task: TaskDefinition,

    /// Step at which the persona is interrupted
    #[serde(default)]
    pub distraction_step: Option<u32>,

    #[serde(default)]
    pub primary_goal: Option<String>,

    #[serde(default)]
    pub inference_retry: InferenceRetryPolicy,

    #[serde(default)]
    pub parse_retry: ParseRetryPolicy,

    /// Persona attributes to break results down by
    #[serde(default = "default_demographics")]
    pub demographics: Vec<String>,
}

fn default_name() -> String {
    "ab_test".to_string()
}

fn default_iterations() -> u32 {
    1
}

fn default_max_steps() -> u32 {
    DEFAULT_MAX_STEPS
}

fn default_demographics() -> Vec<String> {
    DEFAULT_DEMOGRAPHICS.iter().map(|s| s.to_string()).collect()
}

impl SuiteConfig {
    /// Load a suite file, resolving relative paths against its directory
    pub fn load(path: impl AsRef<Path>) -> SuiteResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SuiteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: SuiteConfig =
            serde_json::from_str(&raw).map_err(|source| SuiteError::InvalidJson {
                path: path.to_path_buf(),
                source,
            })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.validate()?;
        Ok(config)
    }

    /// Make every relative path absolute with respect to `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.personas_dir);
        for variant in &mut self.variants {
            resolve(&mut variant.elements);
            if let Some(image) = variant.image.as_mut() {
                resolve(image);
            }
        }
    }

    pub fn validate(&self) -> SuiteResult<()> {
        if self.variants.is_empty() {
            return Err(SuiteError::InvalidConfig("at least one variant is required".into()));
        }
        let mut seen = HashSet::new();
        for variant in &self.variants {
            if variant.label.trim().is_empty() {
                return Err(SuiteError::InvalidConfig("variant label must not be empty".into()));
            }
            if !seen.insert(variant.label.as_str()) {
                return Err(SuiteError::InvalidConfig(format!(
                    "duplicate variant label '{}'",
                    variant.label
                )));
            }
        }
        if self.iterations == 0 {
            return Err(SuiteError::InvalidConfig("iterations must be at least 1".into()));
        }
        if self.max_steps == 0 {
            return Err(SuiteError::InvalidConfig("max_steps must be at least 1".into()));
        }
        if self.persona_count == Some(0) {
            return Err(SuiteError::InvalidConfig("persona_count must be at least 1".into()));
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_steps: self.max_steps,
            inference_retry: self.inference_retry.clone(),
            parse_retry: self.parse_retry.clone(),
        }
    }

    pub fn prompt_builder(&self) -> PromptBuilder {
        PromptBuilder::new()
            .with_distraction_step(self.distraction_step)
            .with_primary_goal(self.primary_goal.clone())
    }
}

/// Result type for suite operations
pub type SuiteResult<T> = Result<T, SuiteError>;

/// Errors that abort a suite run
#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid suite configuration: {0}")]
    InvalidConfig(String),

    #[error("No personas could be loaded from {0}")]
    NoPersonas(PathBuf),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Session error: {0}")]
    Engine(#[from] EngineError),
}
