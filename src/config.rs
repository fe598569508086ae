//! Configuration management with environment variable support.
//!
//! This module provides the process-level configuration for persona-ab:
//! - Environment variables for the inference endpoint and run storage
//! - Sensible defaults for every value
//! - Builder-style overrides for programmatic use
//!
//! Suite-level parameters (personas, variants, task definition) live in the
//! suite file, see [`crate::suite::SuiteConfig`].
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `PERSONA_AB_VLM_ENDPOINT` | Chat-completions endpoint URL | `http://127.0.0.1:8080/v1/chat/completions` |
//! | `PERSONA_AB_VLM_MODEL` | Model name | `qwen3` |
//! | `PERSONA_AB_VLM_MAX_TOKENS` | Maximum tokens in a response | `1024` |
//! | `PERSONA_AB_VLM_CONNECT_TIMEOUT` | Connection timeout in seconds | `10` |
//! | `PERSONA_AB_VLM_TIMEOUT` | Streaming inactivity timeout in seconds | `60` |
//! | `PERSONA_AB_VLM_REQUEST_TIMEOUT` | Wall-clock limit per inference call in seconds | `120` |
//! | `PERSONA_AB_RUNS_DIR` | Base directory for run output | `./results` |
//!
//! # Example
//!
//! ```bash
//! export PERSONA_AB_VLM_ENDPOINT="http://localhost:11434/v1/chat/completions"
//! export PERSONA_AB_VLM_MODEL="llava"
//! export PERSONA_AB_RUNS_DIR="/var/tmp/persona-ab"
//! ```

use std::env;
use std::sync::OnceLock;

// ============================================================================
// Default Values
// ============================================================================

/// Default inference API endpoint
pub const DEFAULT_VLM_ENDPOINT: &str = "http://127.0.0.1:8080/v1/chat/completions";

/// Default model name
pub const DEFAULT_VLM_MODEL: &str = "qwen3";

/// Default max tokens for model responses
pub const DEFAULT_VLM_MAX_TOKENS: u32 = 1024;

/// Default connection timeout (seconds)
pub const DEFAULT_VLM_CONNECT_TIMEOUT: u64 = 10;

/// Default streaming inactivity timeout (seconds)
pub const DEFAULT_VLM_ACTIVITY_TIMEOUT: u64 = 60;

/// Default wall-clock limit for a single inference call (seconds)
pub const DEFAULT_VLM_REQUEST_TIMEOUT: u64 = 120;

/// Default base directory for runs
pub const DEFAULT_RUNS_DIR: &str = "./results";

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Environment variable for the inference endpoint
pub const ENV_VLM_ENDPOINT: &str = "PERSONA_AB_VLM_ENDPOINT";

/// Environment variable for the model name
pub const ENV_VLM_MODEL: &str = "PERSONA_AB_VLM_MODEL";

/// Environment variable for max tokens
pub const ENV_VLM_MAX_TOKENS: &str = "PERSONA_AB_VLM_MAX_TOKENS";

/// Environment variable for the connection timeout
pub const ENV_VLM_CONNECT_TIMEOUT: &str = "PERSONA_AB_VLM_CONNECT_TIMEOUT";

/// Environment variable for the inactivity timeout
pub const ENV_VLM_ACTIVITY_TIMEOUT: &str = "PERSONA_AB_VLM_TIMEOUT";

/// Environment variable for the per-call request timeout
pub const ENV_VLM_REQUEST_TIMEOUT: &str = "PERSONA_AB_VLM_REQUEST_TIMEOUT";

/// Environment variable for the runs directory
pub const ENV_RUNS_DIR: &str = "PERSONA_AB_RUNS_DIR";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Process-level configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Inference endpoint configuration
    pub vlm: VlmSettings,
    /// Run storage configuration
    pub runs: RunSettings,
}

/// Inference-related settings
#[derive(Debug, Clone)]
pub struct VlmSettings {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Maximum tokens in response
    pub max_tokens: u32,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
    /// Inactivity timeout during streaming (seconds)
    pub activity_timeout: u64,
    /// Wall-clock limit for one call (seconds)
    pub request_timeout: u64,
}

/// Run storage settings
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Base directory under which each run gets its own directory
    pub base_dir: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            vlm: VlmSettings::from_env(),
            runs: RunSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            vlm: VlmSettings::defaults(),
            runs: RunSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl VlmSettings {
    /// Create inference settings from environment variables
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_VLM_ENDPOINT)
                .unwrap_or_else(|_| DEFAULT_VLM_ENDPOINT.to_string()),
            model: env::var(ENV_VLM_MODEL).unwrap_or_else(|_| DEFAULT_VLM_MODEL.to_string()),
            max_tokens: parse_env(ENV_VLM_MAX_TOKENS).unwrap_or(DEFAULT_VLM_MAX_TOKENS),
            connect_timeout: parse_env(ENV_VLM_CONNECT_TIMEOUT)
                .unwrap_or(DEFAULT_VLM_CONNECT_TIMEOUT),
            activity_timeout: parse_env(ENV_VLM_ACTIVITY_TIMEOUT)
                .unwrap_or(DEFAULT_VLM_ACTIVITY_TIMEOUT),
            request_timeout: parse_env(ENV_VLM_REQUEST_TIMEOUT)
                .unwrap_or(DEFAULT_VLM_REQUEST_TIMEOUT),
        }
    }

    /// Create inference settings with defaults
    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_VLM_ENDPOINT.to_string(),
            model: DEFAULT_VLM_MODEL.to_string(),
            max_tokens: DEFAULT_VLM_MAX_TOKENS,
            connect_timeout: DEFAULT_VLM_CONNECT_TIMEOUT,
            activity_timeout: DEFAULT_VLM_ACTIVITY_TIMEOUT,
            request_timeout: DEFAULT_VLM_REQUEST_TIMEOUT,
        }
    }
}

impl RunSettings {
    /// Create run settings from environment variables
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_RUNS_DIR).unwrap_or_else(|_| DEFAULT_RUNS_DIR.to_string()),
        }
    }

    /// Create run settings with defaults
    pub fn defaults() -> Self {
        Self {
            base_dir: DEFAULT_RUNS_DIR.to_string(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Read and parse a numeric environment variable, ignoring malformed values
fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.vlm.endpoint, DEFAULT_VLM_ENDPOINT);
        assert_eq!(config.vlm.model, DEFAULT_VLM_MODEL);
        assert_eq!(config.vlm.request_timeout, DEFAULT_VLM_REQUEST_TIMEOUT);
        assert_eq!(config.runs.base_dir, DEFAULT_RUNS_DIR);
    }

    #[test]
    fn test_parse_env_missing_variable() {
        let value: Option<u64> = parse_env("PERSONA_AB_TEST_DEFINITELY_UNSET");
        assert_eq!(value, None);
    }

    #[test]
    fn test_request_timeout_exceeds_activity_timeout() {
        let settings = VlmSettings::defaults();
        assert!(settings.request_timeout > settings.activity_timeout);
    }
}
