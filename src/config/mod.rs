use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{redline_error, RedlineError, Result};

/// Primary API key environment variable.
pub const API_KEY_ENV: &str = "REDLINE_API_KEY";
/// Secondary key, tried when the primary is unset.
pub const API_KEY_FALLBACK_ENV: &str = "REDLINE_API_KEY_FALLBACK";
/// Optional endpoint override.
pub const API_BASE_ENV: &str = "REDLINE_API_BASE";
/// Optional model override.
pub const MODEL_ENV: &str = "REDLINE_MODEL";

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1/chat/completions";

/// Pipeline settings, assembled from defaults + redline.toml + environment.
/// CLI flags override individual fields after loading.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model: String,
    pub api_base: String,
    /// Estimated-token budget for a single prompt before chunking kicks in.
    pub token_budget: usize,
    /// Re-request budget for transport/empty/parse failures.
    pub max_json_retries: u32,
    pub attempt_timeout_secs: u64,
    pub total_timeout_secs: u64,
    /// Backoff ceiling between LLM retries.
    pub backoff_cap_secs: u64,
    pub run_timeout_secs: u64,
    pub output_dir: PathBuf,
    pub create_backup: bool,
    pub auto_rollback: bool,
    /// Policy knob: when `apply_template` names a template the driver does
    /// not know, `true` falls back to the built-in default style set and
    /// `false` fails the task.
    pub template_fallback: bool,
    /// Backup files older than this many days are eligible for cleanup.
    pub retention_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: "gpt-5".to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            token_budget: 100_000,
            max_json_retries: 2,
            attempt_timeout_secs: 120,
            total_timeout_secs: 600,
            backoff_cap_secs: 30,
            run_timeout_secs: 1800,
            output_dir: PathBuf::from("output"),
            create_backup: true,
            auto_rollback: true,
            template_fallback: false,
            retention_days: 7,
        }
    }
}

impl Settings {
    /// Load settings: defaults, then `redline.toml` (when present), then
    /// environment overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Settings> {
        let mut settings = match config_path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new("redline.toml");
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Settings::default()
                }
            }
        };

        if let Ok(model) = std::env::var(MODEL_ENV) {
            if !model.is_empty() {
                settings.model = model;
            }
        }
        if let Ok(base) = std::env::var(API_BASE_ENV) {
            if !base.is_empty() {
                settings.api_base = base;
            }
        }

        Ok(settings)
    }

    fn from_file(path: &Path) -> Result<Settings> {
        let raw = std::fs::read_to_string(path).map_err(|e| RedlineError::Configuration {
            message: format!("cannot read {}: {e}", path.display()),
            location: snafu::Location::default(),
        })?;
        toml::from_str(&raw).map_err(|e| RedlineError::Configuration {
            message: format!("malformed {}: {e}", path.display()),
            location: snafu::Location::default(),
        })
    }
}

/// Resolve the API bearer token from a caller-supplied map or the
/// environment. Missing credentials are a `Configuration` error so the
/// pipeline can refuse to start.
pub fn resolve_api_key(supplied: Option<&HashMap<String, String>>) -> Result<String> {
    if let Some(map) = supplied {
        for key in [API_KEY_ENV, API_KEY_FALLBACK_ENV] {
            if let Some(value) = map.get(key) {
                if !value.is_empty() {
                    return Ok(value.clone());
                }
            }
        }
    }

    for key in [API_KEY_ENV, API_KEY_FALLBACK_ENV] {
        if let Ok(value) = std::env::var(key) {
            if !value.is_empty() {
                return Ok(value);
            }
        }
    }

    redline_error::ConfigurationSnafu {
        message: format!("missing {API_KEY_ENV} (or {API_KEY_FALLBACK_ENV}) environment variable"),
    }
    .fail()
}
