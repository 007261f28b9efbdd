//! Workflow configuration.
//!
//! Resolution order used by the CLI: JSON file (`--config`), then
//! environment, then flags. Library callers build a [`WorkflowConfig`]
//! directly.

use bimscore_model::{normalize_role, Role};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Directory holding the local store documents.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// `None` runs fully local.
    #[serde(default)]
    pub backend: Option<BackendConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".bimscore")
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_role() -> Role {
    Role::Coordinator
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: None,
        }
    }
}

impl BackendConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            enabled: default_enabled(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            role: default_role(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid(format!("backend url `{}`: {e}", self.base_url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "backend url `{}` must be http or https",
                self.base_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".into()));
        }
        Ok(())
    }
}

impl WorkflowConfig {
    /// Backend settings, when configured and enabled.
    pub fn active_backend(&self) -> Option<&BackendConfig> {
        self.backend.as_ref().filter(|b| b.enabled)
    }

    /// Load from environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: WorkflowConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if let Some(backend) = &config.backend {
            backend.validate()?;
        }
        Ok(config)
    }

    /// Overlay `BIMSCORE_*` variables read through `var`.
    pub fn with_env<F>(mut self, var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = var("BIMSCORE_DATA_DIR").filter(|s| !s.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }

        if let Some(url) = var("BIMSCORE_BACKEND_URL").filter(|s| !s.trim().is_empty()) {
            let backend = self
                .backend
                .get_or_insert_with(|| BackendConfig::new(url.trim()));
            backend.base_url = url.trim().to_string();
        }

        if let Some(backend) = self.backend.as_mut() {
            if let Some(v) = var("BIMSCORE_BACKEND_ENABLED") {
                backend.enabled = parse_bool("BIMSCORE_BACKEND_ENABLED", &v)?;
            }
            if let Some(v) = var("BIMSCORE_TIMEOUT_SECS") {
                backend.timeout_secs = parse_num("BIMSCORE_TIMEOUT_SECS", &v)?;
            }
            if let Some(v) = var("BIMSCORE_MAX_RETRIES") {
                backend.max_retries = parse_num("BIMSCORE_MAX_RETRIES", &v)?;
            }
            if let Some(v) = var("BIMSCORE_ROLE") {
                backend.role = parse_role(&v)?;
            }
            backend.validate()?;
        }
        Ok(self)
    }
}

pub fn parse_role(value: &str) -> Result<Role, ConfigError> {
    normalize_role(value).ok_or_else(|| ConfigError::Invalid(format!("unknown role `{value}`")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid(format!("{key}: expected a boolean, got `{other}`"))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}: expected a number, got `{value}`")))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
