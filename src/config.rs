//! Configuration and settings management
//!
//! Loads settings from environment variables (with optional config files) and
//! defines pipeline defaults.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Default OpenAI-compatible endpoint: a local Ollama instance.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "llama3:latest";

/// Credential sent to local endpoints that accept any key.
pub const LOCAL_PLACEHOLDER_API_KEY: &str = "dummy-key";

/// Default bound on synthesis attempts (initial draft plus repairs).
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Default provider request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Base URL of the OpenAI-compatible endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier to request.
    #[serde(default = "default_model")]
    pub model: String,

    /// API credential; required for non-local endpoints.
    pub openai_api_key: Option<String>,

    /// Provider request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Execution timeout in seconds for the target tool; 0 disables it.
    #[serde(default)]
    pub execution_timeout_secs: u64,

    /// Bound on provider round trips per instruction.
    #[serde(default = "default_max_attempts")]
    pub synthesis_max_attempts: usize,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

const fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            // Optional checked-in defaults, then a local override file
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // YTDLPLLM_BASE_URL, YTDLPLLM_MODEL, ...
            .add_source(Environment::with_prefix("YTDLPLLM").ignore_empty(true))
            // Unprefixed variables, notably OPENAI_API_KEY.
            // ignore_empty treats empty env vars as unset.
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }

    /// Whether the configured endpoint is a local one (no credential needed).
    #[must_use]
    pub fn is_local_endpoint(&self) -> bool {
        self.base_url.contains("localhost")
            || self.base_url.contains("127.0.0.1")
            || self.base_url.contains("[::1]")
    }

    /// Resolve the API credential, failing fast before any request is made.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` when the endpoint is non-local and no
    /// credential is configured.
    pub fn resolved_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.openai_api_key {
            return Ok(key.clone());
        }
        if self.is_local_endpoint() {
            return Ok(LOCAL_PLACEHOLDER_API_KEY.to_string());
        }
        Err(ConfigError::Message(format!(
            "OPENAI_API_KEY is required for non-local endpoint {}",
            self.base_url
        )))
    }

    /// Provider request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Execution timeout as a `Duration`, `None` when disabled.
    #[must_use]
    pub const fn execution_timeout(&self) -> Option<Duration> {
        if self.execution_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.execution_timeout_secs))
        }
    }
}
