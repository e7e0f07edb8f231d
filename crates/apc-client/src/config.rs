use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Config file looked up in the working directory by [`ClientConfig::load`].
pub const DEFAULT_CONFIG_FILE: &str = "apc.toml";

/// Client configuration, loaded from `apc.toml` plus `APC_*` env overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the agent, e.g. `http://127.0.0.1:8787`.
    pub agent_origin: String,
    /// Bearer token. Empty means no `Authorization` header is sent.
    pub token: String,
    pub request_timeout_secs: u64,
    pub stream: StreamConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            agent_origin: "http://127.0.0.1:8787".to_string(),
            token: String::new(),
            request_timeout_secs: 10,
            stream: StreamConfig::default(),
        }
    }
}

/// Reconnect behaviour of the status stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Delay before the first reconnect attempt, unless the agent sent `retry:`.
    pub reconnect_initial_ms: u64,
    /// Upper bound for the doubling reconnect delay.
    pub reconnect_max_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_initial_ms: 1000,
            reconnect_max_ms: 30_000,
        }
    }
}

impl StreamConfig {
    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

impl ClientConfig {
    /// Load `apc.toml` from the working directory if present, then apply env
    /// overrides. A missing or malformed file falls back to defaults.
    pub fn load() -> Self {
        let path = Path::new(DEFAULT_CONFIG_FILE);
        let mut config = if path.exists() {
            match Self::from_file(path) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from {DEFAULT_CONFIG_FILE}");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("{e}, using defaults");
                    Self::default()
                },
            }
        } else {
            tracing::debug!("No {DEFAULT_CONFIG_FILE} found, using defaults");
            Self::default()
        };
        config.apply_env();
        config
    }

    /// Parse a config file. Unlike [`load`](Self::load), errors are returned.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `APC_*` environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup (the process env in
    /// production, a map in tests).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(origin) = lookup("APC_AGENT_ORIGIN")
            && !origin.is_empty()
        {
            self.agent_origin = origin;
        }
        if let Some(token) = lookup("APC_AGENT_TOKEN") {
            self.token = token;
        }
        if let Some(val) = lookup("APC_REQUEST_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.request_timeout_secs = n;
        }
        if let Some(val) = lookup("APC_STREAM_RECONNECT_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.stream.reconnect_initial_ms = n;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match reqwest::Url::parse(&self.agent_origin) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {},
            _ => {
                return Err(ConfigError::InvalidOrigin {
                    origin: self.agent_origin.clone(),
                });
            },
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.stream.reconnect_initial_ms == 0 {
            return Err(ConfigError::Invalid(
                "stream.reconnect_initial_ms must be > 0".to_string(),
            ));
        }
        if self.stream.reconnect_initial_ms > self.stream.reconnect_max_ms {
            return Err(ConfigError::Invalid(
                "stream.reconnect_initial_ms must not exceed stream.reconnect_max_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute URL for an agent path such as `/status`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.agent_origin.trim_end_matches('/'))
    }

    /// The configured token, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        let token = self.token.trim();
        (!token.is_empty()).then_some(token)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
