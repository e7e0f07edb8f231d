use serde::{Deserialize, Serialize};

/// Parameters for `POST /session/start`.
///
/// The agent validates and enforces these; the client sends them as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub mode: String,
    /// Jitter of simulated activity, 0.0..=1.0.
    pub randomness: f64,
    pub idle_threshold_seconds: u32,
    pub max_duration_minutes: u32,
}

impl Default for SessionRequest {
    fn default() -> Self {
        Self {
            mode: "meeting".to_string(),
            randomness: 0.5,
            idle_threshold_seconds: 2,
            max_duration_minutes: 240,
        }
    }
}

/// Optional per-field replacements for the default [`SessionRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOverrides {
    pub mode: Option<String>,
    pub randomness: Option<f64>,
    pub idle_threshold_seconds: Option<u32>,
    pub max_duration_minutes: Option<u32>,
}

impl SessionOverrides {
    /// Merge these overrides over `base`.
    pub fn apply(self, base: SessionRequest) -> SessionRequest {
        SessionRequest {
            mode: self.mode.unwrap_or(base.mode),
            randomness: self.randomness.unwrap_or(base.randomness),
            idle_threshold_seconds: self
                .idle_threshold_seconds
                .unwrap_or(base.idle_threshold_seconds),
            max_duration_minutes: self
                .max_duration_minutes
                .unwrap_or(base.max_duration_minutes),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Body of `POST /policy/lock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyLockRequest {
    pub locked: bool,
}

/// Acknowledgement returned by every command endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub status: String,
}
