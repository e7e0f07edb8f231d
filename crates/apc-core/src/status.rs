use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Session state reported by the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    #[default]
    Idle,
    Active,
    Paused,
    /// Any state string this client does not know about.
    #[serde(other)]
    Other,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time status of the presence agent.
///
/// Produced only by the agent. The client replaces its copy wholesale on every
/// snapshot or stream event and never edits fields locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    /// Required: a payload without it is not a status.
    pub state: AgentState,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub user_present: bool,
    #[serde(default)]
    pub policy_locked: bool,
    #[serde(default)]
    pub next_action: String,
    /// Raw timestamp as sent by the agent (RFC 3339 in practice).
    #[serde(default)]
    pub started_at: String,
}

impl AgentStatus {
    /// Parse `started_at`, if it is a real RFC 3339 timestamp.
    ///
    /// The agent reports the zero time (`0001-01-01T00:00:00Z`) when no
    /// session has ever run; that is treated as "not started".
    pub fn started_at_utc(&self) -> Option<DateTime<Utc>> {
        let parsed = DateTime::parse_from_rfc3339(&self.started_at).ok()?;
        let utc = parsed.with_timezone(&Utc);
        (utc.year() > 1).then_some(utc)
    }

    /// Display label for this status.
    pub fn label(&self) -> StateLabel {
        StateLabel::of(Some(self))
    }
}

/// Derived, user-facing label for the agent's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateLabel {
    Unknown,
    Locked,
    Active,
    Paused,
    Idle,
}

impl StateLabel {
    /// Derive the label from an optional status.
    ///
    /// No status yields `Unknown`. A policy lock wins over the session state.
    /// Unrecognised states fall back to `Idle`.
    pub fn of(status: Option<&AgentStatus>) -> Self {
        let Some(status) = status else {
            return Self::Unknown;
        };
        if status.policy_locked {
            return Self::Locked;
        }
        match status.state {
            AgentState::Active => Self::Active,
            AgentState::Paused => Self::Paused,
            AgentState::Idle | AgentState::Other => Self::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Locked => "Locked",
            Self::Active => "Active",
            Self::Paused => "Paused",
            Self::Idle => "Idle",
        }
    }
}

impl std::fmt::Display for StateLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
