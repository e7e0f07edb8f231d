use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Number of log entries the client keeps.
pub const LOG_WINDOW: usize = 50;

/// A single action recorded by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Timestamp of the action; unique per entry.
    pub ts: String,
    pub action: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub meta: HashMap<String, String>,
}

/// Body of `GET /logs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogsResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub entries: Vec<LogEntry>,
}

/// Keep only the most recent [`LOG_WINDOW`] entries, oldest first.
pub fn log_window(mut entries: Vec<LogEntry>) -> Vec<LogEntry> {
    if entries.len() > LOG_WINDOW {
        entries.drain(..entries.len() - LOG_WINDOW);
    }
    entries
}

/// The agent encodes empty maps and slices as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
