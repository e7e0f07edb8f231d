pub mod log;
pub mod session;
pub mod status;

pub use log::{LOG_WINDOW, LogEntry, LogsResponse, log_window};
pub use session::{Ack, PolicyLockRequest, SessionOverrides, SessionRequest};
pub use status::{AgentState, AgentStatus, StateLabel};

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use std::collections::HashMap;

    use crate::log::LogEntry;
    use crate::status::{AgentState, AgentStatus};

    /// An unlocked status in the given state.
    pub fn make_status(state: AgentState) -> AgentStatus {
        AgentStatus {
            state,
            mode: if state == AgentState::Active {
                "meeting".to_string()
            } else {
                String::new()
            },
            user_present: false,
            policy_locked: false,
            next_action: String::new(),
            started_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    /// A status with the policy lock set.
    pub fn make_locked_status(state: AgentState) -> AgentStatus {
        AgentStatus {
            policy_locked: true,
            ..make_status(state)
        }
    }

    /// A log entry whose timestamp is derived from `seq`.
    pub fn make_log_entry(seq: usize, action: &str) -> LogEntry {
        LogEntry {
            ts: format!("2026-01-01T00:{:02}:{:02}Z", (seq / 60) % 60, seq % 60),
            action: action.to_string(),
            meta: HashMap::new(),
        }
    }

    /// `n` sequential log entries, oldest first.
    pub fn make_log_entries(n: usize) -> Vec<LogEntry> {
        (0..n).map(|i| make_log_entry(i, &format!("tick-{i}"))).collect()
    }
}
