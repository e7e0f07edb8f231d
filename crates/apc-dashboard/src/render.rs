//! Plain-text rendering of the agent view.

use std::fmt::Write;

use chrono::{DateTime, Local};

use apc_client::{LinkState, ViewSnapshot};
use apc_core::{AgentStatus, LogEntry, StateLabel};

/// Log lines shown under the status panel in watch mode.
pub const PANEL_LOG_LINES: usize = 10;

/// Show an RFC 3339 timestamp in local time; anything else is shown as-is.
pub fn local_time(ts: &str) -> String {
    match DateTime::parse_from_rfc3339(ts) {
        Ok(t) => t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
        Err(_) => ts.to_string(),
    }
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}

/// Status fields, one per line.
pub fn status_lines(label: StateLabel, status: Option<&AgentStatus>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Status:       {label}");
    let Some(status) = status else {
        return out;
    };
    let started = match status.started_at_utc() {
        Some(t) => t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
        None => or_dash(&status.started_at).to_string(),
    };
    let _ = writeln!(out, "State:        {}", status.state);
    let _ = writeln!(out, "Mode:         {}", or_dash(&status.mode));
    let _ = writeln!(out, "Policy lock:  {}", yes_no(status.policy_locked));
    let _ = writeln!(out, "User present: {}", yes_no(status.user_present));
    let _ = writeln!(out, "Next action:  {}", or_dash(&status.next_action));
    let _ = writeln!(out, "Started at:   {started}");
    out
}

/// The last `limit` entries, one line each.
pub fn log_lines(entries: &[LogEntry], limit: usize) -> String {
    let mut out = String::new();
    let skip = entries.len().saturating_sub(limit);
    for entry in &entries[skip..] {
        let _ = write!(out, "  {}  {}", local_time(&entry.ts), entry.action);
        let mut meta: Vec<_> = entry.meta.iter().collect();
        meta.sort();
        for (k, v) in meta {
            let _ = write!(out, " {k}={v}");
        }
        out.push('\n');
    }
    out
}

/// Full watch-mode panel.
pub fn panel(view: &ViewSnapshot, link: Option<LinkState>) -> String {
    let mut out = String::from("── agent ──────────────────────────\n");
    out.push_str(&status_lines(view.label(), view.status.as_ref()));
    if let Some(link) = link {
        let _ = writeln!(out, "Stream:       {link}");
    }
    if view.busy {
        out.push_str("Working...\n");
    }
    if let Some(error) = &view.error {
        let _ = writeln!(out, "Error:        {error}");
    }
    if view.logs.is_empty() {
        out.push_str("No log entries\n");
    } else {
        let _ = writeln!(out, "Recent actions ({} kept):", view.logs.len());
        out.push_str(&log_lines(&view.logs, PANEL_LOG_LINES));
    }
    out
}

#[cfg(test)]
mod tests {
    use apc_core::AgentState;
    use apc_core::test_helpers::{make_locked_status, make_log_entries, make_status};

    use super::*;

    #[test]
    fn unknown_view_has_only_label() {
        let out = status_lines(StateLabel::Unknown, None);
        assert_eq!(out, "Status:       Unknown\n");
    }

    #[test]
    fn locked_status_panel() {
        let status = make_locked_status(AgentState::Active);
        let out = status_lines(status.label(), Some(&status));
        assert!(out.contains("Status:       Locked"));
        assert!(out.contains("State:        active"));
        assert!(out.contains("Policy lock:  yes"));
    }

    #[test]
    fn placeholder_timestamps_are_shown_raw() {
        let mut status = make_status(AgentState::Idle);
        status.started_at = "T0".to_string();
        let out = status_lines(status.label(), Some(&status));
        assert!(out.contains("Started at:   T0"));
        assert_eq!(local_time("yesterday"), "yesterday");
    }

    #[test]
    fn rfc3339_timestamps_are_reformatted() {
        let shown = local_time("2026-01-01T12:00:00Z");
        assert_ne!(shown, "2026-01-01T12:00:00Z");
        assert_eq!(shown.len(), "2026-01-01 12:00:00".len());
    }

    #[test]
    fn log_lines_keep_only_tail() {
        let out = log_lines(&make_log_entries(15), 3);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("tick-12"));
        assert!(lines[2].ends_with("tick-14"));
    }

    #[test]
    fn log_meta_is_sorted() {
        let mut entries = make_log_entries(1);
        entries[0].meta.insert("z".to_string(), "1".to_string());
        entries[0].meta.insert("a".to_string(), "2".to_string());
        assert!(log_lines(&entries, 5).trim_end().ends_with("tick-0 a=2 z=1"));
    }

    #[test]
    fn panel_shows_error_busy_and_link() {
        let view = ViewSnapshot {
            status: Some(make_status(AgentState::Idle)),
            error: Some("policy locked".to_string()),
            busy: true,
            ..ViewSnapshot::default()
        };
        let out = panel(&view, Some(LinkState::Reconnecting));
        assert!(out.contains("Error:        policy locked"));
        assert!(out.contains("Working..."));
        assert!(out.contains("Stream:       reconnecting"));
        assert!(out.contains("No log entries"));
    }
}
