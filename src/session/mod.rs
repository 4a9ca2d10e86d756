//! Session descriptor types and status, feeding the state machine in
//! [`state_machine`].

pub mod state_machine;

use std::time::Duration;

/// One of `queued, committed, running, finished, failed, noop`. Terminal:
/// `finished | failed | noop`. The status map built from this enum is the
/// scheduler's single source of truth (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Queued,
    Committed,
    Running,
    Finished,
    Failed { error: String },
    /// Dependency permanently unsolvable.
    Noop { reason: String },
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Finished | SessionStatus::Failed { .. } | SessionStatus::Noop { .. }
        )
    }

    pub fn is_terminal_negative(&self) -> bool {
        matches!(self, SessionStatus::Failed { .. } | SessionStatus::Noop { .. })
    }
}

/// Parses a Go-style duration string (`"10m"`, `"30s"`, `"1h"`); falls back
/// to the provided default when absent or unparseable, per §6's
/// `timeout (duration string)` field.
pub fn parse_duration(raw: Option<&str>, default: Duration) -> Duration {
    let Some(raw) = raw else { return default };
    let raw = raw.trim();
    let split_at = raw
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split_at);
    let Ok(value) = number.parse::<f64>() else {
        return default;
    };
    let seconds = match unit {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return default,
    };
    if seconds <= 0.0 {
        default
    } else {
        Duration::from_secs_f64(seconds)
    }
}
