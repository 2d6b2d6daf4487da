//! Monitoring session model.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a monitoring session.
///
/// `pending -> processing -> {paused <-> processing} -> completed | stopped`,
/// with `failed` reachable from anywhere. Terminal sessions are retired, not
/// deleted; their alerts remain valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Processing,
    Paused,
    Completed,
    Stopped,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Processing => "processing",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(SessionState::Pending),
            "processing" => Some(SessionState::Processing),
            "paused" => Some(SessionState::Paused),
            "completed" => Some(SessionState::Completed),
            "stopped" => Some(SessionState::Stopped),
            "failed" => Some(SessionState::Failed),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Stopped | SessionState::Failed
        )
    }
}

/// One video under active or completed observation.
///
/// Mutated only by the orchestrator that owns it. While the session is
/// active, `current_timestamp_s` is monotonically non-decreasing and
/// `violation_count` only increases.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitoringSession {
    pub id: String,
    pub source_path: String,
    pub state: SessionState,
    pub frame_rate: f64,
    pub total_frames: u64,
    pub duration_s: f64,
    pub current_frame: u64,
    pub current_timestamp_s: f64,
    pub violation_count: u64,
    pub analysis_interval_s: f64,
    pub auto_ticket: bool,
    pub created_at_s: u64,
    pub started_at_s: Option<u64>,
    pub completed_at_s: Option<u64>,
}

impl MonitoringSession {
    pub fn new(
        id: impl Into<String>,
        source_path: impl Into<String>,
        analysis_interval_s: f64,
        auto_ticket: bool,
        created_at_s: u64,
    ) -> Self {
        Self {
            id: id.into(),
            source_path: source_path.into(),
            state: SessionState::Pending,
            frame_rate: 0.0,
            total_frames: 0,
            duration_s: 0.0,
            current_frame: 0,
            current_timestamp_s: 0.0,
            violation_count: 0,
            analysis_interval_s,
            auto_ticket,
            created_at_s,
            started_at_s: None,
            completed_at_s: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_strings() {
        for state in [
            SessionState::Pending,
            SessionState::Processing,
            SessionState::Paused,
            SessionState::Completed,
            SessionState::Stopped,
            SessionState::Failed,
        ] {
            assert_eq!(SessionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SessionState::parse("running"), None);
    }

    #[test]
    fn terminal_states_are_marked() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Stopped.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Paused.is_terminal());
    }
}
