//! Out-of-band ticket filing.
//!
//! Filing runs off the monitoring loop's critical path: the supervisor
//! hands an alert to a filer on a separate thread and attaches the returned
//! ticket identifier to the stored violation afterwards. A filing failure
//! is logged and forgotten; the alert has already been emitted.

use anyhow::Result;

use crate::monitor::ViolationAlert;
use crate::recognize::Severity;

/// Severities worth a ticket when auto-filing is enabled.
pub fn warrants_ticket(severity: Severity) -> bool {
    matches!(severity, Severity::Critical | Severity::High)
}

/// Files a ticket for one alert in an external tracker.
pub trait TicketFiler: Send {
    /// Returns the tracker's ticket identifier, or `None` when the filer
    /// declined (e.g. the tracker is unreachable and gave up).
    fn file(&mut self, alert: &ViolationAlert) -> Result<Option<String>>;
}

/// Demo filer: fabricates a deterministic ticket id instead of talking to a
/// real tracker.
pub struct SimulatedTicketFiler;

impl TicketFiler for SimulatedTicketFiler {
    fn file(&mut self, alert: &ViolationAlert) -> Result<Option<String>> {
        let session_prefix: String = alert.session_id.chars().take(8).collect();
        let seq = alert
            .alert_id
            .rsplit('_')
            .next()
            .unwrap_or("0");
        let ticket_id = format!("SAFETY-{session_prefix}-{seq}");
        log::info!(
            "filed ticket {} for {} violation {}",
            ticket_id,
            alert.severity.as_str(),
            alert.alert_id
        );
        Ok(Some(ticket_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_critical_and_high_warrant_tickets() {
        assert!(warrants_ticket(Severity::Critical));
        assert!(warrants_ticket(Severity::High));
        assert!(!warrants_ticket(Severity::Medium));
        assert!(!warrants_ticket(Severity::Low));
    }

    #[test]
    fn simulated_filer_builds_an_id_from_the_alert() {
        let alert = ViolationAlert {
            alert_id: "abcdef1234567890_3".into(),
            session_id: "abcdef1234567890".into(),
            timestamp_s: 12.0,
            frame_index: 360,
            hazard_type: "Fall".into(),
            severity: Severity::Critical,
            observation: "Unguarded edge".into(),
            location: "roof".into(),
            osha_code: None,
            osha_title: None,
            plain_english: None,
            remediation: None,
            estimated_fix_time: None,
            frame_path: "frames/frame_000360.jpg".into(),
            video_clip_path: None,
            detected_at_s: 0,
        };
        let ticket = SimulatedTicketFiler.file(&alert).unwrap().unwrap();
        assert_eq!(ticket, "SAFETY-abcdef12-3");
    }
}
