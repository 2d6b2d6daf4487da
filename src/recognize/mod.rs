//! External recognition collaborators.
//!
//! Two capabilities sit outside this crate: the hazard recognizer (one still
//! image in, raw observations out) and the regulation mapper (an observation
//! batch in, structured violations out). Their latency and correctness are
//! opaque; this module pins down only the call contract.
//!
//! The mapper's output is positionally aligned to its input. That alignment
//! is a protocol the orchestrator relies on, so `align_matches` turns any
//! length mismatch into an unmapped tail instead of letting it skew which
//! observation a match belongs to.

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod http;
pub mod stub;

pub use http::{HttpMapper, HttpRecognizer};
pub use stub::{ScriptedRecognizer, StaticMapper};

/// One raw observation from the hazard recognizer.
///
/// An empty observation list is a valid answer meaning "no hazard visible".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Observation {
    /// Free-text description of what is visible.
    pub observation: String,
    /// Where in the frame (e.g. "foreground left", "near scaffolding").
    pub location: String,
    /// Coarse category tag (PPE, Fall, Electrical, ...).
    pub hazard_type: String,
    /// Why the condition is dangerous.
    #[serde(default)]
    pub danger_description: String,
}

/// Severity tier assigned by the regulation mapper.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "CRITICAL" => Some(Severity::Critical),
            "HIGH" => Some(Severity::High),
            "MEDIUM" => Some(Severity::Medium),
            "LOW" => Some(Severity::Low),
            _ => None,
        }
    }
}

/// One structured violation from the regulation mapper.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegulationMatch {
    pub osha_code: String,
    pub osha_title: String,
    pub severity: Severity,
    pub plain_english: String,
    #[serde(default)]
    pub remediation: String,
    #[serde(default)]
    pub estimated_fix_time: String,
}

/// Hazard recognizer collaborator: one still image per call.
pub trait HazardRecognizer: Send {
    /// Analyze one JPEG-encoded frame.
    fn analyze(&mut self, frame_jpeg: &[u8]) -> Result<Vec<Observation>>;
}

/// Regulation mapper collaborator: one observation batch per call.
///
/// Output must be positionally aligned to the input. Callers should run the
/// result through [`align_matches`] before trusting the pairing.
pub trait RegulationMapper: Send {
    fn map_batch(&mut self, observations: &[Observation]) -> Result<Vec<RegulationMatch>>;
}

/// Align mapper output to the observation count.
///
/// A short answer leaves the unmatched tail unmapped (`None`); a long answer
/// is truncated. Either direction is a protocol violation worth a warning,
/// but never a frame failure.
pub fn align_matches(
    observation_count: usize,
    mut matches: Vec<RegulationMatch>,
) -> Vec<Option<RegulationMatch>> {
    if matches.len() != observation_count {
        log::warn!(
            "regulation mapper returned {} matches for {} observations; \
             treating the unmatched tail as unmapped",
            matches.len(),
            observation_count
        );
    }
    matches.truncate(observation_count);
    let mut aligned: Vec<Option<RegulationMatch>> = matches.into_iter().map(Some).collect();
    aligned.resize_with(observation_count, || None);
    aligned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(code: &str) -> RegulationMatch {
        RegulationMatch {
            osha_code: code.to_string(),
            osha_title: "Head Protection".to_string(),
            severity: Severity::High,
            plain_english: "A worker is not wearing a hard hat.".to_string(),
            remediation: String::new(),
            estimated_fix_time: String::new(),
        }
    }

    #[test]
    fn aligned_output_passes_through() {
        let aligned = align_matches(2, vec![matched("1926.100"), matched("1926.102")]);
        assert_eq!(aligned.len(), 2);
        assert!(aligned.iter().all(|m| m.is_some()));
    }

    #[test]
    fn short_output_leaves_tail_unmapped() {
        let aligned = align_matches(3, vec![matched("1926.100")]);
        assert_eq!(aligned.len(), 3);
        assert!(aligned[0].is_some());
        assert!(aligned[1].is_none());
        assert!(aligned[2].is_none());
    }

    #[test]
    fn long_output_is_truncated() {
        let aligned = align_matches(1, vec![matched("1926.100"), matched("1926.102")]);
        assert_eq!(aligned.len(), 1);
        assert_eq!(aligned[0].as_ref().unwrap().osha_code, "1926.100");
    }

    #[test]
    fn severity_round_trips_through_serde_and_parse() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
        assert_eq!(
            serde_json::from_str::<Severity>("\"LOW\"").unwrap(),
            Severity::Low
        );
        assert_eq!(Severity::parse("high"), Some(Severity::High));
        assert_eq!(Severity::parse("bogus"), None);
    }
}
