//! Scripted collaborator implementations for tests and the demo.

use anyhow::Result;

use super::{HazardRecognizer, Observation, RegulationMapper, RegulationMatch, Severity};

/// Recognizer that replays a fixed script, one entry per call.
///
/// Calls past the end of the script report no observations, so a short
/// script against a long video is fine.
pub struct ScriptedRecognizer {
    script: Vec<Vec<Observation>>,
    cursor: usize,
}

impl ScriptedRecognizer {
    pub fn new(script: Vec<Vec<Observation>>) -> Self {
        Self { script, cursor: 0 }
    }

    /// A recognizer that never sees anything.
    pub fn silent() -> Self {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> usize {
        self.cursor
    }
}

impl HazardRecognizer for ScriptedRecognizer {
    fn analyze(&mut self, _frame_jpeg: &[u8]) -> Result<Vec<Observation>> {
        let batch = self.script.get(self.cursor).cloned().unwrap_or_default();
        self.cursor += 1;
        Ok(batch)
    }
}

/// Mapper that answers every observation with the same canned match.
///
/// `max_matches` caps the answer length to simulate a collaborator that
/// drops part of the batch (protocol misalignment).
pub struct StaticMapper {
    template: RegulationMatch,
    max_matches: Option<usize>,
}

impl StaticMapper {
    pub fn new(severity: Severity) -> Self {
        Self {
            template: RegulationMatch {
                osha_code: "29 CFR 1926.100".to_string(),
                osha_title: "Head Protection".to_string(),
                severity,
                plain_english: "A worker is exposed to an overhead hazard without protection."
                    .to_string(),
                remediation: "Stop work and issue the required protective equipment.".to_string(),
                estimated_fix_time: "Immediate - 15 minutes".to_string(),
            },
            max_matches: None,
        }
    }

    pub fn with_template(template: RegulationMatch) -> Self {
        Self {
            template,
            max_matches: None,
        }
    }

    /// Cap the number of matches returned per batch.
    pub fn truncated_to(mut self, max_matches: usize) -> Self {
        self.max_matches = Some(max_matches);
        self
    }
}

impl RegulationMapper for StaticMapper {
    fn map_batch(&mut self, observations: &[Observation]) -> Result<Vec<RegulationMatch>> {
        let mut count = observations.len();
        if let Some(cap) = self.max_matches {
            count = count.min(cap);
        }
        Ok(vec![self.template.clone(); count])
    }
}
