//! HTTP-backed collaborator implementations.
//!
//! Both collaborators are plain HTTP endpoints:
//! - the recognizer takes a raw `image/jpeg` body and answers with a JSON
//!   array of observations
//! - the mapper takes a JSON array of observations and answers with a JSON
//!   array of regulation matches, positionally aligned
//!
//! Timeouts live on the agent; a slow collaborator only stalls its own
//! session, never the process.

use anyhow::{Context, Result};
use std::time::Duration;

use super::{HazardRecognizer, Observation, RegulationMapper, RegulationMatch};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout(timeout)
        .build()
}

/// Hazard recognizer behind an HTTP endpoint.
pub struct HttpRecognizer {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpRecognizer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_timeout(endpoint, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            agent: build_agent(timeout),
        }
    }
}

impl HazardRecognizer for HttpRecognizer {
    fn analyze(&mut self, frame_jpeg: &[u8]) -> Result<Vec<Observation>> {
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "image/jpeg")
            .send_bytes(frame_jpeg)
            .with_context(|| format!("call hazard recognizer at {}", self.endpoint))?;
        let observations: Vec<Observation> = response
            .into_json()
            .context("parse hazard recognizer response")?;
        Ok(observations)
    }
}

/// Regulation mapper behind an HTTP endpoint.
pub struct HttpMapper {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpMapper {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_timeout(endpoint, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            agent: build_agent(timeout),
        }
    }
}

impl RegulationMapper for HttpMapper {
    fn map_batch(&mut self, observations: &[Observation]) -> Result<Vec<RegulationMatch>> {
        if observations.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .agent
            .post(&self.endpoint)
            .send_json(observations)
            .with_context(|| format!("call regulation mapper at {}", self.endpoint))?;
        let matches: Vec<RegulationMatch> = response
            .into_json()
            .context("parse regulation mapper response")?;
        Ok(matches)
    }
}
