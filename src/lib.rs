//! sitewatch - construction-site hazard monitoring
//!
//! This crate ingests an uploaded video and simulates live camera-feed
//! monitoring: it walks the video at roughly wall-clock pace, samples frames
//! for analysis, deduplicates repeated detections, captures evidence clips,
//! and streams structured alerts to any number of live observers.
//!
//! # Module Structure
//!
//! - `walker`: paced frame decoding (`FrameWalker`, stub + ffmpeg backends)
//! - `recognize`: hazard recognizer / regulation mapper collaborator contract
//! - `dedup`: cooldown-based alert deduplication
//! - `clip`: best-effort evidence clip extraction
//! - `monitor`: the per-session orchestrator and its supervisor
//! - `broadcast`: per-session observer fan-out
//! - `store`: session/violation persistence
//! - `ticket`: out-of-band ticket filing
//! - `api`: loopback HTTP control surface
//! - `config`: daemon configuration (JSON file + env overrides)
//!
//! Every monitoring session runs on its own thread with its own decode
//! handle, cooldown ledger, and clip writer. Nothing is shared across
//! sessions except the store and the broadcast registry, both of which
//! serialize access internally.

use anyhow::Result;
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod broadcast;
pub mod clip;
pub mod config;
pub mod dedup;
pub mod monitor;
pub mod recognize;
pub mod store;
pub mod ticket;
pub mod walker;

pub use broadcast::{BroadcastRegistry, ObserverId, WireMessage};
pub use clip::{clip_window, ClipExtractor, ClipWindow};
pub use dedup::{HazardDeduplicator, DEFAULT_COOLDOWN_SECS};
pub use monitor::{
    run_session, MonitorConfig, MonitorHooks, SessionControl, ViolationAlert,
};
pub use monitor::manager::{CollaboratorFactory, HttpCollaborators, MonitorManager, StartRequest};
pub use monitor::session::{MonitoringSession, SessionState};
pub use recognize::{
    align_matches, HazardRecognizer, Observation, RegulationMapper, RegulationMatch, Severity,
};
pub use store::{InMemorySessionStore, SessionStore, SqliteSessionStore, ViolationRecord};
pub use ticket::{SimulatedTicketFiler, TicketFiler};
pub use walker::{FrameWalker, VideoFrame, VideoMeta, WalkerConfig};

/// Generate a fresh session identifier (16 random bytes, hex).
pub fn new_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Seconds since the Unix epoch.
pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}
