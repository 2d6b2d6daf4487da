//! The monitoring orchestrator.
//!
//! One session, one state machine: drive the frame walker, submit sampled
//! frames to the hazard recognizer, map the observation batch to
//! regulations, apply deduplication, request evidence clips, and hand
//! alert/progress events to injected hooks.
//!
//! Error policy follows one rule: only an unreadable source fails the
//! session. A recognition or mapping error is that frame's problem, a clip
//! failure is that alert's problem, and neither interrupts the loop.
//! Partial progress and already-emitted alerts survive any outcome.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::clip::ClipExtractor;
use crate::dedup::{HazardDeduplicator, DEFAULT_COOLDOWN_SECS};
use crate::recognize::{align_matches, HazardRecognizer, RegulationMapper, Severity};
use crate::walker::{FrameWalker, VideoFrame, WalkerConfig, DEFAULT_PACING};

pub mod manager;
pub mod session;

use session::{MonitoringSession, SessionState};

/// How often a paused session re-checks its flags.
const PAUSE_POLL: Duration = Duration::from_millis(50);

/// Tunables for one monitoring run.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Wall-clock spacing between analyzed frames.
    pub analysis_interval_s: f64,
    /// Dedup cooldown window.
    pub cooldown_s: f64,
    /// Evidence clip window around a detection.
    pub clip_before_s: f64,
    pub clip_after_s: f64,
    /// Per-frame pacing delay handed to the walker.
    pub pacing: Duration,
    /// Root directory for per-session frames and clips.
    pub data_dir: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            analysis_interval_s: 1.5,
            cooldown_s: DEFAULT_COOLDOWN_SECS,
            clip_before_s: 15.0,
            clip_after_s: 15.0,
            pacing: DEFAULT_PACING,
            data_dir: PathBuf::from("sitewatch_data"),
        }
    }
}

/// Advisory pause/stop flags, checked once per frame iteration.
///
/// Cooperative by design: an in-flight collaborator call always completes
/// before a flag takes effect. Setting a flag that is already set is a
/// no-op, which is what makes the control surface idempotent.
#[derive(Debug, Default)]
pub struct SessionControl {
    paused: AtomicBool,
    stopped: AtomicBool,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// One emitted detection event. Immutable after construction; alert ids are
/// `{session_id}_{seq}` and never revised.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViolationAlert {
    pub alert_id: String,
    pub session_id: String,
    /// Video timestamp in seconds.
    pub timestamp_s: f64,
    pub frame_index: u64,
    pub hazard_type: String,
    pub severity: Severity,
    pub observation: String,
    pub location: String,
    pub osha_code: Option<String>,
    pub osha_title: Option<String>,
    pub plain_english: Option<String>,
    pub remediation: Option<String>,
    pub estimated_fix_time: Option<String>,
    pub frame_path: String,
    pub video_clip_path: Option<String>,
    pub detected_at_s: u64,
}

/// Event sink injected into the orchestrator.
///
/// `on_violation` fires at most once per accepted alert, `on_progress` at
/// most once per sampled frame, and `on_session_update` whenever the
/// session record changes. Errors from hooks are session failures; sinks
/// that want to absorb a downstream problem (a dead observer, say) must do
/// so themselves.
pub trait MonitorHooks: Send {
    fn on_session_update(&mut self, session: &MonitoringSession) -> Result<()>;
    fn on_violation(&mut self, alert: &ViolationAlert) -> Result<()>;
    fn on_progress(&mut self, current_s: f64, total_s: f64, frame_index: u64) -> Result<()>;
}

enum LoopEnd {
    Completed,
    Stopped,
}

/// Run one monitoring session to a terminal state.
///
/// Opens the walker (failing the session if the source is unreadable),
/// walks every frame, analyzes frames on the sampling stride, and leaves
/// the session in `completed`, `stopped`, or `failed`. The decode handle is
/// released before the final state is recorded on every exit path.
pub fn run_session(
    session: &mut MonitoringSession,
    control: &SessionControl,
    recognizer: &mut dyn HazardRecognizer,
    mapper: &mut dyn RegulationMapper,
    hooks: &mut dyn MonitorHooks,
    cfg: &MonitorConfig,
) -> Result<()> {
    let mut walker = match FrameWalker::open(WalkerConfig {
        path: session.source_path.clone(),
        pacing: cfg.pacing,
    }) {
        Ok(walker) => walker,
        Err(err) => {
            fail_session(session, hooks);
            return Err(err.context(format!("session {}: source unreadable", session.id)));
        }
    };

    let meta = walker.meta();
    session.frame_rate = meta.frame_rate;
    session.total_frames = meta.total_frames;
    session.duration_s = meta.duration_s;
    session.state = SessionState::Processing;
    session.started_at_s = Some(crate::now_s()?);
    if let Err(err) = hooks.on_session_update(session) {
        fail_session(session, hooks);
        return Err(err.context(format!("session {}: record start", session.id)));
    }

    let session_dir = cfg.data_dir.join(&session.id);
    let frames_dir = session_dir.join("frames");
    let clips_dir = session_dir.join("clips");
    if let Err(err) = std::fs::create_dir_all(&frames_dir)
        .and_then(|_| std::fs::create_dir_all(&clips_dir))
    {
        fail_session(session, hooks);
        return Err(anyhow::Error::from(err)
            .context(format!("session {}: create output directories", session.id)));
    }

    let stride = walker.sample_stride(session.analysis_interval_s);
    log::info!(
        "session {}: {:.2} fps, {} frames, {:.1}s, analyzing every {} frames",
        session.id,
        meta.frame_rate,
        meta.total_frames,
        meta.duration_s,
        stride
    );

    let extractor = ClipExtractor::for_source(&session.source_path);
    let mut run = SessionRun {
        session,
        control,
        recognizer,
        mapper,
        hooks,
        cfg,
        stride,
        dedup: HazardDeduplicator::new(cfg.cooldown_s),
        extractor,
        frames_dir,
        clips_dir,
    };
    let end = run.walk(&mut walker);

    // Release the decode handle before recording the terminal state,
    // whatever the shutdown reason was.
    drop(walker);

    match end {
        Ok(LoopEnd::Completed) => {
            finish_session(session, SessionState::Completed, hooks)?;
            log::info!(
                "session {} completed: {} violations",
                session.id,
                session.violation_count
            );
            Ok(())
        }
        Ok(LoopEnd::Stopped) => {
            finish_session(session, SessionState::Stopped, hooks)?;
            log::info!("session {} stopped at frame {}", session.id, session.current_frame);
            Ok(())
        }
        Err(err) => {
            fail_session(session, hooks);
            Err(err.context(format!("session {} failed", session.id)))
        }
    }
}

fn finish_session(
    session: &mut MonitoringSession,
    state: SessionState,
    hooks: &mut dyn MonitorHooks,
) -> Result<()> {
    session.state = state;
    session.completed_at_s = Some(crate::now_s()?);
    hooks.on_session_update(session)
}

fn fail_session(session: &mut MonitoringSession, hooks: &mut dyn MonitorHooks) {
    session.state = SessionState::Failed;
    session.completed_at_s = crate::now_s().ok();
    if let Err(err) = hooks.on_session_update(session) {
        log::error!("session {}: failed-state update not persisted: {:#}", session.id, err);
    }
}

struct SessionRun<'a> {
    session: &'a mut MonitoringSession,
    control: &'a SessionControl,
    recognizer: &'a mut dyn HazardRecognizer,
    mapper: &'a mut dyn RegulationMapper,
    hooks: &'a mut dyn MonitorHooks,
    cfg: &'a MonitorConfig,
    stride: u64,
    dedup: HazardDeduplicator,
    extractor: ClipExtractor,
    frames_dir: PathBuf,
    clips_dir: PathBuf,
}

impl SessionRun<'_> {
    fn walk(&mut self, walker: &mut FrameWalker) -> Result<LoopEnd> {
        loop {
            if self.control.is_stopped() {
                return Ok(LoopEnd::Stopped);
            }
            if self.control.is_paused() {
                // Paused sessions hold their position; resume continues from
                // the current frame index, never from zero.
                if self.session.state != SessionState::Paused {
                    self.session.state = SessionState::Paused;
                    self.hooks.on_session_update(self.session)?;
                }
                std::thread::sleep(PAUSE_POLL);
                continue;
            }
            if self.session.state == SessionState::Paused {
                self.session.state = SessionState::Processing;
                self.hooks.on_session_update(self.session)?;
            }
            let Some(frame) = walker.next_frame()? else {
                return Ok(LoopEnd::Completed);
            };
            self.session.current_frame = frame.index;
            self.session.current_timestamp_s = frame.timestamp_s;
            if frame.index % self.stride == 0 {
                self.process_sampled(&frame)?;
            }
        }
    }

    fn process_sampled(&mut self, frame: &VideoFrame) -> Result<()> {
        let ts = frame.timestamp_s;
        let jpeg = encode_frame_jpeg(frame)?;
        let frame_path = self.frames_dir.join(format!("frame_{:06}.jpg", frame.index));
        if let Err(err) = std::fs::write(&frame_path, &jpeg) {
            log::warn!(
                "session {}: evidence frame {} not saved: {}",
                self.session.id,
                frame_path.display(),
                err
            );
        }

        self.hooks
            .on_progress(ts, self.session.duration_s, frame.index)?;

        let observations = match self.recognizer.analyze(&jpeg) {
            Ok(observations) => observations,
            Err(err) => {
                log::warn!(
                    "session {}: frame {} analysis failed, treating as no observations: {:#}",
                    self.session.id,
                    frame.index,
                    err
                );
                Vec::new()
            }
        };

        if !observations.is_empty() {
            log::info!(
                "session {}: frame {} ({:.1}s): {} observations",
                self.session.id,
                frame.index,
                ts,
                observations.len()
            );
            // One mapper call per frame batch bounds external-call count.
            // A failed call drops the whole frame's observations: unmapped
            // alerts are reserved for length misalignment, not for a mapper
            // that never answered.
            let matches = match self.mapper.map_batch(&observations) {
                Ok(matches) => matches,
                Err(err) => {
                    log::warn!(
                        "session {}: regulation mapping failed for frame {}, \
                         treating as no observations: {:#}",
                        self.session.id,
                        frame.index,
                        err
                    );
                    self.hooks.on_session_update(self.session)?;
                    return Ok(());
                }
            };
            let aligned = align_matches(observations.len(), matches);
            for (obs, matched) in observations.iter().zip(aligned) {
                if !self
                    .dedup
                    .should_alert(&obs.hazard_type, &obs.location, ts)
                {
                    log::debug!(
                        "duplicate suppressed: {} at {}",
                        obs.hazard_type,
                        obs.location
                    );
                    continue;
                }
                self.session.violation_count += 1;
                let seq = self.session.violation_count;

                let clip_dest = self.clips_dir.join(format!("violation_{seq}.mp4"));
                let clip_path = self.extractor.extract(
                    &self.session.source_path,
                    ts,
                    self.cfg.clip_before_s,
                    self.cfg.clip_after_s,
                    self.session.duration_s,
                    &clip_dest,
                );

                let alert = ViolationAlert {
                    alert_id: format!("{}_{}", self.session.id, seq),
                    session_id: self.session.id.clone(),
                    timestamp_s: ts,
                    frame_index: frame.index,
                    hazard_type: obs.hazard_type.clone(),
                    severity: matched.as_ref().map(|m| m.severity).unwrap_or_default(),
                    observation: obs.observation.clone(),
                    location: obs.location.clone(),
                    osha_code: matched.as_ref().map(|m| m.osha_code.clone()),
                    osha_title: matched.as_ref().map(|m| m.osha_title.clone()),
                    plain_english: matched.as_ref().map(|m| m.plain_english.clone()),
                    remediation: matched.as_ref().map(|m| m.remediation.clone()),
                    estimated_fix_time: matched
                        .as_ref()
                        .map(|m| m.estimated_fix_time.clone()),
                    frame_path: frame_path.display().to_string(),
                    video_clip_path: clip_path.map(|p| p.display().to_string()),
                    detected_at_s: crate::now_s()?,
                };
                log::info!(
                    "violation detected: {} at {:.1}s ({})",
                    alert.hazard_type,
                    ts,
                    alert.severity.as_str()
                );
                self.hooks.on_violation(&alert)?;
            }
        }

        self.hooks.on_session_update(self.session)?;
        Ok(())
    }
}

fn encode_frame_jpeg(frame: &VideoFrame) -> Result<Vec<u8>> {
    use image::ImageEncoder;

    let mut out = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 85);
    encoder
        .write_image(
            &frame.pixels,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgb8,
        )
        .context("encode frame as jpeg")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_flags_are_idempotent() {
        let control = SessionControl::new();
        assert!(!control.is_paused());
        control.pause();
        control.pause();
        assert!(control.is_paused());
        control.resume();
        assert!(!control.is_paused());
        control.stop();
        control.stop();
        assert!(control.is_stopped());
    }

    #[test]
    fn jpeg_encoding_produces_a_decodable_image() {
        let frame = VideoFrame {
            index: 0,
            timestamp_s: 0.0,
            width: 8,
            height: 4,
            pixels: vec![128u8; 8 * 4 * 3],
        };
        let jpeg = encode_frame_jpeg(&frame).expect("encode");
        let decoded = image::load_from_memory(&jpeg).expect("decode");
        assert_eq!(decoded.width(), 8);
        assert_eq!(decoded.height(), 4);
    }
}
