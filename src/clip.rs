//! Evidence clip extraction.
//!
//! When an alert fires, a short excerpt of the source video bracketing the
//! detection timestamp is kept as supporting material. Extraction re-opens
//! the source independently of the live decode handle, so a seek here never
//! contends with the monitoring loop.
//!
//! Extraction is strictly best-effort: any failure is logged and the caller
//! gets `None`. The enclosing alert is still emitted with a null clip path.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Resolved clip bounds within the source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipWindow {
    pub start_s: f64,
    pub duration_s: f64,
}

/// Compute clip bounds around `center_s`.
///
/// The window never starts before timestamp zero and never runs past the end
/// of the source; truncation at either edge is silent, with no padding. The
/// duration therefore never exceeds `before_s + after_s`.
pub fn clip_window(center_s: f64, before_s: f64, after_s: f64, source_duration_s: f64) -> ClipWindow {
    let start_s = (center_s - before_s).max(0.0);
    let mut duration_s = before_s + after_s;
    if source_duration_s > 0.0 {
        duration_s = duration_s.min((source_duration_s - start_s).max(0.0));
    }
    ClipWindow { start_s, duration_s }
}

/// Best-effort clip writer for one source.
///
/// `stub://` sources get a synthetic clip (a small JSON description of the
/// window) so synthetic pipelines still produce an artifact; everything else
/// goes through the ffmpeg CLI with a stream copy.
pub struct ClipExtractor {
    backend: ClipBackend,
}

enum ClipBackend {
    Synthetic,
    FfmpegCli,
}

impl ClipExtractor {
    pub fn for_source(source: &str) -> Self {
        let backend = if source.starts_with("stub://") {
            ClipBackend::Synthetic
        } else {
            ClipBackend::FfmpegCli
        };
        Self { backend }
    }

    /// Extract `before_s + after_s` seconds around `center_s` into `dest`.
    ///
    /// Returns the written path, or `None` on any failure.
    pub fn extract(
        &self,
        source: &str,
        center_s: f64,
        before_s: f64,
        after_s: f64,
        source_duration_s: f64,
        dest: &Path,
    ) -> Option<PathBuf> {
        let window = clip_window(center_s, before_s, after_s, source_duration_s);
        if window.duration_s <= 0.0 {
            log::warn!(
                "clip window for {} at {:.1}s is empty, skipping extraction",
                source,
                center_s
            );
            return None;
        }
        match self.run(source, window, dest) {
            Ok(path) => {
                log::info!("extracted evidence clip {}", path.display());
                Some(path)
            }
            Err(err) => {
                log::error!("clip extraction failed for {}: {:#}", source, err);
                None
            }
        }
    }

    fn run(&self, source: &str, window: ClipWindow, dest: &Path) -> Result<PathBuf> {
        match self.backend {
            ClipBackend::Synthetic => write_synthetic_clip(source, window, dest),
            ClipBackend::FfmpegCli => run_ffmpeg_copy(source, window, dest),
        }
    }
}

fn write_synthetic_clip(source: &str, window: ClipWindow, dest: &Path) -> Result<PathBuf> {
    let body = serde_json::json!({
        "source": source,
        "start_s": window.start_s,
        "duration_s": window.duration_s,
    });
    std::fs::write(dest, serde_json::to_vec_pretty(&body)?)
        .with_context(|| format!("write synthetic clip {}", dest.display()))?;
    Ok(dest.to_path_buf())
}

fn run_ffmpeg_copy(source: &str, window: ClipWindow, dest: &Path) -> Result<PathBuf> {
    // -ss before -i seeks on the demuxer, which is what we want for a copy.
    let output = Command::new("ffmpeg")
        .args([
            "-v",
            "error",
            "-y",
            "-ss",
            &format!("{:.3}", window.start_s),
            "-t",
            &format!("{:.3}", window.duration_s),
            "-i",
            source,
            "-c",
            "copy",
        ])
        .arg(dest)
        .output()
        .context("spawn ffmpeg for clip extraction")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "ffmpeg exited with {}: {}",
            output.status,
            stderr.trim()
        ));
    }
    Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_centered_when_source_is_long_enough() {
        let w = clip_window(60.0, 15.0, 15.0, 300.0);
        assert_eq!(w, ClipWindow { start_s: 45.0, duration_s: 30.0 });
    }

    #[test]
    fn window_never_starts_before_zero() {
        let w = clip_window(5.0, 15.0, 15.0, 300.0);
        assert_eq!(w.start_s, 0.0);
        assert!(w.duration_s <= 30.0);
    }

    #[test]
    fn window_truncates_at_source_end_without_padding() {
        let w = clip_window(295.0, 15.0, 15.0, 300.0);
        assert_eq!(w.start_s, 280.0);
        assert_eq!(w.duration_s, 20.0);
    }

    #[test]
    fn window_is_empty_past_the_source_end() {
        let w = clip_window(500.0, 15.0, 15.0, 300.0);
        assert_eq!(w.duration_s, 0.0);
    }

    #[test]
    fn synthetic_extraction_writes_the_destination() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("violation_1.mp4");
        let extractor = ClipExtractor::for_source("stub://yard?fps=30&frames=900");
        let path = extractor
            .extract("stub://yard?fps=30&frames=900", 10.0, 15.0, 15.0, 30.0, &dest)
            .expect("synthetic clip");
        assert!(path.exists());
    }

    #[test]
    fn extraction_failure_yields_none_not_panic() {
        let extractor = ClipExtractor::for_source("stub://yard");
        let dest = Path::new("/nonexistent-dir/clip.mp4");
        assert!(extractor
            .extract("stub://yard", 10.0, 15.0, 15.0, 30.0, dest)
            .is_none());
    }
}
