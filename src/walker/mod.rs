//! Paced frame walking over a video source.
//!
//! The walker decodes a source at its native frame rate and exposes frames as
//! a lazy, finite, time-indexed sequence. Two backends:
//! - `stub://name?fps=..&frames=..` synthetic frames (always compiled, used
//!   by tests and the demo)
//! - ffmpeg decode of real files (feature: decode-ffmpeg)
//!
//! Every frame is consumed in order so timestamps stay aligned with the
//! source's native playback; callers analyze only frames on the sampling
//! stride. A small fixed pacing delay per frame approximates real-time
//! playback speed. That delay exists to make a live-monitoring demonstration
//! feel live; it is not a throughput knob.
//!
//! The sequence is restartable only by reopening the source.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use url::Url;

#[cfg(feature = "decode-ffmpeg")]
mod ffmpeg;
#[cfg(feature = "decode-ffmpeg")]
use ffmpeg::FfmpegWalker;

/// Default per-frame pacing delay.
pub const DEFAULT_PACING: Duration = Duration::from_millis(10);

/// Configuration for opening a frame walker.
#[derive(Clone, Debug)]
pub struct WalkerConfig {
    /// Source path: a local file, or a `stub://` URL for synthetic frames.
    pub path: String,
    /// Fixed delay inserted after each decoded frame. Zero disables pacing.
    pub pacing: Duration,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            pacing: DEFAULT_PACING,
        }
    }
}

/// Source metadata resolved at open time.
#[derive(Clone, Copy, Debug)]
pub struct VideoMeta {
    pub frame_rate: f64,
    pub total_frames: u64,
    pub duration_s: f64,
}

/// One decoded frame: RGB24 pixels plus its position in the source.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    pub index: u64,
    pub timestamp_s: f64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Lazy paced frame sequence over one source.
pub struct FrameWalker {
    backend: WalkerBackend,
    meta: VideoMeta,
    pacing: Duration,
}

enum WalkerBackend {
    Synthetic(SyntheticWalker),
    #[cfg(feature = "decode-ffmpeg")]
    Ffmpeg(FfmpegWalker),
}

impl FrameWalker {
    /// Open a source and probe its metadata.
    ///
    /// Failure here means the source is unreadable, the only fatal error
    /// class in the monitoring pipeline.
    pub fn open(config: WalkerConfig) -> Result<Self> {
        if config.path.trim().is_empty() {
            return Err(anyhow!("source path is empty"));
        }
        let pacing = config.pacing;
        if config.path.starts_with("stub://") {
            let synthetic = SyntheticWalker::open(&config.path)?;
            let meta = synthetic.meta;
            return Ok(Self {
                backend: WalkerBackend::Synthetic(synthetic),
                meta,
                pacing,
            });
        }
        #[cfg(feature = "decode-ffmpeg")]
        {
            let walker = FfmpegWalker::open(&config.path)
                .with_context(|| format!("open video source '{}'", config.path))?;
            let meta = walker.meta();
            Ok(Self {
                backend: WalkerBackend::Ffmpeg(walker),
                meta,
                pacing,
            })
        }
        #[cfg(not(feature = "decode-ffmpeg"))]
        {
            Err(anyhow!(
                "decoding '{}' requires the decode-ffmpeg feature",
                config.path
            ))
        }
    }

    pub fn meta(&self) -> VideoMeta {
        self.meta
    }

    /// Sampling stride in frames for a wall-clock analysis interval.
    ///
    /// Clamped to a minimum of one frame.
    pub fn sample_stride(&self, interval_s: f64) -> u64 {
        let stride = (self.meta.frame_rate * interval_s).round() as i64;
        stride.max(1) as u64
    }

    /// Decode the next frame, or `None` once the source is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        let frame = match &mut self.backend {
            WalkerBackend::Synthetic(walker) => walker.next_frame(),
            #[cfg(feature = "decode-ffmpeg")]
            WalkerBackend::Ffmpeg(walker) => walker.next_frame()?,
        };
        if frame.is_some() && !self.pacing.is_zero() {
            std::thread::sleep(self.pacing);
        }
        Ok(frame)
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and the demo
// ----------------------------------------------------------------------------

const STUB_WIDTH: u32 = 64;
const STUB_HEIGHT: u32 = 48;
const DEFAULT_STUB_FPS: f64 = 30.0;
const DEFAULT_STUB_FRAMES: u64 = 300;

struct SyntheticWalker {
    meta: VideoMeta,
    next_index: u64,
}

impl SyntheticWalker {
    fn open(path: &str) -> Result<Self> {
        let url = Url::parse(path).with_context(|| format!("parse stub source url '{path}'"))?;
        let mut fps = DEFAULT_STUB_FPS;
        let mut total_frames = DEFAULT_STUB_FRAMES;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "fps" => fps = value.parse().context("stub fps must be a number")?,
                "frames" => {
                    total_frames = value.parse().context("stub frames must be an integer")?
                }
                other => return Err(anyhow!("unknown stub source parameter '{other}'")),
            }
        }
        if fps <= 0.0 {
            return Err(anyhow!("stub fps must be positive"));
        }
        log::info!(
            "FrameWalker: opened {} (synthetic, {} frames @ {} fps)",
            path,
            total_frames,
            fps
        );
        Ok(Self {
            meta: VideoMeta {
                frame_rate: fps,
                total_frames,
                duration_s: total_frames as f64 / fps,
            },
            next_index: 0,
        })
    }

    fn next_frame(&mut self) -> Option<VideoFrame> {
        if self.next_index >= self.meta.total_frames {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;
        Some(VideoFrame {
            index,
            timestamp_s: index as f64 / self.meta.frame_rate,
            width: STUB_WIDTH,
            height: STUB_HEIGHT,
            pixels: synthetic_pixels(index),
        })
    }
}

fn synthetic_pixels(index: u64) -> Vec<u8> {
    let mut pixels = vec![0u8; (STUB_WIDTH * STUB_HEIGHT * 3) as usize];
    for (i, pixel) in pixels.iter_mut().enumerate() {
        *pixel = ((i as u64 + index) % 256) as u8;
    }
    pixels
}
