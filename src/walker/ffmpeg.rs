//! FFmpeg-backed frame decoding for real video files.
//!
//! Frames are decoded sequentially and scaled to RGB24 in-memory. Frame
//! timestamps are derived from the delivered frame index and the stream
//! frame rate, which keeps them monotonic even when the container carries
//! sparse or out-of-order PTS values.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::{VideoFrame, VideoMeta};

pub(super) struct FfmpegWalker {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    meta: VideoMeta,
    delivered: u64,
    drained: bool,
}

impl FfmpegWalker {
    pub(super) fn open(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("open '{path}' with ffmpeg"))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{path}' has no video track"))?;
        let stream_index = stream.index();

        let rate = stream.avg_frame_rate();
        if rate.numerator() <= 0 || rate.denominator() <= 0 {
            return Err(anyhow!("'{path}' reports no usable frame rate"));
        }
        let frame_rate = rate.numerator() as f64 / rate.denominator() as f64;

        let duration_s = if input.duration() > 0 {
            input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)
        } else {
            0.0
        };
        let total_frames = if stream.frames() > 0 {
            stream.frames() as u64
        } else {
            (duration_s * frame_rate).round() as u64
        };

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;
        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "FrameWalker: opened {} (ffmpeg, {} frames @ {:.2} fps, {:.1}s)",
            path,
            total_frames,
            frame_rate,
            duration_s.max(total_frames as f64 / frame_rate)
        );

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            meta: VideoMeta {
                frame_rate,
                total_frames,
                duration_s: if duration_s > 0.0 {
                    duration_s
                } else {
                    total_frames as f64 / frame_rate
                },
            },
            delivered: 0,
            drained: false,
        })
    }

    pub(super) fn meta(&self) -> VideoMeta {
        self.meta
    }

    pub(super) fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return Ok(Some(self.deliver(&decoded)?));
            }
            if self.drained {
                return Ok(None);
            }
            match self.next_packet() {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.drained = true;
                }
            }
        }
    }

    fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
        let stream_index = self.stream_index;
        self.input
            .packets()
            .find(|(stream, _)| stream.index() == stream_index)
            .map(|(_, packet)| packet)
    }

    fn deliver(&mut self, decoded: &ffmpeg::frame::Video) -> Result<VideoFrame> {
        let mut rgb = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb)?;
        let index = self.delivered;
        self.delivered += 1;
        Ok(VideoFrame {
            index,
            timestamp_s: index as f64 / self.meta.frame_rate,
            width,
            height,
            pixels,
        })
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Ok((pixels, width, height))
}
