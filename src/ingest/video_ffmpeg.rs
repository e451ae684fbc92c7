//! Recorded lot footage decoded with FFmpeg.
//!
//! Frames are scaled to the configured working size and converted to packed
//! RGB. Timestamps advance by `1 / target_fps` from the moment the source was
//! connected, so replaying a file with `--fast` keeps the lot timings intact.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats};
use crate::config::SourceSettings;
use crate::frame::Frame;
use crate::{Clock, SystemClock, Timestamp};

pub struct VideoFileSource {
    settings: SourceSettings,
    input: ffmpeg::format::context::Input,
    video_stream: usize,
    decoder: ffmpeg::codec::decoder::Video,
    to_rgb: ffmpeg::software::scaling::Context,
    decoded: u64,
    draining: bool,
    exhausted: bool,
    started: Option<Timestamp>,
    last_decode: Option<Instant>,
}

impl VideoFileSource {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&settings.url)
            .with_context(|| format!("cannot open video '{}'", settings.url))?;
        let (video_stream, decoder) = open_decoder(&input)?;
        let to_rgb = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            settings.width,
            settings.height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .with_context(|| {
            format!(
                "cannot scale {}x{} video to {}x{}",
                decoder.width(),
                decoder.height(),
                settings.width,
                settings.height
            )
        })?;

        Ok(Self {
            settings,
            input,
            video_stream,
            decoder,
            to_rgb,
            decoded: 0,
            draining: false,
            exhausted: false,
            started: None,
            last_decode: None,
        })
    }

    fn frame_time(&self) -> Timestamp {
        let start = self.started.unwrap_or_default();
        let fps = self.settings.target_fps.max(1) as f64;
        Timestamp::from_secs_f64(start.as_secs_f64() + self.decoded as f64 / fps)
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb = ffmpeg::frame::Video::empty();
        self.to_rgb
            .run(decoded, &mut rgb)
            .context("convert decoded frame to RGB")?;
        let frame = Frame::new(
            packed_rgb(&rgb)?,
            rgb.width(),
            rgb.height(),
            self.frame_time(),
            self.decoded,
        )?;
        self.decoded += 1;
        self.last_decode = Some(Instant::now());
        Ok(frame)
    }

    /// Feed the next video packet to the decoder, or flush it at end of file.
    fn feed(&mut self) -> Result<()> {
        let next = self
            .input
            .packets()
            .find(|(stream, _)| stream.index() == self.video_stream);
        match next {
            Some((_, packet)) => self
                .decoder
                .send_packet(&packet)
                .context("decode video packet"),
            None => {
                self.draining = true;
                self.decoder.send_eof().context("flush video decoder")
            }
        }
    }
}

fn open_decoder(
    input: &ffmpeg::format::context::Input,
) -> Result<(usize, ffmpeg::codec::decoder::Video)> {
    let stream = input
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| anyhow!("file has no video track"))?;
    let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .context("read video codec parameters")?
        .decoder()
        .video()
        .context("open video decoder")?;
    Ok((stream.index(), decoder))
}

impl FrameSource for VideoFileSource {
    fn connect(&mut self) -> Result<()> {
        self.started = Some(SystemClock.now());
        log::info!(
            "VideoFileSource: decoding {} at {} fps",
            self.settings.url,
            self.settings.target_fps
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        while !self.exhausted {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
            if self.draining {
                self.exhausted = true;
                log::info!("VideoFileSource: {} frames decoded", self.decoded);
            } else {
                self.feed()?;
            }
        }
        Ok(None)
    }

    fn is_healthy(&self) -> bool {
        if self.exhausted || self.started.is_none() {
            return false;
        }
        self.last_decode
            .map_or(true, |at| at.elapsed() <= Duration::from_secs(5))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.decoded,
            url: self.settings.url.clone(),
        }
    }
}

/// Copy the RGB plane into a tightly packed buffer, dropping row padding.
fn packed_rgb(frame: &ffmpeg::frame::Video) -> Result<Vec<u8>> {
    let row_bytes = frame.width() as usize * 3;
    let rows = frame.height() as usize;
    let stride = frame.stride(0).max(row_bytes).max(1);
    let plane = frame.data(0);

    let mut pixels = Vec::with_capacity(row_bytes * rows);
    for row in plane.chunks(stride).take(rows) {
        let row = row
            .get(..row_bytes)
            .context("video frame row shorter than its width")?;
        pixels.extend_from_slice(row);
    }
    if pixels.len() != row_bytes * rows {
        return Err(anyhow!(
            "video frame plane holds {} bytes, expected {}",
            pixels.len(),
            row_bytes * rows
        ));
    }
    Ok(pixels)
}
