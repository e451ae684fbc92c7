//! Frame ingestion sources.
//!
//! This module provides different sources for frames:
//! - Synthetic lot scene (`stub://lot`, testing and demos)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Directories of still images (feature: ingest-image)
//!
//! All sources produce `Frame` instances resized to the configured working
//! size. Frame `i` is stamped `start + i / target_fps`, where `start` is the
//! wall-clock connect time (or the scene start for the synthetic source), so
//! lot timings follow the stream rather than decode speed. End of stream is
//! reported as `Ok(None)`; any `Err` is fatal for the run.

#[cfg(feature = "ingest-image")]
pub mod image_seq;
pub mod synthetic;
#[cfg(feature = "ingest-file-ffmpeg")]
pub mod video_ffmpeg;

use anyhow::{anyhow, Result};

use crate::config::SourceSettings;
use crate::frame::Frame;

#[cfg(feature = "ingest-image")]
pub use image_seq::ImageSequenceSource;
pub use synthetic::{ScriptedCar, SyntheticLotSource, SyntheticScene};
#[cfg(feature = "ingest-file-ffmpeg")]
pub use video_ffmpeg::VideoFileSource;

const STUB_SCHEME: &str = "stub://";

/// Producer of frames for the lot pipeline.
pub trait FrameSource {
    /// Open the underlying stream. Failure here is fatal for the run.
    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub url: String,
}

/// Build the source named by `settings.url`.
///
/// - `stub://...` -> synthetic lot scene
/// - an existing directory -> image sequence (feature `ingest-image`)
/// - anything else local -> video file (feature `ingest-file-ffmpeg`)
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let url = settings.url.trim();
    if url.is_empty() {
        return Err(anyhow!("source url must not be empty"));
    }
    if url.starts_with(STUB_SCHEME) {
        return Ok(Box::new(SyntheticLotSource::from_settings(settings)));
    }
    if url.contains("://") {
        return Err(anyhow!(
            "unsupported source url '{}': only local paths and stub:// are accepted",
            url
        ));
    }
    if std::path::Path::new(url).is_dir() {
        #[cfg(feature = "ingest-image")]
        {
            return Ok(Box::new(ImageSequenceSource::new(settings.clone())?));
        }
        #[cfg(not(feature = "ingest-image"))]
        {
            return Err(anyhow!(
                "image directory sources require the ingest-image feature"
            ));
        }
    }
    #[cfg(feature = "ingest-file-ffmpeg")]
    {
        Ok(Box::new(VideoFileSource::new(settings.clone())?))
    }
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    {
        Err(anyhow!(
            "video file ingestion requires the ingest-file-ffmpeg feature"
        ))
    }
}
