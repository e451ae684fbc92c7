//! Image sequence source: every image file in a directory, in file-name order.
//!
//! Image `i` is stamped `connect time + i / target_fps`.

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use std::path::PathBuf;

use super::{FrameSource, SourceStats};
use crate::config::SourceSettings;
use crate::frame::Frame;
use crate::{Clock, SystemClock, Timestamp};

const EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

pub struct ImageSequenceSource {
    settings: SourceSettings,
    files: Vec<PathBuf>,
    cursor: usize,
    started: Option<Timestamp>,
    last_error: Option<String>,
}

impl ImageSequenceSource {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&settings.url)
            .with_context(|| format!("cannot read image directory {}", settings.url))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(Self {
            settings,
            files,
            cursor: 0,
            started: None,
            last_error: None,
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn connect(&mut self) -> Result<()> {
        if self.files.is_empty() {
            return Err(anyhow!("no image files in {}", self.settings.url));
        }
        self.started = Some(SystemClock.now());
        log::info!(
            "ImageSequenceSource: connected to {} ({} images)",
            self.settings.url,
            self.files.len()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        let decoded = image::open(path).map_err(|e| {
            let msg = format!("failed to decode {}: {}", path.display(), e);
            self.last_error = Some(msg.clone());
            anyhow!(msg)
        })?;
        let rgb = decoded
            .resize_exact(self.settings.width, self.settings.height, FilterType::Triangle)
            .to_rgb8();
        let (width, height) = rgb.dimensions();
        let index = self.cursor as u64;
        let start = self.started.unwrap_or_default().as_secs_f64();
        let fps = self.settings.target_fps.max(1) as f64;
        let captured_at = Timestamp::from_secs_f64(start + index as f64 / fps);
        self.cursor += 1;
        Ok(Some(Frame::new(
            rgb.into_raw(),
            width,
            height,
            captured_at,
            index,
        )?))
    }

    fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.cursor as u64,
            url: self.settings.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_images_in_name_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for (name, value) in [("b.png", 200u8), ("a.png", 10u8)] {
            let img = image::RgbImage::from_pixel(8, 4, image::Rgb([value, value, value]));
            img.save(dir.path().join(name))?;
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored")?;

        let settings = SourceSettings {
            url: dir.path().display().to_string(),
            width: 4,
            height: 2,
            target_fps: 4,
            ..SourceSettings::default()
        };
        let mut source = ImageSequenceSource::new(settings)?;
        source.connect()?;

        let first = source.next_frame()?.expect("first image");
        assert_eq!((first.width, first.height), (4, 2));
        assert_eq!(first.pixels()[0], 10);
        let second = source.next_frame()?.expect("second image");
        assert_eq!(second.pixels()[0], 200);
        // frames are a quarter second apart regardless of decode speed
        let gap = second.captured_at.secs_since(first.captured_at);
        assert!((gap - 0.25).abs() < 1e-6, "gap was {gap}");
        assert!(source.next_frame()?.is_none());
        Ok(())
    }
}
