//! Owned video frames.
//!
//! - `Frame`: one decoded RGB8 image plus its capture timestamp.
//!
//! Frames are produced by `ingest` sources, read by detectors, and drawn on
//! by the overlay renderer. Nothing retains a frame beyond its own iteration.

use anyhow::{anyhow, Result};

use crate::lot::Rgb;
use crate::Timestamp;

pub const CHANNELS: usize = 3;

pub struct Frame {
    /// Packed RGB8 pixels, row-major.
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture time on the stream timeline (`start + index / fps`).
    pub captured_at: Timestamp,
    /// Zero-based position in the source stream.
    pub index: u64,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: Timestamp,
        index: u64,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer size mismatch: got {} bytes, expected {} for {}x{} RGB",
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at,
            index,
        })
    }

    /// Uniform frame, used by sources that paint their own scene.
    pub fn filled(width: u32, height: u32, color: Rgb, captured_at: Timestamp, index: u64) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&[color.0, color.1, color.2]);
        }
        Self {
            data,
            width,
            height,
            captured_at,
            index,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Some(Rgb(
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ))
    }

    /// Writes are clipped to the frame; out-of-range coordinates are ignored.
    pub fn put_pixel(&mut self, x: i64, y: i64, color: Rgb) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        self.data[offset] = color.0;
        self.data[offset + 1] = color.1;
        self.data[offset + 2] = color.2;
    }

    /// ITU-R BT.601 luma, one byte per pixel.
    pub fn to_gray(&self) -> Vec<u8> {
        self.data
            .chunks_exact(CHANNELS)
            .map(|px| {
                let luma = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                luma.round().clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_buffer_size() {
        let err = Frame::new(vec![0u8; 10], 2, 2, Timestamp::default(), 0);
        assert!(err.is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2, Timestamp::default(), 0).is_ok());
    }

    #[test]
    fn put_pixel_clips_out_of_range() {
        let mut frame = Frame::filled(4, 3, Rgb(10, 10, 10), Timestamp::default(), 0);
        frame.put_pixel(-1, 0, Rgb::RED);
        frame.put_pixel(4, 0, Rgb::RED);
        frame.put_pixel(3, 2, Rgb::RED);
        assert_eq!(frame.pixel(3, 2), Some(Rgb::RED));
        assert_eq!(frame.pixel(0, 0), Some(Rgb(10, 10, 10)));
        assert_eq!(frame.pixel(4, 0), None);
    }

    #[test]
    fn gray_of_white_is_255() {
        let frame = Frame::filled(2, 1, Rgb(255, 255, 255), Timestamp::default(), 0);
        assert_eq!(frame.to_gray(), vec![255, 255]);
    }
}
