//! Pixel-space primitives shared by the lot state machines and the detectors.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Sub-pixel position in frame coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Integer pixel the point falls in (truncation toward zero).
    pub fn to_pixel(self) -> (i32, i32) {
        (self.x as i32, self.y as i32)
    }
}

/// Axis-aligned box in frame pixels. `w` and `h` are always positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Result<Self> {
        if w == 0 || h == 0 {
            return Err(anyhow!("rectangle must have positive size (got {}x{})", w, h));
        }
        Ok(Self { x, y, w, h })
    }

    /// `x + w`, widened so no layout can overflow.
    pub fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.w)
    }

    pub fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.h)
    }

    /// Inclusive on all four edges: `x <= px <= x + w` and `y <= py <= y + h`.
    pub fn contains_pixel(&self, px: i32, py: i32) -> bool {
        let (px, py) = (i64::from(px), i64::from(py));
        i64::from(self.x) <= px
            && px <= self.right()
            && i64::from(self.y) <= py
            && py <= self.bottom()
    }

    /// Containment of a sub-pixel point, evaluated on the pixel it falls in.
    pub fn contains(&self, point: Point) -> bool {
        let (px, py) = point.to_pixel();
        self.contains_pixel(px, py)
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.w as f32 / self.h as f32
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }
}
