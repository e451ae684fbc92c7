use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Rect};

/// Blob observation for one frame: centre position and a size proxy
/// (equivalent-circle diameter in pixels).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub position: Point,
    pub size: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, size: f32) -> Self {
        Self {
            position: Point::new(x, y),
            size,
        }
    }
}

/// Contour candidate reported by a spot segmenter, in contour-scan order.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpotCandidate {
    /// Vertex count of the contour's polygon approximation
    /// (0 when the region is too irregular to approximate).
    pub vertices: usize,
    /// Axis-aligned bounding box of the approximation.
    pub bounds: Rect,
}
