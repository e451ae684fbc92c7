use anyhow::Result;

use crate::detect::result::{Keypoint, SpotCandidate};
use crate::frame::Frame;

/// Per-frame blob detector.
///
/// Implementations treat the frame as read-only and must not retain it past
/// the call. Keypoint order is significant: collision tie-breaks use it.
pub trait KeypointDetector {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Keypoint>>;
}

/// Spot-outline segmenter, run once on the reference frame.
pub trait SpotSegmenter {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Candidates in contour-scan order. Discovery's stride rule depends on it.
    fn segment(&mut self, frame: &Frame) -> Result<Vec<SpotCandidate>>;
}
