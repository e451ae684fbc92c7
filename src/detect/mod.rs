mod backend;
mod backends;
mod components;
mod result;

pub use backend::{KeypointDetector, SpotSegmenter};
pub use backends::{
    BlobDetector, BlobDetectorConfig, OutlineSegmenter, ScriptedDetector, SegmenterConfig,
};
pub use result::{Keypoint, SpotCandidate};
