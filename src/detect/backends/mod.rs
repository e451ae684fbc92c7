pub mod cpu;
pub mod stub;

pub use cpu::{BlobDetector, BlobDetectorConfig, OutlineSegmenter, SegmenterConfig};
pub use stub::ScriptedDetector;
