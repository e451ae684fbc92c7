use std::collections::BTreeMap;

use anyhow::Result;

use crate::detect::backend::KeypointDetector;
use crate::detect::result::Keypoint;
use crate::frame::Frame;

/// Stub detector for testing. Returns keypoints scripted per frame index and
/// ignores pixel content.
#[derive(Clone, Debug, Default)]
pub struct ScriptedDetector {
    script: BTreeMap<u64, Vec<Keypoint>>,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, frame_index: u64, keypoints: Vec<Keypoint>) -> Self {
        self.script.insert(frame_index, keypoints);
        self
    }

    /// Script the same keypoints for every frame in `frames`.
    pub fn during(
        mut self,
        frames: std::ops::Range<u64>,
        keypoints: &[Keypoint],
    ) -> Self {
        for index in frames {
            self.script
                .entry(index)
                .or_default()
                .extend_from_slice(keypoints);
        }
        self
    }
}

impl KeypointDetector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Keypoint>> {
        Ok(self.script.get(&frame.index).cloned().unwrap_or_default())
    }
}
