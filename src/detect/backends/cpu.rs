use std::collections::BTreeMap;
use std::f32::consts::PI;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::detect::backend::{KeypointDetector, SpotSegmenter};
use crate::detect::components::{self, UNLABELLED};
use crate::detect::result::{Keypoint, SpotCandidate};
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlobDetectorConfig {
    /// Pixels with luma at or below this are vehicle foreground.
    pub threshold: u8,
    pub min_area: u64,
    pub max_area: u64,
}

impl Default for BlobDetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 95,
            min_area: 2000,
            max_area: 20000,
        }
    }
}

/// CPU blob detector: dark-region threshold, connected components, area filter.
///
/// Each surviving region yields one keypoint at its centroid, sized by the
/// diameter of the circle with the same area.
#[derive(Default)]
pub struct BlobDetector {
    config: BlobDetectorConfig,
}

impl BlobDetector {
    pub fn new(config: BlobDetectorConfig) -> Self {
        Self { config }
    }
}

impl KeypointDetector for BlobDetector {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Keypoint>> {
        let mask: Vec<bool> = frame
            .to_gray()
            .into_iter()
            .map(|luma| luma <= self.config.threshold)
            .collect();
        let comps = components::label(&mask, frame.width, frame.height);

        let keypoints = comps
            .regions
            .iter()
            .filter(|r| r.pixel_count >= self.config.min_area && r.pixel_count <= self.config.max_area)
            .map(|r| {
                let (x, y) = r.centroid();
                let diameter = 2.0 * (r.pixel_count as f32 / PI).sqrt();
                Keypoint::new(x, y, diameter)
            })
            .collect::<Vec<_>>();
        log::debug!(
            "frame {}: {} regions, {} keypoints",
            frame.index,
            comps.regions.len(),
            keypoints.len()
        );
        Ok(keypoints)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Pixels with luma strictly above this are painted markings.
    pub threshold: u8,
    /// Minimum share of its bounding box a region must fill to count as a quadrilateral.
    pub fill_ratio: f32,
    /// Regions smaller than this are noise and are not reported.
    pub min_area: u64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            threshold: 104,
            fill_ratio: 0.85,
            min_area: 100,
        }
    }
}

/// CPU outline segmenter.
///
/// Bright markings are labelled; each marking is reported as an outer contour
/// followed by the inner contours of the holes it encloses, so a painted spot
/// outline shows up twice (outer then inner boundary).
#[derive(Default)]
pub struct OutlineSegmenter {
    config: SegmenterConfig,
}

impl OutlineSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    fn candidate(&self, filled: u64, region: &components::Region) -> SpotCandidate {
        let bounds = region.bounds();
        let fill = filled as f32 / bounds.area() as f32;
        SpotCandidate {
            vertices: if fill >= self.config.fill_ratio { 4 } else { 0 },
            bounds,
        }
    }
}

impl SpotSegmenter for OutlineSegmenter {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn segment(&mut self, frame: &Frame) -> Result<Vec<SpotCandidate>> {
        let gray = frame.to_gray();
        let bright: Vec<bool> = gray.iter().map(|&l| l > self.config.threshold).collect();
        let dark: Vec<bool> = bright.iter().map(|&b| !b).collect();
        let markings = components::label(&bright, frame.width, frame.height);
        let gaps = components::label(&dark, frame.width, frame.height);

        // Holes: dark regions off the border whose every bright neighbour
        // belongs to the same marking.
        let w = frame.width as usize;
        let h = frame.height as usize;
        let mut enclosing: Vec<Option<u32>> = vec![None; gaps.regions.len()];
        let mut open: Vec<bool> = gaps.regions.iter().map(|r| r.touches_border).collect();
        for (idx, &gap) in gaps.labels.iter().enumerate() {
            if gap == UNLABELLED || open[gap as usize] {
                continue;
            }
            let (x, y) = (idx % w, idx / w);
            let neighbours = [
                (x > 0).then(|| idx - 1),
                (x + 1 < w).then(|| idx + 1),
                (y > 0).then(|| idx - w),
                (y + 1 < h).then(|| idx + w),
            ];
            for n in neighbours.into_iter().flatten() {
                let marking = markings.labels[n];
                if marking == UNLABELLED {
                    continue;
                }
                match enclosing[gap as usize] {
                    None => enclosing[gap as usize] = Some(marking),
                    Some(existing) if existing != marking => open[gap as usize] = true,
                    Some(_) => {}
                }
            }
        }

        let mut holes: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (gap, owner) in enclosing.iter().enumerate() {
            if let (Some(owner), false) = (owner, open[gap]) {
                holes.entry(*owner).or_default().push(gap);
            }
        }

        let mut candidates = Vec::new();
        for (id, marking) in markings.regions.iter().enumerate() {
            if marking.pixel_count < self.config.min_area {
                continue;
            }
            let inner = holes.get(&(id as u32)).map(Vec::as_slice).unwrap_or(&[]);
            let hole_pixels: u64 = inner.iter().map(|&g| gaps.regions[g].pixel_count).sum();
            candidates.push(self.candidate(marking.pixel_count + hole_pixels, marking));
            for &gap in inner {
                let region = &gaps.regions[gap];
                if region.pixel_count >= self.config.min_area {
                    candidates.push(self.candidate(region.pixel_count, region));
                }
            }
        }
        log::debug!(
            "segmenter: {} markings, {} candidates",
            markings.regions.len(),
            candidates.len()
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::lot::Rgb;
    use crate::Timestamp;

    const ASPHALT: Rgb = Rgb(100, 100, 100);
    const PAINT: Rgb = Rgb(230, 230, 230);
    const CAR: Rgb = Rgb(40, 40, 40);

    fn blank(width: u32, height: u32) -> Frame {
        Frame::filled(width, height, ASPHALT, Timestamp::default(), 0)
    }

    fn fill_rect(frame: &mut Frame, x: i64, y: i64, w: i64, h: i64, color: Rgb) {
        for yy in y..y + h {
            for xx in x..x + w {
                frame.put_pixel(xx, yy, color);
            }
        }
    }

    fn outline(frame: &mut Frame, x: i64, y: i64, w: i64, h: i64) {
        fill_rect(frame, x, y, w, 3, PAINT);
        fill_rect(frame, x, y + h - 3, w, 3, PAINT);
        fill_rect(frame, x, y, 3, h, PAINT);
        fill_rect(frame, x + w - 3, y, 3, h, PAINT);
    }

    #[test]
    fn detects_dark_blob_at_centroid() {
        let mut frame = blank(200, 200);
        fill_rect(&mut frame, 50, 60, 50, 50, CAR);
        let keypoints = BlobDetector::default().detect(&frame).unwrap();
        assert_eq!(keypoints.len(), 1);
        assert_eq!(keypoints[0].position.x, 75.0);
        assert_eq!(keypoints[0].position.y, 85.0);
        let expected = 2.0 * (2500.0f32 / PI).sqrt();
        assert!((keypoints[0].size - expected).abs() < 1e-3);
    }

    #[test]
    fn area_filter_drops_small_and_huge_regions() {
        let mut frame = blank(300, 300);
        fill_rect(&mut frame, 10, 10, 10, 10, CAR);
        fill_rect(&mut frame, 100, 100, 160, 160, CAR);
        assert!(BlobDetector::default().detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn outline_yields_outer_then_inner_candidate() {
        let mut frame = blank(300, 200);
        outline(&mut frame, 20, 30, 84, 54);
        outline(&mut frame, 150, 30, 84, 54);
        let candidates = OutlineSegmenter::default().segment(&frame).unwrap();
        assert_eq!(candidates.len(), 4);
        assert_eq!(candidates[0].bounds, Rect::new(20, 30, 84, 54).unwrap());
        assert_eq!(candidates[1].bounds, Rect::new(23, 33, 78, 48).unwrap());
        assert_eq!(candidates[2].bounds, Rect::new(150, 30, 84, 54).unwrap());
        assert!(candidates.iter().all(|c| c.vertices == 4));
    }

    #[test]
    fn irregular_marking_is_not_a_quadrilateral() {
        let mut frame = blank(200, 200);
        // L-shaped marking
        fill_rect(&mut frame, 10, 10, 100, 10, PAINT);
        fill_rect(&mut frame, 10, 10, 10, 100, PAINT);
        let candidates = OutlineSegmenter::default().segment(&frame).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].vertices, 0);
    }
}
