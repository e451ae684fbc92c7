use serde::{Deserialize, Serialize};

use crate::detect::Keypoint;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollisionPolicy {
    /// A frame's largest blob is an outlier when `max > size_ratio * mean`.
    pub size_ratio: f64,
    /// Dedup box half-width in pixels (inclusive on both axes).
    pub radius: i32,
}

impl Default for CollisionPolicy {
    fn default() -> Self {
        Self {
            size_ratio: 1.3,
            radius: 15,
        }
    }
}

/// Integer pixel position of a flagged collision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionEvent {
    pub x: i32,
    pub y: i32,
}

impl CollisionEvent {
    fn near(&self, other: &CollisionEvent, radius: i32) -> bool {
        (self.x - other.x).abs() <= radius && (self.y - other.y).abs() <= radius
    }
}

/// Append-only collision log. Entries are never removed or expired.
#[derive(Debug, Default)]
pub struct CollisionDetector {
    policy: CollisionPolicy,
    events: Vec<CollisionEvent>,
}

impl CollisionDetector {
    pub fn new(policy: CollisionPolicy) -> Self {
        Self {
            policy,
            events: Vec::new(),
        }
    }

    /// Inspect one frame's keypoints; returns the event if a new one was recorded.
    pub fn update(&mut self, keypoints: &[Keypoint]) -> Option<CollisionEvent> {
        let candidate = self.outlier(keypoints)?;
        if self
            .events
            .iter()
            .any(|existing| existing.near(&candidate, self.policy.radius))
        {
            return None;
        }
        log::info!(
            "possible collision detected at ({}, {})",
            candidate.x,
            candidate.y
        );
        self.events.push(candidate);
        Some(candidate)
    }

    fn outlier(&self, keypoints: &[Keypoint]) -> Option<CollisionEvent> {
        let first = keypoints.first()?;
        let mut largest = first;
        let mut total = 0.0f64;
        for kp in keypoints {
            total += kp.size as f64;
            // Strict comparison keeps the first keypoint on ties.
            if kp.size > largest.size {
                largest = kp;
            }
        }
        let mean = total / keypoints.len() as f64;
        if (largest.size as f64) <= self.policy.size_ratio * mean {
            return None;
        }
        let (x, y) = largest.position.to_pixel();
        Some(CollisionEvent { x, y })
    }

    pub fn events(&self) -> &[CollisionEvent] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    fn kp(x: f32, y: f32, size: f32) -> Keypoint {
        Keypoint {
            position: Point::new(x, y),
            size,
        }
    }

    /// One large outlier at (x, y) among small blobs far away.
    fn outlier_frame(x: f32, y: f32) -> Vec<Keypoint> {
        vec![kp(400.0, 50.0, 10.0), kp(x, y, 40.0), kp(450.0, 60.0, 10.0)]
    }

    #[test]
    fn empty_frame_is_noop() {
        let mut detector = CollisionDetector::default();
        assert_eq!(detector.update(&[]), None);
        assert!(detector.events().is_empty());
    }

    #[test]
    fn uniform_sizes_are_not_collisions() {
        let mut detector = CollisionDetector::new(CollisionPolicy::default());
        let frame = vec![kp(10.0, 10.0, 20.0), kp(100.0, 100.0, 21.0)];
        assert_eq!(detector.update(&frame), None);
    }

    #[test]
    fn exactly_at_ratio_is_not_an_outlier() {
        let mut detector = CollisionDetector::default();
        // mean 10, largest 13 == 1.3 * mean
        let frame = vec![kp(100.0, 100.0, 13.0), kp(300.0, 300.0, 7.0)];
        assert_eq!(detector.update(&frame), None);

        let frame = vec![kp(100.0, 100.0, 13.5), kp(300.0, 300.0, 6.5)];
        assert_eq!(
            detector.update(&frame),
            Some(CollisionEvent { x: 100, y: 100 })
        );
    }

    #[test]
    fn single_keypoint_is_never_an_outlier() {
        let mut detector = CollisionDetector::new(CollisionPolicy::default());
        assert_eq!(detector.update(&[kp(10.0, 10.0, 99.0)]), None);
    }

    #[test]
    fn nearby_outliers_are_deduplicated() {
        let mut detector = CollisionDetector::new(CollisionPolicy::default());
        assert_eq!(
            detector.update(&outlier_frame(10.0, 10.0)),
            Some(CollisionEvent { x: 10, y: 10 })
        );
        assert_eq!(detector.update(&outlier_frame(20.0, 20.0)), None);
        assert_eq!(detector.events().len(), 1);

        assert_eq!(
            detector.update(&outlier_frame(100.0, 100.0)),
            Some(CollisionEvent { x: 100, y: 100 })
        );
        assert_eq!(detector.events().len(), 2);
    }

    #[test]
    fn far_on_one_axis_is_enough() {
        let mut detector = CollisionDetector::new(CollisionPolicy::default());
        detector.update(&outlier_frame(10.0, 10.0));
        assert!(detector.update(&outlier_frame(26.0, 10.0)).is_some());
        assert!(detector.update(&outlier_frame(10.0, 25.0)).is_none());
        assert_eq!(detector.events().len(), 2);
    }

    #[test]
    fn tie_on_max_size_picks_first() {
        let mut detector = CollisionDetector::new(CollisionPolicy::default());
        let frame = vec![
            kp(1.0, 1.0, 5.0),
            kp(200.0, 200.0, 30.0),
            kp(300.0, 300.0, 30.0),
            kp(2.0, 2.0, 5.0),
        ];
        assert_eq!(
            detector.update(&frame),
            Some(CollisionEvent { x: 200, y: 200 })
        );
    }

    #[test]
    fn positions_are_truncated_to_pixels() {
        let mut detector = CollisionDetector::new(CollisionPolicy::default());
        assert_eq!(
            detector.update(&outlier_frame(55.9, 70.2)),
            Some(CollisionEvent { x: 55, y: 70 })
        );
    }
}
