//! lotwatch - parking lot monitor
//!
//! This crate derives, per video frame, the state of a small parking lot watched
//! by one fixed camera:
//!
//! 1. **Spot occupancy**: which named spots hold a vehicle, and which plate was assigned to it.
//! 2. **Gate control**: entry and exit barriers that open when a vehicle approaches.
//! 3. **Collision flags**: positions where an unusually large blob suggests two vehicles touching.
//!
//! Occupancy and permission facts are persisted to a local SQLite store.
//!
//! # Module Structure
//!
//! - `geometry`: Rect and Point primitives
//! - `lot`: the per-frame state machines (spots, occupancy, gates, collisions)
//! - `pipeline`: the ordered per-frame pass and the frame loop runner
//! - `frame`: owned RGB frames
//! - `ingest`: frame sources (synthetic scene, video files, image sequences)
//! - `detect`: keypoint detectors and spot segmenters
//! - `render`: overlay drawing and renderers
//! - `storage`: permission/occupancy/event store
//! - `config`: daemon configuration

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod lot;
pub mod pipeline;
pub mod render;
pub mod storage;

pub use detect::{
    BlobDetector, BlobDetectorConfig, Keypoint, KeypointDetector, OutlineSegmenter,
    ScriptedDetector, SpotCandidate, SpotSegmenter,
};
pub use frame::Frame;
pub use geometry::{Point, Rect};
pub use ingest::{FrameSource, SourceStats, SyntheticLotSource};
pub use lot::{
    CollisionDetector, CollisionEvent, CollisionPolicy, GateConfig, GateController, GateGlyph,
    GateKind, GateState, GateTransition, Identity, IdentityPool, OccupancyRecord,
    OccupancyTracker, OccupancyTransition, Spot, SpotLabel, SpotPolicy, SpotRegistry,
};
pub use pipeline::{
    discover_spots, EventSink, FrameReport, GateStatus, LotEvent, LotSnapshot, Pipeline,
    RunSummary, Runner, SpotStatus, StopReason,
};
pub use render::{draw_overlay, LogRenderer, Renderer};
pub use storage::{InMemoryPermissionStore, PermissionStore, SqlitePermissionStore, StoreSink};

// -------------------- Time --------------------

/// Point in time, in seconds since the UNIX epoch.
///
/// Kept as `f64` seconds because the timing rules compare fractional intervals
/// (e.g. the 1.7 s occupancy timeout).
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Timestamp(f64);

impl Timestamp {
    pub fn from_secs_f64(secs: f64) -> Self {
        Timestamp(secs)
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0
    }

    /// Seconds elapsed from `earlier` to `self`. Negative if `earlier` is later.
    pub fn secs_since(self, earlier: Timestamp) -> f64 {
        self.0 - earlier.0
    }

    /// True when strictly more than `window` has passed since `earlier`.
    pub fn exceeds(self, earlier: Timestamp, window: Duration) -> bool {
        self.secs_since(earlier) > window.as_secs_f64()
    }

    pub fn add(self, delta: Duration) -> Self {
        Timestamp(self.0 + delta.as_secs_f64())
    }
}

/// Source of wall-clock time. Frame sources stamp frames with it.
pub trait Clock {
    fn now(&self) -> Timestamp;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        // A clock before the epoch is a host misconfiguration; report zero.
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Timestamp(secs)
    }
}

/// Manually driven clock for tests and deterministic replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<f64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Cell::new(start.0),
        }
    }

    pub fn set(&self, at: Timestamp) {
        self.now.set(at.0);
    }

    pub fn advance(&self, delta: Duration) {
        self.now.set(self.now.get() + delta.as_secs_f64());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exceeds_is_strict() {
        let t0 = Timestamp::from_secs_f64(10.0);
        assert!(!t0.add(Duration::from_secs(4)).exceeds(t0, Duration::from_secs(4)));
        assert!(t0
            .add(Duration::from_millis(4001))
            .exceeds(t0, Duration::from_secs(4)));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(Timestamp::from_secs_f64(1.0));
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now().as_secs_f64(), 1.5);
        clock.set(Timestamp::from_secs_f64(7.0));
        assert_eq!(clock.now(), Timestamp::from_secs_f64(7.0));
    }
}
