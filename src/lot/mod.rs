//! Per-frame lot state machines.
//!
//! Everything in this module is synchronous and infallible over its inputs:
//! keypoints and timestamps go in, transitions come out.

mod collision;
mod gate;
mod identity;
mod occupancy;
mod spots;

pub use collision::{CollisionDetector, CollisionEvent, CollisionPolicy};
pub use gate::{
    GateConfig, GateController, GateGlyph, GateKind, GateState, GateTransition, Rgb,
    DEFAULT_HOLD_OPEN,
};
pub use identity::{Identity, IdentityPool, UNKNOWN_IDENTITY};
pub use occupancy::{
    OccupancyRecord, OccupancyTracker, OccupancyTransition, DEFAULT_OCCUPANCY_TIMEOUT,
};
pub use spots::{Spot, SpotLabel, SpotPolicy, SpotRegistry};
