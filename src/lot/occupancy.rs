//! Occupancy tracking: latched debounce of keypoint presence per spot.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use super::identity::{Identity, IdentityPool};
use super::spots::{SpotLabel, SpotRegistry};
use crate::detect::Keypoint;
use crate::Timestamp;

pub const DEFAULT_OCCUPANCY_TIMEOUT: Duration = Duration::from_millis(1700);

/// Per-spot occupancy. `occupant` and `last_seen` are set and cleared together.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OccupancyRecord {
    occupant: Option<Identity>,
    last_seen: Option<Timestamp>,
}

impl OccupancyRecord {
    pub fn occupant(&self) -> Option<&Identity> {
        self.occupant.as_ref()
    }

    pub fn last_seen(&self) -> Option<Timestamp> {
        self.last_seen
    }

    pub fn is_occupied(&self) -> bool {
        self.occupant.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum OccupancyTransition {
    Occupied { label: SpotLabel, identity: Identity },
    Freed { label: SpotLabel, identity: Identity },
}

pub struct OccupancyTracker {
    records: BTreeMap<SpotLabel, OccupancyRecord>,
    pool: IdentityPool,
    timeout: Duration,
}

impl OccupancyTracker {
    pub fn new(spots: &SpotRegistry, pool: IdentityPool, timeout: Duration) -> Self {
        Self {
            records: spots
                .labels()
                .map(|label| (label, OccupancyRecord::default()))
                .collect(),
            pool,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pool(&self) -> &IdentityPool {
        &self.pool
    }

    /// Assign this frame's keypoints to spots.
    ///
    /// Each keypoint goes to the first spot in label order containing it. An
    /// empty spot becomes occupied and consumes one identity; an occupied spot
    /// only has its timer refreshed.
    pub fn update(
        &mut self,
        spots: &SpotRegistry,
        keypoints: &[Keypoint],
        now: Timestamp,
    ) -> Vec<OccupancyTransition> {
        let mut transitions = Vec::new();
        for keypoint in keypoints {
            let Some(spot) = spots.locate(keypoint.position) else {
                continue;
            };
            let Some(record) = self.records.get_mut(&spot.label) else {
                continue;
            };
            if record.occupant.is_none() {
                let identity = self.pool.take();
                log::info!("spot {} occupied by {}", spot.label, identity);
                record.occupant = Some(identity.clone());
                transitions.push(OccupancyTransition::Occupied {
                    label: spot.label,
                    identity,
                });
            }
            record.last_seen = Some(now);
        }
        transitions
    }

    /// Free every occupied spot not seen for longer than the timeout.
    pub fn expire(&mut self, now: Timestamp) -> Vec<OccupancyTransition> {
        let mut transitions = Vec::new();
        for (label, record) in self.records.iter_mut() {
            let Some(last_seen) = record.last_seen else {
                continue;
            };
            if !now.exceeds(last_seen, self.timeout) {
                continue;
            }
            record.last_seen = None;
            if let Some(identity) = record.occupant.take() {
                log::info!("spot {} freed ({})", label, identity);
                transitions.push(OccupancyTransition::Freed {
                    label: *label,
                    identity,
                });
            }
        }
        transitions
    }

    pub fn record(&self, label: SpotLabel) -> Option<&OccupancyRecord> {
        self.records.get(&label)
    }

    pub fn records(&self) -> impl Iterator<Item = (SpotLabel, &OccupancyRecord)> {
        self.records.iter().map(|(label, record)| (*label, record))
    }

    pub fn occupied_count(&self) -> usize {
        self.records.values().filter(|r| r.is_occupied()).count()
    }

    pub fn free_count(&self) -> usize {
        self.records.len() - self.occupied_count()
    }
}
