//! Spot registry: the fixed set of labelled parking spaces.
//!
//! Spots are discovered once from a reference frame (or supplied as a fixed
//! layout) and never change afterwards.

use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::SpotCandidate;
use crate::geometry::{Point, Rect};

const LABEL_ALPHABET: std::ops::RangeInclusive<char> = 'A'..='Z';

/// Single-letter spot label. Ordering follows the alphabet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "char", into = "char")]
pub struct SpotLabel(char);

impl SpotLabel {
    pub fn new(c: char) -> Result<Self> {
        if !LABEL_ALPHABET.contains(&c) {
            return Err(anyhow!("spot label must be an uppercase letter A-Z, got {:?}", c));
        }
        Ok(Self(c))
    }

    pub fn as_char(self) -> char {
        self.0
    }

    /// Label for the `index`-th spot, if the alphabet is long enough.
    pub fn nth(index: usize) -> Option<Self> {
        LABEL_ALPHABET.clone().nth(index).map(Self)
    }
}

impl TryFrom<char> for SpotLabel {
    type Error = anyhow::Error;

    fn try_from(c: char) -> Result<Self> {
        Self::new(c)
    }
}

impl From<SpotLabel> for char {
    fn from(label: SpotLabel) -> char {
        label.0
    }
}

impl fmt::Display for SpotLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spot {
    pub label: SpotLabel,
    pub rect: Rect,
}

/// Candidate filter used by spot discovery.
///
/// The defaults reproduce the tuned behaviour for a top-down lot camera:
/// quadrilaterals wider than tall (but not more than 3:1), keeping only every
/// other qualifying contour because painted outlines are detected twice
/// (outer and inner boundary).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpotPolicy {
    /// Exclusive lower bound on `w / h`.
    pub min_aspect: f32,
    /// Exclusive upper bound on `w / h`.
    pub max_aspect: f32,
    /// Required vertex count of the contour approximation.
    pub vertices: usize,
    /// A qualifying candidate is kept only when its scan index is a multiple of this.
    pub stride: usize,
}

impl Default for SpotPolicy {
    fn default() -> Self {
        Self {
            min_aspect: 1.0,
            max_aspect: 3.0,
            vertices: 4,
            stride: 2,
        }
    }
}

impl SpotPolicy {
    fn qualifies(&self, candidate: &SpotCandidate) -> bool {
        if candidate.vertices != self.vertices {
            return false;
        }
        let aspect = candidate.bounds.aspect_ratio();
        aspect > self.min_aspect && aspect < self.max_aspect
    }
}

/// Immutable, label-ordered set of spots.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpotRegistry {
    spots: Vec<Spot>,
}

impl SpotRegistry {
    /// Build the registry from segmenter output in contour-scan order.
    ///
    /// The stride rule is evaluated on the candidate's index in the full scan
    /// (qualifying or not). Never fails: no qualifying candidate yields an
    /// empty registry.
    pub fn discover(candidates: &[SpotCandidate], policy: &SpotPolicy) -> Self {
        let stride = policy.stride.max(1);
        let mut spots = Vec::new();
        for (index, candidate) in candidates.iter().enumerate() {
            if !policy.qualifies(candidate) || index % stride != 0 {
                continue;
            }
            let Some(label) = SpotLabel::nth(spots.len()) else {
                log::warn!(
                    "spot discovery: label alphabet exhausted, ignoring candidate at {:?}",
                    candidate.bounds
                );
                continue;
            };
            spots.push(Spot {
                label,
                rect: candidate.bounds,
            });
        }
        log::info!("detected {} parking spots", spots.len());
        Self { spots }
    }

    /// Build the registry from an explicit layout. Labels must be unique.
    pub fn from_rects(layout: impl IntoIterator<Item = (SpotLabel, Rect)>) -> Result<Self> {
        let mut spots: Vec<Spot> = layout
            .into_iter()
            .map(|(label, rect)| Spot { label, rect })
            .collect();
        spots.sort_by_key(|spot| spot.label);
        if let Some(pair) = spots.windows(2).find(|pair| pair[0].label == pair[1].label) {
            return Err(anyhow!("duplicate spot label {}", pair[0].label));
        }
        Ok(Self { spots })
    }

    pub fn len(&self) -> usize {
        self.spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Spot> {
        self.spots.iter()
    }

    pub fn labels(&self) -> impl Iterator<Item = SpotLabel> + '_ {
        self.spots.iter().map(|spot| spot.label)
    }

    pub fn get(&self, label: SpotLabel) -> Option<&Spot> {
        self.spots.iter().find(|spot| spot.label == label)
    }

    /// First spot in label order whose rectangle contains `point`.
    pub fn locate(&self, point: Point) -> Option<&Spot> {
        self.spots.iter().find(|spot| spot.rect.contains(point))
    }
}
