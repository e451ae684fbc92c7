//! Entry/exit gate controllers.
//!
//! Each gate is an independent two-state machine (`Closed` -> `Open` on a
//! keypoint inside its trigger zone, `Open` -> `Closed` once the hold-open
//! window lapses). Anchor, tolerance and glyph geometry are per instance.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detect::Keypoint;
use crate::geometry::Point;
use crate::Timestamp;

pub const DEFAULT_HOLD_OPEN: Duration = Duration::from_secs(4);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Entry,
    Exit,
}

impl GateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GateKind::Entry => "entry",
            GateKind::Exit => "exit",
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RGB colour used by the overlay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const GREEN: Rgb = Rgb(0, 255, 0);
    pub const RED: Rgb = Rgb(255, 0, 0);
}

/// Line segment drawn for one gate state.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateGlyph {
    pub from: Point,
    pub to: Point,
    pub color: Rgb,
    pub thickness: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    pub kind: GateKind,
    pub anchor: Point,
    /// Half-widths of the trigger zone; a keypoint must be strictly inside on both axes.
    pub tolerance: Point,
    pub hold_open: Duration,
    pub open_glyph: GateGlyph,
    pub closed_glyph: GateGlyph,
}

impl GateConfig {
    pub fn entry() -> Self {
        Self {
            kind: GateKind::Entry,
            anchor: Point::new(90.0, 470.0),
            tolerance: Point::new(50.0, 80.0),
            hold_open: DEFAULT_HOLD_OPEN,
            open_glyph: glyph((90.0, 470.0), (90.0, 390.0), Rgb::GREEN),
            closed_glyph: glyph((90.0, 470.0), (170.0, 470.0), Rgb::RED),
        }
    }

    pub fn exit() -> Self {
        Self {
            kind: GateKind::Exit,
            anchor: Point::new(340.0, 580.0),
            tolerance: Point::new(50.0, 100.0),
            hold_open: DEFAULT_HOLD_OPEN,
            open_glyph: glyph((420.0, 580.0), (420.0, 500.0), Rgb::GREEN),
            closed_glyph: glyph((340.0, 580.0), (420.0, 580.0), Rgb::RED),
        }
    }

    fn in_trigger_zone(&self, position: Point) -> bool {
        (position.x - self.anchor.x).abs() < self.tolerance.x
            && (position.y - self.anchor.y).abs() < self.tolerance.y
    }
}

fn glyph(from: (f32, f32), to: (f32, f32), color: Rgb) -> GateGlyph {
    GateGlyph {
        from: Point::new(from.0, from.1),
        to: Point::new(to.0, to.1),
        color,
        thickness: 5,
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct GateState {
    pub is_open: bool,
    pub opened_at: Option<Timestamp>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum GateTransition {
    Opened(GateKind),
    Closed(GateKind),
}

pub struct GateController {
    config: GateConfig,
    state: GateState,
}

impl GateController {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            state: GateState::default(),
        }
    }

    pub fn kind(&self) -> GateKind {
        self.config.kind
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open
    }

    /// Evaluate one frame. Triggers re-arm `opened_at` even when already open;
    /// the hold-open check runs after trigger processing.
    pub fn tick(&mut self, keypoints: &[Keypoint], now: Timestamp) -> Option<GateTransition> {
        let was_open = self.state.is_open;

        if keypoints
            .iter()
            .any(|kp| self.config.in_trigger_zone(kp.position))
        {
            self.state.is_open = true;
            self.state.opened_at = Some(now);
        }

        if let (true, Some(opened_at)) = (self.state.is_open, self.state.opened_at) {
            if now.exceeds(opened_at, self.config.hold_open) {
                self.state.is_open = false;
            }
        }

        match (was_open, self.state.is_open) {
            (false, true) => {
                log::info!("{} gate opened", self.config.kind);
                Some(GateTransition::Opened(self.config.kind))
            }
            (true, false) => {
                log::info!("{} gate closed", self.config.kind);
                Some(GateTransition::Closed(self.config.kind))
            }
            _ => None,
        }
    }

    /// Overlay decision table: open -> open glyph, closed -> closed glyph.
    pub fn glyph(&self) -> GateGlyph {
        if self.state.is_open {
            self.config.open_glyph
        } else {
            self.config.closed_glyph
        }
    }
}
