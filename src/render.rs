//! Overlay rendering of the lot state.

use anyhow::Result;

use crate::frame::Frame;
use crate::geometry::{Point, Rect};
use crate::lot::{GateGlyph, Rgb};
use crate::pipeline::LotSnapshot;

const SPOT_BORDER_PX: u32 = 2;
const COLLISION_MARKER: Rgb = Rgb(255, 255, 0);
const COLLISION_MARKER_RADIUS: i64 = 12;

/// Consumer of each processed frame and the lot state derived from it.
pub trait Renderer {
    fn render(&mut self, frame: &Frame, snapshot: &LotSnapshot) -> Result<()>;
}

/// Logs a one-line lot summary every `every` frames.
pub struct LogRenderer {
    every: u64,
    seen: u64,
}

impl LogRenderer {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            seen: 0,
        }
    }
}

impl Renderer for LogRenderer {
    fn render(&mut self, frame: &Frame, snapshot: &LotSnapshot) -> Result<()> {
        self.seen += 1;
        if self.seen % self.every != 0 {
            return Ok(());
        }
        let spots: Vec<String> = snapshot
            .spots
            .iter()
            .map(|s| match &s.occupant {
                Some(identity) => format!("{}={}", s.label, identity),
                None => format!("{}=free", s.label),
            })
            .collect();
        let gates: Vec<String> = snapshot
            .gates
            .iter()
            .map(|g| {
                let state = if g.state.is_open { "open" } else { "closed" };
                format!("{}={}", g.kind, state)
            })
            .collect();
        log::info!(
            "frame {}: spots [{}] gates [{}] collisions={}",
            frame.index,
            spots.join(" "),
            gates.join(" "),
            snapshot.collisions.len()
        );
        Ok(())
    }
}

/// Draw spot rectangles (red occupied, green free), gate glyphs and
/// collision markers into `frame`.
pub fn draw_overlay(frame: &mut Frame, snapshot: &LotSnapshot) {
    for spot in &snapshot.spots {
        let color = if spot.is_occupied() {
            Rgb::RED
        } else {
            Rgb::GREEN
        };
        draw_rect(frame, &spot.rect, color, SPOT_BORDER_PX);
    }
    for gate in &snapshot.gates {
        draw_glyph(frame, &gate.glyph);
    }
    for collision in &snapshot.collisions {
        draw_ring(
            frame,
            collision.x as i64,
            collision.y as i64,
            COLLISION_MARKER_RADIUS,
            COLLISION_MARKER,
        );
    }
}

fn draw_rect(frame: &mut Frame, rect: &Rect, color: Rgb, thickness: u32) {
    let (x0, y0) = (rect.x as i64, rect.y as i64);
    let (x1, y1) = (rect.right(), rect.bottom());
    for t in 0..thickness as i64 {
        let (xx0, yy0, xx1, yy1) = (x0 + t, y0 + t, x1 - t, y1 - t);
        if xx0 > xx1 || yy0 > yy1 {
            break;
        }
        let (max_x, max_y) = (i64::from(frame.width) - 1, i64::from(frame.height) - 1);
        for x in xx0.max(0)..=xx1.min(max_x) {
            frame.put_pixel(x, yy0, color);
            frame.put_pixel(x, yy1, color);
        }
        for y in yy0.max(0)..=yy1.min(max_y) {
            frame.put_pixel(xx0, y, color);
            frame.put_pixel(xx1, y, color);
        }
    }
}

fn draw_glyph(frame: &mut Frame, glyph: &GateGlyph) {
    let half = (glyph.thickness / 2) as i64;
    let steps = segment_steps(glyph.from, glyph.to);
    for i in 0..=steps {
        let k = if steps == 0 {
            0.0
        } else {
            i as f32 / steps as f32
        };
        let x = (glyph.from.x + (glyph.to.x - glyph.from.x) * k).round() as i64;
        let y = (glyph.from.y + (glyph.to.y - glyph.from.y) * k).round() as i64;
        for dy in -half..=half {
            for dx in -half..=half {
                frame.put_pixel(x + dx, y + dy, glyph.color);
            }
        }
    }
}

fn segment_steps(from: Point, to: Point) -> u32 {
    let dx = (to.x - from.x).abs();
    let dy = (to.y - from.y).abs();
    dx.max(dy).ceil() as u32
}

fn draw_ring(frame: &mut Frame, cx: i64, cy: i64, radius: i64, color: Rgb) {
    let outer = radius * radius;
    let inner = (radius - 2) * (radius - 2);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let d = dx * dx + dy * dy;
            if d <= outer && d >= inner {
                frame.put_pixel(cx + dx, cy + dy, color);
            }
        }
    }
}

#[cfg(feature = "render-image")]
pub use snapshot::SnapshotRenderer;

#[cfg(feature = "render-image")]
mod snapshot {
    use anyhow::{anyhow, Context, Result};
    use std::path::PathBuf;

    use super::{draw_overlay, Renderer};
    use crate::frame::Frame;
    use crate::pipeline::LotSnapshot;

    /// Writes an annotated PNG every `every` frames.
    pub struct SnapshotRenderer {
        dir: PathBuf,
        every: u64,
        seen: u64,
    }

    impl SnapshotRenderer {
        pub fn new(dir: impl Into<PathBuf>, every: u64) -> Result<Self> {
            let dir = dir.into();
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("cannot create snapshot dir {}", dir.display()))?;
            Ok(Self {
                dir,
                every: every.max(1),
                seen: 0,
            })
        }
    }

    impl Renderer for SnapshotRenderer {
        fn render(&mut self, frame: &Frame, snapshot: &LotSnapshot) -> Result<()> {
            self.seen += 1;
            if self.seen % self.every != 0 {
                return Ok(());
            }
            let mut annotated = Frame::new(
                frame.pixels().to_vec(),
                frame.width,
                frame.height,
                frame.captured_at,
                frame.index,
            )?;
            draw_overlay(&mut annotated, snapshot);
            let (width, height) = (annotated.width, annotated.height);
            let image = image::RgbImage::from_raw(width, height, annotated.into_pixels())
                .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", width, height))?;
            let path = self.dir.join(format!("frame_{:06}.png", frame.index));
            image
                .save(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            log::debug!("snapshot written to {}", path.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lot::{CollisionEvent, GateConfig, GateKind, GateState, Identity, SpotLabel};
    use crate::pipeline::{GateStatus, SpotStatus};
    use crate::Timestamp;

    fn snapshot() -> LotSnapshot {
        let entry = GateConfig::entry();
        LotSnapshot {
            at: Timestamp::default(),
            spots: vec![
                SpotStatus {
                    label: SpotLabel::new('A').unwrap(),
                    rect: Rect::new(10, 10, 40, 20).unwrap(),
                    occupant: Some(Identity::Unknown),
                },
                SpotStatus {
                    label: SpotLabel::new('B').unwrap(),
                    rect: Rect::new(60, 10, 40, 20).unwrap(),
                    occupant: None,
                },
            ],
            gates: vec![GateStatus {
                kind: GateKind::Entry,
                state: GateState::default(),
                glyph: entry.closed_glyph,
            }],
            collisions: vec![CollisionEvent { x: 300, y: 300 }],
        }
    }

    #[test]
    fn overlay_colors_spots_by_occupancy() {
        let mut frame = Frame::filled(480, 640, Rgb(0, 0, 0), Timestamp::default(), 0);
        draw_overlay(&mut frame, &snapshot());
        assert_eq!(frame.pixel(10, 10), Some(Rgb::RED));
        assert_eq!(frame.pixel(50, 30), Some(Rgb::RED));
        assert_eq!(frame.pixel(60, 20), Some(Rgb::GREEN));
        // interior untouched
        assert_eq!(frame.pixel(30, 20), Some(Rgb(0, 0, 0)));
    }

    #[test]
    fn overlay_draws_gate_glyph_and_collision_ring() {
        let mut frame = Frame::filled(480, 640, Rgb(0, 0, 0), Timestamp::default(), 0);
        let snap = snapshot();
        draw_overlay(&mut frame, &snap);
        let glyph = snap.gates[0].glyph;
        let mid_x = ((glyph.from.x + glyph.to.x) / 2.0) as u32;
        let mid_y = ((glyph.from.y + glyph.to.y) / 2.0) as u32;
        assert_eq!(frame.pixel(mid_x, mid_y), Some(glyph.color));
        assert_eq!(frame.pixel(312, 300), Some(COLLISION_MARKER));
        assert_eq!(frame.pixel(300, 300), Some(Rgb(0, 0, 0)));
    }

    #[test]
    fn log_renderer_is_rate_limited() -> Result<()> {
        let frame = Frame::filled(4, 4, Rgb(0, 0, 0), Timestamp::default(), 0);
        let mut renderer = LogRenderer::new(3);
        for _ in 0..7 {
            renderer.render(&frame, &snapshot())?;
        }
        assert_eq!(renderer.seen, 7);
        Ok(())
    }
}
