//! Synthetic lot scene (`stub://`).
//!
//! Paints a top-down parking lot: noisy asphalt, bright spot outlines and dark
//! circular cars following scripted routes. Frames are timestamped on a
//! simulated clock (`start + index / fps`), so runs are deterministic and do
//! not sleep.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FrameSource, SourceStats};
use crate::config::SourceSettings;
use crate::frame::{Frame, CHANNELS};
use crate::geometry::{Point, Rect};
use crate::lot::Rgb;
use crate::{Clock, SystemClock, Timestamp};

const ASPHALT_LUMA: u8 = 100;
const ASPHALT_NOISE: i16 = 3;
const PAINT: Rgb = Rgb(230, 230, 230);
const CAR: Rgb = Rgb(40, 40, 40);
const OUTLINE_PX: u32 = 3;
const TEXTURE_SEED: u64 = 0x10_75;

/// A car that follows straight segments between timed waypoints.
///
/// The car is drawn only between its first and last waypoint times.
#[derive(Clone, Debug)]
pub struct ScriptedCar {
    pub radius: f32,
    /// `(seconds since scene start, x, y)`, sorted by time.
    pub route: Vec<(f64, f32, f32)>,
}

impl ScriptedCar {
    pub fn new(radius: f32, route: &[(f64, f32, f32)]) -> Self {
        Self {
            radius,
            route: route.to_vec(),
        }
    }

    pub fn position(&self, t: f64) -> Option<Point> {
        let first = self.route.first()?;
        let last = self.route.last()?;
        if t < first.0 || t > last.0 {
            return None;
        }
        for pair in self.route.windows(2) {
            let (t0, x0, y0) = pair[0];
            let (t1, x1, y1) = pair[1];
            if t >= t0 && t <= t1 {
                let span = t1 - t0;
                let k = if span > 0.0 { ((t - t0) / span) as f32 } else { 1.0 };
                return Some(Point::new(x0 + (x1 - x0) * k, y0 + (y1 - y0) * k));
            }
        }
        Some(Point::new(last.1, last.2))
    }
}

#[derive(Clone, Debug)]
pub struct SyntheticScene {
    pub width: u32,
    pub height: u32,
    /// Painted spot outlines (outer boundary).
    pub spots: Vec<Rect>,
    pub cars: Vec<ScriptedCar>,
}

impl SyntheticScene {
    /// Empty lot with four spots in a row, `A`..`D` from left to right.
    pub fn empty_lot(width: u32, height: u32) -> Self {
        let spots = [40, 150, 260, 370]
            .into_iter()
            .map(|x| Rect {
                x,
                y: 150,
                w: 84,
                h: 54,
            })
            .collect();
        Self {
            width,
            height,
            spots,
            cars: Vec::new(),
        }
    }

    /// Scripted half-minute of lot activity.
    ///
    /// Two cars park in the first two spots, a third parks in the last spot
    /// and later pulls out into a fourth car in the lane (collision), the
    /// colliding cars leave through the exit gate, and finally the parked
    /// cars leave too.
    pub fn demo(width: u32, height: u32) -> Self {
        let mut scene = Self::empty_lot(width, height);
        scene.cars = vec![
            // parks in A
            ScriptedCar::new(
                26.0,
                &[
                    (0.5, 90.0, 630.0),
                    (2.0, 90.0, 470.0),
                    (4.0, 82.0, 177.0),
                    (24.0, 82.0, 177.0),
                    (25.0, 150.0, 300.0),
                    (26.5, 340.0, 580.0),
                    (27.5, 340.0, 700.0),
                ],
            ),
            // parks in B
            ScriptedCar::new(
                26.0,
                &[
                    (3.0, 90.0, 630.0),
                    (4.5, 90.0, 470.0),
                    (6.5, 192.0, 177.0),
                    (27.0, 192.0, 177.0),
                    (28.0, 230.0, 300.0),
                    (29.5, 340.0, 580.0),
                    (30.5, 340.0, 700.0),
                ],
            ),
            // parks in D, then pulls out into the lane
            ScriptedCar::new(
                32.0,
                &[
                    (6.0, 90.0, 630.0),
                    (7.5, 90.0, 470.0),
                    (9.5, 412.0, 177.0),
                    (12.0, 412.0, 177.0),
                    (13.5, 260.0, 330.0),
                    (20.0, 260.0, 330.0),
                    (21.0, 300.0, 480.0),
                    (22.0, 340.0, 580.0),
                    (23.0, 340.0, 700.0),
                ],
            ),
            // drives into the lane and hits the car leaving D
            ScriptedCar::new(
                32.0,
                &[
                    (10.0, 90.0, 630.0),
                    (11.5, 90.0, 470.0),
                    (13.5, 196.0, 330.0),
                    (16.5, 196.0, 330.0),
                    (17.0, 196.0, 420.0),
                    (18.5, 340.0, 580.0),
                    (19.5, 340.0, 700.0),
                ],
            ),
        ];
        scene
    }

    pub fn duration_secs(&self) -> f64 {
        self.cars
            .iter()
            .filter_map(|car| car.route.last().map(|w| w.0))
            .fold(0.0, f64::max)
    }

    fn paint_background(&self) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(TEXTURE_SEED);
        let pixels = self.width as usize * self.height as usize;
        let mut data = Vec::with_capacity(pixels * CHANNELS);
        for _ in 0..pixels {
            let jitter: i16 = rng.gen_range(-ASPHALT_NOISE..=ASPHALT_NOISE);
            let luma = (ASPHALT_LUMA as i16 + jitter) as u8;
            data.extend_from_slice(&[luma, luma, luma]);
        }
        data
    }
}

pub struct SyntheticLotSource {
    scene: SyntheticScene,
    url: String,
    fps: u32,
    background: Vec<u8>,
    start: Option<Timestamp>,
    frame_count: u64,
}

impl SyntheticLotSource {
    pub fn new(scene: SyntheticScene, fps: u32) -> Self {
        let background = scene.paint_background();
        Self {
            scene,
            url: "stub://lot".to_string(),
            fps: fps.max(1),
            background,
            start: None,
            frame_count: 0,
        }
    }

    pub fn from_settings(settings: &SourceSettings) -> Self {
        let scene = if settings.url.trim_end_matches('/').ends_with("empty") {
            SyntheticScene::empty_lot(settings.width, settings.height)
        } else {
            SyntheticScene::demo(settings.width, settings.height)
        };
        let mut source = Self::new(scene, settings.target_fps);
        source.url = settings.url.clone();
        source
    }

    /// Fix the simulated start time instead of reading the system clock on connect.
    pub fn starting_at(mut self, start: Timestamp) -> Self {
        self.start = Some(start);
        self
    }

    pub fn scene(&self) -> &SyntheticScene {
        &self.scene
    }

    fn render(&self, t: f64, captured_at: Timestamp, index: u64) -> Result<Frame> {
        let mut frame = Frame::new(
            self.background.clone(),
            self.scene.width,
            self.scene.height,
            captured_at,
            index,
        )?;
        for spot in &self.scene.spots {
            draw_outline(&mut frame, spot);
        }
        for car in &self.scene.cars {
            if let Some(center) = car.position(t) {
                fill_disc(&mut frame, center, car.radius);
            }
        }
        Ok(frame)
    }
}

impl FrameSource for SyntheticLotSource {
    fn connect(&mut self) -> Result<()> {
        if self.start.is_none() {
            self.start = Some(SystemClock.now());
        }
        log::info!(
            "SyntheticLotSource: connected to {} ({} spots, {} cars, {:.1}s)",
            self.url,
            self.scene.spots.len(),
            self.scene.cars.len(),
            self.scene.duration_secs()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let index = self.frame_count;
        let t = index as f64 / self.fps as f64;
        // The empty lot never ends; scripted scenes end one second after the last car leaves.
        if !self.scene.cars.is_empty() && t > self.scene.duration_secs() + 1.0 {
            return Ok(None);
        }
        let start = *self.start.get_or_insert_with(|| SystemClock.now());
        let captured_at = Timestamp::from_secs_f64(start.as_secs_f64() + t);
        let frame = self.render(t, captured_at, index)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.url.clone(),
        }
    }
}

fn draw_outline(frame: &mut Frame, rect: &Rect) {
    let (x0, y0) = (rect.x as i64, rect.y as i64);
    let (x1, y1) = (x0 + rect.w as i64, y0 + rect.h as i64);
    let t = OUTLINE_PX as i64;
    for y in y0..y1 {
        for x in x0..x1 {
            let on_edge = x < x0 + t || x >= x1 - t || y < y0 + t || y >= y1 - t;
            if on_edge {
                frame.put_pixel(x, y, PAINT);
            }
        }
    }
}

fn fill_disc(frame: &mut Frame, center: Point, radius: f32) {
    let (cx, cy) = (center.x.round() as i64, center.y.round() as i64);
    let r = radius.round() as i64;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                frame.put_pixel(cx + dx, cy + dy, CAR);
            }
        }
    }
}
