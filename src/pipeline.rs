//! Per-frame orchestration.
//!
//! `Pipeline` owns the lot state machines and evaluates them in a fixed order
//! for every frame:
//!
//! 1. entry gate
//! 2. occupancy assignment, then expiry
//! 3. collision check
//! 4. exit gate
//!
//! `Runner` wraps a pipeline with its collaborators (frame source, keypoint
//! detector, renderers, event sink) and drives it until the stream ends.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::LotwatchConfig;
use crate::detect::{Keypoint, KeypointDetector, SpotSegmenter};
use crate::frame::Frame;
use crate::geometry::Rect;
use crate::ingest::FrameSource;
use crate::lot::{
    CollisionDetector, CollisionEvent, CollisionPolicy, GateConfig, GateController, GateGlyph,
    GateKind, GateState, GateTransition, Identity, IdentityPool, OccupancyTracker,
    OccupancyTransition, SpotLabel, SpotPolicy, SpotRegistry,
};
use crate::render::Renderer;
use crate::Timestamp;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

// -------------------- Events --------------------

/// Observable state change produced while processing one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum LotEvent {
    SpotOccupied { label: SpotLabel, identity: Identity },
    SpotFreed { label: SpotLabel, identity: Identity },
    GateOpened(GateKind),
    GateClosed(GateKind),
    CollisionFlagged(CollisionEvent),
}

impl LotEvent {
    /// Stable event-type name, as written to the events table.
    pub fn kind(&self) -> &'static str {
        match self {
            LotEvent::SpotOccupied { .. } => "spot_occupied",
            LotEvent::SpotFreed { .. } => "spot_freed",
            LotEvent::GateOpened(_) => "gate_opened",
            LotEvent::GateClosed(_) => "gate_closed",
            LotEvent::CollisionFlagged(_) => "collision",
        }
    }
}

impl From<OccupancyTransition> for LotEvent {
    fn from(transition: OccupancyTransition) -> Self {
        match transition {
            OccupancyTransition::Occupied { label, identity } => {
                LotEvent::SpotOccupied { label, identity }
            }
            OccupancyTransition::Freed { label, identity } => LotEvent::SpotFreed { label, identity },
        }
    }
}

impl From<GateTransition> for LotEvent {
    fn from(transition: GateTransition) -> Self {
        match transition {
            GateTransition::Opened(kind) => LotEvent::GateOpened(kind),
            GateTransition::Closed(kind) => LotEvent::GateClosed(kind),
        }
    }
}

// -------------------- Snapshot --------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpotStatus {
    pub label: SpotLabel,
    pub rect: Rect,
    pub occupant: Option<Identity>,
}

impl SpotStatus {
    pub fn is_occupied(&self) -> bool {
        self.occupant.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GateStatus {
    pub kind: GateKind,
    pub state: GateState,
    pub glyph: GateGlyph,
}

/// Full lot state after a frame, for renderers and sinks.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LotSnapshot {
    pub at: Timestamp,
    pub spots: Vec<SpotStatus>,
    pub gates: Vec<GateStatus>,
    pub collisions: Vec<CollisionEvent>,
}

impl LotSnapshot {
    pub fn spot(&self, label: SpotLabel) -> Option<&SpotStatus> {
        self.spots.iter().find(|s| s.label == label)
    }

    pub fn gate(&self, kind: GateKind) -> Option<&GateStatus> {
        self.gates.iter().find(|g| g.kind == kind)
    }

    pub fn occupied_count(&self) -> usize {
        self.spots.iter().filter(|s| s.is_occupied()).count()
    }
}

/// Result of one `Pipeline::process` call. Events are in evaluation order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameReport {
    pub events: Vec<LotEvent>,
    pub snapshot: LotSnapshot,
}

// -------------------- Pipeline --------------------

pub struct Pipeline {
    spots: SpotRegistry,
    occupancy: OccupancyTracker,
    entry_gate: GateController,
    exit_gate: GateController,
    collisions: CollisionDetector,
}

impl Pipeline {
    /// Pipeline with the default gates and collision policy.
    pub fn new(spots: SpotRegistry, pool: IdentityPool, timeout: Duration) -> Self {
        let occupancy = OccupancyTracker::new(&spots, pool, timeout);
        Self {
            spots,
            occupancy,
            entry_gate: GateController::new(GateConfig::entry()),
            exit_gate: GateController::new(GateConfig::exit()),
            collisions: CollisionDetector::new(CollisionPolicy::default()),
        }
    }

    pub fn from_config(spots: SpotRegistry, cfg: &LotwatchConfig) -> Self {
        let pool = IdentityPool::new(cfg.occupancy.plates.iter().cloned());
        Self::new(spots, pool, cfg.occupancy.timeout)
            .with_gates(cfg.entry_gate, cfg.exit_gate)
            .with_collision_policy(cfg.collision)
    }

    pub fn with_gates(mut self, entry: GateConfig, exit: GateConfig) -> Self {
        self.entry_gate = GateController::new(entry);
        self.exit_gate = GateController::new(exit);
        self
    }

    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collisions = CollisionDetector::new(policy);
        self
    }

    pub fn spots(&self) -> &SpotRegistry {
        &self.spots
    }

    pub fn occupancy(&self) -> &OccupancyTracker {
        &self.occupancy
    }

    pub fn gate(&self, kind: GateKind) -> &GateController {
        match kind {
            GateKind::Entry => &self.entry_gate,
            GateKind::Exit => &self.exit_gate,
        }
    }

    pub fn collisions(&self) -> &[CollisionEvent] {
        self.collisions.events()
    }

    /// Run one frame's keypoints through every state machine.
    pub fn process(&mut self, keypoints: &[Keypoint], now: Timestamp) -> FrameReport {
        let mut events = Vec::new();

        events.extend(self.entry_gate.tick(keypoints, now).map(LotEvent::from));

        events.extend(
            self.occupancy
                .update(&self.spots, keypoints, now)
                .into_iter()
                .map(LotEvent::from),
        );
        events.extend(self.occupancy.expire(now).into_iter().map(LotEvent::from));

        events.extend(
            self.collisions
                .update(keypoints)
                .map(LotEvent::CollisionFlagged),
        );

        events.extend(self.exit_gate.tick(keypoints, now).map(LotEvent::from));

        FrameReport {
            events,
            snapshot: self.snapshot(now),
        }
    }

    pub fn snapshot(&self, at: Timestamp) -> LotSnapshot {
        let spots = self
            .spots
            .iter()
            .map(|spot| SpotStatus {
                label: spot.label,
                rect: spot.rect,
                occupant: self
                    .occupancy
                    .record(spot.label)
                    .and_then(|r| r.occupant().cloned()),
            })
            .collect();
        let gates = [&self.entry_gate, &self.exit_gate]
            .into_iter()
            .map(|gate| GateStatus {
                kind: gate.kind(),
                state: gate.state(),
                glyph: gate.glyph(),
            })
            .collect();
        LotSnapshot {
            at,
            spots,
            gates,
            collisions: self.collisions.events().to_vec(),
        }
    }
}

/// Segment the reference frame and build the spot registry from it.
pub fn discover_spots(
    segmenter: &mut dyn SpotSegmenter,
    frame: &Frame,
    policy: &SpotPolicy,
) -> Result<SpotRegistry> {
    let candidates = segmenter
        .segment(frame)
        .with_context(|| format!("{} segmenter failed on reference frame", segmenter.name()))?;
    log::debug!(
        "segmenter {} produced {} candidates",
        segmenter.name(),
        candidates.len()
    );
    let registry = SpotRegistry::discover(&candidates, policy);
    if registry.is_empty() {
        log::warn!(
            "no parking spots found on the reference frame; tracking gates and collisions only"
        );
    }
    Ok(registry)
}

// -------------------- Runner --------------------

/// Persistence (or any other) consumer of frame reports.
pub trait EventSink {
    fn apply(&mut self, report: &FrameReport) -> Result<()>;
}

/// Collects events in memory.
impl EventSink for Vec<LotEvent> {
    fn apply(&mut self, report: &FrameReport) -> Result<()> {
        self.extend(report.events.iter().cloned());
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StopReason {
    EndOfStream,
    FrameLimit,
    Interrupted,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub frames: u64,
    pub events: u64,
    pub detector_failures: u64,
    pub render_failures: u64,
    pub sink_failures: u64,
    pub stop_reason: Option<StopReason>,
}

pub struct Runner<S: EventSink> {
    source: Box<dyn FrameSource>,
    detector: Box<dyn KeypointDetector>,
    pipeline: Pipeline,
    renderers: Vec<Box<dyn Renderer>>,
    sink: S,
    pacing: Option<Duration>,
    summary: RunSummary,
}

impl<S: EventSink> Runner<S> {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn KeypointDetector>,
        pipeline: Pipeline,
        sink: S,
    ) -> Self {
        Self {
            source,
            detector,
            pipeline,
            renderers: Vec::new(),
            sink,
            pacing: None,
            summary: RunSummary::default(),
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderers.push(renderer);
        self
    }

    /// Sleep this long between frames (live playback of file sources).
    pub fn with_pacing(mut self, interval: Duration) -> Self {
        self.pacing = Some(interval);
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Acquire, detect, process and publish one frame.
    ///
    /// Returns `Ok(None)` at end of stream. A source error is returned as is;
    /// detector, renderer and sink failures are logged, counted and skipped.
    pub fn run_frame(&mut self) -> Result<Option<FrameReport>> {
        let Some(frame) = self.source.next_frame()? else {
            return Ok(None);
        };

        let keypoints = match self.detector.detect(&frame) {
            Ok(keypoints) => keypoints,
            Err(e) => {
                log::error!(
                    "detector {} failed on frame {}: {:#}",
                    self.detector.name(),
                    frame.index,
                    e
                );
                self.summary.detector_failures += 1;
                Vec::new()
            }
        };
        log::debug!("frame {}: {} keypoints", frame.index, keypoints.len());

        let report = self.pipeline.process(&keypoints, frame.captured_at);

        for renderer in self.renderers.iter_mut() {
            if let Err(e) = renderer.render(&frame, &report.snapshot) {
                log::warn!("render failed on frame {}: {:#}", frame.index, e);
                self.summary.render_failures += 1;
            }
        }
        if let Err(e) = self.sink.apply(&report) {
            log::error!("persisting frame {} failed: {:#}", frame.index, e);
            self.summary.sink_failures += 1;
        }

        self.summary.frames += 1;
        self.summary.events += report.events.len() as u64;
        Ok(Some(report))
    }

    /// Process frames until end of stream, `max_frames`, or `stop` is raised.
    pub fn run(&mut self, max_frames: Option<u64>, stop: &AtomicBool) -> Result<RunSummary> {
        let mut last_health_log = Instant::now();
        let reason = loop {
            if stop.load(Ordering::SeqCst) {
                break StopReason::Interrupted;
            }
            if max_frames.is_some_and(|limit| self.summary.frames >= limit) {
                break StopReason::FrameLimit;
            }
            if self.run_frame()?.is_none() {
                break StopReason::EndOfStream;
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = self.source.stats();
                let pool = self.pipeline.occupancy().pool();
                log::info!(
                    "source health={} frames={} url={} occupied={}/{} plates issued={} left={}",
                    self.source.is_healthy(),
                    stats.frames_captured,
                    stats.url,
                    self.pipeline.occupancy().occupied_count(),
                    self.pipeline.spots().len(),
                    pool.issued(),
                    pool.remaining()
                );
                last_health_log = Instant::now();
            }

            if let Some(interval) = self.pacing {
                std::thread::sleep(interval);
            }
        };
        self.summary.stop_reason = Some(reason);
        log::info!(
            "run finished ({:?}): {} frames, {} events, {} collisions",
            reason,
            self.summary.frames,
            self.summary.events,
            self.pipeline.collisions().len()
        );
        Ok(self.summary.clone())
    }
}

/// Read the first frame from `source` for spot discovery.
pub fn reference_frame(source: &mut dyn FrameSource) -> Result<Frame> {
    source
        .next_frame()?
        .ok_or_else(|| anyhow!("source ended before a reference frame was read"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedDetector;
    use crate::ingest::{SyntheticLotSource, SyntheticScene};
    use crate::lot::Rgb;

    fn label(c: char) -> SpotLabel {
        SpotLabel::new(c).unwrap()
    }

    fn two_spots() -> SpotRegistry {
        SpotRegistry::from_rects([
            (label('A'), Rect::new(0, 0, 50, 30).unwrap()),
            (label('B'), Rect::new(100, 0, 50, 30).unwrap()),
        ])
        .unwrap()
    }

    fn ts(secs: f64) -> Timestamp {
        Timestamp::from_secs_f64(secs)
    }

    fn kp(x: f32, y: f32, size: f32) -> Keypoint {
        Keypoint::new(x, y, size)
    }

    #[test]
    fn events_follow_evaluation_order() {
        let mut pipeline = Pipeline::new(
            two_spots(),
            IdentityPool::new(["P1"]),
            Duration::from_millis(1700),
        );
        // entry gate trigger, a car on A, and an outlier on B, all in one frame
        let keypoints = [
            kp(90.0, 470.0, 20.0),
            kp(10.0, 10.0, 20.0),
            kp(110.0, 10.0, 80.0),
        ];
        let report = pipeline.process(&keypoints, ts(0.0));
        assert_eq!(
            report.events,
            vec![
                LotEvent::GateOpened(GateKind::Entry),
                LotEvent::SpotOccupied {
                    label: label('A'),
                    identity: Identity::Plate("P1".into()),
                },
                LotEvent::SpotOccupied {
                    label: label('B'),
                    identity: Identity::Unknown,
                },
                LotEvent::CollisionFlagged(CollisionEvent { x: 110, y: 10 }),
            ]
        );
        let snapshot = &report.snapshot;
        assert_eq!(snapshot.occupied_count(), 2);
        assert!(snapshot.gate(GateKind::Entry).unwrap().state.is_open);
        assert_eq!(snapshot.gate(GateKind::Entry).unwrap().glyph.color, Rgb::GREEN);
        assert!(!snapshot.gate(GateKind::Exit).unwrap().state.is_open);
        assert_eq!(snapshot.collisions.len(), 1);
    }

    #[test]
    fn spot_frees_after_timeout_and_gate_closes() {
        let mut pipeline = Pipeline::new(
            two_spots(),
            IdentityPool::new(["P1"]),
            Duration::from_millis(1700),
        );
        pipeline.process(&[kp(10.0, 10.0, 20.0), kp(340.0, 580.0, 20.0)], ts(0.0));

        let quiet = pipeline.process(&[], ts(1.7));
        assert!(quiet.events.is_empty());
        assert_eq!(quiet.snapshot.occupied_count(), 1);

        let freed = pipeline.process(&[], ts(1.8));
        assert_eq!(
            freed.events,
            vec![LotEvent::SpotFreed {
                label: label('A'),
                identity: Identity::Plate("P1".into()),
            }]
        );

        let closed = pipeline.process(&[], ts(4.1));
        assert_eq!(closed.events, vec![LotEvent::GateClosed(GateKind::Exit)]);
    }

    #[test]
    fn retriggered_entry_gate_holds_for_a_full_window() {
        use crate::{Clock, ManualClock};

        let clock = ManualClock::new(ts(0.0));
        let mut pipeline =
            Pipeline::new(two_spots(), IdentityPool::default(), Duration::from_secs(1));
        let at_gate = [kp(90.0, 470.0, 10.0)];

        pipeline.process(&at_gate, clock.now());
        clock.advance(Duration::from_secs(3));
        pipeline.process(&at_gate, clock.now());

        clock.set(ts(6.9));
        assert!(pipeline.process(&[], clock.now()).events.is_empty());
        assert!(pipeline.gate(GateKind::Entry).is_open());

        clock.set(ts(7.2));
        let report = pipeline.process(&[], clock.now());
        assert_eq!(report.events, vec![LotEvent::GateClosed(GateKind::Entry)]);
    }

    #[test]
    fn empty_registry_still_drives_gates() {
        let mut pipeline = Pipeline::new(
            SpotRegistry::default(),
            IdentityPool::default(),
            Duration::from_secs(1),
        );
        let report = pipeline.process(&[kp(90.0, 470.0, 10.0)], ts(0.0));
        assert_eq!(report.events, vec![LotEvent::GateOpened(GateKind::Entry)]);
        assert!(report.snapshot.spots.is_empty());
    }

    #[test]
    fn event_kinds_match_store_names() {
        assert_eq!(LotEvent::GateOpened(GateKind::Exit).kind(), "gate_opened");
        assert_eq!(
            LotEvent::CollisionFlagged(CollisionEvent { x: 0, y: 0 }).kind(),
            "collision"
        );
    }

    fn scripted_runner(detector: ScriptedDetector) -> Runner<Vec<LotEvent>> {
        let source = SyntheticLotSource::new(SyntheticScene::empty_lot(64, 48), 10)
            .starting_at(ts(0.0));
        let mut source: Box<dyn FrameSource> = Box::new(source);
        source.connect().unwrap();
        let pipeline = Pipeline::new(
            two_spots(),
            IdentityPool::new(["P1", "P2"]),
            Duration::from_millis(1700),
        );
        Runner::new(source, Box::new(detector), pipeline, Vec::new())
    }

    #[test]
    fn runner_respects_frame_limit() -> Result<()> {
        let detector = ScriptedDetector::new().during(2..5, &[kp(10.0, 10.0, 20.0)]);
        let mut runner = scripted_runner(detector);
        let stop = AtomicBool::new(false);
        let summary = runner.run(Some(30), &stop)?;
        assert_eq!(summary.frames, 30);
        assert_eq!(summary.stop_reason, Some(StopReason::FrameLimit));
        // seen on frames 2..5 at 10 fps, freed 1.7s after the last sighting
        assert_eq!(
            runner.sink().as_slice(),
            &[
                LotEvent::SpotOccupied {
                    label: label('A'),
                    identity: Identity::Plate("P1".into()),
                },
                LotEvent::SpotFreed {
                    label: label('A'),
                    identity: Identity::Plate("P1".into()),
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn runner_stops_when_flag_is_raised() -> Result<()> {
        let mut runner = scripted_runner(ScriptedDetector::new());
        let stop = AtomicBool::new(true);
        let summary = runner.run(None, &stop)?;
        assert_eq!(summary.frames, 0);
        assert_eq!(summary.stop_reason, Some(StopReason::Interrupted));
        Ok(())
    }

    struct FailingDetector;

    impl KeypointDetector for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Keypoint>> {
            Err(anyhow!("model not loaded"))
        }
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn apply(&mut self, _report: &FrameReport) -> Result<()> {
            Err(anyhow!("database is locked"))
        }
    }

    #[test]
    fn collaborator_failures_are_counted_not_fatal() -> Result<()> {
        let mut source: Box<dyn FrameSource> =
            Box::new(SyntheticLotSource::new(SyntheticScene::empty_lot(32, 32), 10));
        source.connect()?;
        let pipeline =
            Pipeline::new(two_spots(), IdentityPool::default(), Duration::from_secs(1));
        let mut runner = Runner::new(source, Box::new(FailingDetector), pipeline, FailingSink);
        let summary = runner.run(Some(3), &AtomicBool::new(false))?;
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.detector_failures, 3);
        assert_eq!(summary.sink_failures, 3);
        Ok(())
    }
}
