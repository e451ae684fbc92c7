use anyhow::Result;
use tempfile::NamedTempFile;

use lotwatch::ingest::{SyntheticLotSource, SyntheticScene};
use lotwatch::lot::DEFAULT_OCCUPANCY_TIMEOUT;
use lotwatch::pipeline::reference_frame;
use lotwatch::storage::DEMO_PERMISSIONS;
use lotwatch::{
    discover_spots, BlobDetector, FrameSource, GateKind, Identity, IdentityPool, LotEvent,
    OutlineSegmenter, Pipeline, Runner, SpotLabel, SpotPolicy, SqlitePermissionStore, StoreSink,
    Timestamp,
};

const PLATES: [&str; 4] = ["EL 1111S", "EL 2222S", "EL 5555S", "EL 6666S"];

fn label(c: char) -> SpotLabel {
    SpotLabel::new(c).unwrap()
}

#[test]
fn synthetic_scene_end_to_end() -> Result<()> {
    let db = NamedTempFile::new()?;
    let db_path = db.path().to_str().expect("utf-8 temp path").to_string();
    let mut store = SqlitePermissionStore::open(&db_path)?;
    for (plate, allowed) in DEMO_PERMISSIONS {
        store.grant(plate, allowed, "")?;
    }

    let mut source: Box<dyn FrameSource> = Box::new(
        SyntheticLotSource::new(SyntheticScene::demo(480, 640), 5)
            .starting_at(Timestamp::from_secs_f64(1_000.0)),
    );
    source.connect()?;

    let reference = reference_frame(source.as_mut())?;
    let spots = discover_spots(
        &mut OutlineSegmenter::default(),
        &reference,
        &SpotPolicy::default(),
    )?;
    assert_eq!(
        spots.labels().collect::<Vec<_>>(),
        vec![label('A'), label('B'), label('C'), label('D')]
    );
    store.ensure_spots(spots.labels())?;

    let pipeline = Pipeline::new(spots, IdentityPool::new(PLATES), DEFAULT_OCCUPANCY_TIMEOUT);
    let mut runner = Runner::new(
        source,
        Box::new(BlobDetector::default()),
        pipeline,
        StoreSink::new(store),
    );

    let mut events = Vec::new();
    let mut last_snapshot = None;
    while let Some(report) = runner.run_frame()? {
        events.extend(report.events);
        last_snapshot = Some(report.snapshot);
    }
    assert_eq!(runner.summary().sink_failures, 0);
    assert_eq!(runner.summary().detector_failures, 0);

    let occupied: Vec<(SpotLabel, Identity)> = events
        .iter()
        .filter_map(|e| match e {
            LotEvent::SpotOccupied { label, identity } => Some((*label, identity.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        occupied,
        vec![
            (label('A'), Identity::Plate("EL 1111S".into())),
            (label('B'), Identity::Plate("EL 2222S".into())),
            (label('D'), Identity::Plate("EL 5555S".into())),
        ]
    );

    let mut freed: Vec<SpotLabel> = events
        .iter()
        .filter_map(|e| match e {
            LotEvent::SpotFreed { label, .. } => Some(*label),
            _ => None,
        })
        .collect();
    freed.sort();
    assert_eq!(freed, vec![label('A'), label('B'), label('D')]);

    for kind in [GateKind::Entry, GateKind::Exit] {
        assert!(events.contains(&LotEvent::GateOpened(kind)), "{kind} gate never opened");
    }
    // the last arrival passes the entry long before the scene ends
    assert!(events.contains(&LotEvent::GateClosed(GateKind::Entry)));

    let pool = runner.pipeline().occupancy().pool();
    assert_eq!(pool.issued(), 3);
    assert_eq!(pool.remaining(), 1);

    let collisions = runner.pipeline().collisions();
    assert!(!collisions.is_empty(), "touching cars were not flagged");
    for c in collisions {
        assert!(
            (c.x - 228).abs() <= 30 && (c.y - 330).abs() <= 30,
            "unexpected collision at ({}, {})",
            c.x,
            c.y
        );
    }

    let snapshot = last_snapshot.expect("at least one processed frame");
    assert_eq!(snapshot.occupied_count(), 0);
    assert!(snapshot.spot(label('C')).is_some());

    let store = runner.into_sink().into_inner();
    assert!(store.spot_statuses()?.iter().all(|s| s.plate.is_none()));
    let kinds: Vec<String> = store
        .recent_events(1_000)?
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert!(kinds.iter().any(|k| k == "collision"));
    assert_eq!(kinds.iter().filter(|k| *k == "spot_occupied").count(), 3);
    assert!(!kinds.iter().any(|k| k == "unauthorized_vehicle"));
    Ok(())
}

#[test]
fn empty_lot_discovers_spots_and_stays_free() -> Result<()> {
    let mut source: Box<dyn FrameSource> = Box::new(
        SyntheticLotSource::new(SyntheticScene::empty_lot(480, 640), 5)
            .starting_at(Timestamp::from_secs_f64(0.0)),
    );
    source.connect()?;
    let reference = reference_frame(source.as_mut())?;
    let spots = discover_spots(
        &mut OutlineSegmenter::default(),
        &reference,
        &SpotPolicy::default(),
    )?;
    assert_eq!(spots.len(), 4);

    let pipeline = Pipeline::new(spots, IdentityPool::new(PLATES), DEFAULT_OCCUPANCY_TIMEOUT);
    let mut runner = Runner::new(
        source,
        Box::new(BlobDetector::default()),
        pipeline,
        Vec::<LotEvent>::new(),
    );
    let summary = runner.run(Some(10), &std::sync::atomic::AtomicBool::new(false))?;
    assert_eq!(summary.frames, 10);
    assert!(runner.sink().is_empty());
    assert_eq!(runner.pipeline().occupancy().pool().remaining(), 4);
    assert_eq!(runner.pipeline().occupancy().pool().issued(), 0);
    Ok(())
}
