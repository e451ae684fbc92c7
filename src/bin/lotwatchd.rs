//! lotwatchd - parking lot monitor daemon
//!
//! This daemon:
//! 1. Loads configuration (`LOTWATCH_CONFIG` file + env overrides)
//! 2. Opens the permission store and clears stale occupancy
//! 3. Discovers parking spots on the first frame (or uses a fixed layout)
//! 4. Runs the per-frame lot pipeline until end of stream or Ctrl-C
//! 5. Persists occupancy, gate and collision events

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lotwatch::config::LotwatchConfig;
use lotwatch::ingest::open_source;
use lotwatch::pipeline::reference_frame;
use lotwatch::{
    discover_spots, BlobDetector, LogRenderer, OutlineSegmenter, Pipeline, Runner,
    SpotRegistry, SqlitePermissionStore, StoreSink,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Override the configured source (path, image directory, or stub://lot).
    #[arg(long)]
    source: Option<String>,
    /// Override the configured database path.
    #[arg(long)]
    db_path: Option<String>,
    /// Stop after this many processed frames.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Process frames as fast as possible instead of at the source frame rate.
    #[arg(long)]
    fast: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = LotwatchConfig::load()?;
    if let Some(source) = args.source {
        cfg.source.url = source;
    }
    if let Some(db_path) = args.db_path {
        cfg.db_path = db_path;
    }

    let mut store = SqlitePermissionStore::open(&cfg.db_path)?;
    let cleared = store.reset_occupancy()?;
    if cleared > 0 {
        log::info!("cleared {} stale spot occupants", cleared);
    }

    let mut source = open_source(&cfg.source)?;
    source.connect()?;

    let spots = match &cfg.spots.fixed {
        Some(layout) => {
            let registry = SpotRegistry::from_rects(layout.iter().copied())?;
            log::info!("using {} configured parking spots", registry.len());
            registry
        }
        None => {
            let reference = reference_frame(source.as_mut())?;
            let mut segmenter = OutlineSegmenter::new(cfg.segmenter);
            discover_spots(&mut segmenter, &reference, &cfg.spots.policy)?
        }
    };
    for spot in spots.iter() {
        log::info!(
            "spot {} at ({}, {}) {}x{}",
            spot.label,
            spot.rect.x,
            spot.rect.y,
            spot.rect.w,
            spot.rect.h
        );
    }
    store.ensure_spots(spots.labels())?;

    let pipeline = Pipeline::from_config(spots, &cfg);
    let detector = BlobDetector::new(cfg.detector);
    let mut runner = Runner::new(source, Box::new(detector), pipeline, StoreSink::new(store));
    if cfg.render.log_every > 0 {
        runner = runner.with_renderer(Box::new(LogRenderer::new(cfg.render.log_every)));
    }
    if let Some(dir) = &cfg.render.snapshot_dir {
        #[cfg(feature = "render-image")]
        {
            let renderer =
                lotwatch::render::SnapshotRenderer::new(dir.clone(), cfg.render.snapshot_every)?;
            runner = runner.with_renderer(Box::new(renderer));
        }
        #[cfg(not(feature = "render-image"))]
        {
            log::warn!(
                "snapshot_dir {} ignored: built without the render-image feature",
                dir.display()
            );
        }
    }
    if !args.fast {
        let fps = cfg.source.target_fps.max(1);
        runner = runner.with_pacing(Duration::from_secs_f64(1.0 / fps as f64));
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("failed to install Ctrl-C handler")?;
    }

    log::info!(
        "lotwatchd running. source={} db={}",
        cfg.source.url,
        cfg.db_path
    );
    let summary = runner.run(args.max_frames, &stop)?;
    if summary.sink_failures > 0 {
        log::warn!(
            "{} frames had events that could not be persisted",
            summary.sink_failures
        );
    }
    Ok(())
}
