use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{BlobDetectorConfig, SegmenterConfig};
use crate::geometry::{Point, Rect};
use crate::lot::{CollisionPolicy, GateConfig, SpotLabel, SpotPolicy, DEFAULT_OCCUPANCY_TIMEOUT};

const DEFAULT_DB_PATH: &str = "parking.db";
const DEFAULT_SOURCE_URL: &str = "stub://lot";
const DEFAULT_FPS: u32 = 10;
const DEFAULT_WIDTH: u32 = 480;
const DEFAULT_HEIGHT: u32 = 640;
const DEFAULT_PLATES: [&str; 4] = ["EL 1111S", "EL 2222S", "EL 5555S", "EL 6666S"];
const DEFAULT_LOG_EVERY: u64 = 50;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LotwatchConfigFile {
    db_path: Option<String>,
    source: Option<SourceConfigFile>,
    occupancy: Option<OccupancyConfigFile>,
    spots: Option<SpotsConfigFile>,
    gates: Option<GatesConfigFile>,
    collision: Option<CollisionConfigFile>,
    detector: Option<DetectorConfigFile>,
    render: Option<RenderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct OccupancyConfigFile {
    timeout_ms: Option<u64>,
    plates: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct SpotsConfigFile {
    min_aspect: Option<f32>,
    max_aspect: Option<f32>,
    vertices: Option<usize>,
    stride: Option<usize>,
    fixed: Option<Vec<FixedSpotFile>>,
}

#[derive(Debug, Deserialize)]
struct FixedSpotFile {
    label: char,
    x: i32,
    y: i32,
    w: u32,
    h: u32,
}

#[derive(Debug, Deserialize, Default)]
struct GatesConfigFile {
    entry: Option<GateConfigFile>,
    exit: Option<GateConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct GateConfigFile {
    anchor: Option<[f32; 2]>,
    tolerance: Option<[f32; 2]>,
    hold_open_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CollisionConfigFile {
    size_ratio: Option<f64>,
    radius: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    threshold: Option<u8>,
    min_area: Option<u64>,
    max_area: Option<u64>,
    segment_threshold: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    log_every: Option<u64>,
    snapshot_dir: Option<PathBuf>,
    snapshot_every: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LotwatchConfig {
    pub db_path: String,
    pub source: SourceSettings,
    pub occupancy: OccupancySettings,
    pub spots: SpotSettings,
    pub entry_gate: GateConfig,
    pub exit_gate: GateConfig,
    pub collision: CollisionPolicy,
    pub detector: BlobDetectorConfig,
    pub segmenter: SegmenterConfig,
    pub render: RenderSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            target_fps: DEFAULT_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OccupancySettings {
    pub timeout: Duration,
    pub plates: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SpotSettings {
    pub policy: SpotPolicy,
    /// Explicit layout; when set, discovery is skipped.
    pub fixed: Option<Vec<(SpotLabel, Rect)>>,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Log a lot summary every N frames (0 disables).
    pub log_every: u64,
    pub snapshot_dir: Option<PathBuf>,
    pub snapshot_every: u64,
}

impl Default for LotwatchConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            source: SourceSettings::default(),
            occupancy: OccupancySettings {
                timeout: DEFAULT_OCCUPANCY_TIMEOUT,
                plates: DEFAULT_PLATES.iter().map(|p| p.to_string()).collect(),
            },
            spots: SpotSettings {
                policy: SpotPolicy::default(),
                fixed: None,
            },
            entry_gate: GateConfig::entry(),
            exit_gate: GateConfig::exit(),
            collision: CollisionPolicy::default(),
            detector: BlobDetectorConfig::default(),
            segmenter: SegmenterConfig::default(),
            render: RenderSettings {
                log_every: DEFAULT_LOG_EVERY,
                snapshot_dir: None,
                snapshot_every: DEFAULT_LOG_EVERY,
            },
        }
    }
}

impl LotwatchConfig {
    /// Defaults, then the file named by `LOTWATCH_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LOTWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LotwatchConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let source_file = file.source.unwrap_or_default();
        let source = SourceSettings {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_FPS),
            width: source_file.width.unwrap_or(DEFAULT_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_HEIGHT),
        };

        let occupancy_file = file.occupancy.unwrap_or_default();
        let occupancy = OccupancySettings {
            timeout: occupancy_file
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_OCCUPANCY_TIMEOUT),
            plates: occupancy_file
                .plates
                .unwrap_or_else(|| DEFAULT_PLATES.iter().map(|p| p.to_string()).collect()),
        };

        let spots_file = file.spots.unwrap_or_default();
        let default_policy = SpotPolicy::default();
        let fixed = match spots_file.fixed {
            Some(entries) => Some(
                entries
                    .into_iter()
                    .map(|s| Ok((SpotLabel::new(s.label)?, Rect::new(s.x, s.y, s.w, s.h)?)))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };
        let spots = SpotSettings {
            policy: SpotPolicy {
                min_aspect: spots_file.min_aspect.unwrap_or(default_policy.min_aspect),
                max_aspect: spots_file.max_aspect.unwrap_or(default_policy.max_aspect),
                vertices: spots_file.vertices.unwrap_or(default_policy.vertices),
                stride: spots_file.stride.unwrap_or(default_policy.stride),
            },
            fixed,
        };

        let gates_file = file.gates.unwrap_or_default();
        let entry_gate = apply_gate_file(GateConfig::entry(), gates_file.entry);
        let exit_gate = apply_gate_file(GateConfig::exit(), gates_file.exit);

        let collision_file = file.collision.unwrap_or_default();
        let default_collision = CollisionPolicy::default();
        let collision = CollisionPolicy {
            size_ratio: collision_file
                .size_ratio
                .unwrap_or(default_collision.size_ratio),
            radius: collision_file.radius.unwrap_or(default_collision.radius),
        };

        let detector_file = file.detector.unwrap_or_default();
        let default_detector = BlobDetectorConfig::default();
        let detector = BlobDetectorConfig {
            threshold: detector_file.threshold.unwrap_or(default_detector.threshold),
            min_area: detector_file.min_area.unwrap_or(default_detector.min_area),
            max_area: detector_file.max_area.unwrap_or(default_detector.max_area),
        };
        let segmenter = SegmenterConfig {
            threshold: detector_file
                .segment_threshold
                .unwrap_or(SegmenterConfig::default().threshold),
            ..SegmenterConfig::default()
        };

        let render_file = file.render.unwrap_or_default();
        let render = RenderSettings {
            log_every: render_file.log_every.unwrap_or(DEFAULT_LOG_EVERY),
            snapshot_dir: render_file.snapshot_dir,
            snapshot_every: render_file.snapshot_every.unwrap_or(DEFAULT_LOG_EVERY),
        };

        Ok(Self {
            db_path,
            source,
            occupancy,
            spots,
            entry_gate,
            exit_gate,
            collision,
            detector,
            segmenter,
            render,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("LOTWATCH_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(url) = std::env::var("LOTWATCH_SOURCE") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(timeout) = std::env::var("LOTWATCH_OCCUPANCY_TIMEOUT_MS") {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("LOTWATCH_OCCUPANCY_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.occupancy.timeout = Duration::from_millis(millis);
        }
        if let Ok(plates) = std::env::var("LOTWATCH_PLATES") {
            self.occupancy.plates = split_csv(&plates);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        if let Some(layout) = &self.spots.fixed {
            let (width, height) = (i64::from(self.source.width), i64::from(self.source.height));
            for (label, rect) in layout {
                if rect.x < 0 || rect.y < 0 || rect.right() > width || rect.bottom() > height {
                    return Err(anyhow!(
                        "spot {} ({}, {}) {}x{} lies outside the {}x{} frame",
                        label,
                        rect.x,
                        rect.y,
                        rect.w,
                        rect.h,
                        width,
                        height
                    ));
                }
            }
        }
        if self.occupancy.timeout.is_zero() {
            return Err(anyhow!("occupancy timeout must be greater than zero"));
        }
        let policy = &self.spots.policy;
        if policy.stride == 0 {
            return Err(anyhow!("spots.stride must be at least 1"));
        }
        if !policy.min_aspect.is_finite() || !policy.max_aspect.is_finite() {
            return Err(anyhow!("spots aspect bounds must be finite numbers"));
        }
        if policy.min_aspect >= policy.max_aspect {
            return Err(anyhow!(
                "spots.min_aspect ({}) must be below spots.max_aspect ({})",
                policy.min_aspect,
                policy.max_aspect
            ));
        }
        for gate in [&self.entry_gate, &self.exit_gate] {
            if gate.hold_open.is_zero() {
                return Err(anyhow!("{} gate hold-open must be greater than zero", gate.kind));
            }
            if !gate.anchor.x.is_finite() || !gate.anchor.y.is_finite() {
                return Err(anyhow!("{} gate anchor must be finite", gate.kind));
            }
            if !(gate.tolerance.x.is_finite() && gate.tolerance.x > 0.0)
                || !(gate.tolerance.y.is_finite() && gate.tolerance.y > 0.0)
            {
                return Err(anyhow!("{} gate tolerance must be positive", gate.kind));
            }
        }
        if !self.collision.size_ratio.is_finite() || self.collision.size_ratio <= 0.0 {
            return Err(anyhow!("collision.size_ratio must be positive"));
        }
        if self.collision.radius < 0 {
            return Err(anyhow!("collision.radius must not be negative"));
        }
        if self.detector.min_area > self.detector.max_area {
            return Err(anyhow!("detector.min_area must not exceed detector.max_area"));
        }
        self.occupancy.plates = self
            .occupancy
            .plates
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Ok(())
    }
}

fn apply_gate_file(mut gate: GateConfig, file: Option<GateConfigFile>) -> GateConfig {
    let Some(file) = file else {
        return gate;
    };
    if let Some([x, y]) = file.anchor {
        gate.anchor = Point::new(x, y);
    }
    if let Some([x, y]) = file.tolerance {
        gate.tolerance = Point::new(x, y);
    }
    if let Some(ms) = file.hold_open_ms {
        gate.hold_open = Duration::from_millis(ms);
    }
    gate
}

fn read_config_file(path: &Path) -> Result<LotwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_setup() {
        let cfg = LotwatchConfig::default();
        assert_eq!(cfg.db_path, "parking.db");
        assert_eq!(cfg.source, SourceSettings::default());
        assert_eq!(cfg.occupancy.timeout, Duration::from_millis(1700));
        assert_eq!(cfg.occupancy.plates.len(), 4);
        assert_eq!(cfg.spots.policy, SpotPolicy::default());
        assert!(cfg.spots.fixed.is_none());
        assert_eq!(cfg.entry_gate, GateConfig::entry());
        assert_eq!(cfg.exit_gate, GateConfig::exit());
        assert_eq!(cfg.collision, CollisionPolicy::default());
    }

    #[test]
    fn validate_rejects_inverted_aspect_bounds() {
        let mut cfg = LotwatchConfig::default();
        cfg.spots.policy.min_aspect = 3.0;
        cfg.spots.policy.max_aspect = 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_finite_thresholds() {
        let mut cfg = LotwatchConfig::default();
        cfg.collision.size_ratio = f64::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = LotwatchConfig::default();
        cfg.collision.size_ratio = f64::INFINITY;
        assert!(cfg.validate().is_err());

        let mut cfg = LotwatchConfig::default();
        cfg.exit_gate.tolerance.y = f32::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = LotwatchConfig::default();
        cfg.spots.policy.min_aspect = f32::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_fixed_spots_outside_the_frame() {
        let label = SpotLabel::new('A').unwrap();
        let mut cfg = LotwatchConfig::default();
        cfg.spots.fixed = Some(vec![(label, Rect::new(10, 10, 80, 40).unwrap())]);
        assert!(cfg.validate().is_ok());

        cfg.spots.fixed = Some(vec![(label, Rect::new(i32::MAX, 0, u32::MAX, 40).unwrap())]);
        assert!(cfg.validate().is_err());

        cfg.spots.fixed = Some(vec![(label, Rect::new(-5, 0, 80, 40).unwrap())]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_stride_and_timeout() {
        let mut cfg = LotwatchConfig::default();
        cfg.spots.policy.stride = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = LotwatchConfig::default();
        cfg.occupancy.timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn fixed_spots_are_parsed_and_checked() {
        let file: LotwatchConfigFile = serde_json::from_str(
            r#"{"spots": {"fixed": [{"label": "A", "x": 1, "y": 2, "w": 80, "h": 40}]}}"#,
        )
        .unwrap();
        let cfg = LotwatchConfig::from_file(file).unwrap();
        let fixed = cfg.spots.fixed.unwrap();
        assert_eq!(fixed[0].0.as_char(), 'A');
        assert_eq!(fixed[0].1, Rect::new(1, 2, 80, 40).unwrap());

        let bad: LotwatchConfigFile = serde_json::from_str(
            r#"{"spots": {"fixed": [{"label": "A", "x": 1, "y": 2, "w": 0, "h": 40}]}}"#,
        )
        .unwrap();
        assert!(LotwatchConfig::from_file(bad).is_err());
    }

    #[test]
    fn unknown_top_level_keys_are_rejected() {
        let parsed: Result<LotwatchConfigFile, _> = serde_json::from_str(r#"{"dbpath": "x.db"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn split_csv_trims_and_skips_empty() {
        assert_eq!(split_csv(" A 1 , ,B 2,"), vec!["A 1", "B 2"]);
    }
}
