use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// Tracker presets. The knobs differ, the code path does not.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum Profile {
    #[default]
    Standard,
    Responsive,
    Conservative,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Standard => "standard",
            Profile::Responsive => "responsive",
            Profile::Conservative => "conservative",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" => Some(Profile::Standard),
            "responsive" => Some(Profile::Responsive),
            "conservative" => Some(Profile::Conservative),
            _ => None,
        }
    }
}

/// What happens to a closed run when the face disappears mid-closure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum AbsencePolicy {
    /// Flush the qualifying part of the run on face loss; start over on return.
    #[default]
    Split,
    /// Suspend the run; resume it if the subject comes back with eyes still closed.
    Merge,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SmoothingConfig {
    /// Capacity of the raw EAR buffer.
    pub window: usize,
    pub polynomial_order: usize,
    /// Below this many buffered samples the raw value passes through.
    pub min_samples: usize,
    /// Median-deviation jump above which the newest sample is replaced by the median.
    pub outlier_jump: Option<f64>,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window: 15,
            polynomial_order: 2,
            min_samples: 7,
            outlier_jump: Some(0.1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CalibrationConfig {
    pub warmup_samples: usize,
    /// Inclusive plausible EAR range; samples outside are ignored.
    pub plausible_min: f64,
    pub plausible_max: f64,
    pub percentile: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            warmup_samples: 30,
            plausible_min: 0.15,
            plausible_max: 0.45,
            percentile: 25.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EyeStateConfig {
    /// Hysteresis margin as a fraction of the adaptive threshold.
    pub hysteresis_ratio: f64,
    pub vote_window: usize,
    pub vote_quorum: usize,
    pub min_closed_frames: u32,
    /// Minimum length of a logged closure chunk, in seconds.
    pub closed_duration_threshold_secs: f64,
    pub absence_policy: AbsencePolicy,
}

impl Default for EyeStateConfig {
    fn default() -> Self {
        Self {
            hysteresis_ratio: 0.2,
            vote_window: 7,
            vote_quorum: 5,
            min_closed_frames: 30,
            closed_duration_threshold_secs: 2.0,
            absence_policy: AbsencePolicy::Split,
        }
    }
}

impl EyeStateConfig {
    pub fn closed_duration_threshold(&self) -> chrono::Duration {
        chrono::Duration::microseconds((self.closed_duration_threshold_secs * 1_000_000.0).round() as i64)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchThresholds {
    pub score_threshold: f32,
    pub gap_threshold: f32,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            score_threshold: 0.8,
            gap_threshold: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    pub tick_interval_ms: u64,
    pub capture_timeout_ms: u64,
    /// Subject counts as lost after this long without a face.
    pub absence_timeout_secs: u64,
    pub max_session_secs: u64,
    pub recognition_budget_secs: u64,
    /// Only every n-th frame is evaluated during recognition.
    pub recognition_frame_skip: u32,
    pub heartbeat_every_ticks: u32,
    /// Extra border around the landmark box when cropping the face, as a fraction of its size.
    pub face_crop_margin: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 33,
            capture_timeout_ms: 1_000,
            absence_timeout_secs: 5,
            max_session_secs: 600,
            recognition_budget_secs: 20,
            recognition_frame_skip: 2,
            heartbeat_every_ticks: 300,
            face_crop_margin: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    pub frame_dir: PathBuf,
    pub save_frames: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            frame_dir: PathBuf::from("frame_logs"),
            save_frames: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub profile: Profile,
    pub smoothing: SmoothingConfig,
    pub calibration: CalibrationConfig,
    pub eye_state: EyeStateConfig,
    pub matching: MatchThresholds,
    pub monitor: MonitorConfig,
    pub storage: StorageConfig,
}

impl EngineConfig {
    pub fn preset(profile: Profile) -> Self {
        let base = Self::default();
        match profile {
            Profile::Standard => base,
            Profile::Responsive => Self {
                profile,
                smoothing: SmoothingConfig {
                    window: 11,
                    min_samples: 5,
                    ..base.smoothing
                },
                eye_state: EyeStateConfig {
                    vote_window: 5,
                    vote_quorum: 3,
                    min_closed_frames: 15,
                    closed_duration_threshold_secs: 1.0,
                    ..base.eye_state
                },
                ..base
            },
            Profile::Conservative => Self {
                profile,
                smoothing: SmoothingConfig {
                    window: 30,
                    min_samples: 15,
                    ..base.smoothing
                },
                eye_state: EyeStateConfig {
                    vote_window: 20,
                    vote_quorum: 14,
                    min_closed_frames: 30,
                    closed_duration_threshold_secs: 2.0,
                    absence_policy: AbsencePolicy::Merge,
                    ..base.eye_state
                },
                ..base
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.smoothing;
        if s.window == 0 {
            bail!("smoothing window must be positive");
        }
        if s.min_samples <= s.polynomial_order {
            bail!(
                "smoothing needs more samples ({}) than the polynomial order ({})",
                s.min_samples,
                s.polynomial_order
            );
        }
        if s.min_samples > s.window {
            bail!("smoothing min_samples ({}) exceeds window ({})", s.min_samples, s.window);
        }
        if matches!(s.outlier_jump, Some(jump) if !(jump > 0.0)) {
            bail!("outlier jump must be positive");
        }

        let c = &self.calibration;
        if c.warmup_samples == 0 {
            bail!("calibration warm-up must be at least one sample");
        }
        if !(c.plausible_min < c.plausible_max) {
            bail!(
                "plausible EAR range is inverted: [{}, {}]",
                c.plausible_min,
                c.plausible_max
            );
        }
        if !(0.0..=100.0).contains(&c.percentile) {
            bail!("calibration percentile {} outside [0, 100]", c.percentile);
        }

        let e = &self.eye_state;
        if !(0.0..1.0).contains(&e.hysteresis_ratio) {
            bail!("hysteresis ratio {} outside [0, 1)", e.hysteresis_ratio);
        }
        if e.vote_window == 0 || e.vote_quorum > e.vote_window {
            bail!(
                "vote quorum {} does not fit a window of {}",
                e.vote_quorum,
                e.vote_window
            );
        }
        if e.vote_quorum * 2 <= e.vote_window {
            bail!("vote quorum {} is not a strict majority of {}", e.vote_quorum, e.vote_window);
        }
        if !(e.closed_duration_threshold_secs > 0.0) {
            bail!("closed duration threshold must be positive");
        }

        let m = &self.matching;
        if !(-1.0..=1.0).contains(&m.score_threshold) || !(0.0..=2.0).contains(&m.gap_threshold) {
            bail!(
                "match thresholds out of range (score {}, gap {})",
                m.score_threshold,
                m.gap_threshold
            );
        }

        let mon = &self.monitor;
        if mon.tick_interval_ms == 0 || mon.recognition_frame_skip == 0 || mon.heartbeat_every_ticks == 0 {
            bail!("monitor intervals must be positive");
        }
        Ok(())
    }
}

/// JSON-backed configuration with environment overrides.
pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<EngineConfig>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config in {}", path.display()))?
        } else {
            EngineConfig::default()
        };

        apply_env_overrides(&mut data);
        data.validate()?;

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> EngineConfig {
        self.read().clone()
    }

    pub fn update(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        let mut guard = self.write();
        self.persist(&config)?;
        *guard = config;
        Ok(())
    }

    fn persist(&self, data: &EngineConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, EngineConfig> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, EngineConfig> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn apply_env_overrides(config: &mut EngineConfig) {
    if let Ok(raw) = std::env::var("DESKWATCH_PROFILE") {
        match Profile::parse(&raw) {
            Some(profile) if profile != config.profile => {
                let storage = config.storage.clone();
                *config = EngineConfig {
                    storage,
                    ..EngineConfig::preset(profile)
                };
            }
            Some(_) => {}
            None => log::warn!("ignoring unknown DESKWATCH_PROFILE '{raw}'"),
        }
    }

    let debug_mode = std::env::var("DESKWATCH_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if debug_mode {
        config.monitor.heartbeat_every_ticks = 1;
    }
}
