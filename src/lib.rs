//! Webcam attentiveness engine.
//!
//! Per-frame eye landmarks flow through [`tracking::EyeTracker`] (smoothing,
//! adaptive calibration, debounced open/closed classification) into a
//! [`productivity::ProductivityRecord`]. Faces are identified against a
//! [`identity::Gallery`] with a score-plus-gap rule. [`monitor::MonitorController`]
//! ties both to a capture rig, SQLite and a background write queue.

pub mod config;
pub mod db;
pub mod identity;
pub mod monitor;
pub mod persistence;
pub mod productivity;
pub mod sensing;
pub mod signal;
pub mod tracking;
pub mod utils;

pub use config::{AbsencePolicy, ConfigStore, EngineConfig, MatchThresholds, Profile};
pub use db::Database;
pub use identity::{Gallery, IdentityMatcher, MatchResult, MatchVerdict, RecognitionOutcome};
pub use monitor::{MonitorController, StatsSnapshot};
pub use productivity::ProductivityRecord;
pub use tracking::{ClosureEvent, EyeState, EyeTracker, Observation};
pub use utils::init_logging;
