use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    config::EngineConfig,
    signal::{Calibrator, EyeLandmarks, LandmarkError, Point, Smoother},
};

use super::{
    machine::EyeStateMachine,
    state::{ClosureEvent, EyeState, EyeStateSession},
};

/// What the landmark provider saw on one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// Combined EAR of both eyes.
    Measured(f64),
    /// Face found but eye geometry unusable (zero span, NaN).
    Degenerate,
    NoFace,
}

impl Observation {
    /// Well-formed meshes only; a short mesh is the caller's error.
    pub fn from_landmarks(landmarks: Option<&[Point]>) -> Result<Self, LandmarkError> {
        match landmarks {
            None => Ok(Observation::NoFace),
            Some(points) => {
                let eyes = EyeLandmarks::from_mesh(points)?;
                Ok(eyes.ear().map_or(Observation::Degenerate, Observation::Measured))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub state: EyeState,
    pub denoised_ear: Option<f64>,
    pub threshold: Option<f64>,
    /// Calibration completed on this tick.
    pub calibrated_now: bool,
    /// No usable measurement; nothing advanced.
    pub skipped: bool,
    pub flushed: Vec<ClosureEvent>,
}

/// Smoother -> Calibrator -> Eye-State Machine, driven one tick at a time in
/// frame order.
#[derive(Debug, Clone)]
pub struct EyeTracker {
    smoother: Smoother,
    calibrator: Calibrator,
    machine: EyeStateMachine,
}

impl EyeTracker {
    pub fn new(config: &EngineConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            smoother: Smoother::new(&config.smoothing),
            calibrator: Calibrator::new(&config.calibration),
            machine: EyeStateMachine::new(&config.eye_state, started_at),
        }
    }

    pub fn process(&mut self, observation: Observation, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport {
            state: self.machine.state(),
            denoised_ear: None,
            threshold: self.calibrator.threshold(),
            calibrated_now: false,
            skipped: false,
            flushed: Vec::new(),
        };

        match observation {
            Observation::NoFace => {
                self.smoother.reset();
                report.flushed = self.machine.mark_absent(now);
            }
            Observation::Degenerate => report.skipped = true,
            Observation::Measured(ear) => match self.smoother.smooth(ear) {
                None => report.skipped = true,
                Some(denoised) => {
                    if !self.calibrator.is_calibrated() {
                        report.calibrated_now = self.calibrator.observe(denoised);
                    }
                    report.denoised_ear = Some(denoised);
                    report.threshold = self.calibrator.threshold();
                    report.flushed = self.machine.update(denoised, report.threshold, now);
                }
            },
        }

        report.state = self.machine.state();
        report
    }

    pub fn finish(&mut self, now: DateTime<Utc>) -> Vec<ClosureEvent> {
        self.machine.finish(now)
    }

    pub fn state(&self) -> EyeState {
        self.machine.state()
    }

    pub fn session(&self) -> &EyeStateSession {
        self.machine.session()
    }

    pub fn threshold(&self) -> Option<f64> {
        self.calibrator.threshold()
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrator.is_calibrated()
    }
}
