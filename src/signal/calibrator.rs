use std::collections::VecDeque;

use crate::config::CalibrationConfig;

/// Derives the adaptive open/closed threshold from a warm-up window.
///
/// After a failed attempt (no sample inside the plausible range) the window
/// slides: the oldest sample drops out and every further sample triggers a
/// fresh attempt over the latest `warmup_samples` values. A threshold, once
/// found, is never recomputed.
#[derive(Debug, Clone)]
pub struct Calibrator {
    samples: VecDeque<f64>,
    warmup: usize,
    plausible: (f64, f64),
    percentile: f64,
    threshold: Option<f64>,
    failed_attempts: u32,
}

impl Calibrator {
    pub fn new(config: &CalibrationConfig) -> Self {
        let warmup = config.warmup_samples.max(1);
        Self {
            samples: VecDeque::with_capacity(warmup),
            warmup,
            plausible: (config.plausible_min, config.plausible_max),
            percentile: config.percentile,
            threshold: None,
            failed_attempts: 0,
        }
    }

    /// Feed one denoised sample. Returns `true` only on the tick calibration completes.
    pub fn observe(&mut self, denoised: f64) -> bool {
        if self.threshold.is_some() || !denoised.is_finite() {
            return false;
        }

        if self.samples.len() == self.warmup {
            self.samples.pop_front();
        }
        self.samples.push_back(denoised);

        if self.samples.len() < self.warmup {
            return false;
        }

        let (lo, hi) = self.plausible;
        let plausible: Vec<f64> = self
            .samples
            .iter()
            .copied()
            .filter(|v| (lo..=hi).contains(v))
            .collect();

        if plausible.is_empty() {
            self.failed_attempts += 1;
            if self.failed_attempts == 1 {
                log::warn!(
                    "calibration failed: none of {} warm-up samples inside [{lo}, {hi}]; retrying on a sliding window",
                    self.warmup
                );
            }
            return false;
        }

        let threshold = percentile(&plausible, self.percentile);
        log::info!(
            "calibrated EAR threshold {threshold:.3} from {}/{} plausible samples after {} failed attempts",
            plausible.len(),
            self.warmup,
            self.failed_attempts
        );
        self.threshold = Some(threshold);
        self.samples.clear();
        true
    }

    pub fn is_calibrated(&self) -> bool {
        self.threshold.is_some()
    }

    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }
}

/// Linear-interpolated percentile (`p` in [0, 100]) of a non-empty slice.
pub(crate) fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    if sorted.is_empty() {
        return f64::NAN;
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrator(warmup: usize) -> Calibrator {
        Calibrator::new(&CalibrationConfig {
            warmup_samples: warmup,
            ..CalibrationConfig::default()
        })
    }

    #[test]
    fn completes_on_last_warmup_sample() {
        let mut cal = calibrator(30);
        for i in 0..29 {
            assert!(!cal.observe(0.30), "completed early at {i}");
        }
        assert!(cal.observe(0.30));
        assert!((cal.threshold().unwrap() - 0.30).abs() < 1e-12);
    }

    #[test]
    fn threshold_is_low_percentile_of_plausible_samples() {
        let mut cal = calibrator(5);
        // 0.9 is outside the plausible range and ignored
        for v in [0.9, 0.20, 0.30, 0.40, 0.24] {
            cal.observe(v);
        }
        // sorted plausible: 0.20, 0.24, 0.30, 0.40 -> rank 0.75
        assert!((cal.threshold().unwrap() - 0.23).abs() < 1e-12);
    }

    #[test]
    fn never_recomputed_after_success() {
        let mut cal = calibrator(3);
        for _ in 0..3 {
            cal.observe(0.3);
        }
        for _ in 0..10 {
            assert!(!cal.observe(0.2));
        }
        assert!((cal.threshold().unwrap() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn failure_retries_on_sliding_window() {
        let mut cal = calibrator(4);
        for _ in 0..4 {
            cal.observe(0.01);
        }
        assert!(!cal.is_calibrated());
        assert_eq!(cal.failed_attempts(), 1);

        // One plausible sample slides in and the next attempt succeeds.
        assert!(cal.observe(0.28));
        assert!((cal.threshold().unwrap() - 0.28).abs() < 1e-12);
    }
}
