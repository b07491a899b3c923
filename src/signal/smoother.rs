use std::collections::VecDeque;

use crate::config::SmoothingConfig;

/// Savitzky-Golay style smoother over a trailing window of raw EAR values.
///
/// The buffer keeps raw samples. Before each fit, a sample far from the
/// window median is replaced by the median unless the sample after it sits
/// on the same side too: an isolated spike never enters a fit, while a step
/// change comes through one tick late.
#[derive(Debug, Clone)]
pub struct Smoother {
    buffer: VecDeque<f64>,
    window: usize,
    order: usize,
    min_samples: usize,
    outlier_jump: Option<f64>,
}

impl Smoother {
    pub fn new(config: &SmoothingConfig) -> Self {
        let window = config.window.max(1);
        Self {
            buffer: VecDeque::with_capacity(window),
            window,
            order: config.polynomial_order,
            min_samples: config.min_samples.max(config.polynomial_order + 1),
            outlier_jump: config.outlier_jump,
        }
    }

    /// Push one raw measurement and return the denoised value.
    ///
    /// Non-finite input is not a measurement: the buffer is left untouched
    /// and `None` is returned.
    pub fn smooth(&mut self, raw: f64) -> Option<f64> {
        if !raw.is_finite() {
            return None;
        }

        if self.buffer.len() == self.window {
            self.buffer.pop_front();
        }
        self.buffer.push_back(raw);

        if self.buffer.len() < self.min_samples {
            return Some(raw);
        }

        let mut samples: Vec<f64> = self.buffer.iter().copied().collect();
        if let Some(jump) = self.outlier_jump {
            reject_outliers(&mut samples, jump);
        }

        let smoothed = fit_at_last(&samples, self.order);
        Some(if smoothed.is_finite() { smoothed } else { raw })
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Replace unconfirmed excursions beyond `jump` from the median. The newest
/// sample has no successor yet, so it is always provisional.
fn reject_outliers(samples: &mut [f64], jump: f64) {
    let med = median(samples);
    let side = |v: f64| match v - med {
        d if d > jump => 1i8,
        d if d < -jump => -1,
        _ => 0,
    };
    let sides: Vec<i8> = samples.iter().map(|&v| side(v)).collect();
    for (i, sample) in samples.iter_mut().enumerate() {
        let confirmed = sides.get(i + 1) == Some(&sides[i]);
        if sides[i] != 0 && !confirmed {
            *sample = med;
        }
    }
}

pub(crate) fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    match n {
        0 => f64::NAN,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Least-squares polynomial of `order` over the samples, evaluated at the
/// newest one. x runs from -(n-1)/n to 0 so the answer is the constant term.
fn fit_at_last(samples: &[f64], order: usize) -> f64 {
    let n = samples.len();
    let last = samples.last().copied().unwrap_or(f64::NAN);
    if n == 0 {
        return last;
    }

    let terms = order.min(n - 1) + 1;
    let xs: Vec<f64> = (0..n).map(|i| (i as f64 - (n - 1) as f64) / n as f64).collect();

    // Normal equations: sum x^(j+k) * a_k = sum y * x^j
    let mut power_sums = vec![0.0; 2 * terms - 1];
    let mut rhs = vec![0.0; terms];
    for (&x, &y) in xs.iter().zip(samples) {
        let mut p = 1.0;
        for (k, slot) in power_sums.iter_mut().enumerate() {
            *slot += p;
            if k < terms {
                rhs[k] += y * p;
            }
            p *= x;
        }
    }

    let mut matrix: Vec<Vec<f64>> = (0..terms)
        .map(|row| (0..terms).map(|col| power_sums[row + col]).collect())
        .collect();

    match solve(&mut matrix, &mut rhs) {
        Some(coefficients) => coefficients[0],
        None => samples.iter().sum::<f64>() / n as f64,
    }
}

/// Gaussian elimination with partial pivoting; `None` on a singular system.
fn solve(matrix: &mut [Vec<f64>], rhs: &mut [f64]) -> Option<Vec<f64>> {
    let n = rhs.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&a, &b| matrix[a][col].abs().total_cmp(&matrix[b][col].abs()))?;
        if matrix[pivot][col].abs() < 1e-12 {
            return None;
        }
        matrix.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in col + 1..n {
            let factor = matrix[row][col] / matrix[col][col];
            for k in col..n {
                matrix[row][k] -= factor * matrix[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| matrix[row][k] * solution[k]).sum();
        solution[row] = (rhs[row] - tail) / matrix[row][row];
    }
    Some(solution)
}
