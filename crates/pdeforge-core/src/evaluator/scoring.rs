//! Error metrics over output tensors.

use ndarray::{ArrayD, Axis, Slice};

use crate::domain::ResolutionError;

/// `true` if any element of any tensor is NaN or infinite.
pub fn has_non_finite(tensors: &[ArrayD<f64>]) -> bool {
    tensors.iter().any(|t| t.iter().any(|v| !v.is_finite()))
}

/// Sum of squares held as `scale² · ssq`, so finite inputs of any
/// magnitude never overflow (the `nrm2` scheme).
#[derive(Debug, Default, Clone, Copy)]
struct ScaledSumSq {
    scale: f64,
    ssq: f64,
}

impl ScaledSumSq {
    fn add(&mut self, value: f64) {
        let a = value.abs();
        if a == 0.0 {
            return;
        }
        if self.scale < a {
            self.ssq = 1.0 + self.ssq * (self.scale / a).powi(2);
            self.scale = a;
        } else {
            self.ssq += (a / self.scale).powi(2);
        }
    }

    fn is_zero(&self) -> bool {
        self.scale == 0.0
    }

    /// `sqrt(self / other)` without forming either norm.
    fn ratio(&self, other: &ScaledSumSq) -> f64 {
        (self.scale / other.scale) * (self.ssq / other.ssq).sqrt()
    }

    fn norm(&self) -> f64 {
        self.scale * self.ssq.sqrt()
    }
}

/// Normalized RMSE over all fields, the batch and frames `1..`.
///
/// Tensors are `[batch, frames, spatial...]`; frame 0 is the initial
/// condition and is excluded. Falls back to the absolute L2 norm of the
/// difference when the reference norm is zero. Pairs are matched by
/// position; callers check shapes first.
///
/// Finite inputs always give a finite error; a result beyond `f64::MAX`
/// saturates there.
pub fn normalized_rmse(predictions: &[ArrayD<f64>], references: &[ArrayD<f64>]) -> f64 {
    // Halved differences cannot overflow; the factor cancels in the ratio
    // and is restored for the absolute norm.
    let mut half_diff = ScaledSumSq::default();
    let mut half_ref = ScaledSumSq::default();
    for (pred, reference) in predictions.iter().zip(references) {
        let pred = pred.slice_axis(Axis(1), Slice::from(1..));
        let reference = reference.slice_axis(Axis(1), Slice::from(1..));
        for (p, r) in pred.iter().zip(reference.iter()) {
            half_diff.add(p / 2.0 - r / 2.0);
            half_ref.add(r / 2.0);
        }
    }
    let error = if half_diff.is_zero() {
        0.0
    } else if half_ref.is_zero() {
        2.0 * half_diff.norm()
    } else {
        half_diff.ratio(&half_ref)
    };
    error.min(f64::MAX)
}

/// Empirical convergence order from per-resolution errors.
///
/// Negated least-squares slope of `ln(error)` against `ln(resolution)`.
/// Only finite positive errors count; `None` with fewer than two distinct
/// resolutions left.
pub fn convergence_order(errors: &[ResolutionError]) -> Option<f64> {
    let points: Vec<(f64, f64)> = errors
        .iter()
        .filter(|e| e.resolution > 0 && e.normalized_error.is_finite() && e.normalized_error > 0.0)
        .map(|e| ((e.resolution as f64).ln(), e.normalized_error.ln()))
        .collect();
    if points.len() < 2 {
        return None;
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let order = -sxy / sxx;
    order.is_finite().then_some(order)
}
