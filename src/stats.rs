//! Weight and moment helpers for weighted particle populations.

use ndarray::prelude::*;
use num_traits::Float;

/// Rescales non-negative weights to sum to one. Returns `None` if the total is zero or not finite.
pub fn normalize_weights<T: Float>(weights: &[T]) -> Option<Vec<T>> {
    let total = weights.iter().fold(T::zero(), |acc, &w| acc + w);
    if total <= T::zero() || !total.is_finite() {
        return None;
    }
    Some(weights.iter().map(|&w| w / total).collect())
}

/// Kish effective sample size `(Σw)² / Σw²`.
pub fn effective_sample_size<T: Float>(weights: &[T]) -> T {
    let (sum, sum_sq) = weights
        .iter()
        .fold((T::zero(), T::zero()), |(s, sq), &w| (s + w, sq + w * w));
    if sum_sq == T::zero() {
        T::zero()
    } else {
        sum * sum / sum_sq
    }
}

/// Weighted mean and (population) variance of `values`. Weights need not be normalised.
pub fn weighted_moments<T: Float>(values: &[T], weights: &[T]) -> (T, T) {
    let total = weights.iter().fold(T::zero(), |acc, &w| acc + w);
    if values.is_empty() || total <= T::zero() {
        return (T::nan(), T::nan());
    }
    let mean = values
        .iter()
        .zip(weights)
        .fold(T::zero(), |acc, (&x, &w)| acc + x * w)
        / total;
    let var = values.iter().zip(weights).fold(T::zero(), |acc, (&x, &w)| {
        let d = x - mean;
        acc + w * d * d
    }) / total;
    (mean, var)
}

/// Per-parameter weighted mean and standard deviation of a `n_particles x n_params` matrix.
pub fn weighted_summary(params: ArrayView2<f64>, weights: &[f64]) -> (Array1<f64>, Array1<f64>) {
    let n_params = params.ncols();
    let mut mean = Array1::<f64>::zeros(n_params);
    let mut std = Array1::<f64>::zeros(n_params);
    for (j, column) in params.axis_iter(Axis(1)).enumerate() {
        let column: Vec<f64> = column.to_vec();
        let (m, v) = weighted_moments(&column, weights);
        mean[j] = m;
        std[j] = v.sqrt();
    }
    (mean, std)
}
