/*!
Discrepancy between a simulated and an observed trajectory matrix.

Both matrices are first reduced by a [`SummaryStatistic`], then compared element-wise by a
[`DistanceMetric`]. Summaries of different shape are a structural error and are never
broadcast or truncated.

# Examples

```rust
use abc_smc_select::distance::{evaluate, DistanceMetric, SummaryStatistic};
use ndarray::arr2;

let observed = arr2(&[[0.0, 1.0, 2.0]]);
let simulated = arr2(&[[0.0, 1.0, 5.0]]);
let d = evaluate(
    simulated.view(),
    observed.view(),
    &SummaryStatistic::KeepAll,
    &DistanceMetric::Euclidean,
)
.unwrap();
assert_eq!(d, 3.0);
```
*/

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use std::fmt;
use std::sync::Arc;

use crate::error::{AbcError, AbcResult};

type SummaryFn = dyn Fn(ArrayView2<f64>) -> Array2<f64> + Send + Sync;
type MetricFn = dyn Fn(ArrayView1<f64>, ArrayView1<f64>) -> f64 + Send + Sync;

/// Reduces a `[n_trajectories, n_timepoints]` matrix before comparison.
#[derive(Clone, Default)]
pub enum SummaryStatistic {
    /// Compare raw trajectories element-wise.
    #[default]
    KeepAll,
    /// Keep only the last time point of each trajectory (`[n_trajectories, 1]`).
    FinalValues,
    /// Mean and standard deviation over time of each trajectory (`[n_trajectories, 2]`).
    Moments,
    /// A user supplied reduction.
    Custom(Arc<SummaryFn>),
}

impl SummaryStatistic {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(ArrayView2<f64>) -> Array2<f64> + Send + Sync + 'static,
    {
        SummaryStatistic::Custom(Arc::new(f))
    }

    pub fn summarize(&self, data: ArrayView2<f64>) -> Array2<f64> {
        match self {
            SummaryStatistic::KeepAll => data.to_owned(),
            SummaryStatistic::FinalValues => {
                if data.ncols() == 0 {
                    Array2::zeros((data.nrows(), 0))
                } else {
                    data.slice(s![.., -1..]).to_owned()
                }
            }
            SummaryStatistic::Moments => {
                let mut out = Array2::<f64>::zeros((data.nrows(), 2));
                if data.ncols() > 0 {
                    if let Some(mean) = data.mean_axis(Axis(1)) {
                        out.column_mut(0).assign(&mean);
                    }
                    out.column_mut(1).assign(&data.std_axis(Axis(1), 0.0));
                }
                out
            }
            SummaryStatistic::Custom(f) => f(data),
        }
    }
}

impl fmt::Debug for SummaryStatistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryStatistic::KeepAll => write!(f, "KeepAll"),
            SummaryStatistic::FinalValues => write!(f, "FinalValues"),
            SummaryStatistic::Moments => write!(f, "Moments"),
            SummaryStatistic::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Symmetric, non-negative distance between two summaries of equal shape.
#[derive(Clone, Default)]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Manhattan,
    Chebyshev,
    /// A user supplied metric. It must be symmetric and non-negative.
    Custom(Arc<MetricFn>),
}

impl DistanceMetric {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(ArrayView1<f64>, ArrayView1<f64>) -> f64 + Send + Sync + 'static,
    {
        DistanceMetric::Custom(Arc::new(f))
    }

    fn compute(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self {
            DistanceMetric::Euclidean => (&a - &b).mapv(|d| d * d).sum().sqrt(),
            DistanceMetric::Manhattan => (&a - &b).mapv(f64::abs).sum(),
            DistanceMetric::Chebyshev => {
                let diff = (&a - &b).mapv(f64::abs);
                if diff.iter().any(|d| d.is_nan()) {
                    return f64::NAN;
                }
                diff.max().map(|m| *m).unwrap_or(0.0)
            }
            DistanceMetric::Custom(f) => f(a, b),
        }
    }
}

impl fmt::Debug for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::Euclidean => write!(f, "Euclidean"),
            DistanceMetric::Manhattan => write!(f, "Manhattan"),
            DistanceMetric::Chebyshev => write!(f, "Chebyshev"),
            DistanceMetric::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Summarises both matrices and measures the distance between the summaries.
///
/// A NaN distance (e.g. from a diverging simulation) is reported as `f64::INFINITY` so that it
/// can never fall below a threshold. A negative distance is an [`AbcError::NegativeDistance`].
pub fn evaluate(
    simulated: ArrayView2<f64>,
    observed: ArrayView2<f64>,
    summary: &SummaryStatistic,
    metric: &DistanceMetric,
) -> AbcResult<f64> {
    let sim = summary.summarize(simulated);
    let obs = summary.summarize(observed);
    if sim.shape() != obs.shape() {
        return Err(AbcError::ShapeMismatch {
            simulated: sim.shape().to_vec(),
            observed: obs.shape().to_vec(),
        });
    }
    let sim = Array1::from_iter(sim.iter().copied());
    let obs = Array1::from_iter(obs.iter().copied());
    let d = metric.compute(sim.view(), obs.view());
    if d < 0.0 {
        return Err(AbcError::NegativeDistance { distance: d });
    }
    Ok(if d.is_nan() { f64::INFINITY } else { d })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn pair() -> (Array2<f64>, Array2<f64>) {
        (
            arr2(&[[1.0, 2.0, 3.0], [0.0, 0.0, 4.0]]),
            arr2(&[[1.0, 2.0, 1.0], [0.0, 1.0, 1.0]]),
        )
    }

    #[test]
    fn euclidean_keep_all() {
        let (a, b) = pair();
        let d = evaluate(
            a.view(),
            b.view(),
            &SummaryStatistic::KeepAll,
            &DistanceMetric::Euclidean,
        )
        .unwrap();
        assert_abs_diff_eq!(d, (4.0f64 + 1.0 + 9.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn metrics_are_symmetric() {
        let (a, b) = pair();
        for metric in [
            DistanceMetric::Euclidean,
            DistanceMetric::Manhattan,
            DistanceMetric::Chebyshev,
        ] {
            let ab = evaluate(a.view(), b.view(), &SummaryStatistic::KeepAll, &metric).unwrap();
            let ba = evaluate(b.view(), a.view(), &SummaryStatistic::KeepAll, &metric).unwrap();
            assert_abs_diff_eq!(ab, ba);
            assert!(ab >= 0.0);
        }
    }

    #[test]
    fn manhattan_and_chebyshev() {
        let (a, b) = pair();
        let keep = SummaryStatistic::KeepAll;
        let man = evaluate(a.view(), b.view(), &keep, &DistanceMetric::Manhattan).unwrap();
        let cheb = evaluate(a.view(), b.view(), &keep, &DistanceMetric::Chebyshev).unwrap();
        assert_abs_diff_eq!(man, 6.0);
        assert_abs_diff_eq!(cheb, 3.0);
    }

    #[test]
    fn final_values_compares_last_column() {
        let (a, b) = pair();
        let d = evaluate(
            a.view(),
            b.view(),
            &SummaryStatistic::FinalValues,
            &DistanceMetric::Manhattan,
        )
        .unwrap();
        assert_abs_diff_eq!(d, 5.0);
    }

    #[test]
    fn moments_summary_shape() {
        let (a, _) = pair();
        let s = SummaryStatistic::Moments.summarize(a.view());
        assert_eq!(s.shape(), &[2, 2]);
        assert_abs_diff_eq!(s[[0, 0]], 2.0);
        assert_abs_diff_eq!(s[[0, 1]], (2.0f64 / 3.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let a = arr2(&[[1.0, 2.0, 3.0]]);
        let b = arr2(&[[1.0, 2.0]]);
        let err = evaluate(
            a.view(),
            b.view(),
            &SummaryStatistic::KeepAll,
            &DistanceMetric::Euclidean,
        )
        .unwrap_err();
        assert!(matches!(err, AbcError::ShapeMismatch { .. }));
    }

    #[test]
    fn final_values_tolerates_different_lengths() {
        let a = arr2(&[[1.0, 2.0, 3.0]]);
        let b = arr2(&[[0.0, 3.5]]);
        let d = evaluate(
            a.view(),
            b.view(),
            &SummaryStatistic::FinalValues,
            &DistanceMetric::Euclidean,
        )
        .unwrap();
        assert_abs_diff_eq!(d, 0.5);
    }

    #[test]
    fn nan_distance_becomes_infinite() {
        let a = arr2(&[[f64::NAN, 1.0]]);
        let b = arr2(&[[0.0, 1.0]]);
        for metric in [DistanceMetric::Euclidean, DistanceMetric::Chebyshev] {
            let d = evaluate(a.view(), b.view(), &SummaryStatistic::KeepAll, &metric).unwrap();
            assert!(d.is_infinite());
        }
    }

    #[test]
    fn custom_summary_and_metric() {
        let total = SummaryStatistic::custom(|m| arr2(&[[m.sum()]]));
        let gap = DistanceMetric::custom(|a, b| (a[0] - b[0]).abs());
        let (a, b) = pair();
        let d = evaluate(a.view(), b.view(), &total, &gap).unwrap();
        assert_abs_diff_eq!(d, 4.0);
    }

    #[test]
    fn negative_custom_distance_is_rejected() {
        let signed = DistanceMetric::custom(|a, b| (&a - &b).sum());
        let (a, b) = pair();
        let res = evaluate(b.view(), a.view(), &SummaryStatistic::KeepAll, &signed);
        match res {
            Err(AbcError::NegativeDistance { distance }) => assert_abs_diff_eq!(distance, -4.0),
            other => panic!("expected a negative distance error, got {other:?}"),
        }
    }
}
