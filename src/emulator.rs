/*!
Surrogate models standing in for the simulator during one population.

A [`SurrogateTrainer`] turns a design-of-experiments sample of `(parameters, distance)` pairs
into a [`Surrogate`] that predicts the distance of unseen parameters together with a predictive
variance. [`train_surrogate`] performs the degeneracy checks shared by every trainer.

The crate ships [`NearestNeighbourTrainer`], a k-nearest-neighbour regressor on standardised
inputs. Any other regression can be plugged in by implementing the two traits.
*/

use ndarray::prelude::*;

use crate::error::{AbcError, AbcResult};

/// A trained regression from parameters to distance.
pub trait Surrogate: Send + Sync {
    /// Returns `(predicted distance, predictive variance)`.
    fn predict(&self, params: &[f64]) -> (f64, f64);
}

/// Fits a [`Surrogate`] to a training set.
pub trait SurrogateTrainer: Send + Sync {
    /// Fewest training points the regression can work with.
    fn min_points(&self) -> usize;

    /// Fits the regression. `inputs[i]` has target `targets[i]`.
    fn fit(&self, inputs: &[Vec<f64>], targets: &[f64]) -> Result<Box<dyn Surrogate>, String>;
}

/// Filters non-finite targets, checks the training set and fits `trainer`.
///
/// Fails with [`AbcError::DegenerateTrainingSet`] when fewer than `trainer.min_points()` usable
/// points remain, when all usable targets are identical, or when the trainer itself fails.
pub fn train_surrogate(
    trainer: &dyn SurrogateTrainer,
    population: usize,
    model: usize,
    inputs: &[Vec<f64>],
    targets: &[f64],
) -> AbcResult<Box<dyn Surrogate>> {
    let degenerate = |reason: String| AbcError::DegenerateTrainingSet {
        population,
        model,
        reason,
    };

    let (xs, ys): (Vec<Vec<f64>>, Vec<f64>) = inputs
        .iter()
        .zip(targets)
        .filter(|(_, y)| y.is_finite())
        .map(|(x, &y)| (x.clone(), y))
        .unzip();

    if xs.len() < trainer.min_points() {
        return Err(degenerate(format!(
            "{} usable design points, regression needs at least {}",
            xs.len(),
            trainer.min_points()
        )));
    }
    if ys.windows(2).all(|w| w[0] == w[1]) {
        return Err(degenerate("all training distances are identical".into()));
    }
    trainer.fit(&xs, &ys).map_err(degenerate)
}

/// k-nearest-neighbour regression on inputs standardised per coordinate.
///
/// The prediction is the mean distance of the `k` closest design points, the variance their
/// sample variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NearestNeighbourTrainer {
    pub k: usize,
}

impl Default for NearestNeighbourTrainer {
    fn default() -> Self {
        Self { k: 5 }
    }
}

impl SurrogateTrainer for NearestNeighbourTrainer {
    fn min_points(&self) -> usize {
        self.k.max(2)
    }

    fn fit(&self, inputs: &[Vec<f64>], targets: &[f64]) -> Result<Box<dyn Surrogate>, String> {
        let dim = inputs.first().map_or(0, Vec::len);
        if inputs.iter().any(|x| x.len() != dim) {
            return Err("design points have inconsistent dimensions".into());
        }
        let x = Array2::from_shape_fn((inputs.len(), dim), |(i, j)| inputs[i][j]);
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| "empty design".to_string())?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 });
        let x = (&x - &mean) / &scale;
        Ok(Box::new(NearestNeighbourSurrogate {
            k: self.k.max(1).min(inputs.len()),
            x,
            y: Array1::from(targets.to_vec()),
            mean,
            scale,
        }))
    }
}

struct NearestNeighbourSurrogate {
    k: usize,
    x: Array2<f64>,
    y: Array1<f64>,
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl Surrogate for NearestNeighbourSurrogate {
    fn predict(&self, params: &[f64]) -> (f64, f64) {
        let q = (&ArrayView1::from(params) - &self.mean) / &self.scale;
        let mut by_distance: Vec<(f64, f64)> = self
            .x
            .outer_iter()
            .zip(self.y.iter())
            .map(|(row, &y)| ((&row - &q).mapv(|d| d * d).sum(), y))
            .collect();
        by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));
        let neighbours: Vec<f64> = by_distance.iter().take(self.k).map(|(_, y)| *y).collect();
        let n = neighbours.len() as f64;
        let mean = neighbours.iter().sum::<f64>() / n;
        let var = if neighbours.len() > 1 {
            neighbours.iter().map(|y| (y - mean).powi(2)).sum::<f64>() / (n - 1.0)
        } else {
            0.0
        };
        (mean, var)
    }
}
