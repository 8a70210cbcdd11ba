//! Candidate models: a simulator capability plus one independent prior per parameter.

use ndarray::Array2;
use rand::RngCore;
use std::error::Error;
use std::fmt;

use crate::distributions::{joint_density, Prior};

/// Error type a simulator may report.
pub type SimulationError = Box<dyn Error + Send + Sync>;

/// Maps a parameter vector to a trajectory matrix of shape `[n_trajectories, n_timepoints]`.
///
/// Any `Fn(&[f64]) -> Array2<f64>` closure is a simulator.
pub trait Simulator: Send + Sync {
    fn simulate(&self, params: &[f64]) -> Result<Array2<f64>, SimulationError>;
}

impl<F> Simulator for F
where
    F: Fn(&[f64]) -> Array2<f64> + Send + Sync,
{
    fn simulate(&self, params: &[f64]) -> Result<Array2<f64>, SimulationError> {
        Ok(self(params))
    }
}

/**
A candidate generative process.

# Examples

```rust
use abc_smc_select::distributions::{Prior, Uniform};
use abc_smc_select::model::Model;
use ndarray::Array2;

let decay = Model::new(
    "decay",
    |theta: &[f64]| Array2::from_shape_fn((1, 5), |(_, t)| (-theta[0] * t as f64).exp()),
    vec![Box::new(Uniform::new(0.0, 1.0).unwrap()) as Box<dyn Prior>],
);
assert_eq!(decay.n_params(), 1);
assert!(decay.prior_density(&[0.5]) > 0.0);
assert_eq!(decay.prior_density(&[1.5]), 0.0);
```
*/
pub struct Model {
    name: String,
    simulator: Box<dyn Simulator>,
    priors: Vec<Box<dyn Prior>>,
}

impl Model {
    pub fn new(
        name: impl Into<String>,
        simulator: impl Simulator + 'static,
        priors: Vec<Box<dyn Prior>>,
    ) -> Self {
        Self {
            name: name.into(),
            simulator: Box::new(simulator),
            priors,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_params(&self) -> usize {
        self.priors.len()
    }

    pub fn priors(&self) -> &[Box<dyn Prior>] {
        &self.priors
    }

    /// Joint prior density; zero outside the support.
    pub fn prior_density(&self, theta: &[f64]) -> f64 {
        if theta.len() != self.priors.len() {
            return 0.0;
        }
        joint_density(&self.priors, theta)
    }

    pub fn sample_prior(&self, rng: &mut dyn RngCore) -> Vec<f64> {
        self.priors.iter().map(|p| p.sample(rng)).collect()
    }

    /// Which coordinates are pinned by a constant prior.
    pub fn fixed_mask(&self) -> Vec<bool> {
        self.priors.iter().map(|p| p.is_fixed()).collect()
    }

    pub fn simulate(&self, theta: &[f64]) -> Result<Array2<f64>, SimulationError> {
        self.simulator.simulate(theta)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("priors", &self.priors)
            .finish_non_exhaustive()
    }
}
