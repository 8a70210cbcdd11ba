/*!
Priors, perturbation kernels and the categorical chooser used by the ABC-SMC driver.

Every model carries one independent univariate [`Prior`] per parameter. Between populations,
inherited particles are moved by a [`ProposalKernel`] fitted to the previous population of the
same model (see [`KernelKind::fit`]). Model indices and ancestor particles are drawn with a
[`Categorical`] over non-negative weights.

# Examples

```rust
use abc_smc_select::distributions::{Prior, Uniform, KernelKind, ProposalKernel};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let prior = Uniform::new(0.0, 2.0).unwrap();
let mut rng = SmallRng::seed_from_u64(42);
let x = prior.sample(&mut rng);
assert!(prior.density(x) > 0.0);

// Fit a kernel to three one-dimensional ancestors.
let ancestors = vec![vec![0.5], vec![1.0], vec![1.5]];
let kernel = KernelKind::Uniform.fit(&ancestors, &[1.0 / 3.0; 3], &[false]);
let moved = kernel.perturb(&ancestors[0], &mut rng);
assert!(kernel.density(&ancestors[0], &moved) > 0.0);
```
*/

use rand::{Rng, RngCore};
use rand_distr::{Distribution, Normal as NormalDistr, StandardNormal};
use std::f64::consts::PI;
use std::fmt::Debug;

use crate::error::{AbcError, AbcResult};
use crate::stats::weighted_moments;

/// Smallest kernel scale used for a free parameter whose ancestors collapsed onto one value.
const MIN_SCALE: f64 = 1e-10;

/// An independent univariate prior over one model parameter.
pub trait Prior: Debug + Send + Sync {
    /// Draws one value.
    fn sample(&self, rng: &mut dyn RngCore) -> f64;

    /// Evaluates the density at `x`. Zero means `x` lies outside the support.
    fn density(&self, x: f64) -> f64;

    /// Whether the parameter is pinned to a single value and must never be perturbed.
    fn is_fixed(&self) -> bool {
        false
    }
}

/// Joint density of independent priors. Returns 0 as soon as one coordinate leaves the support.
pub fn joint_density(priors: &[Box<dyn Prior>], theta: &[f64]) -> f64 {
    let mut density = 1.0;
    for (prior, &x) in priors.iter().zip(theta) {
        density *= prior.density(x);
        if density == 0.0 {
            return 0.0;
        }
    }
    density
}

/// A parameter fixed at `value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant {
    pub value: f64,
}

impl Constant {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

impl Prior for Constant {
    fn sample(&self, _rng: &mut dyn RngCore) -> f64 {
        self.value
    }

    fn density(&self, x: f64) -> f64 {
        if x == self.value {
            1.0
        } else {
            0.0
        }
    }

    fn is_fixed(&self) -> bool {
        true
    }
}

/// Uniform prior on the closed interval `[low, high]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Uniform {
    pub low: f64,
    pub high: f64,
}

impl Uniform {
    pub fn new(low: f64, high: f64) -> AbcResult<Self> {
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(AbcError::config(format!(
                "uniform prior needs finite low < high, got [{low}, {high}]"
            )));
        }
        Ok(Self { low, high })
    }
}

impl Prior for Uniform {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        rng.gen_range(self.low..=self.high)
    }

    fn density(&self, x: f64) -> f64 {
        if (self.low..=self.high).contains(&x) {
            1.0 / (self.high - self.low)
        } else {
            0.0
        }
    }
}

/// Gaussian prior with mean `mean` and standard deviation `std`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normal {
    pub mean: f64,
    pub std: f64,
}

impl Normal {
    pub fn new(mean: f64, std: f64) -> AbcResult<Self> {
        if !(mean.is_finite() && std.is_finite() && std > 0.0) {
            return Err(AbcError::config(format!(
                "normal prior needs finite mean and std > 0, got N({mean}, {std})"
            )));
        }
        Ok(Self { mean, std })
    }
}

impl Prior for Normal {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        self.mean + self.std * z
    }

    fn density(&self, x: f64) -> f64 {
        normal_pdf(x, self.mean, self.std * self.std)
    }
}

/// Log-normal prior: `ln(x) ~ N(mu, sigma)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogNormal {
    pub mu: f64,
    pub sigma: f64,
}

impl LogNormal {
    pub fn new(mu: f64, sigma: f64) -> AbcResult<Self> {
        if !(mu.is_finite() && sigma.is_finite() && sigma > 0.0) {
            return Err(AbcError::config(format!(
                "log-normal prior needs finite mu and sigma > 0, got LN({mu}, {sigma})"
            )));
        }
        Ok(Self { mu, sigma })
    }
}

impl Prior for LogNormal {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        (self.mu + self.sigma * z).exp()
    }

    fn density(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        normal_pdf(x.ln(), self.mu, self.sigma * self.sigma) / x
    }
}

fn normal_pdf(x: f64, mean: f64, var: f64) -> f64 {
    let diff = x - mean;
    (-(diff * diff) / (2.0 * var)).exp() / (2.0 * PI * var).sqrt()
}

/// A perturbation kernel `K(to | from)` moving an inherited particle.
pub trait ProposalKernel: Send + Sync {
    /// Samples a perturbed copy of `from`.
    fn perturb(&self, from: &[f64], rng: &mut dyn RngCore) -> Vec<f64>;

    /// Evaluates `K(to | from)`.
    fn density(&self, from: &[f64], to: &[f64]) -> f64;
}

/// Component-wise uniform kernel: coordinate `i` moves uniformly within `±half_widths[i]`.
/// A zero half-width pins the coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformKernel {
    pub half_widths: Vec<f64>,
}

impl ProposalKernel for UniformKernel {
    fn perturb(&self, from: &[f64], rng: &mut dyn RngCore) -> Vec<f64> {
        from.iter()
            .zip(&self.half_widths)
            .map(|(&x, &w)| if w > 0.0 { x + rng.gen_range(-w..=w) } else { x })
            .collect()
    }

    fn density(&self, from: &[f64], to: &[f64]) -> f64 {
        let mut density = 1.0;
        for ((&f, &t), &w) in from.iter().zip(to).zip(&self.half_widths) {
            if w > 0.0 {
                if (t - f).abs() > w {
                    return 0.0;
                }
                density /= 2.0 * w;
            } else if t != f {
                return 0.0;
            }
        }
        density
    }
}

/// Component-wise Gaussian kernel with per-coordinate variances. A zero variance pins the
/// coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    pub variances: Vec<f64>,
}

impl ProposalKernel for GaussianKernel {
    fn perturb(&self, from: &[f64], rng: &mut dyn RngCore) -> Vec<f64> {
        from.iter()
            .zip(&self.variances)
            .map(|(&x, &var)| match NormalDistr::new(x, var.sqrt()) {
                Ok(normal) if var > 0.0 => normal.sample(rng),
                _ => x,
            })
            .collect()
    }

    fn density(&self, from: &[f64], to: &[f64]) -> f64 {
        let mut density = 1.0;
        for ((&f, &t), &var) in from.iter().zip(to).zip(&self.variances) {
            if var > 0.0 {
                density *= normal_pdf(t, f, var);
            } else if t != f {
                return 0.0;
            }
        }
        density
    }
}

/// The family of perturbation kernel a model uses between populations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelKind {
    /// Half-width of each coordinate is half the range spanned by the ancestors.
    #[default]
    Uniform,
    /// Variance of each coordinate is twice the weighted ancestor variance.
    Gaussian,
}

/// A kernel fitted to one model's previous population.
#[derive(Debug, Clone, PartialEq)]
pub enum FittedKernel {
    Uniform(UniformKernel),
    Gaussian(GaussianKernel),
}

impl KernelKind {
    /**
    Fits a kernel of this family to a set of ancestor particles.

    # Arguments

    * `ancestors` - Parameter vectors of the previous population of one model.
    * `weights` - Normalised importance weights of `ancestors`.
    * `fixed` - Per-coordinate flag; fixed coordinates get a zero scale and never move.
    */
    pub fn fit(self, ancestors: &[Vec<f64>], weights: &[f64], fixed: &[bool]) -> FittedKernel {
        let dim = fixed.len();
        match self {
            KernelKind::Uniform => {
                let half_widths = (0..dim)
                    .map(|i| {
                        if fixed[i] {
                            return 0.0;
                        }
                        let (lo, hi) = ancestors.iter().fold(
                            (f64::INFINITY, f64::NEG_INFINITY),
                            |(lo, hi), p| (lo.min(p[i]), hi.max(p[i])),
                        );
                        ((hi - lo) / 2.0).max(MIN_SCALE)
                    })
                    .collect();
                FittedKernel::Uniform(UniformKernel { half_widths })
            }
            KernelKind::Gaussian => {
                let variances = (0..dim)
                    .map(|i| {
                        if fixed[i] {
                            return 0.0;
                        }
                        let column: Vec<f64> = ancestors.iter().map(|p| p[i]).collect();
                        let (_, var) = weighted_moments(&column, weights);
                        (2.0 * var).max(MIN_SCALE * MIN_SCALE)
                    })
                    .collect();
                FittedKernel::Gaussian(GaussianKernel { variances })
            }
        }
    }
}

impl ProposalKernel for FittedKernel {
    fn perturb(&self, from: &[f64], rng: &mut dyn RngCore) -> Vec<f64> {
        match self {
            FittedKernel::Uniform(k) => k.perturb(from, rng),
            FittedKernel::Gaussian(k) => k.perturb(from, rng),
        }
    }

    fn density(&self, from: &[f64], to: &[f64]) -> f64 {
        match self {
            FittedKernel::Uniform(k) => k.density(from, to),
            FittedKernel::Gaussian(k) => k.density(from, to),
        }
    }
}

/**
A categorical distribution over indices `0..n`, proportional to non-negative weights.

Zero-weight entries are never drawn.

# Examples

```rust
use abc_smc_select::distributions::Categorical;
use rand::rngs::SmallRng;
use rand::SeedableRng;

let cat = Categorical::new(&[0.0, 3.0, 1.0]).unwrap();
let mut rng = SmallRng::seed_from_u64(7);
assert_ne!(cat.sample(&mut rng), 0);
assert!((cat.prob(1) - 0.75).abs() < 1e-12);
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Categorical {
    cumulative: Vec<f64>,
}

impl Categorical {
    /// Returns `None` if the weights are empty, negative, non-finite or sum to zero.
    pub fn new(weights: &[f64]) -> Option<Self> {
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return None;
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return None;
        }
        let mut acc = 0.0;
        let cumulative = weights
            .iter()
            .map(|w| {
                acc += w / total;
                acc
            })
            .collect();
        Some(Self { cumulative })
    }

    pub fn sample(&self, rng: &mut dyn RngCore) -> usize {
        let r: f64 = rng.gen();
        let idx = self.cumulative.partition_point(|&c| c <= r);
        // Guard against r landing above a cumulative sum that rounded below 1.0.
        let idx = idx.min(self.cumulative.len() - 1);
        if self.prob(idx) > 0.0 {
            idx
        } else {
            (0..=idx)
                .rev()
                .find(|&i| self.prob(i) > 0.0)
                .unwrap_or(idx)
        }
    }

    /// Probability of index `i`.
    pub fn prob(&self, i: usize) -> f64 {
        match i {
            0 => self.cumulative.first().copied().unwrap_or(0.0),
            _ if i < self.cumulative.len() => self.cumulative[i] - self.cumulative[i - 1],
            _ => 0.0,
        }
    }
}
