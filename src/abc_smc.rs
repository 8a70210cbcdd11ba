/*!
# ABC-SMC Model Selection

This module implements the population-based ABC-SMC scheme for choosing between competing
models. Every population accepts exactly `n_particles` particles at one threshold of a
non-increasing schedule. Particles are spread over the models in proportion to how often each
model produced accepted candidates, and the per-model share of the final population estimates
the model posterior.

## Overview

- **Population 0**: models are chosen uniformly, parameters are drawn from the model's prior,
  every accepted particle has weight 1.
- **Population k > 0**: a model is chosen in proportion to its accepted count in population
  `k - 1` (a model without particles there is never proposed again), an ancestor is drawn from
  that model's previous particles by importance weight and perturbed by a kernel fitted to
  those particles. Candidates with zero prior density are rejected before any simulation.
  Accepted particles receive the weight `prior(θ) / Σ_j w_j K(θ | θ_j)`.
- **Scoring**: either the true simulator for every candidate, or per-model surrogates trained
  at the start of the population (see [`EmulationConfig`]).
- **Reproducibility**: a fixed seed and deterministic simulators give identical results,
  whatever the number of threads.

## Example Usage

```rust
use abc_smc_select::abc_smc::{AbcSmc, AbcSmcConfig};
use abc_smc_select::distributions::{Prior, Uniform};
use abc_smc_select::model::Model;
use ndarray::Array2;

let times: Vec<f64> = (0..10).map(|t| t as f64).collect();
let linear = {
    let times = times.clone();
    move |theta: &[f64]| Array2::from_shape_fn((1, times.len()), |(_, j)| theta[0] * times[j])
};
let constant = |theta: &[f64]| Array2::from_elem((1, 10), theta[0]);
let observed = Array2::from_shape_fn((1, 10), |(_, j)| 0.5 * times[j]);

let models = vec![
    Model::new("linear", linear, vec![Box::new(Uniform::new(0.0, 2.0).unwrap()) as Box<dyn Prior>]),
    Model::new("constant", constant, vec![Box::new(Uniform::new(0.0, 10.0).unwrap()) as Box<dyn Prior>]),
];
let config = AbcSmcConfig::default().n_particles(50).set_seed(42);
let abc = AbcSmc::new(models, observed, vec![10.0, 5.0, 2.0], config).unwrap();
let result = abc.run().unwrap();

let posterior = result.final_posterior();
assert!(posterior[0] > posterior[1]);
```
*/

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, info};
use ndarray::Array2;
use rand::{thread_rng, Rng, RngCore};

use crate::core::{candidate_rng, fill_population, CandidateSampler, Outcome, Rejection};
use crate::distance::{DistanceMetric, SummaryStatistic};
use crate::distributions::{Categorical, FittedKernel, KernelKind, ProposalKernel};
use crate::emulator::{NearestNeighbourTrainer, SurrogateTrainer};
use crate::error::{AbcError, AbcResult};
use crate::model::Model;
use crate::population::{ModelCounts, Particle, Population};
use crate::schedule::ThresholdSchedule;
use crate::scorer::{DirectScorer, EmulatedScorer, TrajectoryScorer};

/// Salt separating design-of-experiments draws from candidate draws.
const DESIGN_SALT: u64 = 0x5DEE_CE66_D1CE_4E5B;

/// Surrogate acceleration settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmulationConfig {
    /// Design points simulated per model at the start of every population.
    pub n_design_points: usize,
    /// Number of predictive standard deviations added to the predicted distance before it is
    /// compared with the threshold. Zero uses the point prediction.
    pub uncertainty_factor: f64,
}

impl EmulationConfig {
    pub fn new(n_design_points: usize) -> Self {
        Self {
            n_design_points,
            uncertainty_factor: 0.0,
        }
    }

    pub fn uncertainty_factor(mut self, factor: f64) -> Self {
        self.uncertainty_factor = factor;
        self
    }
}

/// Run settings. Build with [`Default`] and the consuming setters.
#[derive(Debug, Clone)]
pub struct AbcSmcConfig {
    /// Accepted particles per population.
    pub n_particles: usize,
    /// Proposal budget per population.
    pub max_attempts: usize,
    /// Candidates evaluated in parallel between ordered commits.
    pub batch_size: usize,
    pub seed: u64,
    pub summary: SummaryStatistic,
    pub metric: DistanceMetric,
    /// Kernel family used by every model without an explicit override.
    pub kernel: KernelKind,
    /// Per-model kernel families; must have one entry per model when set.
    pub model_kernels: Option<Vec<KernelKind>>,
    pub emulation: Option<EmulationConfig>,
    /// Show `indicatif` progress bars.
    pub progress: bool,
}

impl Default for AbcSmcConfig {
    fn default() -> Self {
        Self {
            n_particles: 100,
            max_attempts: 1_000_000,
            batch_size: 256,
            seed: thread_rng().gen::<u64>(),
            summary: SummaryStatistic::default(),
            metric: DistanceMetric::default(),
            kernel: KernelKind::default(),
            model_kernels: None,
            emulation: None,
            progress: false,
        }
    }
}

impl AbcSmcConfig {
    pub fn n_particles(mut self, n: usize) -> Self {
        self.n_particles = n;
        self
    }

    pub fn max_attempts(mut self, n: usize) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    /// Fixes the seed all candidate RNGs are derived from.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn summary(mut self, summary: SummaryStatistic) -> Self {
        self.summary = summary;
        self
    }

    pub fn metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn kernel(mut self, kernel: KernelKind) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn model_kernels(mut self, kernels: Vec<KernelKind>) -> Self {
        self.model_kernels = Some(kernels);
        self
    }

    pub fn emulation(mut self, emulation: EmulationConfig) -> Self {
        self.emulation = Some(emulation);
        self
    }

    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn validate(&self, n_models: usize) -> AbcResult<()> {
        if self.n_particles == 0 {
            return Err(AbcError::config("n_particles must be positive"));
        }
        if self.batch_size == 0 {
            return Err(AbcError::config("batch_size must be positive"));
        }
        if self.max_attempts < self.n_particles {
            return Err(AbcError::config(format!(
                "max_attempts ({}) is smaller than n_particles ({})",
                self.max_attempts, self.n_particles
            )));
        }
        if let Some(kernels) = &self.model_kernels {
            if kernels.len() != n_models {
                return Err(AbcError::config(format!(
                    "{} kernels given for {} models",
                    kernels.len(),
                    n_models
                )));
            }
        }
        if let Some(emulation) = &self.emulation {
            if emulation.n_design_points == 0 {
                return Err(AbcError::config("n_design_points must be positive"));
            }
            if !(emulation.uncertainty_factor.is_finite() && emulation.uncertainty_factor >= 0.0)
            {
                return Err(AbcError::config(format!(
                    "uncertainty_factor must be finite and non-negative, got {}",
                    emulation.uncertainty_factor
                )));
            }
        }
        Ok(())
    }

    fn kernel_for(&self, model: usize) -> KernelKind {
        self.model_kernels
            .as_ref()
            .and_then(|k| k.get(model).copied())
            .unwrap_or(self.kernel)
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    PopulationRunning(usize),
    PopulationComplete(usize),
    Finished,
}

/// Everything recorded about one finished population.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationRecord {
    pub population: Population,
    /// Per-model proposal and acceptance tallies.
    pub counts: Vec<ModelCounts>,
    /// Total proposals committed.
    pub attempts: usize,
    /// Accepted counts divided by `n_particles`.
    pub model_posterior: Vec<f64>,
    /// Effective sample size of each model's particles.
    pub effective_sample_sizes: Vec<f64>,
    /// Which models were scored by a surrogate.
    pub emulated: Vec<bool>,
    /// True simulations spent on design points.
    pub design_simulations: usize,
}

impl PopulationRecord {
    pub fn threshold(&self) -> f64 {
        self.population.threshold
    }
}

/// Output of [`AbcSmc::run`]: one record per population.
#[derive(Debug, Clone, PartialEq)]
pub struct AbcSmcResult {
    pub model_names: Vec<String>,
    pub records: Vec<PopulationRecord>,
}

impl AbcSmcResult {
    /// One model-posterior vector per population.
    pub fn model_posteriors(&self) -> Vec<Vec<f64>> {
        self.records
            .iter()
            .map(|r| r.model_posterior.clone())
            .collect()
    }

    /// Model posterior of the last population.
    pub fn final_posterior(&self) -> Vec<f64> {
        self.records
            .last()
            .map(|r| r.model_posterior.clone())
            .unwrap_or_default()
    }

    pub fn final_population(&self) -> Option<&Population> {
        self.records.last().map(|r| &r.population)
    }
}

/// Run-wide state owned by one [`AbcSmc::run`] invocation.
struct RunContext {
    records: Vec<PopulationRecord>,
}

impl RunContext {
    fn previous(&self) -> Option<&Population> {
        self.records.last().map(|r| &r.population)
    }
}

/// How a model proposes parameters in the current population.
enum ModelProposal<'p> {
    Prior,
    Inherited {
        ancestors: &'p [Particle],
        weights: Vec<f64>,
        chooser: Categorical,
        kernel: FittedKernel,
    },
    Dead,
}

/// Model choice plus per-model parameter proposals for one population.
struct Proposer<'a> {
    models: &'a [Model],
    chooser: Categorical,
    proposals: Vec<ModelProposal<'a>>,
}

impl<'a> Proposer<'a> {
    fn new(
        models: &'a [Model],
        previous: Option<&'a Population>,
        config: &AbcSmcConfig,
    ) -> AbcResult<Self> {
        let Some(previous) = previous else {
            let chooser = Categorical::new(&vec![1.0; models.len()])
                .ok_or_else(|| AbcError::config("no models"))?;
            return Ok(Self {
                models,
                chooser,
                proposals: models.iter().map(|_| ModelProposal::Prior).collect(),
            });
        };

        let mut selection = Vec::with_capacity(models.len());
        let mut proposals = Vec::with_capacity(models.len());
        for (m, model) in models.iter().enumerate() {
            let survivors = previous.model(m);
            let weights = survivors.normalized_weights();
            let proposal = match Categorical::new(&weights) {
                Some(chooser) => {
                    let kernel = config.kernel_for(m).fit(
                        &survivors.params(),
                        &weights,
                        &model.fixed_mask(),
                    );
                    debug!(
                        "population {}: model {m} inherits {} particles, kernel {kernel:?}",
                        previous.index + 1,
                        survivors.len()
                    );
                    ModelProposal::Inherited {
                        ancestors: survivors.particles(),
                        weights,
                        chooser,
                        kernel,
                    }
                }
                None => ModelProposal::Dead,
            };
            selection.push(match proposal {
                ModelProposal::Dead => 0.0,
                _ => survivors.len() as f64,
            });
            proposals.push(proposal);
        }
        let chooser = Categorical::new(&selection).ok_or_else(|| {
            AbcError::config(format!(
                "population {} left no model with particles",
                previous.index
            ))
        })?;
        Ok(Self {
            models,
            chooser,
            proposals,
        })
    }

    fn is_alive(&self, model: usize) -> bool {
        !matches!(self.proposals[model], ModelProposal::Dead)
    }

    /// Draws a parameter vector for `model`; `None` for a dead model.
    fn propose_for(&self, model: usize, rng: &mut dyn RngCore) -> Option<Vec<f64>> {
        match &self.proposals[model] {
            ModelProposal::Prior => Some(self.models[model].sample_prior(rng)),
            ModelProposal::Inherited {
                ancestors,
                chooser,
                kernel,
                ..
            } => {
                let ancestor = &ancestors[chooser.sample(rng)];
                Some(kernel.perturb(&ancestor.params, rng))
            }
            ModelProposal::Dead => None,
        }
    }

    fn propose(&self, rng: &mut dyn RngCore) -> (usize, Option<Vec<f64>>) {
        let model = self.chooser.sample(rng);
        (model, self.propose_for(model, rng))
    }

    /// Importance weight of an accepted candidate; `None` if no ancestor can reach it.
    fn weight(&self, model: usize, theta: &[f64], prior: f64) -> Option<f64> {
        match &self.proposals[model] {
            ModelProposal::Prior => Some(1.0),
            ModelProposal::Inherited {
                ancestors,
                weights,
                kernel,
                ..
            } => {
                let denominator: f64 = ancestors
                    .iter()
                    .zip(weights)
                    .map(|(a, w)| w * kernel.density(&a.params, theta))
                    .sum();
                let weight = prior / denominator;
                (denominator > 0.0 && weight > 0.0 && weight.is_finite()).then_some(weight)
            }
            ModelProposal::Dead => None,
        }
    }
}

/// Draws and judges the candidates of one population.
struct PopulationSampler<'a> {
    models: &'a [Model],
    proposer: &'a Proposer<'a>,
    scorer: &'a dyn TrajectoryScorer,
    seed: u64,
    population: usize,
    threshold: f64,
}

impl CandidateSampler for PopulationSampler<'_> {
    fn attempt(&self, attempt: usize) -> AbcResult<Outcome> {
        let mut rng = candidate_rng(self.seed, self.population, attempt);
        let (model, theta) = self.proposer.propose(&mut rng);
        let outside = Outcome::Rejected {
            model,
            reason: Rejection::OutsideSupport,
        };
        let Some(theta) = theta else {
            return Ok(outside);
        };
        let prior = self.models[model].prior_density(&theta);
        if prior <= 0.0 {
            return Ok(outside);
        }

        let score = self.scorer.score(model, &theta)?;
        if !self.scorer.accepts(&score, self.threshold) {
            return Ok(Outcome::Rejected {
                model,
                reason: Rejection::AboveThreshold,
            });
        }

        match self.proposer.weight(model, &theta, prior) {
            Some(weight) => Ok(Outcome::Accepted(Particle {
                model,
                params: theta,
                distance: score.distance,
                weight,
            })),
            None => Ok(Outcome::Rejected {
                model,
                reason: Rejection::UnreachableWeight,
            }),
        }
    }
}

/// The ABC-SMC model-selection driver.
pub struct AbcSmc {
    models: Vec<Model>,
    observed: Array2<f64>,
    schedule: ThresholdSchedule,
    config: AbcSmcConfig,
    trainer: Box<dyn SurrogateTrainer>,
}

impl AbcSmc {
    /**
    Validates the inputs and builds a driver.

    # Arguments

    * `models` - Competing models; a model's index in this list identifies it in every output.
    * `observed` - Observed data, `[n_trajectories, n_timepoints]`.
    * `schedule` - Thresholds, one per population; non-increasing and positive.
    * `config` - Run settings.

    # Errors

    [`AbcError::Configuration`] for an empty model list, a model without parameters, empty
    observed data, an invalid schedule or invalid settings.
    */
    pub fn new(
        models: Vec<Model>,
        observed: Array2<f64>,
        schedule: impl Into<Vec<f64>>,
        config: AbcSmcConfig,
    ) -> AbcResult<Self> {
        if models.is_empty() {
            return Err(AbcError::config("at least one model is required"));
        }
        if let Some((m, model)) = models.iter().enumerate().find(|(_, m)| m.n_params() == 0) {
            return Err(AbcError::config(format!(
                "model {m} ({}) has no priors",
                model.name()
            )));
        }
        if observed.is_empty() {
            return Err(AbcError::config("observed data is empty"));
        }
        let schedule = ThresholdSchedule::new(schedule.into())?;
        config.validate(models.len())?;
        Ok(Self {
            models,
            observed,
            schedule,
            config,
            trainer: Box::new(NearestNeighbourTrainer::default()),
        })
    }

    /// Replaces the regression used on the emulation path.
    pub fn with_trainer(mut self, trainer: impl SurrogateTrainer + 'static) -> Self {
        self.trainer = Box::new(trainer);
        self
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn schedule(&self) -> &ThresholdSchedule {
        &self.schedule
    }

    /// Runs every population of the schedule.
    ///
    /// # Errors
    ///
    /// [`AbcError::ExhaustedBudget`] if a population cannot be filled within `max_attempts`,
    /// [`AbcError::ShapeMismatch`] or [`AbcError::Simulation`] from scoring.
    pub fn run(&self) -> AbcResult<AbcSmcResult> {
        let n_populations = self.schedule.len();
        let mut ctx = RunContext {
            records: Vec::with_capacity(n_populations),
        };

        let multi = self.config.progress.then(MultiProgress::new);
        let overall = multi.as_ref().map(|multi| {
            let pb = multi.add(ProgressBar::new(n_populations as u64));
            pb.set_style(bar_style("{prefix:12} {bar:40.cyan/blue} {pos}/{len} {msg}"));
            pb.set_prefix("Populations");
            pb
        });

        let mut state = RunState::Initializing;
        loop {
            state = match state {
                RunState::Initializing => {
                    info!(
                        "ABC-SMC over {} models, {} populations, {} particles each",
                        self.models.len(),
                        n_populations,
                        self.config.n_particles
                    );
                    RunState::PopulationRunning(0)
                }
                RunState::PopulationRunning(k) => {
                    let pb = multi.as_ref().map(|multi| {
                        let pb = multi.add(ProgressBar::new(self.config.n_particles as u64));
                        pb.set_style(bar_style("{prefix:12} {bar:40.white} ETA {eta:3} | {msg}"));
                        pb.set_prefix(format!("Pop {k}"));
                        pb
                    });
                    let record = self.run_population(k, ctx.previous(), pb.as_ref())?;
                    if let Some(pb) = pb {
                        pb.finish_and_clear();
                    }
                    if let Some(overall) = &overall {
                        overall.inc(1);
                        overall.set_message(format!(
                            "eps {:.4} | p(m) {:.3?}",
                            record.threshold(),
                            record.model_posterior
                        ));
                    }
                    ctx.records.push(record);
                    RunState::PopulationComplete(k)
                }
                RunState::PopulationComplete(k) if k + 1 < n_populations => {
                    RunState::PopulationRunning(k + 1)
                }
                RunState::PopulationComplete(_) => RunState::Finished,
                RunState::Finished => break,
            };
            debug!("run state -> {state:?}");
        }

        if let Some(overall) = overall {
            overall.finish_with_message("Done!");
        }

        Ok(AbcSmcResult {
            model_names: self.models.iter().map(|m| m.name().to_string()).collect(),
            records: ctx.records,
        })
    }

    fn run_population(
        &self,
        k: usize,
        previous: Option<&Population>,
        pb: Option<&ProgressBar>,
    ) -> AbcResult<PopulationRecord> {
        let threshold = self.schedule.get(k).ok_or_else(|| {
            AbcError::config(format!("no threshold for population {k}"))
        })?;
        let n_models = self.models.len();
        let proposer = Proposer::new(&self.models, previous, &self.config)?;
        let direct = DirectScorer::new(
            &self.models,
            self.observed.view(),
            &self.config.summary,
            &self.config.metric,
        );

        let (scorer, emulated, design_simulations): (Box<dyn TrajectoryScorer + '_>, _, _) =
            match &self.config.emulation {
                None => (Box::new(direct) as Box<_>, vec![false; n_models], 0),
                Some(emulation) => {
                    let designs = self.design_points(k, &proposer, emulation.n_design_points);
                    let spent: usize = designs.iter().map(Vec::len).sum();
                    let scorer = EmulatedScorer::build(
                        direct,
                        self.trainer.as_ref(),
                        k,
                        &designs,
                        emulation.uncertainty_factor,
                    )?;
                    let emulated: Vec<bool> =
                        (0..n_models).map(|m| scorer.is_emulated(m)).collect();
                    (Box::new(scorer) as Box<_>, emulated, spent)
                }
            };

        if let Some(pb) = pb {
            pb.set_message(format!("eps {threshold}"));
        }
        let sampler = PopulationSampler {
            models: &self.models,
            proposer: &proposer,
            scorer: scorer.as_ref(),
            seed: self.config.seed,
            population: k,
            threshold,
        };
        let filled = fill_population(
            &sampler,
            self.config.n_particles,
            n_models,
            self.config.batch_size,
            self.config.max_attempts,
            pb,
        )?;
        if !filled.complete {
            return Err(AbcError::ExhaustedBudget {
                population: k,
                threshold,
                attempts: filled.attempts,
            });
        }

        let mut population = Population::new(k, threshold, n_models);
        for particle in filled.accepted {
            population.push(particle);
        }
        let model_posterior = population
            .accepted_counts()
            .iter()
            .map(|&c| c as f64 / self.config.n_particles as f64)
            .collect::<Vec<f64>>();
        let effective_sample_sizes = (0..n_models)
            .map(|m| population.model(m).effective_sample_size())
            .collect();

        info!(
            "population {k} (threshold {threshold}): {} proposals, posterior {:.4?}",
            filled.attempts, model_posterior
        );

        Ok(PopulationRecord {
            population,
            counts: filled.counts,
            attempts: filled.attempts,
            model_posterior,
            effective_sample_sizes,
            emulated,
            design_simulations,
        })
    }

    /// Design points per model, drawn from the model's current proposal and kept only inside
    /// the prior support. Dead models get none.
    fn design_points(&self, k: usize, proposer: &Proposer<'_>, n: usize) -> Vec<Vec<Vec<f64>>> {
        let seed = self.config.seed ^ DESIGN_SALT;
        (0..self.models.len())
            .map(|m| {
                if !proposer.is_alive(m) {
                    return Vec::new();
                }
                (0..n)
                    .filter_map(|i| {
                        let mut rng = candidate_rng(seed, k, m * n + i);
                        proposer
                            .propose_for(m, &mut rng)
                            .filter(|theta| self.models[m].prior_density(theta) > 0.0)
                    })
                    .collect()
            })
            .collect()
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}
