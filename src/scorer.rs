/*!
Scoring strategies that turn a candidate parameter vector into a distance.

The driver only sees [`TrajectoryScorer`]. [`DirectScorer`] runs the model's simulator for every
candidate; [`EmulatedScorer`] answers from per-model surrogates trained once per population and
falls back to direct simulation for models whose training set was degenerate.
*/

use log::{debug, warn};
use ndarray::ArrayView2;
use rayon::prelude::*;

use crate::distance::{evaluate, DistanceMetric, SummaryStatistic};
use crate::emulator::{train_surrogate, Surrogate, SurrogateTrainer};
use crate::error::{AbcError, AbcResult};
use crate::model::Model;

/// Distance of one candidate, with the predictive standard deviation when it is estimated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub distance: f64,
    /// Zero for exact simulation.
    pub std: f64,
}

impl Score {
    pub fn exact(distance: f64) -> Self {
        Self { distance, std: 0.0 }
    }
}

/// Produces distances for candidates of a given model.
pub trait TrajectoryScorer: Send + Sync {
    fn score(&self, model: usize, params: &[f64]) -> AbcResult<Score>;

    /// Acceptance rule for a score at `threshold`; the bound is inclusive.
    fn accepts(&self, score: &Score, threshold: f64) -> bool {
        score.distance <= threshold
    }
}

/// Simulates every candidate and compares it with the observed data.
pub struct DirectScorer<'a> {
    models: &'a [Model],
    observed: ArrayView2<'a, f64>,
    summary: &'a SummaryStatistic,
    metric: &'a DistanceMetric,
}

impl<'a> DirectScorer<'a> {
    pub fn new(
        models: &'a [Model],
        observed: ArrayView2<'a, f64>,
        summary: &'a SummaryStatistic,
        metric: &'a DistanceMetric,
    ) -> Self {
        Self {
            models,
            observed,
            summary,
            metric,
        }
    }
}

impl TrajectoryScorer for DirectScorer<'_> {
    fn score(&self, model: usize, params: &[f64]) -> AbcResult<Score> {
        let trajectory = self.models[model]
            .simulate(params)
            .map_err(|e| AbcError::Simulation {
                model,
                message: e.to_string(),
            })?;
        let distance = evaluate(
            trajectory.view(),
            self.observed,
            self.summary,
            self.metric,
        )?;
        Ok(Score::exact(distance))
    }
}

/// Scores candidates with per-model surrogates.
///
/// A candidate is accepted iff `mean + uncertainty_factor * std <= threshold`.
pub struct EmulatedScorer<'a> {
    direct: DirectScorer<'a>,
    surrogates: Vec<Option<Box<dyn Surrogate>>>,
    uncertainty_factor: f64,
}

impl<'a> EmulatedScorer<'a> {
    /**
    Evaluates the design points of every model with the true simulator and trains one surrogate
    per model.

    `designs[m]` holds the design points of model `m`; an empty list means the model gets no
    surrogate. A degenerate training set is not fatal: the model is scored by direct simulation
    for this population. Simulation and shape errors abort.
    */
    pub fn build(
        direct: DirectScorer<'a>,
        trainer: &dyn SurrogateTrainer,
        population: usize,
        designs: &[Vec<Vec<f64>>],
        uncertainty_factor: f64,
    ) -> AbcResult<Self> {
        let mut surrogates = Vec::with_capacity(designs.len());
        for (model, design) in designs.iter().enumerate() {
            if design.is_empty() {
                surrogates.push(None);
                continue;
            }
            let targets = design
                .par_iter()
                .map(|theta| direct.score(model, theta).map(|s| s.distance))
                .collect::<AbcResult<Vec<f64>>>()?;
            match train_surrogate(trainer, population, model, design, &targets) {
                Ok(surrogate) => {
                    debug!(
                        "population {population}: trained surrogate for model {model} on {} points",
                        design.len()
                    );
                    surrogates.push(Some(surrogate));
                }
                Err(err @ AbcError::DegenerateTrainingSet { .. }) => {
                    warn!("{err}; falling back to direct simulation");
                    surrogates.push(None);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(Self {
            direct,
            surrogates,
            uncertainty_factor,
        })
    }

    /// Whether model `m` is scored by its surrogate in this population.
    pub fn is_emulated(&self, model: usize) -> bool {
        matches!(self.surrogates.get(model), Some(Some(_)))
    }
}

impl TrajectoryScorer for EmulatedScorer<'_> {
    fn score(&self, model: usize, params: &[f64]) -> AbcResult<Score> {
        match &self.surrogates[model] {
            Some(surrogate) => {
                let (mean, var) = surrogate.predict(params);
                Ok(Score {
                    distance: mean.max(0.0),
                    std: var.max(0.0).sqrt(),
                })
            }
            None => self.direct.score(model, params),
        }
    }

    fn accepts(&self, score: &Score, threshold: f64) -> bool {
        score.distance + self.uncertainty_factor * score.std <= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Prior, Uniform};
    use crate::emulator::NearestNeighbourTrainer;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, Array2};

    fn models() -> Vec<Model> {
        vec![Model::new(
            "level",
            |theta: &[f64]| Array2::from_elem((1, 4), theta[0]),
            vec![Box::new(Uniform::new(0.0, 10.0).unwrap()) as Box<dyn Prior>],
        )]
    }

    #[test]
    fn direct_scores_are_exact() {
        let models = models();
        let observed = arr2(&[[1.0, 1.0, 1.0, 1.0]]);
        let summary = SummaryStatistic::KeepAll;
        let metric = DistanceMetric::Euclidean;
        let scorer = DirectScorer::new(&models, observed.view(), &summary, &metric);
        let score = scorer.score(0, &[2.0]).unwrap();
        assert_abs_diff_eq!(score.distance, 2.0);
        assert_eq!(score.std, 0.0);
        assert!(scorer.accepts(&score, 2.0));
        assert!(!scorer.accepts(&score, 1.999));
    }

    #[test]
    fn direct_reports_shape_mismatch() {
        let models = models();
        let observed = arr2(&[[1.0, 1.0]]);
        let summary = SummaryStatistic::KeepAll;
        let metric = DistanceMetric::Euclidean;
        let scorer = DirectScorer::new(&models, observed.view(), &summary, &metric);
        assert!(matches!(
            scorer.score(0, &[2.0]),
            Err(AbcError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn emulated_scorer_uses_surrogate() {
        let models = models();
        let observed = arr2(&[[1.0, 1.0, 1.0, 1.0]]);
        let summary = SummaryStatistic::KeepAll;
        let metric = DistanceMetric::Manhattan;
        let direct = DirectScorer::new(&models, observed.view(), &summary, &metric);
        let design: Vec<Vec<f64>> = (0..=20).map(|i| vec![i as f64 * 0.5]).collect();
        let scorer = EmulatedScorer::build(
            direct,
            &NearestNeighbourTrainer { k: 1 },
            0,
            &[design],
            0.0,
        )
        .unwrap();
        assert!(scorer.is_emulated(0));
        // Nearest design point to 3.1 is 3.0, whose Manhattan distance is 4 * 2.
        let score = scorer.score(0, &[3.1]).unwrap();
        assert_abs_diff_eq!(score.distance, 8.0);
    }

    #[test]
    fn uncertainty_factor_tightens_acceptance() {
        let models = models();
        let observed = arr2(&[[1.0, 1.0, 1.0, 1.0]]);
        let summary = SummaryStatistic::KeepAll;
        let metric = DistanceMetric::Euclidean;
        let direct = DirectScorer::new(&models, observed.view(), &summary, &metric);
        let scorer = EmulatedScorer::build(
            direct,
            &NearestNeighbourTrainer::default(),
            0,
            &[vec![]],
            2.0,
        )
        .unwrap();
        let score = Score {
            distance: 1.0,
            std: 0.5,
        };
        assert!(!scorer.accepts(&score, 1.5));
        assert!(scorer.accepts(&score, 2.0));
    }

    #[test]
    fn degenerate_design_falls_back_to_simulation() {
        let models = models();
        let observed = arr2(&[[1.0, 1.0, 1.0, 1.0]]);
        let summary = SummaryStatistic::KeepAll;
        let metric = DistanceMetric::Euclidean;
        let direct = DirectScorer::new(&models, observed.view(), &summary, &metric);
        let design = vec![vec![1.0], vec![2.0]];
        let scorer = EmulatedScorer::build(
            direct,
            &NearestNeighbourTrainer { k: 5 },
            3,
            &[design],
            0.0,
        )
        .unwrap();
        assert!(!scorer.is_emulated(0));
        assert_abs_diff_eq!(scorer.score(0, &[3.0]).unwrap().distance, 4.0);
    }
}
