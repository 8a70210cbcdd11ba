//! End-to-end runs of the ABC-SMC driver.
//!
//! The main scenario compares a logistic and an exponential growth model on data generated by the
//! logistic model. The remaining tests cover the failure modes and the emulation path.

use abc_smc_select::abc_smc::{AbcSmc, AbcSmcConfig, AbcSmcResult, EmulationConfig};
use abc_smc_select::distributions::{Constant, KernelKind, Prior, Uniform};
use abc_smc_select::error::AbcError;
use abc_smc_select::model::{Model, SimulationError, Simulator};
use approx::assert_abs_diff_eq;
use ndarray::Array2;

const N_TIMES: usize = 11;

fn logistic(theta: &[f64]) -> Array2<f64> {
    let (r, k) = (theta[0], theta[1]);
    Array2::from_shape_fn((1, N_TIMES), |(_, t)| {
        let growth = (r * t as f64).exp();
        k * growth / (k + growth - 1.0)
    })
}

fn exponential(theta: &[f64]) -> Array2<f64> {
    Array2::from_shape_fn((1, N_TIMES), |(_, t)| (theta[0] * t as f64).exp())
}

fn growth_models() -> Vec<Model> {
    vec![
        Model::new(
            "logistic",
            logistic,
            vec![
                Box::new(Uniform::new(0.0, 2.0).unwrap()) as Box<dyn Prior>,
                Box::new(Uniform::new(5.0, 15.0).unwrap()),
            ],
        ),
        Model::new(
            "exponential",
            exponential,
            vec![Box::new(Uniform::new(0.0, 2.0).unwrap()) as Box<dyn Prior>],
        ),
    ]
}

fn level_model(low: f64, high: f64) -> Model {
    Model::new(
        "level",
        |theta: &[f64]| Array2::from_elem((2, 4), theta[0]),
        vec![Box::new(Uniform::new(low, high).unwrap()) as Box<dyn Prior>],
    )
}

fn run_growth(config: AbcSmcConfig) -> AbcSmcResult {
    let observed = logistic(&[0.5, 10.0]);
    AbcSmc::new(growth_models(), observed, vec![20.0, 15.0, 10.0, 5.0, 3.0], config)
        .unwrap()
        .run()
        .unwrap()
}

/// Checks the invariants every finished population must satisfy.
fn assert_population_invariants(result: &AbcSmcResult, n_particles: usize) {
    for (k, record) in result.records.iter().enumerate() {
        assert_eq!(record.population.index, k);
        assert_eq!(record.population.len(), n_particles);
        assert_eq!(
            record.population.accepted_counts().iter().sum::<usize>(),
            n_particles
        );
        assert_abs_diff_eq!(
            record.model_posterior.iter().sum::<f64>(),
            1.0,
            epsilon = 1e-12
        );
        let proposed: usize = record.counts.iter().map(|c| c.proposed).sum();
        assert_eq!(proposed, record.attempts);
        for (m, counts) in record.counts.iter().enumerate() {
            assert_eq!(counts.accepted, record.population.model(m).len());
            assert!(counts.proposed >= counts.accepted + counts.outside_support);
        }
        for particle in record.population.iter() {
            assert!(particle.distance <= record.threshold());
            assert!(particle.weight > 0.0 && particle.weight.is_finite());
            if k == 0 {
                assert_eq!(particle.weight, 1.0);
            }
        }
    }
}

#[test]
fn test_logistic_data_selects_logistic_model() {
    let config = AbcSmcConfig::default()
        .n_particles(100)
        .kernel(KernelKind::Gaussian)
        .set_seed(42);
    let result = run_growth(config);

    assert_eq!(result.records.len(), 5);
    assert_population_invariants(&result, 100);

    let posterior = result.final_posterior();
    assert!(
        posterior[0] > posterior[1],
        "logistic should dominate, got {posterior:?}"
    );
    // Once a model has no particles it stays dead.
    let dead_from = result
        .records
        .iter()
        .position(|r| r.population.model(1).is_empty());
    if let Some(k) = dead_from {
        for record in &result.records[k + 1..] {
            assert_eq!(record.counts[1].proposed, 0);
        }
    }
}

#[test]
fn test_full_schedule_selects_logistic_model() {
    let observed = logistic(&[0.5, 10.0]);
    let schedule = vec![20.0, 15.0, 10.0, 5.0, 3.0, 2.5, 2.0, 1.7, 1.5];
    let config = AbcSmcConfig::default().n_particles(200).set_seed(0);
    let result = AbcSmc::new(growth_models(), observed, schedule, config)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(result.records.len(), 9);
    assert_population_invariants(&result, 200);
    let posterior = result.final_posterior();
    assert!(
        posterior[0] > posterior[1],
        "logistic should dominate, got {posterior:?}"
    );
}

#[test]
fn test_fixed_seed_is_reproducible_across_batch_sizes() {
    let config = || AbcSmcConfig::default().n_particles(50).set_seed(7);
    let a = run_growth(config());
    let b = run_growth(config());
    let c = run_growth(config().batch_size(13));
    assert_eq!(a, b);
    assert_eq!(a, c);
}

#[test]
fn test_zero_particles_is_a_configuration_error() {
    let observed = logistic(&[0.5, 10.0]);
    let res = AbcSmc::new(
        growth_models(),
        observed,
        vec![10.0],
        AbcSmcConfig::default().n_particles(0),
    );
    assert!(matches!(res, Err(AbcError::Configuration(_))));
}

#[test]
fn test_empty_model_list_is_a_configuration_error() {
    let res = AbcSmc::new(
        Vec::new(),
        Array2::zeros((1, 3)),
        vec![1.0],
        AbcSmcConfig::default(),
    );
    assert!(matches!(res, Err(AbcError::Configuration(_))));
}

#[test]
fn test_support_violations_count_as_proposed() {
    // The data sit on the edge of the prior, so perturbed particles often leave the support.
    let observed = Array2::from_elem((2, 4), 1.0);
    let abc = AbcSmc::new(
        vec![level_model(0.0, 1.0)],
        observed,
        vec![2.0, 1.0, 0.5],
        AbcSmcConfig::default().n_particles(80).set_seed(11),
    )
    .unwrap();
    let result = abc.run().unwrap();
    assert_population_invariants(&result, 80);

    assert_eq!(result.records[0].counts[0].outside_support, 0);
    let later_violations: usize = result.records[1..]
        .iter()
        .map(|r| r.counts[0].outside_support)
        .sum();
    assert!(later_violations > 0);
    for record in &result.records {
        assert!(record
            .population
            .iter()
            .all(|p| (0.0..=1.0).contains(&p.params[0])));
    }
}

#[test]
fn test_unreachable_threshold_exhausts_budget() {
    let observed = Array2::from_elem((2, 4), 1.0);
    let abc = AbcSmc::new(
        vec![level_model(5.0, 10.0)],
        observed,
        vec![0.1],
        AbcSmcConfig::default()
            .n_particles(10)
            .max_attempts(300)
            .batch_size(64)
            .set_seed(0),
    )
    .unwrap();
    match abc.run() {
        Err(AbcError::ExhaustedBudget {
            population,
            threshold,
            attempts,
        }) => {
            assert_eq!(population, 0);
            assert_eq!(threshold, 0.1);
            assert_eq!(attempts, 300);
        }
        other => panic!("expected an exhausted budget, got {other:?}"),
    }
}

#[test]
fn test_shape_mismatch_aborts_the_run() {
    let observed = Array2::from_elem((2, 5), 1.0);
    let abc = AbcSmc::new(
        vec![level_model(0.0, 2.0)],
        observed,
        vec![1.0],
        AbcSmcConfig::default().n_particles(5).set_seed(1),
    )
    .unwrap();
    match abc.run() {
        Err(AbcError::ShapeMismatch {
            simulated,
            observed,
        }) => {
            assert_eq!(simulated, vec![2, 4]);
            assert_eq!(observed, vec![2, 5]);
        }
        other => panic!("expected a shape mismatch, got {other:?}"),
    }
}

struct Broken;

impl Simulator for Broken {
    fn simulate(&self, _params: &[f64]) -> Result<Array2<f64>, SimulationError> {
        Err("solver diverged".into())
    }
}

#[test]
fn test_simulator_failure_is_reported_with_model_index() {
    let models = vec![
        level_model(0.0, 2.0),
        Model::new(
            "broken",
            Broken,
            vec![Box::new(Uniform::new(0.0, 1.0).unwrap()) as Box<dyn Prior>],
        ),
    ];
    let abc = AbcSmc::new(
        models,
        Array2::from_elem((2, 4), 1.0),
        vec![1.0],
        AbcSmcConfig::default().n_particles(20).set_seed(2),
    )
    .unwrap();
    match abc.run() {
        Err(AbcError::Simulation { model, message }) => {
            assert_eq!(model, 1);
            assert!(message.contains("solver diverged"));
        }
        other => panic!("expected a simulation error, got {other:?}"),
    }
}

#[test]
fn test_constant_prior_pins_parameter() {
    let model = Model::new(
        "line",
        |theta: &[f64]| Array2::from_shape_fn((1, 5), |(_, t)| theta[0] + theta[1] * t as f64),
        vec![
            Box::new(Constant::new(1.0)) as Box<dyn Prior>,
            Box::new(Uniform::new(0.0, 1.0).unwrap()),
        ],
    );
    let observed = Array2::from_shape_fn((1, 5), |(_, t)| 1.0 + 0.5 * t as f64);
    let result = AbcSmc::new(
        vec![model],
        observed,
        vec![2.0, 1.0, 0.5],
        AbcSmcConfig::default().n_particles(40).set_seed(4),
    )
    .unwrap()
    .run()
    .unwrap();
    assert_population_invariants(&result, 40);
    for record in &result.records {
        assert!(record.population.iter().all(|p| p.params[0] == 1.0));
    }
}

#[test]
fn test_emulation_trains_surrogates() {
    let observed = Array2::from_elem((2, 4), 1.0);
    let abc = AbcSmc::new(
        vec![level_model(0.0, 2.0), level_model(0.0, 4.0)],
        observed,
        vec![2.0, 1.0],
        AbcSmcConfig::default()
            .n_particles(50)
            .emulation(EmulationConfig::new(100))
            .set_seed(9),
    )
    .unwrap();
    let result = abc.run().unwrap();
    assert_population_invariants(&result, 50);

    let first = &result.records[0];
    assert_eq!(first.emulated, vec![true, true]);
    assert_eq!(first.design_simulations, 200);
}

#[test]
fn test_emulation_falls_back_with_too_few_design_points() {
    let observed = Array2::from_elem((2, 4), 1.0);
    let abc = AbcSmc::new(
        vec![level_model(0.0, 2.0)],
        observed,
        vec![2.0, 1.0],
        AbcSmcConfig::default()
            .n_particles(30)
            .emulation(EmulationConfig::new(2).uncertainty_factor(1.0))
            .set_seed(10),
    )
    .unwrap();
    let result = abc.run().unwrap();
    assert_population_invariants(&result, 30);
    for record in &result.records {
        assert_eq!(record.emulated, vec![false]);
    }
}

#[test]
fn test_acceptance_rate_drops_as_threshold_shrinks() {
    let mut first = 0.0;
    let mut last = 0.0;
    for seed in 0..5 {
        let result = AbcSmc::new(
            vec![level_model(0.0, 2.0)],
            Array2::from_elem((2, 4), 1.0),
            vec![2.0, 1.0, 0.5],
            AbcSmcConfig::default().n_particles(100).set_seed(seed),
        )
        .unwrap()
        .run()
        .unwrap();
        first += result.records[0].counts[0].acceptance_rate();
        last += result.records[2].counts[0].acceptance_rate();
    }
    assert!(last / 5.0 < first / 5.0);
}
