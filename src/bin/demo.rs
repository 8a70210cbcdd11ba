//! A small ABC-SMC demo: is a growth curve logistic or exponential?
//!
//! Data come from a logistic curve with `r = 0.5`, `K = 10`. Both candidate models start from
//! `x0 = 1` and are observed at `t = 0..10`.

use abc_smc_select::abc_smc::{AbcSmc, AbcSmcConfig};
use abc_smc_select::distributions::{KernelKind, Prior, Uniform};
use abc_smc_select::model::Model;
use abc_smc_select::stats::weighted_summary;
use ndarray::Array2;
use std::error::Error;

const X0: f64 = 1.0;
const N_TIMES: usize = 11;

fn logistic(theta: &[f64]) -> Array2<f64> {
    let (r, k) = (theta[0], theta[1]);
    Array2::from_shape_fn((1, N_TIMES), |(_, t)| {
        let growth = (r * t as f64).exp();
        k * X0 * growth / (k + X0 * (growth - 1.0))
    })
}

fn exponential(theta: &[f64]) -> Array2<f64> {
    Array2::from_shape_fn((1, N_TIMES), |(_, t)| X0 * (theta[0] * t as f64).exp())
}

fn main() -> Result<(), Box<dyn Error>> {
    const N_PARTICLES: usize = 200;
    const SEED: u64 = 42;

    let observed = logistic(&[0.5, 10.0]);
    let models = vec![
        Model::new(
            "logistic",
            logistic,
            vec![
                Box::new(Uniform::new(0.0, 2.0)?) as Box<dyn Prior>,
                Box::new(Uniform::new(5.0, 15.0)?),
            ],
        ),
        Model::new(
            "exponential",
            exponential,
            vec![Box::new(Uniform::new(0.0, 2.0)?) as Box<dyn Prior>],
        ),
    ];

    let config = AbcSmcConfig::default()
        .n_particles(N_PARTICLES)
        .kernel(KernelKind::Gaussian)
        .set_seed(SEED)
        .progress(true);
    let schedule = vec![20.0, 15.0, 10.0, 5.0, 3.0, 2.5, 2.0, 1.7, 1.5];
    let abc = AbcSmc::new(models, observed, schedule, config)?;
    let result = abc.run()?;

    for record in &result.records {
        println!(
            "population {:>2} | eps {:>5.2} | {:>7} proposals | acceptance {:.3?} | p(m) {:.3?}",
            record.population.index,
            record.threshold(),
            record.attempts,
            record
                .counts
                .iter()
                .map(|c| c.acceptance_rate())
                .collect::<Vec<_>>(),
            record.model_posterior
        );
    }

    let posterior = result.final_posterior();
    for (name, p) in result.model_names.iter().zip(&posterior) {
        println!("P({name} | data) = {p:.3}");
    }

    if let Some(population) = result.final_population() {
        let logistic = population.model(0);
        if !logistic.is_empty() {
            let (mean, std) =
                weighted_summary(logistic.to_matrix().view(), &logistic.normalized_weights());
            println!("Logistic (r, K): mean {mean:.3}, std {std:.3}");
        }
    }
    Ok(())
}
