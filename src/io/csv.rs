/*!
# Saving ABC-SMC Results to CSV

This module writes the particles and model posteriors of a finished run to CSV files. Enable via
the `csv` feature.
*/

use std::fs::File;

use csv::Writer;

use crate::abc_smc::AbcSmcResult;
use crate::error::AbcResult;

/**
Saves every accepted particle of every population.

The resulting CSV file has a header row with `"population"`, `"threshold"`, `"model"`,
`"weight"`, `"distance"` and one `"param_i"` column per parameter. Models with fewer parameters
than the widest model leave the trailing parameter cells empty. Weights are the unnormalised
importance weights.

# Arguments

* `result` - Output of [`crate::abc_smc::AbcSmc::run`].
* `filename` - The file path where the CSV data will be written.

# Examples

```rust
use abc_smc_select::abc_smc::{AbcSmc, AbcSmcConfig};
use abc_smc_select::distributions::{Prior, Uniform};
use abc_smc_select::io::csv::save_particles_csv;
use abc_smc_select::model::Model;
use ndarray::Array2;

let model = Model::new(
    "level",
    |theta: &[f64]| Array2::from_elem((1, 3), theta[0]),
    vec![Box::new(Uniform::new(0.0, 2.0)?) as Box<dyn Prior>],
);
let observed = Array2::from_elem((1, 3), 1.0);
let config = AbcSmcConfig::default().n_particles(10).set_seed(0);
let result = AbcSmc::new(vec![model], observed, vec![1.0, 0.5], config)?.run()?;

save_particles_csv(&result, "/tmp/particles.csv")?;
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/
pub fn save_particles_csv(result: &AbcSmcResult, filename: &str) -> AbcResult<()> {
    let mut wtr = Writer::from_writer(File::create(filename)?);
    let n_params = result
        .records
        .iter()
        .flat_map(|r| r.population.iter())
        .map(|p| p.params.len())
        .max()
        .unwrap_or(0);

    let mut header: Vec<String> = ["population", "threshold", "model", "weight", "distance"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend((0..n_params).map(|i| format!("param_{i}")));
    wtr.write_record(&header)?;

    for record in &result.records {
        for particle in record.population.iter() {
            let mut row = vec![
                record.population.index.to_string(),
                record.threshold().to_string(),
                result.model_names[particle.model].clone(),
                particle.weight.to_string(),
                particle.distance.to_string(),
            ];
            row.extend(particle.params.iter().map(|v| v.to_string()));
            row.resize(header.len(), String::new());
            wtr.write_record(&row)?;
        }
    }

    wtr.flush()?;
    Ok(())
}

/// Saves the model posterior of every population, one row per population and one column per
/// model, preceded by `"population"`, `"threshold"` and `"attempts"`.
pub fn save_posterior_csv(result: &AbcSmcResult, filename: &str) -> AbcResult<()> {
    let mut wtr = Writer::from_writer(File::create(filename)?);

    let mut header = vec![
        "population".to_string(),
        "threshold".to_string(),
        "attempts".to_string(),
    ];
    header.extend(result.model_names.iter().cloned());
    wtr.write_record(&header)?;

    for record in &result.records {
        let mut row = vec![
            record.population.index.to_string(),
            record.threshold().to_string(),
            record.attempts.to_string(),
        ];
        row.extend(record.model_posterior.iter().map(|p| p.to_string()));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}
