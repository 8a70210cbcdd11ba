/*!
Parallel filling of one population.

Candidates are identified by their attempt index. A batch of attempts is evaluated in parallel
with `rayon`, every attempt drawing from its own RNG seeded by [`candidate_rng`], and the
outcomes are then committed strictly in attempt order. Commit stops the moment the target is
reached: later outcomes of the same batch are discarded and do not count as proposed. The result
therefore depends only on the seed, never on thread scheduling.
*/

use indicatif::ProgressBar;
use log::debug;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::error::AbcResult;
use crate::population::{ModelCounts, Particle};

/// Why a proposed candidate was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Zero prior density; no distance was computed.
    OutsideSupport,
    /// Distance above the threshold.
    AboveThreshold,
    /// All ancestor kernel densities vanished, so the importance weight is undefined.
    UnreachableWeight,
}

/// Result of one candidate attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Accepted(Particle),
    Rejected { model: usize, reason: Rejection },
}

impl Outcome {
    pub fn model(&self) -> usize {
        match self {
            Outcome::Accepted(p) => p.model,
            Outcome::Rejected { model, .. } => *model,
        }
    }
}

/// Anything that can draw and judge the candidate with a given attempt index.
pub trait CandidateSampler: Sync {
    fn attempt(&self, attempt: usize) -> AbcResult<Outcome>;
}

/// RNG for one attempt, derived from the run seed and the attempt's coordinates.
pub fn candidate_rng(seed: u64, population: usize, attempt: usize) -> SmallRng {
    // SplitMix64 finaliser over the combined coordinates.
    let mut z = seed
        ^ (population as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (attempt as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9).rotate_left(31);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    SmallRng::seed_from_u64(z)
}

/// Accepted particles and tallies of one population's sampling phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Filled {
    pub accepted: Vec<Particle>,
    pub counts: Vec<ModelCounts>,
    /// Attempts committed, i.e. the sum of proposed counts.
    pub attempts: usize,
    /// Whether `target` particles were accepted within the budget.
    pub complete: bool,
}

/**
Runs attempts `0, 1, 2, ...` in parallel batches until `target` candidates are accepted or
`max_attempts` attempts have been committed.

# Arguments

* `sampler` - Draws and scores the candidate of one attempt.
* `target` - Number of particles to accept.
* `n_models` - Size of the per-model tallies.
* `batch_size` - Attempts evaluated in parallel before each ordered commit.
* `max_attempts` - Proposal budget.
* `pb` - Optional progress bar, advanced to the accepted count after every batch.
*/
pub fn fill_population<S: CandidateSampler>(
    sampler: &S,
    target: usize,
    n_models: usize,
    batch_size: usize,
    max_attempts: usize,
    pb: Option<&ProgressBar>,
) -> AbcResult<Filled> {
    let mut accepted = Vec::with_capacity(target);
    let mut counts = vec![ModelCounts::default(); n_models];
    let mut attempts = 0;

    while accepted.len() < target && attempts < max_attempts {
        let end = (attempts + batch_size.max(1)).min(max_attempts);
        let outcomes = (attempts..end)
            .into_par_iter()
            .map(|i| sampler.attempt(i))
            .collect::<Vec<AbcResult<Outcome>>>();

        let mut committed = 0;
        for outcome in outcomes {
            if accepted.len() == target {
                break;
            }
            // Errors of attempts past the target are dropped with their outcomes.
            let outcome = outcome?;
            committed += 1;
            let tally = &mut counts[outcome.model()];
            tally.proposed += 1;
            match outcome {
                Outcome::Accepted(particle) => {
                    tally.accepted += 1;
                    accepted.push(particle);
                }
                Outcome::Rejected {
                    reason: Rejection::OutsideSupport,
                    ..
                } => tally.outside_support += 1,
                Outcome::Rejected { .. } => {}
            }
        }
        attempts += committed;
        debug!(
            "committed attempts {}..{}: {}/{} accepted",
            attempts - committed,
            attempts,
            accepted.len(),
            target
        );
        if let Some(pb) = pb {
            pb.set_position(accepted.len() as u64);
        }
    }

    Ok(Filled {
        complete: accepted.len() == target,
        accepted,
        counts,
        attempts,
    })
}
