//! Error taxonomy for ABC-SMC runs.
//!
//! Only fatal conditions live here. Candidates falling outside the prior support, or
//! candidates whose importance weight has a vanishing denominator, are ordinary
//! rejections and never surface as an [`AbcError`].

use thiserror::Error;

/// Fatal conditions that abort a whole run.
#[derive(Debug, Error)]
pub enum AbcError {
    /// Summarised simulated and observed data disagree in shape.
    #[error("shape mismatch after summarisation: simulated {simulated:?}, observed {observed:?}")]
    ShapeMismatch {
        simulated: Vec<usize>,
        observed: Vec<usize>,
    },

    /// A population could not reach its target acceptance count.
    #[error(
        "population {population} exhausted its budget of {attempts} proposals at threshold {threshold}"
    )]
    ExhaustedBudget {
        population: usize,
        threshold: f64,
        attempts: usize,
    },

    /// The design-of-experiments sample cannot train a surrogate.
    #[error("degenerate training set for model {model} in population {population}: {reason}")]
    DegenerateTrainingSet {
        population: usize,
        model: usize,
        reason: String,
    },

    /// Inputs rejected before any population runs.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A distance metric returned a negative value.
    #[error("distance metric returned negative distance {distance}")]
    NegativeDistance { distance: f64 },

    /// The simulator capability of a model reported a failure.
    #[error("simulator of model {model} failed: {message}")]
    Simulation { model: usize, message: String },

    #[cfg(feature = "csv")]
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "csv")]
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl AbcError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        AbcError::Configuration(msg.into())
    }
}

pub type AbcResult<T> = Result<T, AbcError>;
