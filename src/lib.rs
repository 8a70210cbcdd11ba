//! Likelihood-free model selection with ABC-SMC.
//!
//! Start with [`abc_smc::AbcSmc`]; the remaining modules hold its building blocks.

pub mod abc_smc;
pub mod core;
pub mod distance;
pub mod distributions;
pub mod emulator;
pub mod error;
pub mod io;
pub mod model;
pub mod population;
pub mod schedule;
pub mod scorer;
pub mod stats;

pub use abc_smc::{AbcSmc, AbcSmcConfig, AbcSmcResult, EmulationConfig, PopulationRecord};
pub use error::{AbcError, AbcResult};
pub use model::Model;
