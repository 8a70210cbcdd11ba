//! Particle and population bookkeeping.
//!
//! A [`Population`] holds the accepted particles of one threshold, split per model. Per-model
//! proposal and acceptance tallies live in [`ModelCounts`].

use ndarray::Array2;

use crate::stats::{effective_sample_size, normalize_weights};

/// An accepted parameter vector of one model.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    /// Index of the model the parameters belong to.
    pub model: usize,
    pub params: Vec<f64>,
    /// Distance to the observed data.
    pub distance: f64,
    /// Unnormalised importance weight. Exactly 1.0 in the first population.
    pub weight: f64,
}

/// The accepted particles of one model within one population.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelParticles {
    particles: Vec<Particle>,
}

impl ModelParticles {
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn params(&self) -> Vec<Vec<f64>> {
        self.particles.iter().map(|p| p.params.clone()).collect()
    }

    /// Importance weights rescaled to sum to one; empty if the model has no particles.
    pub fn normalized_weights(&self) -> Vec<f64> {
        let raw: Vec<f64> = self.particles.iter().map(|p| p.weight).collect();
        normalize_weights(&raw).unwrap_or_default()
    }

    pub fn effective_sample_size(&self) -> f64 {
        effective_sample_size(&self.normalized_weights())
    }

    /// Parameters as a `[n_particles, n_params]` matrix.
    pub fn to_matrix(&self) -> Array2<f64> {
        let n_params = self.particles.first().map_or(0, |p| p.params.len());
        Array2::from_shape_fn((self.particles.len(), n_params), |(i, j)| {
            self.particles[i].params[j]
        })
    }

    fn push(&mut self, particle: Particle) {
        self.particles.push(particle);
    }
}

/// All accepted particles for one threshold of the schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    pub index: usize,
    pub threshold: f64,
    models: Vec<ModelParticles>,
}

impl Population {
    pub fn new(index: usize, threshold: f64, n_models: usize) -> Self {
        Self {
            index,
            threshold,
            models: vec![ModelParticles::default(); n_models],
        }
    }

    pub(crate) fn push(&mut self, particle: Particle) {
        let model = particle.model;
        self.models[model].push(particle);
    }

    pub fn model(&self, m: usize) -> &ModelParticles {
        &self.models[m]
    }

    pub fn n_models(&self) -> usize {
        self.models.len()
    }

    /// Total number of accepted particles across models.
    pub fn len(&self) -> usize {
        self.models.iter().map(ModelParticles::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn accepted_counts(&self) -> Vec<usize> {
        self.models.iter().map(ModelParticles::len).collect()
    }

    /// Accepted counts divided by the population size.
    pub fn model_posterior(&self) -> Vec<f64> {
        let total = self.len();
        self.models
            .iter()
            .map(|m| {
                if total == 0 {
                    0.0
                } else {
                    m.len() as f64 / total as f64
                }
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.models.iter().flat_map(|m| m.particles.iter())
    }
}

/// Per-model tallies of one population's sampling phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelCounts {
    /// Candidates drawn for this model, including those outside the prior support.
    pub proposed: usize,
    pub accepted: usize,
    /// Proposed candidates rejected for zero prior density.
    pub outside_support: usize,
}

impl ModelCounts {
    pub fn acceptance_rate(&self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposed as f64
        }
    }
}
