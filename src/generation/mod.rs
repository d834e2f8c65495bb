//! Generation hyperparameters and token sampling.
//!
//! The six knobs in [`GenerationParams`] are passed through the pipeline
//! unvalidated; out-of-range values are the generators' concern. Sampling
//! state lives in a per-call [`SamplingContext`] so concurrent synthesis
//! requests never share RNG state.

mod sampling;

pub use sampling::{eos_probability, greedy_sample, sample, SamplingContext, SamplingConfig};

/// Hyperparameters forwarded to the semantic and waveform generators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    /// Top-k cutoff for semantic token sampling (0 disables).
    pub top_k: usize,
    /// Nucleus sampling threshold for semantic tokens (1.0 disables).
    pub top_p: f64,
    /// Semantic generation stops once the end-of-sequence probability
    /// reaches this value.
    pub min_eos_p: f64,
    /// Temperature for the text-to-semantic stage.
    pub semantic_temp: f64,
    /// Temperature for the coarse acoustic stage.
    pub waveform_temp: f64,
    /// Temperature for the fine acoustic stage.
    pub fine_temp: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            top_k: 99,
            top_p: 0.8,
            min_eos_p: 0.01,
            semantic_temp: 0.7,
            waveform_temp: 0.6,
            fine_temp: 0.5,
        }
    }
}

impl GenerationParams {
    /// Sampling configuration for the text-to-semantic stage.
    pub fn semantic_sampling(&self) -> SamplingConfig {
        SamplingConfig {
            temperature: self.semantic_temp,
            top_k: self.top_k,
            top_p: self.top_p,
        }
    }

    /// Sampling configuration for the coarse acoustic stage.
    pub fn coarse_sampling(&self) -> SamplingConfig {
        SamplingConfig {
            temperature: self.waveform_temp,
            top_k: self.top_k,
            top_p: self.top_p,
        }
    }

    /// Sampling configuration for the fine acoustic stage.
    pub fn fine_sampling(&self) -> SamplingConfig {
        SamplingConfig {
            temperature: self.fine_temp,
            top_k: 0,
            top_p: 1.0,
        }
    }
}
