//! Shared hyperparameters for the built-in model backends.

use serde::Deserialize;

/// Dimensions shared by the tokenizer, codec, and generator backends.
///
/// Loaded from `config.json` next to the weights when present; the defaults
/// describe the reference checkpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceModelConfig {
    /// Semantic token vocabulary (the id `semantic_vocab` itself is reserved
    /// as end-of-sequence).
    pub semantic_vocab: usize,
    /// Entries per acoustic codebook.
    pub codebook_size: usize,
    /// Residual codebooks in the acoustic codec.
    pub codebooks: usize,
    /// Hidden width of every backend.
    pub dim: usize,
    /// Samples per codec frame.
    pub hop: usize,
    /// Hard cap on semantic tokens generated for one sentence.
    pub max_semantic_tokens: usize,
}

impl Default for VoiceModelConfig {
    fn default() -> Self {
        Self {
            semantic_vocab: 1024,
            codebook_size: 1024,
            codebooks: 8,
            dim: 256,
            hop: 320,
            max_semantic_tokens: 768,
        }
    }
}

impl VoiceModelConfig {
    /// End-of-sequence id in the semantic stream.
    pub fn semantic_eos(&self) -> u32 {
        self.semantic_vocab as u32
    }
}
