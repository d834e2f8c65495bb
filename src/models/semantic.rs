//! Text-to-semantic generator backend.
//!
//! Text tokens and the speaker's semantic prompt are fed through a small
//! recurrent conditioning network, then semantic tokens are sampled
//! autoregressively from the hidden state. Generation stops when the
//! end-of-sequence probability crosses the caller's `min_eos_p`, when the
//! end-of-sequence token is drawn, or at the hard length cap.
//!
//! Weight prefix: `semantic.*`

use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{embedding, linear, Embedding, Linear, VarBuilder};
use tokenizers::Tokenizer;

use crate::generation::{eos_probability, sample, GenerationParams, SamplingContext};
use crate::models::config::VoiceModelConfig;
use crate::models::SemanticGenerator;
use crate::profile::SpeakerProfile;

/// Longest prompt suffix used to prime the hidden state.
const MAX_PROMPT_TOKENS: usize = 256;

pub struct SemanticModel {
    text_tokenizer: Tokenizer,
    text_embed: Embedding,
    token_embed: Embedding,
    cell_input: Linear,
    cell_hidden: Linear,
    head: Linear,
    eos_id: u32,
    dim: usize,
    max_tokens: usize,
    device: Device,
}

impl SemanticModel {
    /// Create from a VarBuilder already scoped to `semantic`.
    ///
    /// Weight keys: `text_embed.weight`, `token_embed.weight`,
    /// `cell_input.weight/bias`, `cell_hidden.weight/bias`, `head.weight/bias`
    pub fn new(config: &VoiceModelConfig, text_tokenizer: Tokenizer, vb: VarBuilder) -> Result<Self> {
        let text_vocab = text_tokenizer.get_vocab_size(true).max(1);
        // +1 for the end-of-sequence id
        let token_vocab = config.semantic_vocab + 1;

        Ok(Self {
            text_embed: embedding(text_vocab, config.dim, vb.pp("text_embed"))?,
            token_embed: embedding(token_vocab, config.dim, vb.pp("token_embed"))?,
            cell_input: linear(config.dim, config.dim, vb.pp("cell_input"))?,
            cell_hidden: linear(config.dim, config.dim, vb.pp("cell_hidden"))?,
            head: linear(config.dim, token_vocab, vb.pp("head"))?,
            eos_id: config.semantic_eos(),
            dim: config.dim,
            max_tokens: config.max_semantic_tokens,
            text_tokenizer,
            device: vb.device().clone(),
        })
    }

    /// One recurrent step: `h' = tanh(W_x x + W_h h)`.
    fn step(&self, h: &Tensor, x: &Tensor) -> Result<Tensor> {
        let h = (self.cell_input.forward(x)? + self.cell_hidden.forward(h)?)?;
        Ok(h.tanh()?)
    }

    /// Fold a stream of embedded ids into the hidden state.
    fn absorb(&self, mut h: Tensor, embed: &Embedding, ids: &[u32]) -> Result<Tensor> {
        for &id in ids {
            let x = embed.forward(&Tensor::from_vec(vec![id], 1, &self.device)?)?;
            h = self.step(&h, &x)?;
        }
        Ok(h)
    }
}

impl SemanticGenerator for SemanticModel {
    fn generate(
        &self,
        text: &str,
        context: Option<&SpeakerProfile>,
        params: &GenerationParams,
    ) -> Result<Vec<u32>> {
        let encoding = self
            .text_tokenizer
            .encode(text, false)
            .map_err(|e| anyhow!("text tokenization failed: {e}"))?;
        let text_ids = encoding.get_ids();

        let mut h = Tensor::zeros((1, self.dim), DType::F32, &self.device)?;

        // Prime with the tail of the speaker's semantic prompt, then the text.
        if let Some(profile) = context {
            let prompt = &profile.semantic_prompt;
            let tail = &prompt[prompt.len().saturating_sub(MAX_PROMPT_TOKENS)..];
            h = self.absorb(h, &self.token_embed, tail)?;
        }
        h = self.absorb(h, &self.text_embed, text_ids)?;

        let config = params.semantic_sampling();
        let mut ctx = SamplingContext::new(None);
        let mut tokens = Vec::new();

        while tokens.len() < self.max_tokens {
            let logits = self.head.forward(&h)?; // [1, vocab + 1]

            // The first token is unconditional so every sentence speaks.
            if !tokens.is_empty() {
                let p_eos = eos_probability(&logits, params.semantic_temp, self.eos_id)?;
                if f64::from(p_eos) >= params.min_eos_p {
                    break;
                }
            }

            let drawn = sample(&logits, &config, &mut ctx)?;
            let ids: Vec<u32> = drawn.flatten_all()?.to_vec1()?;
            let token = ids[0];
            if token == self.eos_id && !tokens.is_empty() {
                break;
            }
            let token = token.min(self.eos_id - 1);
            tokens.push(token);

            let x = self
                .token_embed
                .forward(&Tensor::from_vec(vec![token], 1, &self.device)?)?;
            h = self.step(&h, &x)?;
        }

        Ok(tokens)
    }
}
