//! Semantic-to-waveform generator backend.
//!
//! Renders a semantic token stream to audio in two stages. The coarse stage
//! walks the semantic stream with a recurrent state and samples the first
//! codebook rows frame by frame; the fine stage fills in the remaining
//! residual rows per frame, each conditioned on the rows below it. The full
//! code grid goes through the acoustic codec for the waveform and doubles as
//! the continuation profile handed back to the sequencer.
//!
//! Weight prefix: `waveform.*`

use std::sync::Arc;

use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{embedding, linear, Embedding, Linear, VarBuilder};

use crate::audio::AudioBuffer;
use crate::generation::{sample, GenerationParams, SamplingConfig, SamplingContext};
use crate::models::config::VoiceModelConfig;
use crate::models::{AcousticCodec, WaveformGenerator};
use crate::profile::{SpeakerProfile, COARSE_ROWS};

/// Longest acoustic prompt suffix used to prime the coarse state, in frames.
const MAX_PROMPT_FRAMES: usize = 128;

pub struct WaveformModel {
    codec: Arc<dyn AcousticCodec>,
    semantic_embed: Embedding,
    code_embed: Embedding,
    cell_input: Linear,
    cell_hidden: Linear,
    coarse_heads: Vec<Linear>,
    fine_heads: Vec<Linear>,
    dim: usize,
    device: Device,
}

impl WaveformModel {
    /// Create from a VarBuilder already scoped to `waveform`.
    ///
    /// Weight keys: `semantic_embed.weight`, `code_embed.weight`,
    /// `cell_input.weight/bias`, `cell_hidden.weight/bias`,
    /// `coarse_heads.{i}.weight/bias`, `fine_heads.{i}.weight/bias`
    pub fn new(
        config: &VoiceModelConfig,
        codec: Arc<dyn AcousticCodec>,
        vb: VarBuilder,
    ) -> Result<Self> {
        if config.codebooks <= COARSE_ROWS {
            return Err(anyhow!(
                "codec must have more than {COARSE_ROWS} codebooks, got {}",
                config.codebooks
            ));
        }

        let mut coarse_heads = Vec::with_capacity(COARSE_ROWS);
        for i in 0..COARSE_ROWS {
            coarse_heads.push(linear(
                config.dim,
                config.codebook_size,
                vb.pp(format!("coarse_heads.{}", i)),
            )?);
        }
        let mut fine_heads = Vec::with_capacity(config.codebooks - COARSE_ROWS);
        for i in 0..config.codebooks - COARSE_ROWS {
            fine_heads.push(linear(
                config.dim,
                config.codebook_size,
                vb.pp(format!("fine_heads.{}", i)),
            )?);
        }

        Ok(Self {
            codec,
            semantic_embed: embedding(config.semantic_vocab + 1, config.dim, vb.pp("semantic_embed"))?,
            code_embed: embedding(config.codebook_size, config.dim, vb.pp("code_embed"))?,
            cell_input: linear(config.dim, config.dim, vb.pp("cell_input"))?,
            cell_hidden: linear(config.dim, config.dim, vb.pp("cell_hidden"))?,
            coarse_heads,
            fine_heads,
            dim: config.dim,
            device: vb.device().clone(),
        })
    }

    fn step(&self, h: &Tensor, x: &Tensor) -> Result<Tensor> {
        let h = (self.cell_input.forward(x)? + self.cell_hidden.forward(h)?)?;
        Ok(h.tanh()?)
    }

    fn embed_code(&self, token: u32) -> Result<Tensor> {
        let id = Tensor::from_vec(vec![token], 1, &self.device)?;
        Ok(self.code_embed.forward(&id)?)
    }

    /// Prime the coarse state with the tail of the speaker's coarse prompt.
    fn prime(&self, mut h: Tensor, profile: &SpeakerProfile) -> Result<Tensor> {
        let frames = profile.coarse_prompt[0].len();
        let start = frames.saturating_sub(MAX_PROMPT_FRAMES);
        for frame in start..frames {
            let mut x: Option<Tensor> = None;
            for row in &profile.coarse_prompt {
                let emb = self.embed_code(row[frame])?;
                x = Some(match x {
                    Some(acc) => (acc + emb)?,
                    None => emb,
                });
            }
            if let Some(x) = x {
                h = self.step(&h, &x)?;
            }
        }
        Ok(h)
    }

    fn draw(
        &self,
        logits: &Tensor,
        config: &SamplingConfig,
        ctx: &mut SamplingContext,
    ) -> Result<u32> {
        let drawn = sample(logits, config, ctx)?;
        let ids: Vec<u32> = drawn.flatten_all()?.to_vec1()?;
        Ok(ids[0])
    }
}

impl WaveformGenerator for WaveformModel {
    fn generate(
        &self,
        semantic: &[u32],
        context: Option<&SpeakerProfile>,
        params: &GenerationParams,
    ) -> Result<(AudioBuffer, SpeakerProfile)> {
        if semantic.is_empty() {
            return Err(anyhow!("semantic token stream is empty"));
        }

        let coarse_config = params.coarse_sampling();
        let fine_config = params.fine_sampling();
        let mut ctx = SamplingContext::new(None);

        let mut h = Tensor::zeros((1, self.dim), DType::F32, &self.device)?;
        if let Some(profile) = context {
            h = self.prime(h, profile)?;
        }

        // Coarse stage: one frame of COARSE_ROWS tokens per semantic token.
        let frames = semantic.len();
        let mut coarse = vec![Vec::with_capacity(frames); COARSE_ROWS];
        for &token in semantic {
            let id = Tensor::from_vec(vec![token], 1, &self.device)?;
            let x = self.semantic_embed.forward(&id)?;
            h = self.step(&h, &x)?;
            for (row, head) in self.coarse_heads.iter().enumerate() {
                let logits = head.forward(&h)?;
                let code = self.draw(&logits, &coarse_config, &mut ctx)?;
                coarse[row].push(code);
                let fed = self.embed_code(code)?;
                h = self.step(&h, &fed)?;
            }
        }

        // Fine stage: per frame, each residual row conditioned on the rows
        // below it. Frames are independent here.
        let mut fine = coarse.clone();
        for head in &self.fine_heads {
            let mut row = Vec::with_capacity(frames);
            for frame in 0..frames {
                let mut base: Option<Tensor> = None;
                for below in &fine {
                    let emb = self.embed_code(below[frame])?;
                    base = Some(match base {
                        Some(acc) => (acc + emb)?,
                        None => emb,
                    });
                }
                let base = base.ok_or_else(|| anyhow!("fine stage has no rows to condition on"))?;
                let logits = head.forward(&base.tanh()?)?;
                row.push(self.draw(&logits, &fine_config, &mut ctx)?);
            }
            fine.push(row);
        }

        let audio = self.codec.decode(&fine)?;
        let profile = SpeakerProfile {
            semantic_prompt: semantic.to_vec(),
            coarse_prompt: coarse,
            fine_prompt: fine,
        };
        Ok((audio, profile))
    }
}
