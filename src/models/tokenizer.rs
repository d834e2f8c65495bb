//! Speech tokenizer backend: waveform in, semantic tokens out.
//!
//! A strided Conv1d frontend turns the waveform into one latent vector per
//! frame, and each latent is snapped to its nearest codebook entry. The
//! codebook index stream is the semantic prompt stored in profiles.
//!
//! Weight prefix: `speech_tokenizer.*`

use anyhow::Result;
use candle_core::{Device, Module, Tensor, D};
use candle_nn::{conv1d, embedding, Conv1d, Conv1dConfig, Embedding, VarBuilder};

use crate::audio::AudioBuffer;
use crate::models::config::VoiceModelConfig;
use crate::models::SpeechTokenizer;

pub struct SpeechTokenizerModel {
    frontend: Conv1d,
    codebook: Embedding,
    hop: usize,
    device: Device,
}

impl SpeechTokenizerModel {
    /// Create from a VarBuilder already scoped to `speech_tokenizer`.
    ///
    /// Weight keys: `frontend.weight/bias`, `codebook.weight`
    pub fn new(config: &VoiceModelConfig, vb: VarBuilder) -> Result<Self> {
        let conv_config = Conv1dConfig {
            stride: config.hop,
            ..Default::default()
        };
        Ok(Self {
            frontend: conv1d(1, config.dim, config.hop, conv_config, vb.pp("frontend"))?,
            codebook: embedding(config.semantic_vocab, config.dim, vb.pp("codebook"))?,
            hop: config.hop,
            device: vb.device().clone(),
        })
    }

    /// Snap `[frames, dim]` latents to their nearest codebook entries.
    ///
    /// Uses the expansion `||x - c||^2 = ||x||^2 + ||c||^2 - 2 x·c`; the
    /// `||x||^2` term is constant per row and dropped.
    fn nearest_codes(&self, latents: &Tensor) -> Result<Vec<u32>> {
        let weights = self.codebook.embeddings(); // [vocab, dim]
        let c_sq = weights.sqr()?.sum(D::Minus1)?; // [vocab]
        let xc = latents.matmul(&weights.transpose(0, 1)?)?; // [frames, vocab]
        let distances = (xc * -2.0)?.broadcast_add(&c_sq.unsqueeze(0)?)?;
        let indices = distances.argmin(D::Minus1)?;
        Ok(indices.to_vec1()?)
    }
}

impl SpeechTokenizer for SpeechTokenizerModel {
    fn tokenize(&self, audio: &AudioBuffer) -> Result<Vec<u32>> {
        // Pad to a whole number of frames, producing at least one.
        let mut samples = audio.samples.clone();
        let frames = samples.len().div_ceil(self.hop).max(1);
        samples.resize(frames * self.hop, 0.0);

        let wave = Tensor::from_vec(samples, (1, 1, frames * self.hop), &self.device)?;
        let latents = self.frontend.forward(&wave)?; // [1, dim, frames]
        let latents = latents.squeeze(0)?.transpose(0, 1)?.contiguous()?; // [frames, dim]
        self.nearest_codes(&latents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    fn mock_tokenizer() -> SpeechTokenizerModel {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = VoiceModelConfig {
            dim: 16,
            hop: 40,
            semantic_vocab: 32,
            ..Default::default()
        };
        SpeechTokenizerModel::new(&config, vb).unwrap()
    }

    #[test]
    fn test_tokenize_frame_count() {
        let tokenizer = mock_tokenizer();
        let audio = AudioBuffer {
            samples: vec![0.1; 40 * 5],
            sample_rate: 24000,
        };
        let tokens = tokenizer.tokenize(&audio).unwrap();
        assert_eq!(tokens.len(), 5);
    }

    #[test]
    fn test_tokenize_pads_partial_frame() {
        let tokenizer = mock_tokenizer();
        let audio = AudioBuffer {
            samples: vec![0.1; 40 * 2 + 7],
            sample_rate: 24000,
        };
        let tokens = tokenizer.tokenize(&audio).unwrap();
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn test_short_audio_yields_one_token() {
        let tokenizer = mock_tokenizer();
        let audio = AudioBuffer {
            samples: vec![0.5; 3],
            sample_rate: 24000,
        };
        let tokens = tokenizer.tokenize(&audio).unwrap();
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn test_tokens_within_vocab() {
        let tokenizer = mock_tokenizer();
        let samples: Vec<f32> = (0..400).map(|i| (i as f32 * 0.05).sin()).collect();
        let audio = AudioBuffer {
            samples,
            sample_rate: 24000,
        };
        for token in tokenizer.tokenize(&audio).unwrap() {
            assert!(token < 32);
        }
    }

    #[test]
    fn test_tokenize_is_deterministic() {
        let tokenizer = mock_tokenizer();
        let samples: Vec<f32> = (0..200).map(|i| (i as f32 * 0.1).cos()).collect();
        let audio = AudioBuffer {
            samples,
            sample_rate: 24000,
        };
        assert_eq!(
            tokenizer.tokenize(&audio).unwrap(),
            tokenizer.tokenize(&audio).unwrap()
        );
    }
}
