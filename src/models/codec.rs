//! Acoustic codec backend: residual vector quantization over conv latents.
//!
//! The encoder maps the waveform to one latent per frame and quantizes it
//! against a stack of residual codebooks: each codebook snaps what the
//! previous ones left unexplained. Decoding sums the codebook embeddings per
//! frame and upsamples back to a waveform with a transposed convolution.
//!
//! Weight prefix: `codec.*`

use anyhow::{anyhow, Result};
use candle_core::{Device, Module, Tensor, D};
use candle_nn::{
    conv1d, conv_transpose1d, embedding, Conv1d, Conv1dConfig, ConvTranspose1d,
    ConvTranspose1dConfig, Embedding, VarBuilder,
};

use crate::audio::{AudioBuffer, SAMPLE_RATE};
use crate::models::config::VoiceModelConfig;
use crate::models::AcousticCodec;

pub struct CodecModel {
    encoder: Conv1d,
    quantizers: Vec<Embedding>,
    decoder: ConvTranspose1d,
    hop: usize,
    device: Device,
}

impl CodecModel {
    /// Create from a VarBuilder already scoped to `codec`.
    ///
    /// Weight keys: `encoder.weight/bias`, `quantizers.{i}.weight`,
    /// `decoder.weight/bias`
    pub fn new(config: &VoiceModelConfig, vb: VarBuilder) -> Result<Self> {
        let conv_config = Conv1dConfig {
            stride: config.hop,
            ..Default::default()
        };
        let deconv_config = ConvTranspose1dConfig {
            stride: config.hop,
            ..Default::default()
        };

        let mut quantizers = Vec::with_capacity(config.codebooks);
        for i in 0..config.codebooks {
            quantizers.push(embedding(
                config.codebook_size,
                config.dim,
                vb.pp(format!("quantizers.{}", i)),
            )?);
        }

        Ok(Self {
            encoder: conv1d(1, config.dim, config.hop, conv_config, vb.pp("encoder"))?,
            quantizers,
            decoder: conv_transpose1d(config.dim, 1, config.hop, deconv_config, vb.pp("decoder"))?,
            hop: config.hop,
            device: vb.device().clone(),
        })
    }

    /// Nearest entry of `codebook` for each row of `[frames, dim]` latents.
    fn nearest(codebook: &Embedding, latents: &Tensor) -> Result<Tensor> {
        let weights = codebook.embeddings(); // [size, dim]
        let c_sq = weights.sqr()?.sum(D::Minus1)?;
        let xc = latents.matmul(&weights.transpose(0, 1)?)?;
        let distances = (xc * -2.0)?.broadcast_add(&c_sq.unsqueeze(0)?)?;
        Ok(distances.argmin(D::Minus1)?)
    }

    /// Sum the codebook embeddings named by `codes` into `[frames, dim]`.
    fn embed_codes(&self, codes: &[Vec<u32>]) -> Result<Tensor> {
        let frames = codes[0].len();
        let mut summed: Option<Tensor> = None;
        for (row, quantizer) in codes.iter().zip(&self.quantizers) {
            let indices = Tensor::from_vec(row.clone(), frames, &self.device)?;
            let emb = quantizer.forward(&indices)?; // [frames, dim]
            summed = Some(match summed {
                Some(acc) => (acc + emb)?,
                None => emb,
            });
        }
        summed.ok_or_else(|| anyhow!("no codebook rows to decode"))
    }
}

impl AcousticCodec for CodecModel {
    fn encode(&self, audio: &AudioBuffer) -> Result<Vec<Vec<u32>>> {
        let mut samples = audio.samples.clone();
        let frames = samples.len().div_ceil(self.hop).max(1);
        samples.resize(frames * self.hop, 0.0);

        let wave = Tensor::from_vec(samples, (1, 1, frames * self.hop), &self.device)?;
        let latents = self.encoder.forward(&wave)?; // [1, dim, frames]
        let latents = latents.squeeze(0)?.transpose(0, 1)?.contiguous()?; // [frames, dim]

        // Residual quantization: each codebook encodes what the previous
        // ones left unexplained.
        let mut residual = latents;
        let mut rows = Vec::with_capacity(self.quantizers.len());
        for quantizer in &self.quantizers {
            let indices = Self::nearest(quantizer, &residual)?;
            let quantized = quantizer.forward(&indices)?;
            residual = (residual - quantized)?;
            rows.push(indices.to_vec1()?);
        }
        Ok(rows)
    }

    fn decode(&self, codes: &[Vec<u32>]) -> Result<AudioBuffer> {
        if codes.len() != self.quantizers.len() {
            return Err(anyhow!(
                "expected {} codebook rows, got {}",
                self.quantizers.len(),
                codes.len()
            ));
        }
        let frames = codes[0].len();
        if frames == 0 || codes.iter().any(|row| row.len() != frames) {
            return Err(anyhow!("codebook rows must be non-empty and equal length"));
        }

        let summed = self.embed_codes(codes)?; // [frames, dim]
        let latents = summed.transpose(0, 1)?.unsqueeze(0)?.contiguous()?; // [1, dim, frames]
        let wave = self.decoder.forward(&latents)?; // [1, 1, frames * hop]
        let wave = wave.tanh()?; // bound to [-1, 1]
        let samples: Vec<f32> = wave.flatten_all()?.to_vec1()?;

        Ok(AudioBuffer {
            samples,
            sample_rate: self.sample_rate(),
        })
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    fn mock_codec() -> CodecModel {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = VoiceModelConfig {
            dim: 16,
            hop: 40,
            codebooks: 8,
            codebook_size: 32,
            ..Default::default()
        };
        CodecModel::new(&config, vb).unwrap()
    }

    fn tone(len: usize) -> AudioBuffer {
        AudioBuffer {
            samples: (0..len).map(|i| (i as f32 * 0.03).sin() * 0.5).collect(),
            sample_rate: SAMPLE_RATE,
        }
    }

    #[test]
    fn test_encode_shape() {
        let codec = mock_codec();
        let rows = codec.encode(&tone(40 * 6)).unwrap();
        assert_eq!(rows.len(), 8);
        for row in &rows {
            assert_eq!(row.len(), 6);
        }
    }

    #[test]
    fn test_decode_length_matches_frames() {
        let codec = mock_codec();
        let rows = vec![vec![0u32, 1, 2, 3]; 8];
        let audio = codec.decode(&rows).unwrap();
        assert_eq!(audio.samples.len(), 4 * 40);
        assert_eq!(audio.sample_rate, SAMPLE_RATE);
    }

    #[test]
    fn test_decode_output_is_bounded() {
        let codec = mock_codec();
        let rows = vec![vec![5u32; 10]; 8];
        let audio = codec.decode(&rows).unwrap();
        assert!(audio.samples.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_decode_rejects_wrong_row_count() {
        let codec = mock_codec();
        let rows = vec![vec![0u32; 4]; 3];
        assert!(codec.decode(&rows).is_err());
    }

    #[test]
    fn test_decode_rejects_ragged_rows() {
        let codec = mock_codec();
        let mut rows = vec![vec![0u32; 4]; 8];
        rows[5].pop();
        assert!(codec.decode(&rows).is_err());
    }

    #[test]
    fn test_encode_is_deterministic() {
        let codec = mock_codec();
        let audio = tone(40 * 3);
        assert_eq!(codec.encode(&audio).unwrap(), codec.encode(&audio).unwrap());
    }
}
