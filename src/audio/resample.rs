//! Sample-rate conversion on top of rubato.
//!
//! The profile builder remixes enrollment audio to the codec's expected rate
//! before tokenization; quality presets trade accuracy for speed.

use anyhow::{Context, Result};
use rubato::{
    FastFixedIn, PolynomialDegree, Resampler as RubatoResampler, SincFixedIn,
    SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::AudioBuffer;

const CHUNK_SIZE: usize = 1024;

/// Resampling quality preset.
#[derive(Debug, Clone, Copy, Default)]
pub enum ResampleQuality {
    /// Cubic polynomial interpolation, fastest.
    Fast,
    /// Sinc interpolation with a moderate filter length.
    #[default]
    Normal,
    /// Sinc interpolation with a long filter, slowest.
    High,
}

/// Mono audio resampler.
pub struct Resampler {
    quality: ResampleQuality,
}

impl Resampler {
    pub fn new(quality: ResampleQuality) -> Self {
        Self { quality }
    }

    /// Resample to `target_rate`. Returns a clone when no conversion is needed.
    pub fn resample(&self, audio: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
        if audio.sample_rate == target_rate {
            return Ok(audio.clone());
        }

        let ratio = target_rate as f64 / audio.sample_rate as f64;
        let output = match self.quality {
            ResampleQuality::Fast => {
                let mut resampler =
                    FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, CHUNK_SIZE, 1)
                        .context("failed to create polynomial resampler")?;
                process_chunks(&mut resampler, &audio.samples)?
            }
            quality => {
                let sinc_len = if matches!(quality, ResampleQuality::High) {
                    256
                } else {
                    128
                };
                let params = SincInterpolationParameters {
                    sinc_len,
                    f_cutoff: 0.95,
                    interpolation: SincInterpolationType::Linear,
                    oversampling_factor: sinc_len,
                    window: WindowFunction::BlackmanHarris2,
                };
                let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, 1)
                    .context("failed to create sinc resampler")?;
                process_chunks(&mut resampler, &audio.samples)?
            }
        };

        Ok(AudioBuffer::new(output, target_rate))
    }
}

impl Default for Resampler {
    fn default() -> Self {
        Self::new(ResampleQuality::Normal)
    }
}

/// Push fixed-size chunks through the resampler, zero-padding the tail.
fn process_chunks<R: RubatoResampler<f32>>(resampler: &mut R, samples: &[f32]) -> Result<Vec<f32>> {
    let mut output = Vec::new();
    let mut pos = 0;

    while pos < samples.len() {
        let end = (pos + CHUNK_SIZE).min(samples.len());
        let mut chunk = samples[pos..end].to_vec();
        chunk.resize(CHUNK_SIZE, 0.0);

        let waves = vec![chunk];
        let mut result = resampler
            .process(&waves, None)
            .context("resampling failed")?;
        output.append(&mut result[0]);

        pos += CHUNK_SIZE;
    }

    Ok(output)
}

/// Resample with the default (sinc) quality preset.
pub fn resample(audio: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
    Resampler::default().resample(audio, target_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_no_resample_needed() {
        let audio = AudioBuffer::new(vec![0.0; 1000], 24000);
        let result = resample(&audio, 24000).unwrap();
        assert_eq!(result.sample_rate, 24000);
        assert_eq!(result.len(), audio.len());
    }

    #[test]
    fn test_downsample_halves_length() {
        let audio = AudioBuffer::new(vec![0.0; 4800], 48000);
        let result = resample(&audio, 24000).unwrap();
        assert_eq!(result.sample_rate, 24000);
        assert!(result.len() > 2000 && result.len() < 3000);
    }

    #[test]
    fn test_upsample() {
        let audio = AudioBuffer::new(vec![0.0; 1600], 16000);
        let result = resample(&audio, 24000).unwrap();
        assert_eq!(result.sample_rate, 24000);
        assert!(result.len() > 2000 && result.len() < 4000);
    }

    #[test]
    fn test_fast_quality() {
        let resampler = Resampler::new(ResampleQuality::Fast);
        let audio = AudioBuffer::new(vec![0.0; 2048], 48000);
        let result = resampler.resample(&audio, 24000).unwrap();
        assert_eq!(result.sample_rate, 24000);
    }

    #[test]
    fn test_preserves_sine_amplitude() {
        // 100 Hz survives both Nyquist limits
        let audio = AudioBuffer::new(
            (0..4800)
                .map(|i| (2.0 * PI * 100.0 * i as f32 / 48000.0).sin())
                .collect(),
            48000,
        );
        let result = resample(&audio, 24000).unwrap();
        let max_val = result.samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        assert!(max_val > 0.5);
    }

    #[test]
    fn test_empty_audio() {
        let audio = AudioBuffer::new(vec![], 24000);
        let result = resample(&audio, 48000).unwrap();
        assert_eq!(result.sample_rate, 48000);
    }
}
