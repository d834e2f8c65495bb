//! WAV I/O and the in-memory waveform type.

use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use candle_core::Tensor;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

/// Mono waveform held as 32-bit floats in `[-1.0, 1.0]`.
///
/// Enrollment samples are decoded into this type, and every synthesis stage
/// (codec encode, waveform generation, segment concatenation) operates on it.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Mono samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode a WAV byte buffer, averaging multi-channel input down to mono.
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self> {
        let reader = WavReader::new(Cursor::new(bytes)).context("failed to parse WAV header")?;
        decode_reader(reader)
    }

    /// Create from a candle tensor of shape `[samples]` or `[1, samples]`.
    pub fn from_tensor(tensor: Tensor, sample_rate: u32) -> Result<Self> {
        let tensor = tensor.flatten_all()?;
        let samples: Vec<f32> = tensor.to_vec1()?;
        Ok(Self::new(samples, sample_rate))
    }

    /// Convert to a candle tensor of shape `[samples]`.
    pub fn to_tensor(&self, device: &candle_core::Device) -> Result<Tensor> {
        Ok(Tensor::new(self.samples.as_slice(), device)?)
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Save as 16-bit PCM WAV.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_wav(path, &self.samples, self.sample_rate)
    }

    /// Load from a WAV file, averaging multi-channel input down to mono.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_wav(path)
    }
}

/// Concatenate segments in order into a single buffer.
///
/// Returns an empty buffer at `sample_rate` when `segments` is empty.
pub fn concat(segments: &[AudioBuffer], sample_rate: u32) -> AudioBuffer {
    let total: usize = segments.iter().map(|s| s.len()).sum();
    let mut samples = Vec::with_capacity(total);
    for segment in segments {
        samples.extend_from_slice(&segment.samples);
    }
    AudioBuffer::new(samples, sample_rate)
}

fn decode_reader<R: std::io::Read>(reader: WavReader<R>) -> Result<AudioBuffer> {
    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read float samples")?,
        SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            let max_val = (1i64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
                .context("failed to read integer samples")?
        }
    };

    let mono = if channels > 1 {
        samples
            .chunks(channels)
            .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        samples
    };

    Ok(AudioBuffer::new(mono, sample_rate))
}

/// Load a WAV file into an [`AudioBuffer`].
pub fn load_wav<P: AsRef<Path>>(path: P) -> Result<AudioBuffer> {
    let path = path.as_ref();
    let reader = WavReader::open(path)
        .with_context(|| format!("failed to open WAV file: {}", path.display()))?;
    decode_reader(reader)
}

/// Save samples as a 16-bit PCM mono WAV file.
pub fn save_wav<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("failed to create WAV file: {}", path.display()))?;

    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clamped * 32767.0) as i16)?;
    }

    writer.finalize()?;
    Ok(())
}
