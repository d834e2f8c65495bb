//! Voice profile builder: enrollment audio in, persisted profile out.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::audio::{resample, AudioBuffer};
use crate::error::{Result, VoiceError};
use crate::models::ModelRegistry;
use crate::profile::{SpeakerProfile, COARSE_ROWS};

/// Builds and persists a [`SpeakerProfile`] from raw enrollment audio.
///
/// One call does the whole enrollment: decode, persist the sample, resample
/// to the codec rate, tokenize, codec-encode, persist the profile. There are
/// no retries; any failure leaves at most already-valid files behind (both
/// writes are atomic full rewrites).
pub struct VoiceProfileBuilder {
    registry: ModelRegistry,
    sample_dir: PathBuf,
    model_dir: PathBuf,
}

impl VoiceProfileBuilder {
    pub fn new(registry: ModelRegistry, sample_dir: PathBuf, model_dir: PathBuf) -> Self {
        Self {
            registry,
            sample_dir,
            model_dir,
        }
    }

    /// Path of a speaker's persisted profile.
    pub fn profile_path(&self, speaker_id: &str) -> PathBuf {
        self.model_dir.join(format!("{speaker_id}.safetensors"))
    }

    /// Enroll a speaker from WAV bytes and return the profile path.
    ///
    /// Re-enrolling an existing speaker replaces the sample and profile
    /// wholesale; concurrent enrollments are last-writer-wins.
    pub fn build_profile(&self, speaker_id: &str, raw_audio: &[u8]) -> Result<PathBuf> {
        let audio = AudioBuffer::from_wav_bytes(raw_audio)
            .map_err(|e| VoiceError::InvalidAudio(format!("{e:#}")))?;
        if audio.is_empty() {
            return Err(VoiceError::InvalidAudio(
                "sample contains no audio frames".into(),
            ));
        }
        tracing::info!(
            speaker = speaker_id,
            duration_s = audio.duration(),
            sample_rate = audio.sample_rate,
            "enrolling speaker"
        );

        // The sample store holds the upload as received; the decoded buffer
        // is only pipeline input.
        let sample_path = self.sample_dir.join(format!("{speaker_id}.wav"));
        atomic_write_sample(&sample_path, raw_audio)?;

        let codec_rate = self.registry.codec.sample_rate();
        let audio = if audio.sample_rate == codec_rate {
            audio
        } else {
            resample(&audio, codec_rate).map_err(|e| VoiceError::InvalidAudio(format!("{e:#}")))?
        };

        let semantic_prompt = self
            .registry
            .tokenizer
            .tokenize(&audio)
            .map_err(VoiceError::ModelInference)?;
        let fine_prompt = self
            .registry
            .codec
            .encode(&audio)
            .map_err(VoiceError::ModelInference)?;
        if fine_prompt.len() < COARSE_ROWS {
            return Err(VoiceError::ModelInference(anyhow::anyhow!(
                "codec produced {} codebook rows, need at least {COARSE_ROWS}",
                fine_prompt.len()
            )));
        }

        // The coarse prompt is the first codebook rows of the same encoding
        // pass, so all three arrays stay frame-aligned.
        let profile = SpeakerProfile {
            semantic_prompt,
            coarse_prompt: fine_prompt[..COARSE_ROWS].to_vec(),
            fine_prompt,
        };

        let profile_path = self.profile_path(speaker_id);
        profile
            .save(&profile_path)
            .map_err(|e| VoiceError::storage(&profile_path, e))?;

        tracing::info!(speaker = speaker_id, path = %profile_path.display(), "profile saved");
        Ok(profile_path)
    }
}

/// Write the uploaded bytes unmodified through a temp file and rename, so a
/// concurrent re-enrollment never leaves a torn sample.
fn atomic_write_sample(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .suffix(".wav")
        .tempfile_in(dir)
        .map_err(|e| VoiceError::storage(path, e))?;
    tmp.write_all(bytes)
        .map_err(|e| VoiceError::storage(path, e))?;
    tmp.persist(path).map_err(|e| VoiceError::storage(path, e))?;
    Ok(())
}
