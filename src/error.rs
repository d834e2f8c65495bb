//! Error taxonomy for the voice pipeline.
//!
//! Every core operation reports failures through [`VoiceError`]; nothing is
//! retried or recovered internally. The HTTP layer maps these variants to
//! transport-level status codes (see `http.rs`).

use std::path::PathBuf;

use thiserror::Error;

/// Failure modes of the clone/tts pipeline.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// The enrollment sample could not be decoded as a waveform.
    #[error("invalid audio sample: {0}")]
    InvalidAudio(String),

    /// TTS was requested for a speaker that has never been enrolled.
    #[error("no voice profile for speaker {speaker_id:?} at {path}")]
    ProfileNotFound { speaker_id: String, path: PathBuf },

    /// The synthesis request carried no text.
    #[error("text to synthesize is empty")]
    EmptyText,

    /// A model download or load failed during startup. Fatal to the process.
    #[error("model acquisition failed")]
    ModelAcquisition(#[source] anyhow::Error),

    /// A tokenizer, codec, or generator call failed mid-pipeline.
    #[error("model inference failed")]
    ModelInference(#[source] anyhow::Error),

    /// Reading or writing a sample, profile, or output file failed.
    #[error("storage failure at {path}")]
    Storage {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl VoiceError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: impl Into<anyhow::Error>) -> Self {
        Self::Storage {
            path: path.into(),
            source: source.into(),
        }
    }
}

/// Convenience alias used throughout the pipeline.
pub type Result<T, E = VoiceError> = std::result::Result<T, E>;
