//! Model services behind the voice pipeline.
//!
//! The pipeline talks to four capabilities through trait objects, all held by
//! a [`ModelRegistry`]: speech tokenization, acoustic coding, text-to-semantic
//! generation, and semantic-to-waveform generation. The built-in candle
//! backends in the submodules implement them; tests substitute fakes via
//! [`ModelRegistry::from_parts`].

pub mod codec;
pub mod config;
pub mod registry;
pub mod semantic;
pub mod tokenizer;
pub mod waveform;

pub use codec::CodecModel;
pub use config::VoiceModelConfig;
pub use registry::{ModelRegistry, RegistryConfig};
pub use semantic::SemanticModel;
pub use tokenizer::SpeechTokenizerModel;
pub use waveform::WaveformModel;

use anyhow::Result;

use crate::audio::AudioBuffer;
use crate::generation::GenerationParams;
use crate::profile::SpeakerProfile;

/// Maps a waveform to a stream of semantic tokens describing speech content.
pub trait SpeechTokenizer: Send + Sync {
    /// Tokenize audio at the codec sample rate. Non-empty audio yields a
    /// non-empty token stream.
    fn tokenize(&self, audio: &AudioBuffer) -> Result<Vec<u32>>;
}

/// Discretizes audio into codebook rows and reconstructs audio from them.
pub trait AcousticCodec: Send + Sync {
    /// Encode audio into `[codebooks][frames]` token rows.
    fn encode(&self, audio: &AudioBuffer) -> Result<Vec<Vec<u32>>>;

    /// Reconstruct a waveform from `[codebooks][frames]` token rows.
    fn decode(&self, codes: &[Vec<u32>]) -> Result<AudioBuffer>;

    /// Sample rate the codec operates at (input and output).
    fn sample_rate(&self) -> u32;
}

/// Generates semantic tokens for a text, optionally primed by a speaker's
/// semantic prompt.
pub trait SemanticGenerator: Send + Sync {
    fn generate(
        &self,
        text: &str,
        context: Option<&SpeakerProfile>,
        params: &GenerationParams,
    ) -> Result<Vec<u32>>;
}

/// Renders semantic tokens to audio, optionally primed by a speaker's
/// acoustic prompts.
///
/// Alongside the waveform, returns the token state of the generation itself
/// as a profile. The sequencer persists it between sentences so each sentence
/// continues the previous one's voice.
pub trait WaveformGenerator: Send + Sync {
    fn generate(
        &self,
        semantic: &[u32],
        context: Option<&SpeakerProfile>,
        params: &GenerationParams,
    ) -> Result<(AudioBuffer, SpeakerProfile)>;
}
