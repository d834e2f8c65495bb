//! Voice cloning and text-to-speech service library.
//!
//! The pipeline enrolls a speaker from a short audio sample into a
//! [`SpeakerProfile`] (semantic, coarse, and fine token prompts) and then
//! synthesizes arbitrary text in that voice, one sentence at a time, chaining
//! sentences through a transaction-scoped continuation profile.
//!
//! The model stack is consumed through four narrow traits held by a
//! [`ModelRegistry`]; small candle reference backends ship in
//! [`models`], and anything else can be wired in with
//! [`ModelRegistry::from_parts`]. The HTTP surface lives in [`http`] and the
//! `serve` binary.
//!
//! ```rust,ignore
//! let registry = ModelRegistry::acquire(&registry_config)?;
//! let service = VoiceService::new(registry, dirs);
//! let profile = service.clone_voice("alice", &wav_bytes)?;
//! let wav = service.tts("alice", "1712345", "Hello there. How are you?", &params)?;
//! ```

pub mod audio;
pub mod builder;
pub mod error;
pub mod generation;
pub mod http;
pub mod hub;
pub mod models;
pub mod profile;
pub mod sentence;
pub mod synthesis;

pub use builder::VoiceProfileBuilder;
pub use error::{Result, VoiceError};
pub use generation::GenerationParams;
pub use models::registry::{auto_device, parse_device};
pub use models::{ModelRegistry, RegistryConfig};
pub use profile::SpeakerProfile;
pub use synthesis::SentenceSynthesizer;

use std::path::PathBuf;
use std::time::Duration;

/// The four working directories of the service.
#[derive(Debug, Clone)]
pub struct ServiceDirs {
    /// Enrollment samples, `{speaker_id}.wav`.
    pub sample_dir: PathBuf,
    /// Persisted profiles, `{speaker_id}.safetensors`.
    pub model_dir: PathBuf,
    /// Transaction-scoped continuation profiles.
    pub temp_model_dir: PathBuf,
    /// Finished synthesis outputs, `{speaker_id}-{transaction_id}.wav`.
    pub output_dir: PathBuf,
}

impl ServiceDirs {
    /// Root all four directories under one base path.
    pub fn under(base: &std::path::Path) -> Self {
        Self {
            sample_dir: base.join("voice_sample"),
            model_dir: base.join("voice_model"),
            temp_model_dir: base.join("voice_temp_model"),
            output_dir: base.join("voice_output"),
        }
    }

    fn ensure(&self) -> Result<()> {
        for dir in [
            &self.sample_dir,
            &self.model_dir,
            &self.temp_model_dir,
            &self.output_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|e| VoiceError::storage(dir, e))?;
        }
        Ok(())
    }
}

/// Facade over the enrollment and synthesis pipelines.
///
/// Owns the registry and directories; directories are created on first use.
/// Methods take `&self` and are safe to call from multiple threads, though
/// callers normally serialize model work (the HTTP layer holds a semaphore).
pub struct VoiceService {
    builder: VoiceProfileBuilder,
    synthesizer: SentenceSynthesizer,
    dirs: ServiceDirs,
}

impl VoiceService {
    pub fn new(registry: ModelRegistry, dirs: ServiceDirs) -> Self {
        let builder = VoiceProfileBuilder::new(
            registry.clone(),
            dirs.sample_dir.clone(),
            dirs.model_dir.clone(),
        );
        let synthesizer = SentenceSynthesizer::new(
            registry,
            dirs.model_dir.clone(),
            dirs.temp_model_dir.clone(),
            dirs.output_dir.clone(),
        );
        Self {
            builder,
            synthesizer,
            dirs,
        }
    }

    /// Enroll (or re-enroll) a speaker from raw WAV bytes; returns the
    /// profile path.
    pub fn clone_voice(&self, speaker_id: &str, raw_audio: &[u8]) -> Result<PathBuf> {
        self.dirs.ensure()?;
        self.builder.build_profile(speaker_id, raw_audio)
    }

    /// Synthesize text in an enrolled speaker's voice; returns the output
    /// WAV path.
    pub fn tts(
        &self,
        speaker_id: &str,
        transaction_id: &str,
        text: &str,
        params: &GenerationParams,
    ) -> Result<PathBuf> {
        self.dirs.ensure()?;
        self.synthesizer
            .synthesize(speaker_id, transaction_id, text, params)
    }

    /// Remove continuation profiles older than `max_age`, returning how many
    /// were deleted.
    ///
    /// Continuations are deleted at the end of their transaction; this sweep
    /// only catches files orphaned by a crash mid-transaction. The serve
    /// binary runs it periodically, never in the request path.
    pub fn sweep_stale_continuations(&self, max_age: Duration) -> Result<usize> {
        let dir = &self.dirs.temp_model_dir;
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            // Nothing has been synthesized yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(VoiceError::storage(dir, e)),
        };

        let now = std::time::SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age >= max_age);
            if !stale {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "removed stale continuation");
                    removed += 1;
                }
                Err(e) => {
                    // A concurrent transaction may have just cleaned it up
                    tracing::debug!(path = %path.display(), error = %e, "sweep skipped file");
                }
            }
        }
        Ok(removed)
    }

    pub fn dirs(&self) -> &ServiceDirs {
        &self.dirs
    }
}
