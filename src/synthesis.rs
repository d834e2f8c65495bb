//! Sentence synthesis sequencer.
//!
//! Long text is synthesized one sentence at a time so the generators only
//! ever see short inputs. The first sentence is primed by the speaker's
//! enrollment profile and its full generation state is persisted as a
//! continuation profile; every later sentence in the transaction is primed by
//! that continuation, which keeps one voice across the whole utterance. The
//! continuation file is deleted when the transaction ends, success or not.

use std::path::PathBuf;

use crate::audio::{concat, save_wav, AudioBuffer};
use crate::error::{Result, VoiceError};
use crate::generation::GenerationParams;
use crate::models::ModelRegistry;
use crate::profile::SpeakerProfile;
use crate::sentence;

pub struct SentenceSynthesizer {
    registry: ModelRegistry,
    model_dir: PathBuf,
    temp_model_dir: PathBuf,
    output_dir: PathBuf,
}

impl SentenceSynthesizer {
    pub fn new(
        registry: ModelRegistry,
        model_dir: PathBuf,
        temp_model_dir: PathBuf,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            model_dir,
            temp_model_dir,
            output_dir,
        }
    }

    /// Synthesize `text` in `speaker_id`'s voice and return the path of the
    /// finished WAV.
    ///
    /// The transaction id comes from the caller; continuation and output
    /// files are keyed by `(speaker_id, transaction_id)` so concurrent
    /// transactions for one speaker never collide. The generation knobs pass
    /// through to the models unvalidated.
    pub fn synthesize(
        &self,
        speaker_id: &str,
        transaction_id: &str,
        text: &str,
        params: &GenerationParams,
    ) -> Result<PathBuf> {
        let profile_path = self.model_dir.join(format!("{speaker_id}.safetensors"));
        if !profile_path.is_file() {
            return Err(VoiceError::ProfileNotFound {
                speaker_id: speaker_id.to_string(),
                path: profile_path,
            });
        }

        let sentences = sentence::split(text);
        if sentences.is_empty() {
            return Err(VoiceError::EmptyText);
        }

        let enrollment = SpeakerProfile::load(&profile_path)
            .map_err(|e| VoiceError::storage(&profile_path, e))?;

        tracing::info!(
            speaker = speaker_id,
            transaction = transaction_id,
            sentences = sentences.len(),
            "starting synthesis transaction"
        );

        let continuation_path = self
            .temp_model_dir
            .join(format!("{speaker_id}-{transaction_id}.safetensors"));

        let result = self.run_sentences(&sentences, &enrollment, &continuation_path, params);

        // The continuation is transaction-scoped scratch state; drop it no
        // matter how the loop ended. It may legitimately not exist yet.
        if let Err(e) = std::fs::remove_file(&continuation_path) {
            tracing::debug!(
                path = %continuation_path.display(),
                error = %e,
                "continuation profile not removed"
            );
        }

        let segments = result?;
        let sample_rate = self.registry.codec.sample_rate();
        let output = concat(&segments, sample_rate);

        let output_path = self
            .output_dir
            .join(format!("{speaker_id}-{transaction_id}.wav"));
        save_wav(&output_path, &output.samples, sample_rate)
            .map_err(|e| VoiceError::storage(&output_path, e))?;

        tracing::info!(
            speaker = speaker_id,
            transaction = transaction_id,
            duration_s = output.duration(),
            path = %output_path.display(),
            "synthesis transaction complete"
        );
        Ok(output_path)
    }

    /// The sentence loop. Returns one audio segment per sentence, in order.
    fn run_sentences(
        &self,
        sentences: &[String],
        enrollment: &SpeakerProfile,
        continuation_path: &std::path::Path,
        params: &GenerationParams,
    ) -> Result<Vec<AudioBuffer>> {
        let mut segments = Vec::with_capacity(sentences.len());
        let mut continuation: Option<SpeakerProfile> = None;

        for (index, sentence) in sentences.iter().enumerate() {
            let context = continuation.as_ref().unwrap_or(enrollment);

            let semantic = self
                .registry
                .semantic
                .generate(sentence, Some(context), params)
                .map_err(VoiceError::ModelInference)?;
            let (audio, state) = self
                .registry
                .waveform
                .generate(&semantic, Some(context), params)
                .map_err(VoiceError::ModelInference)?;

            tracing::debug!(
                sentence = index,
                semantic_tokens = semantic.len(),
                samples = audio.len(),
                "sentence synthesized"
            );

            // The first sentence's full state primes the rest of the
            // transaction; later sentences all use this same continuation.
            if index == 0 {
                state
                    .save(continuation_path)
                    .map_err(|e| VoiceError::storage(continuation_path, e))?;
                continuation = Some(state);
            }
            segments.push(audio);
        }

        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SAMPLE_RATE;
    use crate::models::{AcousticCodec, SemanticGenerator, SpeechTokenizer, WaveformGenerator};
    use candle_core::Device;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    struct FakeTokenizer;
    impl SpeechTokenizer for FakeTokenizer {
        fn tokenize(&self, _audio: &AudioBuffer) -> anyhow::Result<Vec<u32>> {
            Ok(vec![1, 2, 3])
        }
    }

    struct FakeCodec;
    impl AcousticCodec for FakeCodec {
        fn encode(&self, _audio: &AudioBuffer) -> anyhow::Result<Vec<Vec<u32>>> {
            Ok(vec![vec![0; 4]; 8])
        }
        fn decode(&self, codes: &[Vec<u32>]) -> anyhow::Result<AudioBuffer> {
            Ok(AudioBuffer::new(vec![0.0; codes[0].len()], SAMPLE_RATE))
        }
        fn sample_rate(&self) -> u32 {
            SAMPLE_RATE
        }
    }

    struct FakeSemantic {
        fail_after: Option<usize>,
        calls: AtomicUsize,
    }
    impl SemanticGenerator for FakeSemantic {
        fn generate(
            &self,
            text: &str,
            _context: Option<&SpeakerProfile>,
            _params: &GenerationParams,
        ) -> anyhow::Result<Vec<u32>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|n| call >= n) {
                anyhow::bail!("synthetic failure");
            }
            Ok((0..text.len().max(1) as u32).collect())
        }
    }

    struct FakeWaveform;
    impl WaveformGenerator for FakeWaveform {
        fn generate(
            &self,
            semantic: &[u32],
            context: Option<&SpeakerProfile>,
            _params: &GenerationParams,
        ) -> anyhow::Result<(AudioBuffer, SpeakerProfile)> {
            let frames = semantic.len().max(1);
            // First value marks the priming generation for assertions.
            let marker = context.map(|p| p.semantic_prompt[0] + 100).unwrap_or(0);
            let profile = SpeakerProfile {
                semantic_prompt: vec![marker; frames],
                coarse_prompt: vec![vec![marker; frames]; 2],
                fine_prompt: vec![vec![marker; frames]; 8],
            };
            Ok((AudioBuffer::new(vec![0.25; frames * 10], SAMPLE_RATE), profile))
        }
    }

    /// Like [`FakeWaveform`], but records the priming marker of every call.
    struct RecordingWaveform {
        primed: Mutex<Vec<u32>>,
    }
    impl WaveformGenerator for RecordingWaveform {
        fn generate(
            &self,
            semantic: &[u32],
            context: Option<&SpeakerProfile>,
            _params: &GenerationParams,
        ) -> anyhow::Result<(AudioBuffer, SpeakerProfile)> {
            let frames = semantic.len().max(1);
            let primed_with = context.map(|p| p.semantic_prompt[0]).unwrap_or(0);
            self.primed.lock().unwrap().push(primed_with);
            // Each generation's state is distinguishable from its context.
            let marker = primed_with + 100;
            let profile = SpeakerProfile {
                semantic_prompt: vec![marker; frames],
                coarse_prompt: vec![vec![marker; frames]; 2],
                fine_prompt: vec![vec![marker; frames]; 8],
            };
            Ok((AudioBuffer::new(vec![0.25; frames * 10], SAMPLE_RATE), profile))
        }
    }

    fn registry(fail_after: Option<usize>) -> ModelRegistry {
        ModelRegistry::from_parts(
            Arc::new(FakeTokenizer),
            Arc::new(FakeCodec),
            Arc::new(FakeSemantic {
                fail_after,
                calls: AtomicUsize::new(0),
            }),
            Arc::new(FakeWaveform),
            Device::Cpu,
        )
    }

    fn enrolled_dirs() -> (tempfile::TempDir, PathBuf, PathBuf, PathBuf) {
        let dir = tempdir().unwrap();
        let model_dir = dir.path().join("models");
        let temp_dir = dir.path().join("temp");
        let output_dir = dir.path().join("out");
        for d in [&model_dir, &temp_dir, &output_dir] {
            std::fs::create_dir_all(d).unwrap();
        }
        let profile = SpeakerProfile {
            semantic_prompt: vec![7; 3],
            coarse_prompt: vec![vec![7; 3]; 2],
            fine_prompt: vec![vec![7; 3]; 8],
        };
        profile.save(&model_dir.join("alice.safetensors")).unwrap();
        (dir, model_dir, temp_dir, output_dir)
    }

    #[test]
    fn test_tts_before_clone_fails_without_output() {
        let (_guard, model_dir, temp_dir, output_dir) = enrolled_dirs();
        let synth = SentenceSynthesizer::new(registry(None), model_dir, temp_dir, output_dir.clone());

        let err = synth
            .synthesize("nobody", "tx1", "Hello there.", &GenerationParams::default())
            .unwrap_err();
        assert!(matches!(err, VoiceError::ProfileNotFound { .. }));
        assert_eq!(std::fs::read_dir(&output_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_text_rejected() {
        let (_guard, model_dir, temp_dir, output_dir) = enrolled_dirs();
        let synth = SentenceSynthesizer::new(registry(None), model_dir, temp_dir, output_dir);

        let err = synth
            .synthesize("alice", "tx1", "   \n ", &GenerationParams::default())
            .unwrap_err();
        assert!(matches!(err, VoiceError::EmptyText));
    }

    #[test]
    fn test_two_sentence_transaction() {
        let (_guard, model_dir, temp_dir, output_dir) = enrolled_dirs();
        let synth = SentenceSynthesizer::new(
            registry(None),
            model_dir,
            temp_dir.clone(),
            output_dir,
        );

        let path = synth
            .synthesize(
                "alice",
                "tx42",
                "Hello world. How are you?",
                &GenerationParams::default(),
            )
            .unwrap();

        assert!(path.ends_with("alice-tx42.wav"));
        let audio = AudioBuffer::load(&path).unwrap();
        // Two segments of 10 samples per frame, frames = sentence length
        assert!(!audio.is_empty());
        // Continuation removed at the end of the transaction
        assert_eq!(std::fs::read_dir(&temp_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_cleanup_after_mid_transaction_failure() {
        let (_guard, model_dir, temp_dir, output_dir) = enrolled_dirs();
        // First sentence succeeds, second fails
        let synth = SentenceSynthesizer::new(
            registry(Some(1)),
            model_dir,
            temp_dir.clone(),
            output_dir.clone(),
        );

        let err = synth
            .synthesize(
                "alice",
                "tx9",
                "First one. Second one.",
                &GenerationParams::default(),
            )
            .unwrap_err();
        assert!(matches!(err, VoiceError::ModelInference(_)));
        // Continuation written after sentence 0 must be gone, and no output
        assert_eq!(std::fs::read_dir(&temp_dir).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(&output_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_continuation_primes_every_later_sentence() {
        let (_guard, model_dir, temp_dir, output_dir) = enrolled_dirs();
        let waveform = Arc::new(RecordingWaveform {
            primed: Mutex::new(Vec::new()),
        });
        let registry = ModelRegistry::from_parts(
            Arc::new(FakeTokenizer),
            Arc::new(FakeCodec),
            Arc::new(FakeSemantic {
                fail_after: None,
                calls: AtomicUsize::new(0),
            }),
            waveform.clone(),
            Device::Cpu,
        );
        let synth = SentenceSynthesizer::new(registry, model_dir, temp_dir, output_dir);

        synth
            .synthesize(
                "alice",
                "tx7",
                "One here. Two now. Three done.",
                &GenerationParams::default(),
            )
            .unwrap();

        // The enrollment profile (marker 7) primes sentence 0 only; its
        // generation state (marker 107) is the continuation, and every later
        // sentence is primed by that same state, never re-derived.
        assert_eq!(*waveform.primed.lock().unwrap(), vec![7, 107, 107]);
    }

    #[test]
    fn test_distinct_transactions_do_not_collide() {
        let (_guard, model_dir, temp_dir, output_dir) = enrolled_dirs();
        let synth = SentenceSynthesizer::new(
            registry(None),
            model_dir,
            temp_dir,
            output_dir.clone(),
        );

        let a = synth
            .synthesize("alice", "tx1", "One here.", &GenerationParams::default())
            .unwrap();
        let b = synth
            .synthesize("alice", "tx2", "Another.", &GenerationParams::default())
            .unwrap();
        assert_ne!(a, b);
        assert!(a.exists() && b.exists());
    }
}
