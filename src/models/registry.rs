//! Model registry: one acquisition at startup, immutable afterwards.
//!
//! [`ModelRegistry::acquire`] resolves weights and the text tokenizer (local
//! directory first, then the Hub), builds the four backends, and pins them on
//! one device. Failure here is fatal to the server. After acquisition the
//! registry is shared read-only across requests.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use tokenizers::Tokenizer;

use crate::error::{Result, VoiceError};
use crate::hub::ModelPaths;
use crate::models::{
    AcousticCodec, CodecModel, SemanticGenerator, SemanticModel, SpeechTokenizer,
    SpeechTokenizerModel, VoiceModelConfig, WaveformGenerator, WaveformModel,
};

/// Where and how to acquire the models.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Compute device, from [`parse_device`].
    pub device: Device,
    /// Directory holding `model.safetensors`, `tokenizer.json`, and
    /// optionally `config.json`.
    pub static_resource_dir: PathBuf,
}

/// The four model services plus the device they live on.
#[derive(Clone)]
pub struct ModelRegistry {
    pub tokenizer: Arc<dyn SpeechTokenizer>,
    pub codec: Arc<dyn AcousticCodec>,
    pub semantic: Arc<dyn SemanticGenerator>,
    pub waveform: Arc<dyn WaveformGenerator>,
    pub device: Device,
}

impl ModelRegistry {
    /// Load every backend from the configured resource directory (or the
    /// Hub). Called once at startup; any failure is a fatal
    /// [`VoiceError::ModelAcquisition`].
    pub fn acquire(config: &RegistryConfig) -> Result<Self> {
        Self::acquire_inner(config).map_err(VoiceError::ModelAcquisition)
    }

    fn acquire_inner(config: &RegistryConfig) -> anyhow::Result<Self> {
        let paths = ModelPaths::resolve(&config.static_resource_dir)?;

        let model_config = match &paths.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            None => VoiceModelConfig::default(),
        };

        let text_tokenizer = Tokenizer::from_file(&paths.tokenizer)
            .map_err(|e| anyhow!("failed to load {}: {e}", paths.tokenizer.display()))?;

        let device = config.device.clone();
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[paths.weights.clone()], DType::F32, &device)
        }
        .with_context(|| format!("failed to map weights at {}", paths.weights.display()))?;

        let tokenizer = Arc::new(SpeechTokenizerModel::new(
            &model_config,
            vb.pp("speech_tokenizer"),
        )?);
        let codec = Arc::new(CodecModel::new(&model_config, vb.pp("codec"))?);
        let semantic = Arc::new(SemanticModel::new(
            &model_config,
            text_tokenizer,
            vb.pp("semantic"),
        )?);
        let waveform = Arc::new(WaveformModel::new(
            &model_config,
            codec.clone(),
            vb.pp("waveform"),
        )?);

        tracing::info!(device = ?device, "model registry ready");
        Ok(Self {
            tokenizer,
            codec,
            semantic,
            waveform,
            device,
        })
    }

    /// Assemble a registry from already-built services. The pipeline tests
    /// drive it with fakes this way.
    pub fn from_parts(
        tokenizer: Arc<dyn SpeechTokenizer>,
        codec: Arc<dyn AcousticCodec>,
        semantic: Arc<dyn SemanticGenerator>,
        waveform: Arc<dyn WaveformGenerator>,
        device: Device,
    ) -> Self {
        Self {
            tokenizer,
            codec,
            semantic,
            waveform,
            device,
        }
    }
}

/// Parse a device string: `auto`, `cpu`, `cuda`, `cuda:N`, or `metal`.
pub fn parse_device(device_str: &str) -> anyhow::Result<Device> {
    match device_str.to_lowercase().as_str() {
        "auto" => Ok(auto_device()),
        "cpu" => Ok(Device::Cpu),
        s if s.starts_with("cuda") => {
            #[cfg(feature = "cuda")]
            {
                let ordinal: usize = match s.strip_prefix("cuda:") {
                    Some(idx) => idx
                        .parse()
                        .map_err(|e| anyhow!("invalid CUDA device index: {e}"))?,
                    None => 0,
                };
                Device::cuda_if_available(ordinal)
                    .map_err(|e| anyhow!("failed to init CUDA device {ordinal}: {e}"))
            }
            #[cfg(not(feature = "cuda"))]
            anyhow::bail!("CUDA support not compiled in. Rebuild with: cargo build --features cuda")
        }
        "metal" => {
            #[cfg(feature = "metal")]
            {
                Device::new_metal(0).map_err(|e| anyhow!("failed to init Metal device: {e}"))
            }
            #[cfg(not(feature = "metal"))]
            anyhow::bail!(
                "Metal support not compiled in. Rebuild with: cargo build --features metal"
            )
        }
        other => Err(anyhow!(
            "unknown device '{other}'. Supported: auto, cpu, cuda, cuda:N, metal"
        )),
    }
}

/// Best available device: cuda, then metal, then cpu.
pub fn auto_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::cuda_if_available(0) {
            if device.is_cuda() {
                tracing::info!("using CUDA device");
                return device;
            }
        }
    }
    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            tracing::info!("using Metal device");
            return device;
        }
    }
    Device::Cpu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_cpu() {
        assert!(matches!(parse_device("cpu").unwrap(), Device::Cpu));
    }

    #[test]
    fn test_parse_device_rejects_unknown() {
        assert!(parse_device("tpu").is_err());
    }

    #[test]
    fn test_auto_device_always_resolves() {
        // Falls back to cpu when no accelerator is compiled in
        let _ = auto_device();
    }

    #[cfg(not(feature = "hub"))]
    #[test]
    fn test_acquire_fails_without_assets() {
        let dir = tempfile::tempdir().unwrap();
        let config = RegistryConfig {
            device: Device::Cpu,
            static_resource_dir: dir.path().to_path_buf(),
        };
        let err = ModelRegistry::acquire(&config).unwrap_err();
        assert!(matches!(err, VoiceError::ModelAcquisition(_)));
    }
}
