//! Locating model assets, locally or from HuggingFace Hub.
//!
//! The server resolves weights against its static resource directory first;
//! the Hub download only runs when a file is missing and the `hub` feature is
//! enabled.

use std::path::{Path, PathBuf};

#[cfg(feature = "hub")]
use anyhow::Context;
use anyhow::Result;

/// Default Hub repository holding the voice model assets.
pub const DEFAULT_REPO: &str = "voicesvc/voice-clone-base";

/// File names the registry expects, in the resource directory or the repo.
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const CONFIG_FILE: &str = "config.json";

/// Resolved locations of the three model assets.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub weights: PathBuf,
    pub tokenizer: PathBuf,
    /// Absent when the checkpoint ships without a config; defaults apply.
    pub config: Option<PathBuf>,
}

impl ModelPaths {
    /// Use assets already present in `dir`. Fails if weights or tokenizer
    /// are missing.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let weights = dir.join(WEIGHTS_FILE);
        let tokenizer = dir.join(TOKENIZER_FILE);
        if !weights.is_file() {
            anyhow::bail!("missing {} in {}", WEIGHTS_FILE, dir.display());
        }
        if !tokenizer.is_file() {
            anyhow::bail!("missing {} in {}", TOKENIZER_FILE, dir.display());
        }
        let config = dir.join(CONFIG_FILE);
        Ok(Self {
            weights,
            tokenizer,
            config: config.is_file().then_some(config),
        })
    }

    /// Download the assets from HuggingFace Hub and materialize them in
    /// `dir`, so later startups resolve them locally.
    #[cfg(feature = "hub")]
    pub fn download(repo_id: &str, dir: &Path) -> Result<Self> {
        let api = hf_hub::api::sync::Api::new().context("failed to create HuggingFace API")?;
        let repo = api.model(repo_id.to_string());
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        tracing::info!("downloading voice model from {repo_id} into {}", dir.display());
        let weights = fetch_into(&repo, WEIGHTS_FILE, dir)
            .with_context(|| format!("failed to download {WEIGHTS_FILE} from {repo_id}"))?;
        let tokenizer = fetch_into(&repo, TOKENIZER_FILE, dir)
            .with_context(|| format!("failed to download {TOKENIZER_FILE} from {repo_id}"))?;
        let config = fetch_into(&repo, CONFIG_FILE, dir).ok();

        Ok(Self {
            weights,
            tokenizer,
            config,
        })
    }

    /// Local assets if present, otherwise the Hub.
    pub fn resolve(dir: &Path) -> Result<Self> {
        match Self::from_dir(dir) {
            Ok(paths) => Ok(paths),
            #[cfg(feature = "hub")]
            Err(local) => {
                tracing::info!("local model assets unavailable ({local:#}), trying the Hub");
                Self::download(DEFAULT_REPO, dir)
            }
            #[cfg(not(feature = "hub"))]
            Err(local) => Err(local),
        }
    }
}

/// Fetch one repo file into the Hub cache, then copy it to `dir/{file}`.
#[cfg(feature = "hub")]
fn fetch_into(repo: &hf_hub::api::sync::ApiRepo, file: &str, dir: &Path) -> Result<PathBuf> {
    let cached = repo.get(file)?;
    let dest = dir.join(file);
    std::fs::copy(&cached, &dest)
        .with_context(|| format!("failed to copy {} to {}", cached.display(), dest.display()))?;
    Ok(dest)
}
