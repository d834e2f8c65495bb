//! Speaker profiles: the persisted voice model.
//!
//! A profile is three aligned token arrays produced by one pass over the same
//! audio (or one synthesis pass, for continuation profiles): the semantic
//! prompt, a coarse acoustic prompt, and a fine acoustic prompt. On disk it
//! is a named-tensor safetensors archive keyed by those three names. Saves
//! are full rewrites through a temp file and an atomic rename, so a reader
//! never observes a torn profile even when two enrollments race.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use candle_core::{Device, Tensor};

/// Archive key for the semantic prompt.
pub const KEY_SEMANTIC: &str = "semantic_prompt";
/// Archive key for the coarse acoustic prompt.
pub const KEY_COARSE: &str = "coarse_prompt";
/// Archive key for the fine acoustic prompt.
pub const KEY_FINE: &str = "fine_prompt";

/// Rows of the coarse prompt: a fixed-width prefix slice of the fine rows.
pub const COARSE_ROWS: usize = 2;
/// Codec codebooks, i.e. rows of the fine prompt.
pub const FINE_ROWS: usize = 8;

/// A speaker's cloned voice: semantic, coarse, and fine prompt arrays from a
/// single tokenization or synthesis pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerProfile {
    /// Speech-content tokens, `[S]`.
    pub semantic_prompt: Vec<u32>,
    /// Coarse acoustic tokens, `[COARSE_ROWS][T]`.
    pub coarse_prompt: Vec<Vec<u32>>,
    /// Codec-level acoustic tokens, `[FINE_ROWS][T]`.
    pub fine_prompt: Vec<Vec<u32>>,
}

impl SpeakerProfile {
    /// Write the profile as a safetensors archive, atomically replacing any
    /// previous file at `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| anyhow!("profile path {} has no parent", path.display()))?;

        let mut tensors = HashMap::new();
        tensors.insert(KEY_SEMANTIC.to_string(), row_tensor(&self.semantic_prompt)?);
        tensors.insert(KEY_COARSE.to_string(), grid_tensor(&self.coarse_prompt)?);
        tensors.insert(KEY_FINE.to_string(), grid_tensor(&self.fine_prompt)?);

        let tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
        candle_core::safetensors::save(&tensors, tmp.path())
            .with_context(|| format!("failed to serialize profile for {}", path.display()))?;
        tmp.persist(path)
            .with_context(|| format!("failed to move profile into place at {}", path.display()))?;
        Ok(())
    }

    /// Read a profile back. Fails if any of the three named arrays is
    /// missing or empty.
    pub fn load(path: &Path) -> Result<Self> {
        let tensors = candle_core::safetensors::load(path, &Device::Cpu)
            .with_context(|| format!("failed to read profile archive {}", path.display()))?;

        let semantic_prompt = load_row(&tensors, KEY_SEMANTIC, path)?;
        let coarse_prompt = load_grid(&tensors, KEY_COARSE, path)?;
        let fine_prompt = load_grid(&tensors, KEY_FINE, path)?;

        Ok(Self {
            semantic_prompt,
            coarse_prompt,
            fine_prompt,
        })
    }
}

fn row_tensor(row: &[u32]) -> Result<Tensor> {
    let data: Vec<i64> = row.iter().map(|&v| v as i64).collect();
    let len = data.len();
    Ok(Tensor::from_vec(data, len, &Device::Cpu)?)
}

fn grid_tensor(grid: &[Vec<u32>]) -> Result<Tensor> {
    let rows = grid.len();
    let cols = grid.first().map(|r| r.len()).unwrap_or(0);
    for (i, row) in grid.iter().enumerate() {
        if row.len() != cols {
            return Err(anyhow!(
                "prompt row {i} has length {}, expected {cols}",
                row.len()
            ));
        }
    }
    let data: Vec<i64> = grid.iter().flatten().map(|&v| v as i64).collect();
    Ok(Tensor::from_vec(data, (rows, cols), &Device::Cpu)?)
}

fn load_row(tensors: &HashMap<String, Tensor>, key: &str, path: &Path) -> Result<Vec<u32>> {
    let tensor = tensors
        .get(key)
        .ok_or_else(|| anyhow!("profile {} is missing the {key} array", path.display()))?;
    let values: Vec<i64> = tensor.to_vec1()?;
    if values.is_empty() {
        return Err(anyhow!("profile {} has an empty {key} array", path.display()));
    }
    Ok(values.into_iter().map(|v| v as u32).collect())
}

fn load_grid(tensors: &HashMap<String, Tensor>, key: &str, path: &Path) -> Result<Vec<Vec<u32>>> {
    let tensor = tensors
        .get(key)
        .ok_or_else(|| anyhow!("profile {} is missing the {key} array", path.display()))?;
    let rows: Vec<Vec<i64>> = tensor.to_vec2()?;
    if rows.is_empty() || rows.iter().any(|r| r.is_empty()) {
        return Err(anyhow!("profile {} has an empty {key} array", path.display()));
    }
    Ok(rows
        .into_iter()
        .map(|r| r.into_iter().map(|v| v as u32).collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_profile() -> SpeakerProfile {
        SpeakerProfile {
            semantic_prompt: vec![1, 2, 3, 4, 5],
            coarse_prompt: vec![vec![10, 11, 12], vec![20, 21, 22]],
            fine_prompt: (0..FINE_ROWS as u32)
                .map(|r| vec![r * 100, r * 100 + 1, r * 100 + 2])
                .collect(),
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alice.safetensors");

        let profile = sample_profile();
        profile.save(&path).unwrap();

        let loaded = SpeakerProfile::load(&path).unwrap();
        assert_eq!(loaded, profile);
        assert!(!loaded.semantic_prompt.is_empty());
        assert_eq!(loaded.coarse_prompt.len(), COARSE_ROWS);
        assert_eq!(loaded.fine_prompt.len(), FINE_ROWS);
    }

    #[test]
    fn test_save_overwrites_previous_profile() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bob.safetensors");

        sample_profile().save(&path).unwrap();
        let mut second = sample_profile();
        second.semantic_prompt = vec![9, 9, 9];
        second.save(&path).unwrap();

        let loaded = SpeakerProfile::load(&path).unwrap();
        assert_eq!(loaded.semantic_prompt, vec![9, 9, 9]);
        // Exactly one file for the speaker, not an accumulation
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(SpeakerProfile::load(&dir.path().join("nobody.safetensors")).is_err());
    }

    #[test]
    fn test_load_rejects_truncated_archive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.safetensors");
        std::fs::write(&path, b"definitely not safetensors").unwrap();
        assert!(SpeakerProfile::load(&path).is_err());
    }

    #[test]
    fn test_ragged_grid_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ragged.safetensors");
        let mut profile = sample_profile();
        profile.coarse_prompt[1].pop();
        assert!(profile.save(&path).is_err());
    }
}
