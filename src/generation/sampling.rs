//! Temperature / top-k / top-p sampling over candle logit tensors.

use anyhow::Result;
use candle_core::{DType, IndexOp, Tensor, D};

/// RNG state for one generation pass.
///
/// Each synthesis stage creates its own context, so concurrent requests never
/// interfere. A seeded context reproduces the same token stream across runs.
pub struct SamplingContext {
    state: u64,
    seeded: bool,
    counter: u64,
}

impl SamplingContext {
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(s) => Self {
                // Mix the seed into the PCG increment to avoid degenerate states
                state: s
                    .wrapping_mul(2685821657736338717)
                    .wrapping_add(1442695040888963407),
                seeded: true,
                counter: 0,
            },
            None => Self {
                state: 0,
                seeded: false,
                counter: 0,
            },
        }
    }

    /// Random f32 in `[0, 1)`.
    fn rand_f32(&mut self) -> f32 {
        if !self.seeded {
            use std::time::{SystemTime, UNIX_EPOCH};

            let seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as u64;
            let count = self.counter;
            self.counter += 1;

            let state = seed
                .wrapping_add(count)
                .wrapping_mul(1103515245)
                .wrapping_add(12345);
            return (state as f32) / (u64::MAX as f32);
        }

        // PCG XSH RR 64/32
        let old_state = self.state;
        self.state = old_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);

        let xorshifted = (((old_state >> 18) ^ old_state) >> 27) as u32;
        let rot = (old_state >> 59) as u32;
        let output = xorshifted.rotate_right(rot);

        (output as f32) / (u32::MAX as f32)
    }
}

/// Per-stage sampling knobs.
#[derive(Debug, Clone, Copy)]
pub struct SamplingConfig {
    /// Softmax temperature (<0.01 falls back to greedy).
    pub temperature: f64,
    /// Top-k cutoff (0 disables).
    pub top_k: usize,
    /// Nucleus threshold (>=1.0 disables).
    pub top_p: f64,
}

/// Sample one token per batch row from `[batch, vocab]` logits.
///
/// Returns a U32 tensor of shape `[batch]`.
pub fn sample(logits: &Tensor, config: &SamplingConfig, ctx: &mut SamplingContext) -> Result<Tensor> {
    let logits = logits.to_dtype(DType::F32)?;

    let logits = if config.temperature != 1.0 && config.temperature > 0.0 {
        (logits / config.temperature)?
    } else {
        logits
    };

    if config.temperature < 0.01 {
        return greedy_sample(&logits);
    }

    let logits = if config.top_k > 0 {
        top_k_filter(&logits, config.top_k)?
    } else {
        logits
    };

    let logits = if config.top_p < 1.0 && config.top_p > 0.0 {
        top_p_filter(&logits, config.top_p)?
    } else {
        logits
    };

    let probs = candle_nn::ops::softmax_last_dim(&logits)?;
    multinomial_sample(&probs, ctx)
}

/// Probability the next token is `eos_id`, given `[1, vocab]` logits at the
/// configured temperature. The semantic generator stops once this crosses
/// the caller's `min_eos_p`.
pub fn eos_probability(logits: &Tensor, temperature: f64, eos_id: u32) -> Result<f32> {
    let logits = logits.to_dtype(DType::F32)?;
    let logits = if temperature != 1.0 && temperature > 0.0 {
        (logits / temperature)?
    } else {
        logits
    };
    let probs = candle_nn::ops::softmax_last_dim(&logits)?;
    let p: f32 = probs.i((0, eos_id as usize))?.to_scalar()?;
    Ok(p)
}

/// Keep the top k logits per row, setting the rest to -inf.
fn top_k_filter(logits: &Tensor, k: usize) -> Result<Tensor> {
    let (batch, vocab) = logits.dims2()?;
    let k = k.min(vocab);

    let mut result_data = Vec::with_capacity(batch * vocab);
    for b in 0..batch {
        let row: Vec<f32> = logits.i(b)?.to_vec1()?;
        let mut sorted = row.clone();
        sorted.sort_unstable_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let threshold = sorted[k - 1];
        result_data.extend(
            row.iter()
                .map(|&v| if v >= threshold { v } else { f32::NEG_INFINITY }),
        );
    }
    Ok(Tensor::new(result_data.as_slice(), logits.device())?.reshape((batch, vocab))?)
}

/// Nucleus filtering: keep the smallest set of tokens whose cumulative
/// probability exceeds `p`, setting the rest to -inf.
fn top_p_filter(logits: &Tensor, p: f64) -> Result<Tensor> {
    let (batch, vocab) = logits.dims2()?;
    let mut result_data = Vec::with_capacity(batch * vocab);

    for b in 0..batch {
        let row: Vec<f32> = logits.i(b)?.to_vec1()?;
        let mut indices: Vec<usize> = (0..vocab).collect();
        indices.sort_unstable_by(|&a, &b| {
            row[b]
                .partial_cmp(&row[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let max_val = row[indices[0]];
        let mut exp_sorted: Vec<f32> = indices.iter().map(|&i| (row[i] - max_val).exp()).collect();
        let sum: f32 = exp_sorted.iter().sum();
        for v in &mut exp_sorted {
            *v /= sum;
        }

        let mut cumsum = 0.0f32;
        let mut cutoff_idx = vocab;
        for (i, &prob) in exp_sorted.iter().enumerate() {
            cumsum += prob;
            if cumsum > p as f32 {
                cutoff_idx = i + 1;
                break;
            }
        }

        let mut filtered = vec![f32::NEG_INFINITY; vocab];
        for &idx in &indices[..cutoff_idx] {
            filtered[idx] = row[idx];
        }
        result_data.extend(filtered);
    }

    Ok(Tensor::new(result_data.as_slice(), logits.device())?.reshape((batch, vocab))?)
}

/// Multinomial draw from `[batch, vocab]` probabilities.
fn multinomial_sample(probs: &Tensor, ctx: &mut SamplingContext) -> Result<Tensor> {
    let (batch, vocab) = probs.dims2()?;
    let cumsum = probs.cumsum(1)?;

    let uniform: Vec<f32> = (0..batch).map(|_| ctx.rand_f32()).collect();
    let uniform = Tensor::new(uniform.as_slice(), probs.device())?.unsqueeze(1)?;

    // First index where the CDF crosses the uniform draw
    let mask = cumsum.ge(&uniform.broadcast_as(cumsum.shape())?)?;
    let positions: Vec<f32> = (0..vocab).map(|i| i as f32 + 1.0).collect();
    let positions = Tensor::new(positions.as_slice(), probs.device())?
        .unsqueeze(0)?
        .broadcast_as(mask.shape())?;
    let large = Tensor::new(&[vocab as f32 + 1.0], probs.device())?.broadcast_as(mask.shape())?;
    let masked_positions = mask.where_cond(&positions, &large)?;

    Ok(masked_positions.argmin(D::Minus1)?)
}

/// Argmax sampling.
pub fn greedy_sample(logits: &Tensor) -> Result<Tensor> {
    Ok(logits.argmax(D::Minus1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn peaked_logits(vocab: usize, peak: usize) -> Tensor {
        let mut data = vec![0.0f32; vocab];
        data[peak] = 20.0;
        Tensor::new(data.as_slice(), &Device::Cpu)
            .unwrap()
            .unsqueeze(0)
            .unwrap()
    }

    #[test]
    fn test_greedy_picks_peak() {
        let logits = peaked_logits(10, 7);
        let token = greedy_sample(&logits).unwrap();
        let ids: Vec<u32> = token.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(ids[0], 7);
    }

    #[test]
    fn test_sample_respects_strong_peak() {
        let logits = peaked_logits(10, 3);
        let config = SamplingConfig {
            temperature: 0.7,
            top_k: 5,
            top_p: 0.9,
        };
        let mut ctx = SamplingContext::new(Some(42));
        let token = sample(&logits, &config, &mut ctx).unwrap();
        let ids: Vec<u32> = token.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(ids[0], 3);
    }

    #[test]
    fn test_seeded_sampling_is_deterministic() {
        let logits = Tensor::new(&[[1.0f32, 1.1, 0.9, 1.2, 0.8]], &Device::Cpu).unwrap();
        let config = SamplingConfig {
            temperature: 1.0,
            top_k: 0,
            top_p: 1.0,
        };

        let draw = |seed| {
            let mut ctx = SamplingContext::new(Some(seed));
            let ids: Vec<u32> = sample(&logits, &config, &mut ctx)
                .unwrap()
                .flatten_all()
                .unwrap()
                .to_vec1()
                .unwrap();
            ids[0]
        };
        assert_eq!(draw(7), draw(7));
    }

    #[test]
    fn test_top_k_excludes_tail() {
        // With k=1, only the max survives, regardless of temperature
        let logits = Tensor::new(&[[0.5f32, 2.0, 1.0, 0.1]], &Device::Cpu).unwrap();
        let config = SamplingConfig {
            temperature: 1.0,
            top_k: 1,
            top_p: 1.0,
        };
        for seed in 0..20 {
            let mut ctx = SamplingContext::new(Some(seed));
            let ids: Vec<u32> = sample(&logits, &config, &mut ctx)
                .unwrap()
                .flatten_all()
                .unwrap()
                .to_vec1()
                .unwrap();
            assert_eq!(ids[0], 1);
        }
    }

    #[test]
    fn test_eos_probability_bounds() {
        let logits = peaked_logits(10, 9);
        let p = eos_probability(&logits, 1.0, 9).unwrap();
        assert!(p > 0.99);
        let p_other = eos_probability(&logits, 1.0, 0).unwrap();
        assert!(p_other < 0.01);
    }

    #[test]
    fn test_low_temperature_is_greedy() {
        let logits = Tensor::new(&[[0.0f32, 0.1, 3.0]], &Device::Cpu).unwrap();
        let config = SamplingConfig {
            temperature: 0.001,
            top_k: 0,
            top_p: 1.0,
        };
        let mut ctx = SamplingContext::new(None);
        let ids: Vec<u32> = sample(&logits, &config, &mut ctx)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(ids[0], 2);
    }
}
