//! Token sampling.
//!
//! Supports:
//! - Greedy decoding (temperature = 0)
//! - Temperature scaling
//! - Top-k and top-p (nucleus) filtering

use candle_core::{DType, Tensor};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::SamplingConfig;
use crate::error::{Error, Result};

/// Samples next tokens from logits.
#[derive(Debug, Clone)]
pub struct Sampler {
    temperature: f32,
    top_k: usize,
    top_p: f32,
    rng: StdRng,
}

impl Sampler {
    /// Sampler seeded from entropy.
    pub fn new(config: &SamplingConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Reproducible sampler.
    pub fn with_seed(config: &SamplingConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &SamplingConfig, rng: StdRng) -> Self {
        Self {
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            rng,
        }
    }

    /// Picks one token per row of `logits` ([vocab] or [batch, vocab]).
    pub fn sample(&mut self, logits: &Tensor) -> Result<Vec<u32>> {
        let logits = logits.to_dtype(DType::F32)?;
        match logits.rank() {
            1 => Ok(vec![self.sample_row(&logits.to_vec1()?)?]),
            2 => logits
                .to_vec2::<f32>()?
                .iter()
                .map(|row| self.sample_row(row))
                .collect(),
            rank => Err(Error::Config(format!("expected 1D or 2D logits, got {rank}D"))),
        }
    }

    fn sample_row(&mut self, logits: &[f32]) -> Result<u32> {
        if logits.is_empty() {
            return Err(Error::Config("cannot sample from empty logits".to_string()));
        }
        if self.temperature <= 0.0 {
            return Ok(argmax(logits));
        }

        // Candidates sorted by descending logit.
        let mut candidates: Vec<(u32, f32)> = logits
            .iter()
            .enumerate()
            .map(|(i, &l)| (i as u32, l / self.temperature))
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        if self.top_k > 0 {
            candidates.truncate(self.top_k);
        }

        let max = candidates[0].1;
        let mut probs: Vec<f32> = candidates.iter().map(|&(_, l)| (l - max).exp()).collect();
        let total: f32 = probs.iter().sum();
        probs.iter_mut().for_each(|p| *p /= total);

        if self.top_p > 0.0 && self.top_p < 1.0 {
            let mut cumulative = 0.0;
            let cutoff = probs
                .iter()
                .position(|&p| {
                    cumulative += p;
                    cumulative > self.top_p
                })
                .map_or(probs.len(), |i| i + 1);
            probs.truncate(cutoff);
            candidates.truncate(cutoff);
        }

        let dist = WeightedIndex::new(&probs)
            .map_err(|e| Error::Config(format!("invalid sampling distribution: {e}")))?;
        Ok(candidates[dist.sample(&mut self.rng)].0)
    }

    pub fn set_temperature(&mut self, temperature: f32) {
        self.temperature = temperature;
    }

    pub fn set_top_k(&mut self, top_k: usize) {
        self.top_k = top_k;
    }

    pub fn set_top_p(&mut self, top_p: f32) {
        self.top_p = top_p;
    }
}

fn argmax(values: &[f32]) -> u32 {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(i, _)| i as u32)
}
