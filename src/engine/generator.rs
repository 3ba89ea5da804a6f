//! Autoregressive text generation with a KV cache.

use candle_core::Tensor;
use tracing::debug;

use super::sampler::Sampler;
use crate::config::SamplingConfig;
use crate::data::TextGenerator;
use crate::error::{Error, Result};
use crate::model::Qwen3ForCausalLM;
use crate::tokenizer::TextTokenizer;

/// Generates completions from a local Qwen3 model.
///
/// Each completion prefills the prompt into a fresh cache, then decodes one
/// token at a time until EOS, a stop sequence, or `max_tokens`.
pub struct Qwen3Generator<T> {
    model: Qwen3ForCausalLM,
    tokenizer: T,
    /// Seed of the next completion (None = entropy).
    seed: Option<u64>,
}

impl<T: TextTokenizer> Qwen3Generator<T> {
    pub fn new(model: Qwen3ForCausalLM, tokenizer: T, seed: Option<u64>) -> Self {
        Self {
            model,
            tokenizer,
            seed,
        }
    }

    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    fn sampler(&mut self, sampling: &SamplingConfig) -> Sampler {
        match self.seed.as_mut() {
            Some(seed) => {
                let sampler = Sampler::with_seed(sampling, *seed);
                *seed = seed.wrapping_add(1);
                sampler
            }
            None => Sampler::new(sampling),
        }
    }

    /// Generates one completion for already tokenized input.
    pub fn complete(&mut self, prompt_ids: &[u32], sampling: &SamplingConfig) -> Result<String> {
        if prompt_ids.is_empty() {
            return Err(Error::Config("cannot generate from an empty prompt".to_string()));
        }
        let device = self.model.device().clone();
        let mut sampler = self.sampler(sampling);
        let mut cache = self.model.new_cache();
        let eos = self.tokenizer.eos_token_id();

        let input = Tensor::new(prompt_ids, &device)?.unsqueeze(0)?;
        let mut logits = self.model.forward(&input, &mut cache)?;
        let mut generated = Vec::new();

        while generated.len() < sampling.max_tokens {
            let token = sampler.sample(&logits)?[0];
            if token == eos {
                break;
            }
            generated.push(token);
            if !sampling.stop_sequences.is_empty() {
                let text = self.tokenizer.decode(&generated)?;
                if let Some(cut) = find_stop(&text, &sampling.stop_sequences) {
                    debug!("stop sequence hit after {} tokens", generated.len());
                    return Ok(text[..cut].to_string());
                }
            }
            let next = Tensor::new(&[token], &device)?.unsqueeze(0)?;
            logits = self.model.forward(&next, &mut cache)?;
        }

        debug!("generated {} tokens", generated.len());
        self.tokenizer.decode(&generated)
    }
}

/// Byte offset of the earliest stop sequence in `text`.
fn find_stop(text: &str, stops: &[String]) -> Option<usize> {
    stops
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
}

impl<T: TextTokenizer> TextGenerator for Qwen3Generator<T> {
    fn generate(&mut self, prompt: &str, n: usize, sampling: &SamplingConfig) -> Result<Vec<String>> {
        let prompt_ids = self.tokenizer.encode(prompt)?;
        (0..n).map(|_| self.complete(&prompt_ids, sampling)).collect()
    }
}
