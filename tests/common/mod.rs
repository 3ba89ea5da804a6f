//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::cell::RefCell;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use implicit_tokens::config::PromptConfig;
use implicit_tokens::model::{Qwen3Config, Qwen3ForCausalLM};
use implicit_tokens::tokenizer::TextTokenizer;
use implicit_tokens::Result;

pub const EOS: u32 = 0;
pub const THINK_OPEN: u32 = 1;
pub const THINK_CLOSE: u32 = 2;
pub const VOCAB_SIZE: usize = 128;

const SPECIALS: &[&str] = &[
    "<eos>",
    "<think>",
    "</think>",
    "<answer>",
    "</answer>",
    "<bos>",
    "<user>",
    "<assistant>",
];

pub fn test_device() -> Device {
    Device::Cpu
}

/// Splits out special tokens, then splits on whitespace; new words get the
/// next free id. Pad falls back to EOS.
pub struct WhitespaceTokenizer {
    words: RefCell<Vec<String>>,
}

impl WhitespaceTokenizer {
    pub fn new() -> Self {
        Self {
            words: RefCell::new(SPECIALS.iter().map(|s| s.to_string()).collect()),
        }
    }

    fn id_of(&self, word: &str) -> u32 {
        let mut words = self.words.borrow_mut();
        if let Some(pos) = words.iter().position(|w| w == word) {
            return pos as u32;
        }
        words.push(word.to_string());
        assert!(words.len() <= VOCAB_SIZE, "test vocabulary exhausted");
        (words.len() - 1) as u32
    }
}

impl TextTokenizer for WhitespaceTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        let mut rest = text;
        while !rest.is_empty() {
            if let Some(special) = SPECIALS.iter().find(|s| rest.starts_with(*s)) {
                ids.push(self.id_of(special));
                rest = &rest[special.len()..];
                continue;
            }
            let next_special = SPECIALS
                .iter()
                .filter_map(|s| rest.find(s))
                .min()
                .unwrap_or(rest.len());
            let (chunk, tail) = rest.split_at(next_special);
            for word in chunk.split_whitespace() {
                ids.push(self.id_of(word));
            }
            rest = tail;
        }
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let words = self.words.borrow();
        Ok(ids
            .iter()
            .map(|&id| words.get(id as usize).cloned().unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" "))
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.words
            .borrow()
            .iter()
            .position(|w| w == token)
            .map(|p| p as u32)
    }

    fn eos_token(&self) -> &str {
        "<eos>"
    }

    fn eos_token_id(&self) -> u32 {
        EOS
    }

    fn pad_token_id(&self) -> u32 {
        EOS
    }
}

/// Prompt layout using the fake tokenizer's markers. The system prompt
/// mentions the open tag twice, like the default one.
pub fn prompt_config() -> PromptConfig {
    PromptConfig {
        system_prompt: "reason in <think> </think> then reply in <answer> </answer> like <think> steps </think> <answer> result </answer>".to_string(),
        bos_marker: "<bos>".to_string(),
        user_marker: "<user>".to_string(),
        assistant_marker: "<assistant>".to_string(),
        ..PromptConfig::default()
    }
}

pub fn tiny_config() -> Qwen3Config {
    Qwen3Config {
        vocab_size: VOCAB_SIZE,
        hidden_size: 32,
        intermediate_size: 64,
        num_hidden_layers: 2,
        num_attention_heads: 4,
        num_key_value_heads: 2,
        head_dim: 8,
        rms_norm_eps: 1e-6,
        rope_theta: 10000.0,
        max_position_embeddings: 256,
        tie_word_embeddings: true,
    }
}

/// Randomly initialised tiny model whose weights live in the returned map.
pub fn tiny_model() -> (Qwen3ForCausalLM, VarMap) {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &test_device());
    let model = Qwen3ForCausalLM::new(&tiny_config(), vb).unwrap();
    (model, varmap)
}
