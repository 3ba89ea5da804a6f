//! Configuration types for implicit-tokens.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// System instruction placed in front of every problem.
pub const DEFAULT_SYSTEM_PROMPT: &str = "A conversation between User and Assistant. The user asks a question, and the Assistant solves it. The assistant \
first thinks about the reasoning process in the mind and then provides the user with the answer. The reasoning \
process and answer are enclosed within <think> </think> and <answer> </answer> tags, respectively, i.e., \
<think> reasoning process here </think><answer> answer here </answer>";

/// Aligner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignerConfig {
    /// Number of implicit summary vectors (k).
    pub num_implicit_tokens: usize,
    /// Number of cross-attention heads (must divide the hidden size).
    pub num_heads: usize,
    /// Zero-based occurrence of the open tag that starts the region.
    ///
    /// The default prompt mentions `<think>` twice in the system
    /// instruction, so the reasoning region opens at the third one.
    pub open_tag_occurrence_index: usize,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            num_implicit_tokens: 4,
            num_heads: 8,
            open_tag_occurrence_index: 2,
        }
    }
}

/// Prompt layout shared by generation and training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// System instruction.
    pub system_prompt: String,
    /// Beginning-of-sequence marker written as text.
    pub bos_marker: String,
    /// Marker preceding the user turn.
    pub user_marker: String,
    /// Marker preceding the assistant turn.
    pub assistant_marker: String,
    /// Tag opening the reasoning region.
    pub think_open: String,
    /// Tag closing the reasoning region.
    pub think_close: String,
    /// Tag opening the answer.
    pub answer_open: String,
    /// Tag closing the answer.
    pub answer_close: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            bos_marker: "<｜begin▁of▁sentence｜>".to_string(),
            user_marker: "<｜User｜>".to_string(),
            assistant_marker: "<｜Assistant｜>".to_string(),
            think_open: "<think>".to_string(),
            think_close: "</think>".to_string(),
            answer_open: "<answer>".to_string(),
            answer_close: "</answer>".to_string(),
        }
    }
}

/// Stop sequences applied unless overridden. Qwen3 chat models end a turn
/// with `<|im_end|>` while their tokenizer's EOS resolves to `<|endoftext|>`,
/// so the turn marker has to stop generation on its own.
pub const DEFAULT_STOP_SEQUENCES: &[&str] = &["<|im_end|>"];

/// Sampling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Temperature for sampling (1.0 = no change, 0.0 = greedy).
    pub temperature: f32,
    /// Top-k sampling (0 = disabled).
    pub top_k: usize,
    /// Top-p (nucleus) sampling (1.0 = disabled).
    pub top_p: f32,
    /// Maximum tokens to generate.
    pub max_tokens: usize,
    /// Stop sequences.
    pub stop_sequences: Vec<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            top_k: 0,
            top_p: 1.0,
            max_tokens: 8192,
            stop_sequences: DEFAULT_STOP_SEQUENCES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Chain-of-thought data generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Accepted samples to keep per problem.
    pub samples_per_problem: usize,
    /// Generation rounds per problem before giving up on missing samples.
    pub max_retries: usize,
    /// First problem index to process.
    pub split_start: usize,
    /// One past the last problem index (None = until the end).
    pub split_end: Option<usize>,
    /// Sampling parameters.
    pub sampling: SamplingConfig,
    /// Sampler seed (None = from entropy).
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            samples_per_problem: 1,
            max_retries: 3,
            split_start: 0,
            split_end: None,
            sampling: SamplingConfig::default(),
            seed: None,
        }
    }
}

/// Training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of passes over the training split.
    pub epochs: usize,
    /// Examples per batch.
    pub batch_size: usize,
    /// AdamW learning rate.
    pub learning_rate: f64,
    /// AdamW weight decay.
    pub weight_decay: f64,
    /// Log every N optimizer steps.
    pub logging_steps: usize,
    /// Update the base model's weights alongside the aligner.
    pub train_base_model: bool,
    /// Shuffle seed.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 3,
            batch_size: 4,
            learning_rate: 5e-5,
            weight_decay: 0.01,
            logging_steps: 10,
            train_base_model: true,
            seed: 42,
        }
    }
}

/// Everything a training run was configured with, written next to its checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Base model ID or local directory.
    pub model: String,
    /// Aligner hyperparameters.
    pub aligner: AlignerConfig,
    /// Prompt layout.
    pub prompt: PromptConfig,
    /// Training hyperparameters.
    pub training: TrainingConfig,
}

impl RunConfig {
    /// Writes the configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reads a configuration written by [`RunConfig::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
