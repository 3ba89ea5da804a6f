//! implicit-tokens: compress chain-of-thought into learned implicit tokens.
//!
//! A reasoning-trained causal LM is fine-tuned so that, instead of attending
//! over a long `<think>...</think>` region, it sees k learned vectors that
//! summarize the region through cross-attention:
//! - Span location of the reasoning region in token ids
//! - Region aggregation into k implicit tokens
//! - Sequence reassembly and batch padding
//! - Label masking so loss is computed only on the answer
//! - Joint training of aligner and base model (Qwen3 on candle)

pub mod aligner;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod model;
pub mod tokenizer;
pub mod train;

/// Label value excluded from the loss.
pub const IGNORE_INDEX: i64 = -100;

pub use aligner::{
    pad_batch, splice, AlignedBatch, AlignerInput, AlignerWeights, ImplicitTokens,
    ImplicitTokensAligner, PaddedBatch, RegionAggregator, RegionSpan, SpanLocator, SplicedExample,
};
pub use config::{
    AlignerConfig, GenerationConfig, PromptConfig, RunConfig, SamplingConfig, TrainingConfig,
};
pub use data::{
    collate, prepare_example, CotRecord, Dataset, DatasetDict, PreparedExample, ProblemRecord,
    PromptTemplate, TokenizedBatch, TrajectoryCollector,
};
pub use engine::{Qwen3Generator, Sampler};
pub use error::{Error, Result};
pub use model::{
    download_model, load_config, load_safetensors, CausalLmOutput, ModelFiles, Qwen3Config,
    Qwen3ForCausalLM,
};
pub use tokenizer::{HfTokenizer, TextTokenizer};
pub use train::{AlignmentModel, Trainer, TrainingSummary};
