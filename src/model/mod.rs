//! Qwen3 base model on candle.
//!
//! - Loading from the HuggingFace Hub or a local directory
//! - Qwen3 architecture (RMSNorm, RoPE, GQA with q/k norm, SwiGLU)
//! - Embedding-level entry point and masked causal-LM loss

pub mod attention;
pub mod cache;
pub mod decoder;
pub mod loader;
pub mod loss;
pub mod mlp;
pub mod norm;
pub mod qwen3;
pub mod rope;

pub use attention::{attention_bias, causal_mask, repeat_kv, Qwen3Attention, MASKED};
pub use cache::{KvCache, LayerCache};
pub use decoder::Qwen3DecoderLayer;
pub use loader::{
    download_model, load_config, load_into_varmap, load_safetensors, resolve_model, ModelFiles,
    Qwen3Config,
};
pub use loss::causal_lm_loss;
pub use mlp::Qwen3Mlp;
pub use norm::RmsNorm;
pub use qwen3::{CausalLmOutput, Qwen3ForCausalLM, Qwen3Model};
pub use rope::RotaryEmbedding;
