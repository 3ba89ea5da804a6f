//! Pre-norm transformer block.
//!
//! ```text
//! x ─► RMSNorm ─► Attention ─► (+x) ─► RMSNorm ─► MLP ─► (+) ─► out
//! ```

use candle_core::{Module, Result, Tensor};
use candle_nn::VarBuilder;

use super::attention::Qwen3Attention;
use super::cache::LayerCache;
use super::loader::Qwen3Config;
use super::mlp::Qwen3Mlp;
use super::norm::RmsNorm;
use super::rope::RotaryEmbedding;

#[derive(Debug, Clone)]
pub struct Qwen3DecoderLayer {
    input_layernorm: RmsNorm,
    self_attn: Qwen3Attention,
    post_attention_layernorm: RmsNorm,
    mlp: Qwen3Mlp,
}

impl Qwen3DecoderLayer {
    pub fn new(config: &Qwen3Config, rotary: RotaryEmbedding, vb: VarBuilder) -> Result<Self> {
        let eps = config.rms_norm_eps;
        Ok(Self {
            input_layernorm: RmsNorm::load(config.hidden_size, eps, vb.pp("input_layernorm"))?,
            self_attn: Qwen3Attention::new(config, rotary, vb.pp("self_attn"))?,
            post_attention_layernorm: RmsNorm::load(
                config.hidden_size,
                eps,
                vb.pp("post_attention_layernorm"),
            )?,
            mlp: Qwen3Mlp::new(config.hidden_size, config.intermediate_size, vb.pp("mlp"))?,
        })
    }

    pub fn self_attn(&self) -> &Qwen3Attention {
        &self.self_attn
    }

    pub fn mlp(&self) -> &Qwen3Mlp {
        &self.mlp
    }

    pub fn forward(
        &self,
        x: &Tensor,
        start_pos: usize,
        cache: Option<&mut LayerCache>,
        bias: Option<&Tensor>,
    ) -> Result<Tensor> {
        let attn = self
            .self_attn
            .forward(&self.input_layernorm.forward(x)?, start_pos, cache, bias)?;
        let x = (x + attn)?;
        let mlp = self.mlp.forward(&self.post_attention_layernorm.forward(&x)?)?;
        x + mlp
    }
}
