//! Grouped-query self-attention for Qwen3.
//!
//! Qwen3 normalizes every query and key head with its own RMSNorm before
//! applying rotary embeddings:
//!
//! ```text
//! x ─► q_proj ─► q_norm ─► RoPE ─┐
//! x ─► k_proj ─► k_norm ─► RoPE ─┼─► softmax(q·kᵀ/√d + bias)·v ─► o_proj
//! x ─► v_proj ───────────────────┘
//! ```
//!
//! Scores are accumulated in f32; masks are additive biases of
//! [`MASKED`] or 0.

use candle_core::{DType, Device, Module, Result, Tensor, D};
use candle_nn::{linear_no_bias, Linear, VarBuilder};

use super::cache::LayerCache;
use super::loader::Qwen3Config;
use super::norm::RmsNorm;
use super::rope::RotaryEmbedding;

/// Bias added to masked attention scores (finite so fully masked rows stay NaN-free).
pub const MASKED: f32 = -1e9;

/// Qwen3 attention layer.
#[derive(Debug, Clone)]
pub struct Qwen3Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    /// Per-head query norm [head_dim].
    q_norm: RmsNorm,
    /// Per-head key norm [head_dim].
    k_norm: RmsNorm,
    rotary: RotaryEmbedding,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl Qwen3Attention {
    /// Creates the layer.
    ///
    /// # Arguments
    ///
    /// * `config` - Model configuration
    /// * `rotary` - Rotary tables shared by all layers
    /// * `vb` - VarBuilder scoped to `self_attn`
    pub fn new(config: &Qwen3Config, rotary: RotaryEmbedding, vb: VarBuilder) -> Result<Self> {
        let (hidden, heads, kv_heads, head_dim) = (
            config.hidden_size,
            config.num_attention_heads,
            config.num_key_value_heads,
            config.head_dim,
        );
        if kv_heads == 0 || heads % kv_heads != 0 {
            candle_core::bail!("{heads} attention heads cannot be grouped over {kv_heads} kv heads");
        }

        Ok(Self {
            q_proj: linear_no_bias(hidden, heads * head_dim, vb.pp("q_proj"))?,
            k_proj: linear_no_bias(hidden, kv_heads * head_dim, vb.pp("k_proj"))?,
            v_proj: linear_no_bias(hidden, kv_heads * head_dim, vb.pp("v_proj"))?,
            o_proj: linear_no_bias(heads * head_dim, hidden, vb.pp("o_proj"))?,
            q_norm: RmsNorm::load(head_dim, config.rms_norm_eps, vb.pp("q_norm"))?,
            k_norm: RmsNorm::load(head_dim, config.rms_norm_eps, vb.pp("k_norm"))?,
            rotary,
            num_heads: heads,
            num_kv_heads: kv_heads,
            head_dim,
            scale: 1.0 / (head_dim as f64).sqrt(),
        })
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn num_kv_heads(&self) -> usize {
        self.num_kv_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Attends over the sequence (plus cached positions).
    ///
    /// # Arguments
    ///
    /// * `x` - Hidden states [batch, seq_len, hidden_size]
    /// * `start_pos` - Position of the first token of `x`
    /// * `cache` - Layer cache, extended in place
    /// * `bias` - Additive mask broadcastable to [batch, 1, seq_len, kv_len];
    ///   a causal mask is built when None
    pub fn forward(
        &self,
        x: &Tensor,
        start_pos: usize,
        cache: Option<&mut LayerCache>,
        bias: Option<&Tensor>,
    ) -> Result<Tensor> {
        let (batch, seq_len, _) = x.dims3()?;

        let q = self.project(&self.q_proj, x, self.num_heads)?;
        let k = self.project(&self.k_proj, x, self.num_kv_heads)?;
        let v = self.project(&self.v_proj, x, self.num_kv_heads)?;
        let q = self.q_norm.forward(&q)?;
        let k = self.k_norm.forward(&k)?;
        let (q, k) = self.rotary.apply(&q, &k, start_pos)?;

        let (k, v) = match cache {
            Some(cache) => cache.append(&k, &v)?,
            None => (k, v),
        };
        let kv_len = k.dim(2)?;
        let k = repeat_kv(&k, self.num_heads / self.num_kv_heads)?;
        let v = repeat_kv(&v, self.num_heads / self.num_kv_heads)?;

        let scores = (q.matmul(&k.transpose(D::Minus2, D::Minus1)?)? * self.scale)?
            .to_dtype(DType::F32)?;
        let scores = match bias {
            Some(bias) => scores.broadcast_add(bias)?,
            None => scores.broadcast_add(&causal_mask(seq_len, kv_len, start_pos, x.device())?)?,
        };
        let probs = candle_nn::ops::softmax(&scores, D::Minus1)?.to_dtype(v.dtype())?;

        let out = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, seq_len, self.num_heads * self.head_dim))?;
        self.o_proj.forward(&out)
    }

    /// [batch, seq_len, hidden] -> [batch, heads, seq_len, head_dim]
    fn project(&self, proj: &Linear, x: &Tensor, heads: usize) -> Result<Tensor> {
        let (batch, seq_len, _) = x.dims3()?;
        proj.forward(x)?
            .reshape((batch, seq_len, heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }
}

/// Repeats each kv head `n_rep` times along the head dimension.
pub fn repeat_kv(x: &Tensor, n_rep: usize) -> Result<Tensor> {
    if n_rep == 1 {
        return Ok(x.clone());
    }
    let (batch, kv_heads, seq_len, head_dim) = x.dims4()?;
    x.unsqueeze(2)?
        .expand((batch, kv_heads, n_rep, seq_len, head_dim))?
        .reshape((batch, kv_heads * n_rep, seq_len, head_dim))
}

/// Causal bias [1, 1, seq_len, kv_len] for queries starting at `start_pos`.
pub fn causal_mask(seq_len: usize, kv_len: usize, start_pos: usize, device: &Device) -> Result<Tensor> {
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|i| {
            (0..kv_len).map(move |j| if j > start_pos + i { MASKED } else { 0.0 })
        })
        .collect();
    Tensor::from_vec(mask, (1, 1, seq_len, kv_len), device)
}

/// Combined causal and key-padding bias [batch, 1, seq_len, kv_len].
///
/// `padding_mask` is [batch, kv_len] with 1 for real tokens and 0 for padding.
pub fn attention_bias(
    padding_mask: &Tensor,
    seq_len: usize,
    start_pos: usize,
) -> Result<Tensor> {
    let (batch, kv_len) = padding_mask.dims2()?;
    let padding = padding_mask
        .to_dtype(DType::F32)?
        .affine(-(MASKED as f64), MASKED as f64)?
        .reshape((batch, 1, 1, kv_len))?;
    causal_mask(seq_len, kv_len, start_pos, padding_mask.device())?.broadcast_add(&padding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_causal_mask_decode_step_sees_everything() {
        let mask = causal_mask(1, 5, 4, &Device::Cpu).unwrap();
        let values = mask.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_attention_bias_masks_padding_keys() {
        let padding = Tensor::new(&[[1u32, 1, 0]], &Device::Cpu).unwrap();
        let bias = attention_bias(&padding, 3, 0).unwrap();
        let rows = bias.squeeze(0).unwrap().squeeze(0).unwrap().to_vec2::<f32>().unwrap();

        assert_eq!(rows[0][0], 0.0);
        assert_eq!(rows[0][1], MASKED);
        assert_eq!(rows[2][1], 0.0);
        assert!(rows[2][2] <= MASKED);
    }
}
