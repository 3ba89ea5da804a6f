//! Qwen3 causal language model.
//!
//! ## Architecture
//!
//! ```text
//! token ids ─► Embedding ──┐
//!                          ▼
//! inputs_embeds ─► DecoderLayer × N ─► RMSNorm ─► LM head ─► logits
//! ```
//!
//! The decoder stack can be entered either from token ids or from
//! precomputed embeddings, which is how reassembled sequences (with
//! implicit tokens in place of reasoning) reach the model.

use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{embedding, linear_no_bias, Embedding, Linear, VarBuilder};

use super::attention::attention_bias;
use super::cache::KvCache;
use super::decoder::Qwen3DecoderLayer;
use super::loader::Qwen3Config;
use super::loss::causal_lm_loss;
use super::norm::RmsNorm;
use super::rope::RotaryEmbedding;

/// Qwen3 transformer without the LM head.
#[derive(Debug, Clone)]
pub struct Qwen3Model {
    embed_tokens: Embedding,
    layers: Vec<Qwen3DecoderLayer>,
    norm: RmsNorm,
    hidden_size: usize,
    device: Device,
    dtype: DType,
}

impl Qwen3Model {
    /// Builds the model under the `model.` prefix of `vb`.
    pub fn new(config: &Qwen3Config, vb: VarBuilder) -> Result<Self> {
        let vb = vb.pp("model");
        let embed_tokens = embedding(config.vocab_size, config.hidden_size, vb.pp("embed_tokens"))?;
        let rotary = RotaryEmbedding::new(
            config.head_dim,
            config.max_position_embeddings,
            config.rope_theta,
            vb.dtype(),
            vb.device(),
        )?;

        let layers = (0..config.num_hidden_layers)
            .map(|i| Qwen3DecoderLayer::new(config, rotary.clone(), vb.pp(format!("layers.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let norm = RmsNorm::load(config.hidden_size, config.rms_norm_eps, vb.pp("norm"))?;

        Ok(Self {
            embed_tokens,
            layers,
            norm,
            hidden_size: config.hidden_size,
            device: vb.device().clone(),
            dtype: vb.dtype(),
        })
    }

    /// Looks up token embeddings: [batch, seq_len] -> [batch, seq_len, hidden_size].
    pub fn embed(&self, input_ids: &Tensor) -> Result<Tensor> {
        self.embed_tokens.forward(input_ids)
    }

    /// Runs the decoder stack over embeddings.
    ///
    /// # Arguments
    ///
    /// * `embeds` - Input embeddings [batch, seq_len, hidden_size]
    /// * `start_pos` - Position of the first input (cached length when decoding)
    /// * `cache` - KV cache extended in place
    /// * `padding_mask` - [batch, kv_len] with 1 for real tokens; causal only when None
    ///
    /// # Returns
    ///
    /// Final hidden states [batch, seq_len, hidden_size]
    pub fn forward_embeds(
        &self,
        embeds: &Tensor,
        start_pos: usize,
        mut cache: Option<&mut KvCache>,
        padding_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let seq_len = embeds.dim(1)?;
        let bias = padding_mask
            .map(|mask| attention_bias(mask, seq_len, start_pos))
            .transpose()?;

        let mut hidden = embeds.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            let layer_cache = cache.as_deref_mut().map(|c| &mut c.layers_mut()[i]);
            hidden = layer.forward(&hidden, start_pos, layer_cache, bias.as_ref())?;
        }
        self.norm.forward(&hidden)
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn embed_tokens(&self) -> &Embedding {
        &self.embed_tokens
    }
}

/// Logits and (when labels were given) the masked LM loss.
#[derive(Debug, Clone)]
pub struct CausalLmOutput {
    /// [batch, seq_len, vocab_size]
    pub logits: Tensor,
    /// Scalar f32 loss.
    pub loss: Option<Tensor>,
}

/// Qwen3 with its language-model head.
#[derive(Debug, Clone)]
pub struct Qwen3ForCausalLM {
    model: Qwen3Model,
    lm_head: Linear,
}

impl Qwen3ForCausalLM {
    /// Builds the model; with tied embeddings the head reuses the embedding matrix.
    pub fn new(config: &Qwen3Config, vb: VarBuilder) -> Result<Self> {
        let model = Qwen3Model::new(config, vb.clone())?;
        let lm_head = if config.tie_word_embeddings {
            Linear::new(model.embed_tokens.embeddings().clone(), None)
        } else {
            linear_no_bias(config.hidden_size, config.vocab_size, vb.pp("lm_head"))?
        };
        Ok(Self { model, lm_head })
    }

    /// Full-sequence pass over embeddings, with optional loss.
    ///
    /// # Arguments
    ///
    /// * `embeds` - Input embeddings [batch, seq_len, hidden_size]
    /// * `padding_mask` - [batch, seq_len] with 1 for real tokens
    /// * `labels` - [batch, seq_len] targets, -100 where ignored
    pub fn forward_embeds(
        &self,
        embeds: &Tensor,
        padding_mask: Option<&Tensor>,
        labels: Option<&Tensor>,
    ) -> Result<CausalLmOutput> {
        let hidden = self.model.forward_embeds(embeds, 0, None, padding_mask)?;
        let logits = self.lm_head.forward(&hidden)?;
        let loss = labels.map(|l| causal_lm_loss(&logits, l)).transpose()?;
        Ok(CausalLmOutput { logits, loss })
    }

    /// Incremental pass from token ids, returning logits of the last position.
    ///
    /// # Arguments
    ///
    /// * `input_ids` - New tokens [batch, seq_len]
    /// * `cache` - KV cache holding every earlier position
    ///
    /// # Returns
    ///
    /// Logits [batch, vocab_size]
    pub fn forward(&self, input_ids: &Tensor, cache: &mut KvCache) -> Result<Tensor> {
        if input_ids.dim(1)? == 0 {
            candle_core::bail!("forward called without input tokens");
        }
        let start_pos = cache.seq_len();
        let embeds = self.model.embed(input_ids)?;
        let hidden = self.model.forward_embeds(&embeds, start_pos, Some(cache), None)?;
        let last = hidden.narrow(1, hidden.dim(1)? - 1, 1)?.squeeze(1)?;
        self.lm_head.forward(&last)
    }

    /// Empty cache sized for this model.
    pub fn new_cache(&self) -> KvCache {
        KvCache::new(self.model.num_layers())
    }

    pub fn embed(&self, input_ids: &Tensor) -> Result<Tensor> {
        self.model.embed(input_ids)
    }

    pub fn model(&self) -> &Qwen3Model {
        &self.model
    }

    pub fn hidden_size(&self) -> usize {
        self.model.hidden_size()
    }

    pub fn device(&self) -> &Device {
        self.model.device()
    }

    pub fn dtype(&self) -> DType {
        self.model.dtype()
    }
}
