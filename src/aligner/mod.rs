//! Implicit-token aligner.
//!
//! Replaces the reasoning region of every example with k learned summary
//! vectors before the sequence reaches the base model:
//!
//! ```text
//! input_ids ─► SpanLocator ─► span ─┐
//!                                   ▼
//! embeddings ───────────────► splice (RegionAggregator) ─► pad_batch ─► base model
//! ```
//!
//! Examples are processed independently; only padding needs the whole batch.

pub mod aggregator;
pub mod padding;
pub mod span;
pub mod splice;

use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use tracing::debug;

pub use aggregator::{ImplicitTokens, RegionAggregator};
pub use padding::{pad_batch, PaddedBatch};
pub use span::{RegionSpan, SpanLocator};
pub use splice::{splice, SplicedExample};

use crate::config::AlignerConfig;
use crate::error::{Error, Result};

/// Per-batch tensors consumed by [`ImplicitTokensAligner::forward`].
#[derive(Debug, Clone, Copy)]
pub struct AlignerInput<'a> {
    /// Token embeddings [batch, seq_len, hidden_size].
    pub embeddings: &'a Tensor,
    /// Token ids [batch, seq_len].
    pub input_ids: &'a Tensor,
    /// Attention mask [batch, seq_len].
    pub attention_mask: &'a Tensor,
    /// Labels [batch, seq_len].
    pub labels: Option<&'a Tensor>,
}

/// Aligner output.
#[derive(Debug, Clone)]
pub struct AlignedBatch {
    /// Embeddings [batch, new_len, hidden_size].
    pub embeddings: Tensor,
    /// Attention mask [batch, new_len].
    pub attention_mask: Tensor,
    /// Labels [batch, new_len].
    pub labels: Option<Tensor>,
    /// Region located in each example (None = passed through).
    pub spans: Vec<Option<RegionSpan>>,
}

/// Locates, compresses and splices reasoning regions for a batch.
#[derive(Debug, Clone)]
pub struct ImplicitTokensAligner {
    locator: SpanLocator,
    aggregator: RegionAggregator,
}

impl ImplicitTokensAligner {
    /// Creates an aligner with fresh (or loaded) weights from `vb`.
    ///
    /// # Arguments
    ///
    /// * `config` - Aligner hyperparameters
    /// * `hidden_size` - Base model hidden size
    /// * `open_id` - Token id of the region open tag
    /// * `close_id` - Token id of the region close tag
    /// * `vb` - VarBuilder owning the aligner parameters
    pub fn new(
        config: &AlignerConfig,
        hidden_size: usize,
        open_id: u32,
        close_id: u32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let queries = ImplicitTokens::new(config.num_implicit_tokens, hidden_size, vb.clone())?;
        let aggregator = RegionAggregator::new(queries, config.num_heads, vb.pp("cross_attention"))?;
        let locator = SpanLocator::new(open_id, close_id, config.open_tag_occurrence_index);
        Ok(Self {
            locator,
            aggregator,
        })
    }

    /// Assembles an aligner from parts.
    pub fn from_parts(locator: SpanLocator, aggregator: RegionAggregator) -> Self {
        Self {
            locator,
            aggregator,
        }
    }

    pub fn locator(&self) -> &SpanLocator {
        &self.locator
    }

    pub fn aggregator(&self) -> &RegionAggregator {
        &self.aggregator
    }

    /// Number of implicit tokens (k).
    pub fn k(&self) -> usize {
        self.aggregator.k()
    }

    /// Runs the aligner over a batch.
    ///
    /// # Arguments
    ///
    /// * `input` - Embeddings, ids, mask and optional labels of the batch
    /// * `pad_embedding` - Pad token embedding [hidden_size]
    pub fn forward(&self, input: AlignerInput<'_>, pad_embedding: &Tensor) -> Result<AlignedBatch> {
        let (batch_size, seq_len, _) = input.embeddings.dims3()?;
        let ids: Vec<Vec<u32>> = input.input_ids.to_dtype(DType::U32)?.to_vec2()?;
        if ids.len() != batch_size || ids.iter().any(|row| row.len() != seq_len) {
            return Err(Error::Config(format!(
                "input_ids shape {:?} does not match embeddings [{batch_size}, {seq_len}, _]",
                input.input_ids.dims()
            )));
        }

        let mut spliced = Vec::with_capacity(batch_size);
        let mut spans = Vec::with_capacity(batch_size);
        for (i, row) in ids.iter().enumerate() {
            let span = self.locator.locate(row)?;
            let labels = input.labels.map(|l| l.get(i)).transpose()?;
            spliced.push(splice(
                &input.embeddings.get(i)?,
                &input.attention_mask.get(i)?,
                labels.as_ref(),
                span,
                &self.aggregator,
            )?);
            spans.push(span);
        }

        let located = spans.iter().filter(|s| s.is_some()).count();
        debug!("aligner: {located}/{batch_size} examples with a located region");

        let padded = pad_batch(spliced, pad_embedding)?;
        Ok(AlignedBatch {
            embeddings: padded.embeddings,
            attention_mask: padded.attention_mask,
            labels: padded.labels,
            spans,
        })
    }
}

/// Owned parameter store of an aligner, persisted as safetensors.
///
/// Build the aligner through [`AlignerWeights::var_builder`] first; loading
/// afterwards overwrites the values in place, so the aligner sees them.
#[derive(Clone)]
pub struct AlignerWeights {
    varmap: VarMap,
}

impl Default for AlignerWeights {
    fn default() -> Self {
        Self::new()
    }
}

impl AlignerWeights {
    pub fn new() -> Self {
        Self {
            varmap: VarMap::new(),
        }
    }

    /// VarBuilder creating the aligner's variables in this store.
    pub fn var_builder(&self, dtype: DType, device: &Device) -> VarBuilder<'static> {
        VarBuilder::from_varmap(&self.varmap, dtype, device)
    }

    /// Trainable variables.
    pub fn all_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Saves all aligner parameters to a safetensors file.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }

    /// Overwrites the aligner parameters from a safetensors file.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        self.varmap.load(path)?;
        Ok(())
    }
}
