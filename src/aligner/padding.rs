//! Right-padding of spliced examples into a rectangular batch.

use candle_core::Tensor;

use super::splice::SplicedExample;
use crate::error::{Error, Result};
use crate::IGNORE_INDEX;

/// Rectangular batch ready for the base model.
#[derive(Debug, Clone)]
pub struct PaddedBatch {
    /// Embeddings [batch, max_len, hidden_size].
    pub embeddings: Tensor,
    /// Attention mask [batch, max_len]; padded positions are 0.
    pub attention_mask: Tensor,
    /// Labels [batch, max_len]; padded positions carry the ignore index.
    pub labels: Option<Tensor>,
}

/// Pads every example to the batch's maximum length.
///
/// # Arguments
///
/// * `examples` - Spliced examples, either all with labels or all without
/// * `pad_embedding` - Embedding of the pad token [hidden_size], looked up once per forward pass
pub fn pad_batch(examples: Vec<SplicedExample>, pad_embedding: &Tensor) -> Result<PaddedBatch> {
    if examples.is_empty() {
        return Err(Error::Config("cannot pad an empty batch".into()));
    }
    let hidden_size = pad_embedding.dims1()?;
    let labelled = examples.iter().filter(|e| e.labels.is_some()).count();
    if labelled != 0 && labelled != examples.len() {
        return Err(Error::Config("either all or none of the examples must carry labels".into()));
    }
    let max_len = examples.iter().map(SplicedExample::len).max().unwrap_or(0);

    let mut embeddings = Vec::with_capacity(examples.len());
    let mut masks = Vec::with_capacity(examples.len());
    let mut labels = Vec::with_capacity(labelled);
    for example in examples {
        let pad_len = max_len - example.len();
        if pad_len == 0 {
            embeddings.push(example.embeddings);
            masks.push(example.attention_mask);
            labels.extend(example.labels);
            continue;
        }

        let pad_rows = pad_embedding
            .unsqueeze(0)?
            .broadcast_as((pad_len, hidden_size))?
            .contiguous()?;
        embeddings.push(Tensor::cat(&[&example.embeddings, &pad_rows], 0)?);

        let mask = &example.attention_mask;
        let pad_mask = Tensor::zeros(pad_len, mask.dtype(), mask.device())?;
        masks.push(Tensor::cat(&[mask, &pad_mask], 0)?);

        if let Some(l) = &example.labels {
            let pad_labels = Tensor::full(IGNORE_INDEX, pad_len, l.device())?.to_dtype(l.dtype())?;
            labels.push(Tensor::cat(&[l, &pad_labels], 0)?);
        }
    }

    Ok(PaddedBatch {
        embeddings: Tensor::stack(&embeddings, 0)?,
        attention_mask: Tensor::stack(&masks, 0)?,
        labels: if labels.is_empty() {
            None
        } else {
            Some(Tensor::stack(&labels, 0)?)
        },
    })
}
