//! Sequence reassembly: replacing a located region with aggregated vectors.
//!
//! | Region            | Output                                        |
//! |-------------------|-----------------------------------------------|
//! | not located       | input unchanged                               |
//! | empty (adjacent)  | `[0, start)` ++ `(end, T)`                    |
//! | non-empty         | `[0, start)` ++ k aggregated ++ `(end, T)`    |
//!
//! The tag tokens at `start` and `end` are dropped whenever a region is
//! located. Masks get k ones for the aggregated vectors and labels get k
//! ignore entries, so all three sequences stay positionally aligned.

use candle_core::Tensor;

use super::aggregator::RegionAggregator;
use super::span::RegionSpan;
use crate::error::{Error, Result};
use crate::IGNORE_INDEX;

/// One example after splicing; lengths may differ across a batch.
#[derive(Debug, Clone)]
pub struct SplicedExample {
    /// Embeddings [len, hidden_size].
    pub embeddings: Tensor,
    /// Attention mask [len].
    pub attention_mask: Tensor,
    /// Labels [len], when supervising.
    pub labels: Option<Tensor>,
}

impl SplicedExample {
    /// Sequence length after splicing.
    pub fn len(&self) -> usize {
        self.embeddings.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Splices one example according to its located span.
///
/// # Arguments
///
/// * `embeddings` - Token embeddings [seq_len, hidden_size]
/// * `attention_mask` - Mask [seq_len]
/// * `labels` - Optional labels [seq_len]
/// * `span` - Located region, None for pass-through
/// * `aggregator` - Compresses non-empty regions to k vectors
pub fn splice(
    embeddings: &Tensor,
    attention_mask: &Tensor,
    labels: Option<&Tensor>,
    span: Option<RegionSpan>,
    aggregator: &RegionAggregator,
) -> Result<SplicedExample> {
    let (seq_len, _) = embeddings.dims2()?;
    let mask_len = attention_mask.dims1()?;
    let labels_len = labels.map(|l| l.dims1()).transpose()?;
    if mask_len != seq_len || labels_len.is_some_and(|len| len != seq_len) {
        return Err(Error::Config(format!(
            "sequence length mismatch: embeddings {seq_len}, mask {mask_len}, labels {labels_len:?}"
        )));
    }

    let Some(span) = span else {
        return Ok(SplicedExample {
            embeddings: embeddings.clone(),
            attention_mask: attention_mask.clone(),
            labels: labels.cloned(),
        });
    };
    if span.start >= span.end || span.end >= seq_len {
        return Err(Error::Config(format!(
            "span {span:?} out of bounds for sequence of length {seq_len}"
        )));
    }

    let inserted = if span.is_empty() {
        None
    } else {
        let region = embeddings.narrow(0, span.start + 1, span.inner_len())?;
        Some(aggregator.aggregate(&region)?)
    };
    let k = inserted.as_ref().map_or(0, |t| t.dims()[0]);

    let embeddings = splice_rows(embeddings, span, inserted)?;
    let mask_fill = (k > 0)
        .then(|| Tensor::ones(k, attention_mask.dtype(), attention_mask.device()))
        .transpose()?;
    let attention_mask = splice_rows(attention_mask, span, mask_fill)?;
    let labels = labels
        .map(|labels| {
            let fill = (k > 0)
                .then(|| {
                    Tensor::full(IGNORE_INDEX, k, labels.device())
                        .and_then(|t| t.to_dtype(labels.dtype()))
                })
                .transpose()?;
            splice_rows(labels, span, fill)
        })
        .transpose()?;

    Ok(SplicedExample {
        embeddings,
        attention_mask,
        labels,
    })
}

/// `x[0..start] ++ fill ++ x[end+1..]` along the first dimension.
fn splice_rows(x: &Tensor, span: RegionSpan, fill: Option<Tensor>) -> Result<Tensor> {
    let len = x.dims()[0];
    let tail_start = span.end + 1;

    let mut pieces = Vec::with_capacity(3);
    if span.start > 0 {
        pieces.push(x.narrow(0, 0, span.start)?);
    }
    pieces.extend(fill);
    if tail_start < len {
        pieces.push(x.narrow(0, tail_start, len - tail_start)?);
    }

    if pieces.is_empty() {
        let mut shape = x.dims().to_vec();
        shape[0] = 0;
        return Ok(Tensor::zeros(shape, x.dtype(), x.device())?);
    }
    Ok(Tensor::cat(&pieces, 0)?)
}
