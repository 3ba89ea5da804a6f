//! Right-padded batching of token ids.

use candle_core::{Device, Tensor};

use super::labels::LabeledExample;
use crate::error::{Error, Result};
use crate::IGNORE_INDEX;

/// Token-level batch fed to the alignment model.
#[derive(Debug, Clone)]
pub struct TokenizedBatch {
    /// Token ids [batch, seq_len] (u32).
    pub input_ids: Tensor,
    /// 1 for real tokens, 0 for padding [batch, seq_len] (u32).
    pub attention_mask: Tensor,
    /// Labels [batch, seq_len] (i64), None for inference batches.
    pub labels: Option<Tensor>,
}

impl TokenizedBatch {
    pub fn batch_size(&self) -> usize {
        self.input_ids.dims().first().copied().unwrap_or(0)
    }
}

/// Collates labeled examples.
///
/// The attention mask follows each example's length, never `id != pad_id`:
/// the pad id is often the EOS id, which also appears in real text.
pub fn collate(examples: &[LabeledExample], pad_id: u32, device: &Device) -> Result<TokenizedBatch> {
    if examples.is_empty() {
        return Err(Error::Config("cannot collate an empty batch".to_string()));
    }
    let max_len = examples.iter().map(|e| e.len()).max().unwrap_or(0);

    let mut ids = Vec::with_capacity(examples.len() * max_len);
    let mut mask = Vec::with_capacity(examples.len() * max_len);
    let mut labels = Vec::with_capacity(examples.len() * max_len);
    for example in examples {
        if example.labels.len() != example.input_ids.len() {
            return Err(Error::Config(format!(
                "example has {} ids but {} labels",
                example.input_ids.len(),
                example.labels.len()
            )));
        }
        let pad = max_len - example.len();
        ids.extend_from_slice(&example.input_ids);
        ids.extend(std::iter::repeat(pad_id).take(pad));
        mask.extend(std::iter::repeat(1u32).take(example.len()));
        mask.extend(std::iter::repeat(0u32).take(pad));
        labels.extend_from_slice(&example.labels);
        labels.extend(std::iter::repeat(IGNORE_INDEX).take(pad));
    }

    let shape = (examples.len(), max_len);
    Ok(TokenizedBatch {
        input_ids: Tensor::from_vec(ids, shape, device)?,
        attention_mask: Tensor::from_vec(mask, shape, device)?,
        labels: Some(Tensor::from_vec(labels, shape, device)?),
    })
}

/// Collates raw token sequences (no labels).
pub fn collate_unlabeled(sequences: &[Vec<u32>], pad_id: u32, device: &Device) -> Result<TokenizedBatch> {
    if sequences.is_empty() {
        return Err(Error::Config("cannot collate an empty batch".to_string()));
    }
    let max_len = sequences.iter().map(Vec::len).max().unwrap_or(0);

    let mut ids = Vec::with_capacity(sequences.len() * max_len);
    let mut mask = Vec::with_capacity(sequences.len() * max_len);
    for seq in sequences {
        let pad = max_len - seq.len();
        ids.extend_from_slice(seq);
        ids.extend(std::iter::repeat(pad_id).take(pad));
        mask.extend(std::iter::repeat(1u32).take(seq.len()));
        mask.extend(std::iter::repeat(0u32).take(pad));
    }

    let shape = (sequences.len(), max_len);
    Ok(TokenizedBatch {
        input_ids: Tensor::from_vec(ids, shape, device)?,
        attention_mask: Tensor::from_vec(mask, shape, device)?,
        labels: None,
    })
}
