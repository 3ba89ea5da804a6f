//! Label masking.
//!
//! The loss is computed on the answer only: every token of the training
//! prompt gets [`IGNORE_INDEX`] as its label.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::dataset::CotRecord;
use super::prompt::PromptTemplate;
use crate::error::Result;
use crate::tokenizer::TextTokenizer;
use crate::IGNORE_INDEX;

/// Text of one training example plus the token length of its prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedExample {
    /// Training prompt followed by the target.
    pub full_text: String,
    /// Number of tokens belonging to the prompt.
    pub prompt_length: usize,
}

/// Token ids with their labels (same length).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledExample {
    pub input_ids: Vec<u32>,
    pub labels: Vec<i64>,
}

impl LabeledExample {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Builds the training text of a record and measures its prompt.
///
/// The EOS string is stripped from the prompt text, and one EOS id is
/// dropped from the prompt ids if the tokenizer still produced it.
pub fn prepare_example(
    record: &CotRecord,
    template: &PromptTemplate,
    tokenizer: &dyn TextTokenizer,
) -> Result<PreparedExample> {
    let mut prompt = template.training_prompt(&record.problem, &record.logic_trajectory);
    let eos = tokenizer.eos_token();
    if !eos.is_empty() && prompt.contains(eos) {
        prompt = prompt.replace(eos, "");
    }

    let mut prompt_ids = tokenizer.encode(&prompt)?;
    let eos_id = tokenizer.eos_token_id();
    if let Some(pos) = prompt_ids.iter().position(|&id| id == eos_id) {
        prompt_ids.remove(pos);
    }

    let full_text = prompt + &template.target(&record.answer);
    Ok(PreparedExample {
        full_text,
        prompt_length: prompt_ids.len(),
    })
}

/// Tokenizes a prepared example and masks its prompt tokens.
///
/// A prompt length beyond the tokenized length is clamped, so the whole
/// sequence is masked.
pub fn build_labels(
    prepared: &PreparedExample,
    tokenizer: &dyn TextTokenizer,
) -> Result<LabeledExample> {
    let input_ids = tokenizer.encode(&prepared.full_text)?;
    let prompt_length = if prepared.prompt_length > input_ids.len() {
        warn!(
            "prompt length {} exceeds tokenized length {}, masking the whole example",
            prepared.prompt_length,
            input_ids.len()
        );
        input_ids.len()
    } else {
        prepared.prompt_length
    };

    let labels = std::iter::repeat(IGNORE_INDEX)
        .take(prompt_length)
        .chain(input_ids[prompt_length..].iter().map(|&id| id as i64))
        .collect();
    Ok(LabeledExample { input_ids, labels })
}

/// Prepares and labels every record, skipping (and logging) failures.
pub fn label_records(
    records: &[CotRecord],
    template: &PromptTemplate,
    tokenizer: &dyn TextTokenizer,
) -> Vec<LabeledExample> {
    records
        .iter()
        .enumerate()
        .filter_map(|(i, record)| {
            let result = prepare_example(record, template, tokenizer)
                .and_then(|prepared| build_labels(&prepared, tokenizer));
            match result {
                Ok(example) => Some(example),
                Err(e) => {
                    warn!("skipping example {i}: {e}");
                    None
                }
            }
        })
        .collect()
}
