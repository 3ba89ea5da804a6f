//! Text ↔ token-id boundary.
//!
//! The aligner and the data pipeline only need a handful of tokenizer
//! operations, so they depend on [`TextTokenizer`] rather than on a concrete
//! tokenizer implementation. [`HfTokenizer`] adapts a HuggingFace
//! `tokenizer.json`.

use std::path::Path;

use tokenizers::Tokenizer;
use tracing::info;

use crate::error::{Error, Result};

/// End-of-sequence tokens tried, in order, when none is configured.
const EOS_CANDIDATES: &[&str] = &[
    "<｜end▁of▁sentence｜>",
    "<|endoftext|>",
    "<|im_end|>",
    "</s>",
];

/// Operations the pipeline needs from a tokenizer.
pub trait TextTokenizer {
    /// Encodes text without adding special tokens.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decodes token ids back to text.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Looks up a single token string.
    fn token_to_id(&self, token: &str) -> Option<u32>;

    /// End-of-sequence token string.
    fn eos_token(&self) -> &str;

    /// End-of-sequence token id.
    fn eos_token_id(&self) -> u32;

    /// Padding token id (the EOS id when the tokenizer defines no pad token).
    fn pad_token_id(&self) -> u32;

    /// Looks up a token string, failing when it is not in the vocabulary.
    fn convert_tokens_to_ids(&self, token: &str) -> Result<u32> {
        self.token_to_id(token)
            .ok_or_else(|| Error::Tokenization(format!("token '{token}' is not in the vocabulary")))
    }
}

/// [`TextTokenizer`] backed by a HuggingFace `tokenizers::Tokenizer`.
#[derive(Clone)]
pub struct HfTokenizer {
    inner: Tokenizer,
    eos_token: String,
    eos_token_id: u32,
    pad_token_id: u32,
}

impl HfTokenizer {
    /// Loads `tokenizer.json` from disk.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to tokenizer.json
    /// * `eos_token` - EOS token string; when None, well-known EOS tokens are tried
    pub fn from_file(path: &Path, eos_token: Option<&str>) -> Result<Self> {
        let inner = Tokenizer::from_file(path)
            .map_err(|e| Error::Tokenization(format!("failed to load {}: {e}", path.display())))?;
        Self::new(inner, eos_token)
    }

    /// Wraps an already constructed tokenizer.
    pub fn new(inner: Tokenizer, eos_token: Option<&str>) -> Result<Self> {
        let (eos_token, eos_token_id) = match eos_token {
            Some(token) => {
                let id = inner.token_to_id(token).ok_or_else(|| {
                    Error::Tokenization(format!("EOS token '{token}' is not in the vocabulary"))
                })?;
                (token.to_string(), id)
            }
            None => EOS_CANDIDATES
                .iter()
                .find_map(|token| inner.token_to_id(token).map(|id| (token.to_string(), id)))
                .ok_or_else(|| Error::Tokenization("no known EOS token in vocabulary".into()))?,
        };

        let pad_token_id = match inner.get_padding() {
            Some(padding) => padding.pad_id,
            None => {
                info!("tokenizer has no pad token, using EOS '{eos_token}' ({eos_token_id})");
                eos_token_id
            }
        };

        Ok(Self {
            inner,
            eos_token,
            eos_token_id,
            pad_token_id,
        })
    }

    /// Returns the wrapped tokenizer.
    pub fn inner(&self) -> &Tokenizer {
        &self.inner
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| Error::Tokenization(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, false)
            .map_err(|e| Error::Tokenization(e.to_string()))
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }

    fn eos_token(&self) -> &str {
        &self.eos_token
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }
}

#[cfg(test)]
mod tests {
    use tokenizers::models::wordlevel::WordLevel;

    use super::*;

    fn word_level_tokenizer() -> Tokenizer {
        let vocab = [("<|endoftext|>", 0), ("hello", 1), ("[UNK]", 2)]
            .into_iter()
            .map(|(token, id)| (token.to_string(), id))
            .collect();
        let model = WordLevel::builder()
            .vocab(vocab)
            .unk_token("[UNK]".to_string())
            .build()
            .unwrap();
        Tokenizer::new(model)
    }

    #[test]
    fn test_eos_detected_and_pad_falls_back() {
        let tokenizer = HfTokenizer::new(word_level_tokenizer(), None).unwrap();

        assert_eq!(tokenizer.eos_token(), "<|endoftext|>");
        assert_eq!(tokenizer.eos_token_id(), 0);
        assert_eq!(tokenizer.pad_token_id(), 0);
    }

    #[test]
    fn test_explicit_eos_must_exist() {
        let result = HfTokenizer::new(word_level_tokenizer(), Some("</s>"));
        assert!(matches!(result, Err(Error::Tokenization(_))));
    }

    #[test]
    fn test_convert_tokens_to_ids() {
        let tokenizer = HfTokenizer::new(word_level_tokenizer(), None).unwrap();

        assert_eq!(tokenizer.convert_tokens_to_ids("hello").unwrap(), 1);
        assert!(tokenizer.convert_tokens_to_ids("<think>").is_err());
        assert_eq!(tokenizer.encode("hello").unwrap(), vec![1]);
    }
}
