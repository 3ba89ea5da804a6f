//! Error types for implicit-tokens.

use thiserror::Error;

/// Result type alias for implicit-tokens operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for implicit-tokens.
#[derive(Error, Debug)]
pub enum Error {
    /// Fewer open tags in a sequence than the configured ordinal requires.
    #[error("open tag occurrence {ordinal} requested but only {found} found")]
    OrdinalIndexOutOfRange { ordinal: usize, found: usize },

    /// A generated sample lacks the reasoning tags or has no usable content.
    #[error("malformed generation output: {0}")]
    MalformedGenerationOutput(String),

    /// Two datasets with different field sets cannot be merged.
    #[error("schema mismatch: {left:?} vs {right:?}")]
    SchemaMismatch {
        left: Vec<String>,
        right: Vec<String>,
    },

    /// A named split is missing from a dataset dictionary.
    #[error("dataset split '{0}' not found")]
    MissingSplit(String),

    /// Model loading failed.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Tokenization error.
    #[error("tokenization error: {0}")]
    Tokenization(String),

    /// Tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
