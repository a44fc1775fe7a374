//! Error types for the conversion pipeline.
//!
//! Only input that is too broken to tokenize, serialization failures and
//! explicit ceiling enforcement surface as `Err`. Structural problems in the
//! produced graph are reported as [`crate::preflight::ValidationIssue`]s.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, IrError>;

/// Errors that abort a conversion run.
#[derive(Error, Debug)]
pub enum IrError {
    /// Input could not be tokenized.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// An artifact or chunk is still over the hard ceiling after chunking.
    #[error("{artifact} is {size} bytes, over the {limit} byte ceiling")]
    SizeLimitExceeded {
        artifact: String,
        size: usize,
        limit: usize,
    },

    /// The output document could not be serialized.
    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The output document does not satisfy the embedded schema.
    #[error("document failed schema validation:\n{0}")]
    Schema(String),
}

/// Which input a [`ParseError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Css,
    Html,
    Tokens,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InputKind::Css => "stylesheet",
            InputKind::Html => "markup",
            InputKind::Tokens => "token manifest",
        };
        f.write_str(label)
    }
}

/// Malformed input, with the byte offset where scanning gave up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to parse {input} at byte {offset}: {message}")]
pub struct ParseError {
    pub input: InputKind,
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(input: InputKind, offset: usize, message: impl Into<String>) -> Self {
        Self {
            input,
            offset,
            message: message.into(),
        }
    }
}
