//! Typed errors callers may want to match on.
//!
//! Everything else propagates as a plain [`anyhow::Error`]. Use
//! `err.downcast_ref::<IndexError>()` to classify.

use thiserror::Error;

use crate::models::SourceType;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// No index is stored under the requested key.
    #[error("index not found: {key}")]
    NotFound { key: String },

    /// The source's type disagrees with the type recorded in the stored index.
    #[error("source type mismatch: index was built from {expected}, but source is {found}")]
    TypeMismatch {
        expected: SourceType,
        found: SourceType,
    },

    /// The key has no usable characters once sanitized.
    #[error("invalid index key: {key:?}")]
    InvalidKey { key: String },

    /// File tools were requested on a client opened without a source.
    #[error("file access requires a source; open the client with one")]
    FileAccessUnavailable,
}
