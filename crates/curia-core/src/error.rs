//! Error types for curia.

use thiserror::Error;

/// Result type alias using curia's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for curia operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A layer adapter could not compare two annotations (e.g. feature sets
    /// from different type system versions, broken chain links).
    #[error("Structural mismatch on layer {layer}: {reason}")]
    StructuralMismatch { layer: String, reason: String },

    /// Document store read/write failed
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid configuration (missing target owner, bad strategy parameters).
    ///
    /// This is a precondition violation and aborts a whole curation batch.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a structural mismatch on `layer`.
    pub fn mismatch(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::StructuralMismatch {
            layer: layer.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a precondition violation that must abort a batch
    /// rather than a single document.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
