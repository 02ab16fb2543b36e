//! Error types for iamap

use thiserror::Error;

/// Result type alias for iamap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in iamap operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    #[error("Malformed node: {0}")]
    MalformedNode(String),

    #[error("Depth {depth} is out of range, maximum depth is {max_depth}")]
    DepthRange { depth: usize, max_depth: usize },

    #[error("Hasher produced {actual} bytes, expected at least {expected}")]
    HashLength { expected: usize, actual: usize },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Traversal error: {0}")]
    Traversal(String),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedNode(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::ConfigValidation(msg.into())
    }
}
