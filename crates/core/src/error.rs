//! Error types shared across the workspace.

use thiserror::Error;

/// Errors produced by the core algebra and model layer.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller passed an argument outside the accepted domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A payload could not be interpreted as the expected shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
