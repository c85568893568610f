//! Common error types for CryptoGram.

use thiserror::Error;

/// Result type alias using CryptoGram's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for CryptoGram operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket bind, send, receive)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}
