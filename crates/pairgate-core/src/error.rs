//! Error type shared by every pairgate crate.

use thiserror::Error;

/// Top-level error type for pairgate.
#[derive(Debug, Error)]
pub enum PairgateError {
    /// Configuration could not be read or is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// Reading or writing the credentials store failed.
    #[error("credentials error: {0}")]
    Credentials(String),

    /// The upstream connector failed to start, connect, or log out.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Protocol version lookup failed.
    #[error("version lookup failed: {0}")]
    Version(String),

    /// Filesystem error outside the credentials store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
