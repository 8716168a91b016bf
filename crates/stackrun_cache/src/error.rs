//! Error types for the provider cache.

use thiserror::Error;

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur while caching provider artifacts.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid provider key: {0}")]
    InvalidKey(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("Download failed: {0}")]
    Download(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
