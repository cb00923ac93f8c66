//! Error types for the arbor tree generator

use thiserror::Error;

/// Main error type for skeleton generation and parameter IO
#[derive(Debug, Error)]
pub enum Error {
    /// Parameters outside the domain the algorithm defines
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
