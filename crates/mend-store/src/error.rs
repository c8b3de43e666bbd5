//! Error types for the stores

use std::path::PathBuf;

/// Errors from cooldown or history storage
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable or refusing requests
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// IO error on a file-backed store
    #[error("io error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Stored data could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
