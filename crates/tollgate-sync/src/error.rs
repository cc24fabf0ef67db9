//! Sync error types.

use tollgate_store::StoreError;

/// Configuration sync error.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The rule/user state could not be read.
    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// The rendered document could not be serialized.
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The rendered document could not be written.
    #[error("write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The forwarder restart command failed after exhausting retries.
    #[error("restart: {0}")]
    Restart(String),
}
