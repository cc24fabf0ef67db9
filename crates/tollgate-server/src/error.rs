//! Server error types.

use tollgate_store::StoreError;
use tollgate_sync::SyncError;

/// Fatal startup/runtime error of the control-plane server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config: {0}")]
    Config(String),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("sync: {0}")]
    Sync(#[from] SyncError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
