//! Store error types.

/// Store error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error (connection, query, pool).
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    /// Unsupported database URL scheme.
    #[error("unsupported database URL scheme")]
    UnsupportedScheme,

    /// A row could not be interpreted.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Backend unreachable (used by fakes to simulate outages).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Create a corrupt-row error from any display-able detail.
    #[inline]
    pub fn corrupt<E: std::fmt::Display>(detail: E) -> Self {
        Self::Corrupt(detail.to_string())
    }
}
