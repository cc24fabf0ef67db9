//! Authoritative storage for users, forward rules, and the global policy.
//!
//! The [`ControlStore`] trait is the only seam the rest of the control plane
//! sees; [`sql::SqlStore`] backs it with PostgreSQL/MySQL/SQLite via SQLx,
//! and [`MemoryStore`] provides an in-process fake for tests and component
//! wiring without a database.

mod error;
mod memory;
pub mod sql;
mod traits;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use sql::{DatabaseType, SqlStore, SqlStoreConfig};
pub use traits::ControlStore;
