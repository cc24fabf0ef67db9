//! SQL control store.
//!
//! Supports PostgreSQL, MySQL/MariaDB, and SQLite through SQLx's `Any`
//! driver. Expected schema (migrations are managed outside this crate):
//!
//! ```sql
//! CREATE TABLE tollgate_users (
//!     id            INTEGER PRIMARY KEY,
//!     name          TEXT    NOT NULL,
//!     role          TEXT    NOT NULL DEFAULT 'user',     -- admin | user
//!     status        TEXT    NOT NULL DEFAULT 'active',   -- active | suspended | expired
//!     quota_bytes   BIGINT  NOT NULL DEFAULT 0,          -- 0 = unlimited
//!     used_bytes    BIGINT  NOT NULL DEFAULT 0,
//!     expires_at    BIGINT  NOT NULL DEFAULT 0,          -- unix secs, 0 = never
//!     port_start    INTEGER NOT NULL DEFAULT 0,          -- 0 = no range
//!     port_end      INTEGER NOT NULL DEFAULT 0,
//!     extra_ports   TEXT    NOT NULL DEFAULT '',         -- comma-separated
//!     rate_in_bps   BIGINT  NOT NULL DEFAULT 0,          -- 0 = unlimited
//!     rate_out_bps  BIGINT  NOT NULL DEFAULT 0
//! );
//!
//! CREATE TABLE tollgate_rules (
//!     id             INTEGER PRIMARY KEY,
//!     user_id        BIGINT  NOT NULL,
//!     source_port    INTEGER NOT NULL UNIQUE,
//!     target_address TEXT    NOT NULL,
//!     protocol       TEXT    NOT NULL DEFAULT 'tcp',     -- tcp | udp | both
//!     used_bytes     BIGINT  NOT NULL DEFAULT 0
//! );
//!
//! CREATE TABLE tollgate_settings (
//!     id                 INTEGER PRIMARY KEY,             -- single row, id = 1
//!     forwarding_enabled INTEGER NOT NULL DEFAULT 1,
//!     public_bind        INTEGER NOT NULL DEFAULT 0
//! );
//! ```
//!
//! Note there is no activity column on rules: whether a rule is live is
//! always computed from the owning user and the global policy.

mod backend;
mod config;
mod queries;


pub use backend::{DatabaseType, SqlStore};
pub use config::SqlStoreConfig;
