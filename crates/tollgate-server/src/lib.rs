//! Control-plane HTTP server.
//!
//! Serves the forwarder callbacks (`/auth`, `/limiter`, `/observer`) and the
//! admin events, and wires the port map, quota coordinator, traffic ingestor,
//! emergency monitor, and config sync around a shared store.

mod admin;
mod callbacks;
mod cli;
mod error;
mod server;
mod state;
pub mod wire;

pub use admin::{handle_healthz, handle_quota_reset, handle_rule_changed, handle_user_changed};
pub use callbacks::{handle_auth, handle_limiter, handle_observer};
pub use cli::{ServeArgs, init_tracing, run};
pub use error::ServerError;
pub use server::{
    build_router, build_state, connect_store, run_with_shutdown, run_with_store, spawn_background,
};
pub use state::AppState;
pub use tokio_util::sync::CancellationToken;
