//! Forwarder configuration sync for the tollgate control plane.
//!
//! [`render`] turns current store state into the forwarder's declarative
//! configuration; [`SyncCoordinator`] diffs it against the last applied
//! document and restarts the external forwarder only on meaningful change,
//! with triggered syncs coalesced and a periodic reconciliation sweep as a
//! safety net.

mod coordinator;
mod error;
mod render;
mod restart;

pub use coordinator::{RestartBackoff, SyncCoordinator, SyncOutcome, SyncSettings};
pub use error::SyncError;
pub use render::{ForwarderConfig, ServiceSpec, render};
pub use restart::{CommandControl, ForwarderControl, NoopControl};
