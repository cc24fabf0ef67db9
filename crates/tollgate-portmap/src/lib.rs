//! Listen-port ownership cache.
//!
//! Maps forwarder listen ports to the owning user and rule. Lookups are
//! lock-free reads of an [`arc_swap::ArcSwap`] snapshot that is rebuilt from
//! the store on rule mutations, on TTL expiry, on demand, and on the first
//! lookup after startup.
//!
//! The cache is per-instance and eventually consistent: a lookup may serve a
//! mapping up to one TTL old, and [`PortMapCache::invalidate`] only affects
//! the local instance.

mod cache;
mod snapshot;

pub use cache::{PortMapCache, PortMapConfig, PortMapStats};
pub use snapshot::{MappingSnapshot, PortMapping};
