//! Core domain types shared by all tollgate crates.
//!
//! This crate is intentionally thin: plain data types, the pure rule-activity
//! function, quota decision types, service-key naming, and the internal event
//! bus. No storage, no I/O.

pub mod defaults;
pub mod decision;
pub mod events;
pub mod service_key;
pub mod types;

pub use decision::{AlertLevel, CheckReason, DenyReason, QuotaDecision};
pub use events::{ControlEvent, EventBus, QuotaChanged, RuleChanged, TrafficAccounted};
pub use service_key::{parse_service_port, service_name, udp_service_name};
pub use types::{
    ForwardRule, GlobalPolicy, PortRange, Protocol, TrafficDelta, User, UserRole, UserStatus,
    compute_active, now_unix,
};
