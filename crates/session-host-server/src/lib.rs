//! # session-host-server
//!
//! HTTP side of the session host.
//!
//! This crate provides:
//! - `HostContext`, the lock-guarded state shared with agent callbacks
//! - `RequestGate`, the token check deciding admission per request
//! - The HTTP listener loop serving config snapshots
//! - `LifecycleController`, the startup sequence and listener supervisor

pub mod context;
pub mod gate;
pub mod lifecycle;
pub mod listener;

pub use context::HostContext;
pub use gate::{GateOutcome, RequestGate};
pub use lifecycle::{HostSettings, LifecycleController, LifecycleOutcome, RunningHost};
pub use listener::ListenerConfig;
