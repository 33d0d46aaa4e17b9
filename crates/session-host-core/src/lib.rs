//! # session-host-core
//!
//! Core types for the game session host.
//!
//! This crate provides the state shared between the HTTP request gate and the
//! orchestration agent callbacks:
//! - Authorized and connected player rosters
//! - Server activation state and maintenance schedule
//! - Config snapshot rendering
//! - Error taxonomy and well-known config keys

pub mod activation;
pub mod error;
pub mod keys;
pub mod roster;
pub mod session;
pub mod snapshot;

pub use activation::ActivationState;
pub use error::{HostError, Result};
pub use roster::{ConnectedPlayer, PlayerId, RosterSnapshot, SessionRoster};
pub use session::{Admission, SessionState};
pub use snapshot::{ConfigSnapshot, render};
