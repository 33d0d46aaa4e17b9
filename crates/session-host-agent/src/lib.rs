//! Orchestration agent facade and external collaborators
//!
//! This crate provides:
//! - `OrchestrationAgent` trait the host drives its lifecycle through
//! - `LocalAgent`, a file-configured in-process agent
//! - Match membership lookup (`MatchDirectory`)
//! - Installed certificate lookup (`CertificateStore`)

pub mod agent;
pub mod certs;
pub mod directory;
pub mod local;

pub use agent::{HealthCallback, MaintenanceCallback, OrchestrationAgent, ShutdownCallback};
pub use certs::{CertificateStore, FolderCertificateStore};
pub use directory::{InitialPlayersDirectory, MatchDirectory, StaticMatchDirectory};
pub use local::{AgentState, Allocation, LocalAgent, LocalAgentConfig, LocalAgentHandle};
