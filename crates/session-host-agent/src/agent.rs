//! Orchestration agent trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use session_host_core::{ConnectedPlayer, PlayerId, Result};
use std::collections::HashMap;

/// Invoked when the agent asks the server to shut down
pub type ShutdownCallback = Box<dyn Fn() + Send + Sync>;

/// Polled by the agent; return false to report the server unhealthy
pub type HealthCallback = Box<dyn Fn() -> bool + Send + Sync>;

/// Invoked when the agent announces upcoming host maintenance
pub type MaintenanceCallback = Box<dyn Fn(DateTime<Utc>) + Send + Sync>;

/// Facade over the orchestration agent that allocates this server.
///
/// Registered callbacks may be invoked from any thread at any time after
/// registration, concurrently with request handling.
#[async_trait]
pub trait OrchestrationAgent: Send + Sync + 'static {
    /// Connect to the agent. Fails with `HostError::AgentUnavailable`
    /// when it cannot be reached.
    async fn start(&self) -> Result<()>;

    fn register_shutdown_callback(&self, callback: ShutdownCallback);

    fn register_health_callback(&self, callback: HealthCallback);

    fn register_maintenance_callback(&self, callback: MaintenanceCallback);

    /// Current key/value configuration. Empty before the agent has any;
    /// values may change once the server is allocated.
    fn config_settings(&self) -> HashMap<String, String>;

    /// Wait until the agent allocates this server (`true`) or terminates it
    /// without allocation (`false`).
    async fn ready_for_players(&self) -> bool;

    /// Players listed by the allocation call
    fn initial_players(&self) -> Vec<PlayerId>;

    /// Report the connected roster to the agent
    fn update_connected_players(&self, players: &[ConnectedPlayer]) -> Result<()>;

    fn logs_directory(&self) -> String;

    /// Write a line into the agent-side log
    fn log_message(&self, message: &str);
}
