//! Server activation state

use chrono::{DateTime, Local, Utc};

/// Startup-populated server state plus the maintenance schedule
#[derive(Debug, Clone, Default)]
pub struct ActivationState {
    /// Flips to true once the agent allocates this server
    pub is_activated: bool,
    /// Contents of the optional asset file
    pub asset_text: String,
    /// Thumbprint of the installed game certificate, empty if not found
    pub cert_thumbprint: String,
    /// Latest maintenance time announced by the agent
    pub next_maintenance: Option<DateTime<Utc>>,
}

impl ActivationState {
    pub fn schedule_maintenance(&mut self, at: DateTime<Utc>) {
        self.next_maintenance = Some(at);
    }

    /// Maintenance time in the host's local time zone
    pub fn next_maintenance_local(&self) -> Option<String> {
        self.next_maintenance
            .map(|at| at.with_timezone(&Local).to_string())
    }
}
