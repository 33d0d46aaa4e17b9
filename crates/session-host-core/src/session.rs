//! Process-wide session state

use crate::activation::ActivationState;
use crate::roster::{RosterSnapshot, SessionRoster};
use crate::snapshot::{self, ConfigSnapshot};
use std::collections::HashMap;

/// Everything mutated by request handlers and agent callbacks.
///
/// Callers keep one instance behind a single lock so admission, counting and
/// rendering observe the same state.
#[derive(Debug, Default)]
pub struct SessionState {
    pub roster: SessionRoster,
    pub activation: ActivationState,
    /// Admitted requests so far, diagnostics only
    pub request_count: u64,
}

/// Result of a successful admission
#[derive(Debug, Clone)]
pub struct Admission {
    pub request_count: u64,
    pub roster: RosterSnapshot,
    pub activation: ActivationState,
}

impl SessionState {
    pub fn new(activation: ActivationState) -> Self {
        Self {
            activation,
            ..Default::default()
        }
    }

    /// Admit the token if it is authorized.
    ///
    /// Returns `None` and leaves state untouched otherwise.
    pub fn try_admit(&mut self, token: &str) -> Option<Admission> {
        if !self.roster.is_authorized(token) {
            return None;
        }
        self.roster.admit(token);
        self.request_count += 1;
        Some(Admission {
            request_count: self.request_count,
            roster: self.roster.snapshot(),
            activation: self.activation.clone(),
        })
    }
}

impl Admission {
    pub fn render(
        &self,
        agent_config: HashMap<String, String>,
        logs_directory: &str,
    ) -> ConfigSnapshot {
        snapshot::render(agent_config, &self.activation, &self.roster, logs_directory)
    }
}
