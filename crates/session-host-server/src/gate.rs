//! Request gate
//!
//! Every request walks `RECEIVED -> CHECKING_TOKEN -> {ADMITTED, REJECTED}`:
//! - RECEIVED: a request arrived; a missing token rejects immediately
//! - CHECKING_TOKEN: the token is looked up in the authorized roster
//! - REJECTED: nothing changes; the caller gets 403 with its token echoed
//! - ADMITTED: the roster grows, the agent is told, a snapshot is rendered
//!
//! Rejections are not remembered; every request is gated on its own.

use crate::context::HostContext;
use session_host_agent::OrchestrationAgent;
use session_host_core::ConfigSnapshot;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Terminal state of a gated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Admitted {
        request_count: u64,
        snapshot: ConfigSnapshot,
    },
    Rejected,
}

/// Validates player tokens against the session roster
pub struct RequestGate<A: OrchestrationAgent> {
    context: Arc<HostContext>,
    agent: Arc<A>,
}

impl<A: OrchestrationAgent> RequestGate<A> {
    pub fn new(context: Arc<HostContext>, agent: Arc<A>) -> Self {
        Self { context, agent }
    }

    pub fn context(&self) -> &Arc<HostContext> {
        &self.context
    }

    /// Gate one request carrying `token` (None when the header is absent)
    pub fn evaluate(&self, token: Option<&str>) -> GateOutcome {
        let Some(token) = token else {
            debug!("Request without token rejected");
            return GateOutcome::Rejected;
        };
        debug!("playerId got from http header: {}", token);

        let Some(admission) = self.context.try_admit(token) else {
            info!("Rejected unauthorized token {:?}", token);
            return GateOutcome::Rejected;
        };

        // Pushed outside the lock; a failed push never fails the request
        if let Err(e) = self
            .agent
            .update_connected_players(&admission.roster.connected)
        {
            warn!("Failed to report connected players to agent: {}", e);
        }

        info!(
            "Player count: {}. Current request count: {}.",
            admission.roster.connected.len(),
            admission.request_count
        );

        let snapshot = admission.render(self.agent.config_settings(), &self.agent.logs_directory());
        GateOutcome::Admitted {
            request_count: admission.request_count,
            snapshot,
        }
    }
}
