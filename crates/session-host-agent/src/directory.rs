//! Match membership lookup
//!
//! After allocation the server resolves which players belong to its session.
//! The authorized roster is populated from whatever the directory returns.

use crate::agent::OrchestrationAgent;
use async_trait::async_trait;
use session_host_core::{HostError, PlayerId, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Resolves the members of a matched session
#[async_trait]
pub trait MatchDirectory: Send + Sync {
    async fn match_members(&self, session_id: &str) -> Result<Vec<PlayerId>>;
}

/// Uses the players the agent listed in the allocation call
pub struct InitialPlayersDirectory<A: OrchestrationAgent> {
    agent: Arc<A>,
}

impl<A: OrchestrationAgent> InitialPlayersDirectory<A> {
    pub fn new(agent: Arc<A>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl<A: OrchestrationAgent> MatchDirectory for InitialPlayersDirectory<A> {
    async fn match_members(&self, session_id: &str) -> Result<Vec<PlayerId>> {
        let players = self.agent.initial_players();
        debug!(
            "Session {} has {} initial players",
            session_id,
            players.len()
        );
        Ok(players)
    }
}

/// Fixed session -> members table, typically loaded from a JSON file
/// shaped like `{"<sessionId>": ["p1", "p2"]}`
#[derive(Debug, Clone, Default)]
pub struct StaticMatchDirectory {
    matches: HashMap<String, Vec<PlayerId>>,
}

impl StaticMatchDirectory {
    pub fn new(matches: HashMap<String, Vec<PlayerId>>) -> Self {
        Self { matches }
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            HostError::Config(format!("cannot read match file {}: {}", path.display(), e))
        })?;
        let matches = serde_json::from_str(&text).map_err(|e| {
            HostError::Config(format!("invalid match file {}: {}", path.display(), e))
        })?;
        Ok(Self::new(matches))
    }
}

#[async_trait]
impl MatchDirectory for StaticMatchDirectory {
    async fn match_members(&self, session_id: &str) -> Result<Vec<PlayerId>> {
        self.matches
            .get(session_id)
            .cloned()
            .ok_or_else(|| HostError::MatchLookup(format!("unknown session {}", session_id)))
    }
}
