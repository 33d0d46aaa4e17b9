//! Authorized and connected player rosters

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Unique identifier for a player (the token presented over HTTP)
pub type PlayerId = String;

/// A player admitted through the request gate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectedPlayer {
    pub player_id: PlayerId,
}

impl ConnectedPlayer {
    pub fn new(player_id: impl Into<PlayerId>) -> Self {
        Self {
            player_id: player_id.into(),
        }
    }
}

/// Allow-list fixed at allocation plus the append-only connected roster
#[derive(Debug, Default)]
pub struct SessionRoster {
    /// `None` until allocation resolves a non-empty member list
    authorized: Option<Vec<PlayerId>>,
    connected: Vec<ConnectedPlayer>,
}

/// Consistent copy of both rosters for rendering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterSnapshot {
    pub authorized: Vec<PlayerId>,
    pub connected: Vec<ConnectedPlayer>,
}

impl SessionRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the authorized set.
    ///
    /// An empty list leaves the roster unset so nobody is admitted. Once a
    /// non-empty set is stored, later calls are ignored.
    pub fn set_authorized(&mut self, ids: Vec<PlayerId>) {
        if self.authorized.is_some() {
            warn!("Authorized players already set, ignoring {} new ids", ids.len());
            return;
        }
        if ids.is_empty() {
            return;
        }
        self.authorized = Some(ids);
    }

    /// True iff the token is non-empty and in the authorized set
    pub fn is_authorized(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        self.authorized
            .as_ref()
            .is_some_and(|ids| ids.iter().any(|id| id == token))
    }

    /// Append a connected player. Repeated tokens are kept.
    pub fn admit(&mut self, token: &str) {
        self.connected.push(ConnectedPlayer::new(token));
    }

    pub fn authorized(&self) -> &[PlayerId] {
        self.authorized.as_deref().unwrap_or_default()
    }

    pub fn connected(&self) -> &[ConnectedPlayer] {
        &self.connected
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot {
            authorized: self.authorized().to_vec(),
            connected: self.connected.clone(),
        }
    }
}
