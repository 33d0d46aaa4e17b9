//! Config snapshot rendered for every admitted request

use crate::activation::ActivationState;
use crate::keys::fields;
use crate::roster::RosterSnapshot;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Flat string map returned to clients as a JSON object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ConfigSnapshot(BTreeMap<String, String>);

impl ConfigSnapshot {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Compact JSON body
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Merge agent config with synthesized server fields.
///
/// Synthesized fields overwrite agent keys of the same name. Every value is a
/// string, so `isActivated` is rendered as lowercase `"true"` or `"false"`.
pub fn render(
    agent_config: HashMap<String, String>,
    activation: &ActivationState,
    roster: &RosterSnapshot,
    logs_directory: &str,
) -> ConfigSnapshot {
    let mut map: BTreeMap<String, String> = agent_config.into_iter().collect();

    map.insert(
        fields::IS_ACTIVATED.into(),
        activation.is_activated.to_string(),
    );
    map.insert(fields::ASSET_FILE_TEXT.into(), activation.asset_text.clone());
    map.insert(fields::LOGS_DIRECTORY.into(), logs_directory.to_string());
    map.insert(
        fields::INSTALLED_CERT_THUMBPRINT.into(),
        activation.cert_thumbprint.clone(),
    );
    map.insert(fields::INITIAL_PLAYERS.into(), roster.authorized.join(", "));
    map.insert(
        fields::CONNECTED_PLAYERS.into(),
        roster
            .connected
            .iter()
            .map(|p| p.player_id.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    );

    match activation.next_maintenance_local() {
        Some(at) => {
            map.insert(fields::NEXT_MAINTENANCE.into(), at);
        }
        None => {
            // Never leak an agent-provided value under the synthesized name
            map.remove(fields::NEXT_MAINTENANCE);
        }
    }

    ConfigSnapshot(map)
}
