//! In-process orchestration agent
//!
//! Reads its configuration from a JSON file and exposes lifecycle signals
//! (allocate, terminate, maintenance, health checks) through a cloneable
//! [`LocalAgentHandle`]. Used for local runs and tests in place of a real
//! orchestration agent.

use crate::agent::{HealthCallback, MaintenanceCallback, OrchestrationAgent, ShutdownCallback};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use session_host_core::keys;
use session_host_core::{ConnectedPlayer, HostError, PlayerId, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Name of the log file written into the configured log folder
pub const AGENT_LOG_FILE: &str = "session_host.log";

/// Agent configuration file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalAgentConfig {
    #[serde(default)]
    pub session_host_id: String,
    #[serde(default)]
    pub log_folder: Option<PathBuf>,
    #[serde(default)]
    pub certificate_folder: Option<PathBuf>,
    /// Arbitrary key/values published verbatim
    #[serde(default)]
    pub build_metadata: HashMap<String, String>,
    /// Port name to port number
    #[serde(default)]
    pub game_ports: HashMap<String, u16>,
    /// Allocation applied by `autoAllocate`
    #[serde(default)]
    pub allocation: Option<Allocation>,
    #[serde(default)]
    pub auto_allocate: bool,
}

/// Details supplied when the agent assigns this server to a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub session_id: String,
    #[serde(default)]
    pub session_cookie: Option<String>,
    #[serde(default)]
    pub initial_players: Vec<PlayerId>,
}

/// Agent-side view of the server lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Initializing,
    StandingBy,
    Active,
    Terminating,
}

enum ConfigSource {
    File(PathBuf),
    Inline(LocalAgentConfig),
}

#[derive(Default)]
struct Callbacks {
    shutdown: Option<Arc<dyn Fn() + Send + Sync>>,
    health: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
    maintenance: Option<Arc<dyn Fn(DateTime<Utc>) + Send + Sync>>,
}

struct Shared {
    config: Mutex<Option<LocalAgentConfig>>,
    allocation: Mutex<Option<Allocation>>,
    connected: Mutex<Vec<ConnectedPlayer>>,
    callbacks: Mutex<Callbacks>,
    state_tx: watch::Sender<AgentState>,
    log_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process orchestration agent
pub struct LocalAgent {
    source: ConfigSource,
    shared: Arc<Shared>,
}

/// Drives lifecycle signals into a [`LocalAgent`]
#[derive(Clone)]
pub struct LocalAgentHandle {
    shared: Arc<Shared>,
}

impl LocalAgent {
    /// Agent that loads its configuration from `path` on start
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::with_source(ConfigSource::File(path.into()))
    }

    /// Agent with an already-built configuration
    pub fn with_config(config: LocalAgentConfig) -> Self {
        Self::with_source(ConfigSource::Inline(config))
    }

    fn with_source(source: ConfigSource) -> Self {
        let (state_tx, _) = watch::channel(AgentState::Initializing);
        Self {
            source,
            shared: Arc::new(Shared {
                config: Mutex::new(None),
                allocation: Mutex::new(None),
                connected: Mutex::new(Vec::new()),
                callbacks: Mutex::new(Callbacks::default()),
                state_tx,
                log_tx: Mutex::new(None),
            }),
        }
    }

    pub fn handle(&self) -> LocalAgentHandle {
        LocalAgentHandle {
            shared: self.shared.clone(),
        }
    }

    async fn load(&self) -> Result<LocalAgentConfig> {
        match &self.source {
            ConfigSource::Inline(config) => Ok(config.clone()),
            ConfigSource::File(path) => load_config_file(path).await,
        }
    }
}

async fn load_config_file(path: &Path) -> Result<LocalAgentConfig> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        HostError::AgentUnavailable(format!(
            "cannot read agent config {}: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        HostError::Config(format!("invalid agent config {}: {}", path.display(), e))
    })
}

/// Append queued lines to the agent log until every sender is gone
async fn write_agent_log(path: PathBuf, mut rx: mpsc::UnboundedReceiver<String>) {
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        Ok(file) => file,
        Err(e) => {
            warn!("Cannot open agent log {}: {}", path.display(), e);
            return;
        }
    };
    while let Some(line) = rx.recv().await {
        let written = async {
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        };
        if let Err(e) = written.await {
            debug!("Failed to write agent log {}: {}", path.display(), e);
        }
    }
}

#[async_trait]
impl OrchestrationAgent for LocalAgent {
    async fn start(&self) -> Result<()> {
        let config = self.load().await?;
        info!(
            "Local agent started for session host {:?}",
            config.session_host_id
        );
        let log_tx = config.log_folder.as_ref().map(|folder| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(write_agent_log(folder.join(AGENT_LOG_FILE), rx));
            tx
        });
        *lock(&self.shared.log_tx) = log_tx;
        *lock(&self.shared.config) = Some(config);
        self.shared.state_tx.send_if_modified(|state| {
            if *state == AgentState::Initializing {
                *state = AgentState::StandingBy;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    fn register_shutdown_callback(&self, callback: ShutdownCallback) {
        lock(&self.shared.callbacks).shutdown = Some(Arc::from(callback));
    }

    fn register_health_callback(&self, callback: HealthCallback) {
        lock(&self.shared.callbacks).health = Some(Arc::from(callback));
    }

    fn register_maintenance_callback(&self, callback: MaintenanceCallback) {
        lock(&self.shared.callbacks).maintenance = Some(Arc::from(callback));
    }

    fn config_settings(&self) -> HashMap<String, String> {
        let mut settings = HashMap::new();
        if let Some(config) = lock(&self.shared.config).as_ref() {
            settings.extend(config.build_metadata.clone());
            for (name, port) in &config.game_ports {
                settings.insert(name.clone(), port.to_string());
            }
            settings.insert(keys::SESSION_HOST_ID.into(), config.session_host_id.clone());
            if let Some(folder) = &config.log_folder {
                settings.insert(keys::LOG_FOLDER.into(), folder.display().to_string());
            }
            if let Some(folder) = &config.certificate_folder {
                settings.insert(
                    keys::CERTIFICATE_FOLDER.into(),
                    folder.display().to_string(),
                );
            }
        }
        if let Some(allocation) = lock(&self.shared.allocation).as_ref() {
            settings.insert(keys::SESSION_ID.into(), allocation.session_id.clone());
            if let Some(cookie) = &allocation.session_cookie {
                settings.insert(keys::SESSION_COOKIE.into(), cookie.clone());
            }
        }
        settings
    }

    async fn ready_for_players(&self) -> bool {
        let auto = lock(&self.shared.config)
            .as_ref()
            .filter(|config| config.auto_allocate)
            .and_then(|config| config.allocation.clone());
        if let Some(allocation) = auto {
            info!("Auto-allocating session {}", allocation.session_id);
            self.handle().allocate(allocation);
        }

        let mut rx = self.shared.state_tx.subscribe();
        match rx
            .wait_for(|state| matches!(state, AgentState::Active | AgentState::Terminating))
            .await
        {
            Ok(state) => *state == AgentState::Active,
            Err(_) => false,
        }
    }

    fn initial_players(&self) -> Vec<PlayerId> {
        lock(&self.shared.allocation)
            .as_ref()
            .map(|a| a.initial_players.clone())
            .unwrap_or_default()
    }

    fn update_connected_players(&self, players: &[ConnectedPlayer]) -> Result<()> {
        if lock(&self.shared.config).is_none() {
            return Err(HostError::Agent("agent not started".into()));
        }
        debug!("Agent received {} connected players", players.len());
        *lock(&self.shared.connected) = players.to_vec();
        Ok(())
    }

    fn logs_directory(&self) -> String {
        lock(&self.shared.config)
            .as_ref()
            .and_then(|c| c.log_folder.as_ref())
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }

    fn log_message(&self, message: &str) {
        // Callbacks log from arbitrary threads; the writer task owns the file
        if let Some(tx) = lock(&self.shared.log_tx).as_ref() {
            let line = format!("{}\t{}\n", Utc::now().to_rfc3339(), message);
            if tx.send(line).is_err() {
                debug!("Agent log writer stopped, dropping message");
            }
        }
    }
}

impl LocalAgentHandle {
    /// Assign the server to a session.
    ///
    /// Returns false if the server is already active or terminating.
    pub fn allocate(&self, allocation: Allocation) -> bool {
        let mut slot = lock(&self.shared.allocation);
        let accepted = self.shared.state_tx.send_if_modified(|state| match state {
            AgentState::Initializing | AgentState::StandingBy => {
                *state = AgentState::Active;
                true
            }
            AgentState::Active | AgentState::Terminating => false,
        });
        if accepted {
            info!("Allocated to session {}", allocation.session_id);
            *slot = Some(allocation);
        } else {
            warn!("Ignoring allocation of session {}", allocation.session_id);
        }
        accepted
    }

    /// End the session: readiness resolves to false if still pending, and the
    /// shutdown callback runs on the calling thread.
    pub fn terminate(&self) {
        self.shared.state_tx.send_replace(AgentState::Terminating);
        let callback = lock(&self.shared.callbacks).shutdown.clone();
        match callback {
            Some(callback) => callback(),
            None => debug!("Terminated with no shutdown callback registered"),
        }
    }

    /// Announce maintenance; runs the maintenance callback on the calling thread
    pub fn schedule_maintenance(&self, at: DateTime<Utc>) {
        let callback = lock(&self.shared.callbacks).maintenance.clone();
        if let Some(callback) = callback {
            callback(at);
        }
    }

    /// Poll the health callback, `None` if none is registered
    pub fn check_health(&self) -> Option<bool> {
        let callback = lock(&self.shared.callbacks).health.clone();
        callback.map(|callback| callback())
    }

    pub fn state(&self) -> AgentState {
        *self.shared.state_tx.borrow()
    }

    /// Roster most recently reported by the server
    pub fn connected_players(&self) -> Vec<ConnectedPlayer> {
        lock(&self.shared.connected).clone()
    }
}
