//! Lifecycle controller
//!
//! Startup runs in two phases. [`LifecycleController::start`] connects to the
//! agent, registers callbacks, resolves the port and spawns the listener.
//! [`RunningHost::run`] then waits for the allocation decision, populates the
//! authorized roster and supervises the listener until shutdown.

use crate::context::{HostContext, stopped};
use crate::gate::RequestGate;
use crate::listener::{self, ListenerConfig};
use session_host_agent::{
    CertificateStore, FolderCertificateStore, InitialPlayersDirectory, MatchDirectory,
    OrchestrationAgent,
};
use session_host_core::keys;
use session_host_core::{HostError, Result};
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Host settings resolved before talking to the agent
#[derive(Debug, Clone)]
pub struct HostSettings {
    /// Agent config key holding the listening port
    pub port_key: String,
    /// Agent config key holding the game certificate thumbprint
    pub cert_alias: String,
    /// Optional text asset served back in every snapshot
    pub asset_file: Option<PathBuf>,
    /// Address the listener binds to
    pub bind_address: IpAddr,
    /// Overrides the certificate folder published by the agent
    pub certificate_folder: Option<PathBuf>,
    pub listener: ListenerConfig,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            port_key: keys::DEFAULT_PORT_KEY.to_string(),
            cert_alias: keys::DEFAULT_CERT_ALIAS.to_string(),
            asset_file: None,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            certificate_folder: None,
            listener: ListenerConfig::default(),
        }
    }
}

/// How the host's run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// Allocated, served players, then shut down by the agent
    Served,
    /// Terminated by the agent without ever being allocated
    Terminated,
}

/// Drives the host from agent start-up to the readiness decision
pub struct LifecycleController<A: OrchestrationAgent> {
    agent: Arc<A>,
    settings: HostSettings,
    context: Arc<HostContext>,
    directory: Arc<dyn MatchDirectory>,
    certificates: Option<Arc<dyn CertificateStore>>,
}

/// Host whose listener is running, waiting on the agent
pub struct RunningHost<A: OrchestrationAgent> {
    agent: Arc<A>,
    context: Arc<HostContext>,
    directory: Arc<dyn MatchDirectory>,
    local_addr: SocketAddr,
    listener: JoinHandle<()>,
}

impl<A: OrchestrationAgent> LifecycleController<A> {
    /// Controller resolving match members from the agent's initial players
    pub fn new(agent: Arc<A>, settings: HostSettings) -> Self {
        let directory = Arc::new(InitialPlayersDirectory::new(agent.clone()));
        Self {
            agent,
            settings,
            context: Arc::new(HostContext::default()),
            directory,
            certificates: None,
        }
    }

    pub fn with_match_directory(mut self, directory: Arc<dyn MatchDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_certificate_store(mut self, store: Arc<dyn CertificateStore>) -> Self {
        self.certificates = Some(store);
        self
    }

    pub fn context(&self) -> Arc<HostContext> {
        self.context.clone()
    }

    /// Run the whole lifecycle
    pub async fn run(self) -> Result<LifecycleOutcome> {
        self.start().await?.run().await
    }

    /// Start the agent and the listener.
    ///
    /// Fails before binding anything if the agent is unreachable or the port
    /// key is missing.
    pub async fn start(self) -> Result<RunningHost<A>> {
        if let Err(e) = self.agent.start().await {
            error!("Cannot start agent. Please make sure the agent is running: {}", e);
            return Err(e);
        }

        self.register_callbacks();

        let asset_text = read_asset(self.settings.asset_file.as_deref()).await;
        self.context.set_asset_text(asset_text);

        let config = self.agent.config_settings();
        info!("Initial config before ready for players:\n{}", pretty(&config));

        let port = match resolve_port(&config, &self.settings.port_key) {
            Ok(port) => port,
            Err(e) => {
                self.announce(&format!(
                    "{}. Make sure the agent is running and publishes {} as a game port name.",
                    e, self.settings.port_key
                ));
                return Err(e);
            }
        };

        let address = SocketAddr::new(self.settings.bind_address, port);
        let tcp = TcpListener::bind(address)
            .await
            .map_err(|source| HostError::Bind {
                address: address.to_string(),
                source,
            })?;
        let local_addr = tcp.local_addr()?;

        self.load_certificate(&config).await;

        let gate = Arc::new(RequestGate::new(self.context.clone(), self.agent.clone()));
        let listener = tokio::spawn(listener::serve(
            tcp,
            gate,
            self.settings.listener.clone(),
            self.context.shutdown_signal(),
        ));

        Ok(RunningHost {
            agent: self.agent,
            context: self.context,
            directory: self.directory,
            local_addr,
            listener,
        })
    }

    fn register_callbacks(&self) {
        // The agent owns its callbacks, so they only hold it weakly
        let context = self.context.clone();
        let agent = Arc::downgrade(&self.agent);
        self.agent.register_shutdown_callback(Box::new(move || {
            info!("Shutting down...");
            if let Some(agent) = agent.upgrade() {
                agent.log_message("Shutting down...");
            }
            context.request_shutdown();
        }));

        let context = self.context.clone();
        self.agent
            .register_health_callback(Box::new(move || !context.is_shutting_down()));

        let context = self.context.clone();
        let agent = Arc::downgrade(&self.agent);
        self.agent.register_maintenance_callback(Box::new(move |at| {
            let message = format!("Maintenance Scheduled at: {}", at);
            info!("{}", message);
            if let Some(agent) = agent.upgrade() {
                agent.log_message(&message);
            }
            context.schedule_maintenance(at);
        }));
    }

    async fn load_certificate(&self, config: &HashMap<String, String>) {
        let Some(expected) = config.get(&self.settings.cert_alias) else {
            info!(
                "Config did not contain cert! Config is: {}",
                flatten(config)
            );
            return;
        };

        let store = self.certificates.clone().or_else(|| {
            self.settings
                .certificate_folder
                .clone()
                .or_else(|| config.get(keys::CERTIFICATE_FOLDER).map(PathBuf::from))
                .map(|folder| Arc::new(FolderCertificateStore::new(folder)) as Arc<dyn CertificateStore>)
        });
        let Some(store) = store else {
            warn!("No certificate store available to look up {}", expected);
            return;
        };

        match store.find_by_thumbprint(expected).await {
            Ok(Some(thumbprint)) => {
                info!("Installed game cert thumbprint: {}", thumbprint);
                self.context.set_cert_thumbprint(thumbprint);
            }
            Ok(None) => warn!(
                "Could not find installed game cert. Expected thumbprint is: {}",
                expected
            ),
            Err(e) => warn!("Certificate lookup failed: {}", e),
        }
    }

    fn announce(&self, message: &str) {
        error!("{}", message);
        self.agent.log_message(message);
    }
}

impl<A: OrchestrationAgent> RunningHost<A> {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> Arc<HostContext> {
        self.context.clone()
    }

    /// Wait for the allocation decision and supervise the listener until it stops
    pub async fn run(self) -> Result<LifecycleOutcome> {
        let mut shutdown = self.context.shutdown_signal();
        let allocated = tokio::select! {
            ready = self.agent.ready_for_players() => ready,
            _ = stopped(&mut shutdown) => {
                info!("Shut down before the allocation decision");
                false
            }
        };

        if !allocated {
            self.log("Server is getting terminated.");
            self.context.request_shutdown();
            self.join_listener().await;
            return Ok(LifecycleOutcome::Terminated);
        }

        self.context.mark_activated();
        let config = self.agent.config_settings();

        if let Some(cookie) = config.get(keys::SESSION_COOKIE) {
            self.log(&format!("The session cookie from the allocation call is: {}", cookie));
        }
        if let Some(session_id) = config.get(keys::SESSION_ID) {
            self.log(&format!("The session Id from the allocation call is: {}", session_id));
            match self.directory.match_members(session_id).await {
                Ok(members) => {
                    self.log(&format!("MatchPlayers are: {}", members.join(", ")));
                    self.context.set_authorized(members);
                }
                Err(e) => warn!("Match lookup for session {} failed: {}", session_id, e),
            }
        }
        debug!("Active config after ready for players:\n{}", pretty(&config));

        let initial_players = self.agent.initial_players();
        self.log(&format!(
            "In this match there are {} players. They are: {}",
            initial_players.len(),
            initial_players.join(", ")
        ));

        self.join_listener().await;
        Ok(LifecycleOutcome::Served)
    }

    async fn join_listener(self) {
        if let Err(e) = self.listener.await {
            error!("Listener task failed: {}", e);
        }
    }

    fn log(&self, message: &str) {
        info!("{}", message);
        self.agent.log_message(message);
    }
}

/// Parse the listening port out of the agent config
pub fn resolve_port(config: &HashMap<String, String>, port_key: &str) -> Result<u16> {
    let value = config
        .get(port_key)
        .ok_or_else(|| HostError::MissingConfigKey(port_key.to_string()))?;
    value.trim().parse().map_err(|_| HostError::InvalidPort {
        key: port_key.to_string(),
        value: value.clone(),
    })
}

async fn read_asset(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return String::new();
    };
    match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) => {
            info!("Asset file {} not loaded: {}", path.display(), e);
            String::new()
        }
    }
}

fn pretty(config: &HashMap<String, String>) -> String {
    let sorted: BTreeMap<_, _> = config.iter().collect();
    serde_json::to_string_pretty(&sorted).unwrap_or_default()
}

fn flatten(config: &HashMap<String, String>) -> String {
    let sorted: BTreeMap<_, _> = config.iter().collect();
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use session_host_agent::{Allocation, LocalAgent, LocalAgentConfig, StaticMatchDirectory};
    use session_host_core::keys::fields;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn settings() -> HostSettings {
        HostSettings {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Default::default()
        }
    }

    fn agent_with_port(port: u16) -> Arc<LocalAgent> {
        Arc::new(LocalAgent::with_config(LocalAgentConfig {
            session_host_id: "host-1".into(),
            game_ports: HashMap::from([("game".into(), port)]),
            ..Default::default()
        }))
    }

    async fn get(addr: SocketAddr, token: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET / HTTP/1.1\r\nHost: localhost\r\ntoken: {}\r\nConnection: close\r\n\r\n",
            token
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        let status = response[9..12].parse().unwrap();
        let body = response
            .split_once("\r\n\r\n")
            .map(|(_, body)| body.to_string())
            .unwrap_or_default();
        (status, body)
    }

    #[test]
    fn test_resolve_port() {
        let config = HashMap::from([
            ("game".to_string(), " 7777 ".to_string()),
            ("bad".to_string(), "http".to_string()),
        ]);
        assert_eq!(resolve_port(&config, "game").unwrap(), 7777);
        assert!(matches!(
            resolve_port(&config, "bad"),
            Err(HostError::InvalidPort { .. })
        ));
        assert!(matches!(
            resolve_port(&config, "missing"),
            Err(HostError::MissingConfigKey(key)) if key == "missing"
        ));
    }

    #[tokio::test]
    async fn test_unreachable_agent_is_fatal() {
        let agent = Arc::new(LocalAgent::from_file("/nonexistent/session-host/agent.json"));
        let err = LifecycleController::new(agent, settings())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::AgentUnavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_port_key_fails_before_bind() {
        let agent = Arc::new(LocalAgent::with_config(LocalAgentConfig::default()));
        let controller = LifecycleController::new(agent, settings());
        let context = controller.context();

        let err = controller.start().await.err().unwrap();
        assert!(matches!(err, HostError::MissingConfigKey(ref key) if key == "game"));
        assert!(!context.is_shutting_down());
    }

    #[tokio::test]
    async fn test_terminated_without_allocation() {
        let agent = agent_with_port(0);
        let handle = agent.handle();
        let running = LifecycleController::new(agent, settings())
            .start()
            .await
            .unwrap();
        let addr = running.local_addr();
        let context = running.context();

        // Still reachable while waiting, but nobody is authorized
        let (status, _) = get(addr, "p1").await;
        assert_eq!(status, 403);

        let run = tokio::spawn(running.run());
        handle.terminate();

        assert_eq!(run.await.unwrap().unwrap(), LifecycleOutcome::Terminated);
        assert!(!context.activation().is_activated);
        assert!(context.roster().authorized.is_empty());
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_allocation_serves_authorized_players() {
        let dir = tempfile::tempdir().unwrap();
        let asset = dir.path().join("asset.txt");
        std::fs::write(&asset, "hello asset").unwrap();

        let agent = agent_with_port(0);
        let handle = agent.handle();
        let directory = StaticMatchDirectory::new(HashMap::from([(
            "s1".to_string(),
            vec!["p1".to_string(), "p2".to_string()],
        )]));
        let settings = HostSettings {
            asset_file: Some(asset),
            ..settings()
        };

        let running = LifecycleController::new(agent, settings)
            .with_match_directory(Arc::new(directory))
            .start()
            .await
            .unwrap();
        let addr = running.local_addr();
        let context = running.context();
        let run = tokio::spawn(running.run());

        assert!(handle.allocate(Allocation {
            session_id: "s1".into(),
            session_cookie: Some("cookie".into()),
            initial_players: vec!["p1".into(), "p2".into()],
        }));
        while context.roster().authorized.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let (status, body) = get(addr, "p1").await;
        assert_eq!(status, 200);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json[fields::IS_ACTIVATED], "true");
        assert_eq!(json[fields::ASSET_FILE_TEXT], "hello asset");
        assert_eq!(json[fields::INITIAL_PLAYERS], "p1, p2");
        assert_eq!(json[fields::CONNECTED_PLAYERS], "p1");
        assert_eq!(json[keys::SESSION_ID], "s1");
        assert!(json.get(fields::NEXT_MAINTENANCE).is_none());

        let (status, _) = get(addr, "p3").await;
        assert_eq!(status, 403);

        handle.schedule_maintenance(Utc.with_ymd_and_hms(2030, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(handle.check_health(), Some(true));

        let (status, body) = get(addr, "p2").await;
        assert_eq!(status, 200);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json[fields::CONNECTED_PLAYERS], "p1, p2");
        assert!(json.get(fields::NEXT_MAINTENANCE).is_some());
        assert_eq!(handle.connected_players().len(), 2);

        handle.terminate();
        assert_eq!(run.await.unwrap().unwrap(), LifecycleOutcome::Served);
        assert_eq!(handle.check_health(), Some(false));
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_match_lookup_is_fail_closed() {
        let agent = agent_with_port(0);
        let handle = agent.handle();
        let running = LifecycleController::new(agent, settings())
            .with_match_directory(Arc::new(StaticMatchDirectory::default()))
            .start()
            .await
            .unwrap();
        let addr = running.local_addr();
        let context = running.context();
        let run = tokio::spawn(running.run());

        handle.allocate(Allocation {
            session_id: "unknown".into(),
            ..Default::default()
        });
        while !context.activation().is_activated {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let (status, _) = get(addr, "p1").await;
        assert_eq!(status, 403);

        handle.terminate();
        assert_eq!(run.await.unwrap().unwrap(), LifecycleOutcome::Served);
    }

    #[tokio::test]
    async fn test_certificate_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abcdef.pem"), "cert").unwrap();

        let agent = Arc::new(LocalAgent::with_config(LocalAgentConfig {
            game_ports: HashMap::from([("game".into(), 0)]),
            certificate_folder: Some(dir.path().to_path_buf()),
            build_metadata: HashMap::from([(keys::DEFAULT_CERT_ALIAS.into(), "abcdef".into())]),
            ..Default::default()
        }));
        let handle = agent.handle();
        let running = LifecycleController::new(agent, settings())
            .start()
            .await
            .unwrap();
        assert_eq!(running.context().activation().cert_thumbprint, "ABCDEF");

        let run = tokio::spawn(running.run());
        handle.terminate();
        assert_eq!(run.await.unwrap().unwrap(), LifecycleOutcome::Terminated);
    }
}
