//! session-host: game server shim for an orchestration agent
//!
//! Starts the agent, binds the port it assigns, and serves the live server
//! config to players whose tokens belong to the allocated session.

use anyhow::Result;
use clap::Parser;
use session_host_agent::{LocalAgent, StaticMatchDirectory};
use session_host_core::{HostError, keys};
use session_host_server::{HostSettings, LifecycleController, LifecycleOutcome, ListenerConfig};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "session-host", version, about)]
struct Args {
    /// Agent configuration file
    #[arg(long, env = "GSDK_CONFIG_FILE", default_value = "agent.json")]
    agent_config: PathBuf,

    /// Text asset returned in every snapshot
    #[arg(long, env = "SESSION_HOST_ASSET_FILE")]
    asset_file: Option<PathBuf>,

    /// Agent config key holding the listening port
    #[arg(long, default_value = keys::DEFAULT_PORT_KEY)]
    port_key: String,

    /// Agent config key holding the game certificate thumbprint
    #[arg(long, default_value = keys::DEFAULT_CERT_ALIAS)]
    cert_alias: String,

    #[arg(long, default_value = "0.0.0.0")]
    bind_address: IpAddr,

    /// JSON file mapping session ids to member player ids; defaults to the
    /// players listed by the allocation call
    #[arg(long, env = "SESSION_HOST_MATCH_FILE")]
    match_file: Option<PathBuf>,

    /// Overrides the certificate folder published by the agent
    #[arg(long)]
    certificate_folder: Option<PathBuf>,

    #[arg(long, default_value_t = 30)]
    header_read_timeout_secs: u64,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Extra arguments passed through by the agent
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    passthrough: Vec<String>,
}

impl Args {
    fn settings(&self) -> HostSettings {
        HostSettings {
            port_key: self.port_key.clone(),
            cert_alias: self.cert_alias.clone(),
            asset_file: self.asset_file.clone(),
            bind_address: self.bind_address,
            certificate_folder: self.certificate_folder.clone(),
            listener: ListenerConfig {
                header_read_timeout: Duration::from_secs(self.header_read_timeout_secs),
                ..Default::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Arguments are: {}", args.passthrough.join(" "));
    info!("Agent config: {:?}", args.agent_config);

    let agent = Arc::new(LocalAgent::from_file(&args.agent_config));
    let mut controller = LifecycleController::new(agent.clone(), args.settings());
    if let Some(path) = &args.match_file {
        let directory = StaticMatchDirectory::from_file(path).await?;
        controller = controller.with_match_directory(Arc::new(directory));
    }

    // Ctrl-C stands in for the agent's shutdown request
    let handle = agent.handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, terminating");
                handle.terminate();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    match controller.run().await {
        Ok(LifecycleOutcome::Served) => info!("Session ended"),
        Ok(LifecycleOutcome::Terminated) => info!("Terminated without allocation"),
        Err(e) => return Err(exit_error(e)),
    }
    Ok(())
}

/// Attach the phase the host failed in to its error
fn exit_error(error: HostError) -> anyhow::Error {
    let phase = if error.is_fatal_startup() {
        "session host failed to start"
    } else {
        "session host stopped unexpectedly"
    };
    anyhow::Error::new(error).context(phase)
}
