//! droidd - device-side automation agent
//!
//! Long-running daemon serving controller commands over three WebSocket
//! channels (control / binary / events). Loads configuration, probes
//! device capabilities, starts the engine, and runs until a shutdown is
//! requested over the wire or by signal.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use droidd_core::{AgentConfig, AgentEngine};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "droidd", version, about = "Device-side automation agent")]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long, default_value = "droidd.yaml")]
    config: PathBuf,

    /// Bind host override
    #[arg(long)]
    host: Option<String>,

    /// Control channel port override
    #[arg(long)]
    control_port: Option<u16>,

    /// Binary channel port override
    #[arg(long)]
    binary_port: Option<u16>,

    /// Event channel port override
    #[arg(long)]
    event_port: Option<u16>,

    /// Bearer token clients must present (default: accept all)
    #[arg(long)]
    auth_token: Option<String>,

    /// Plugins directory override
    #[arg(long)]
    plugins_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = AgentConfig::load(&args.config);
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.control_port {
        config.control_port = port;
    }
    if let Some(port) = args.binary_port {
        config.binary_port = port;
    }
    if let Some(port) = args.event_port {
        config.event_port = port;
    }
    if let Some(token) = args.auth_token {
        config.auth_token = Some(token);
    }
    if let Some(dir) = args.plugins_dir {
        config.plugins_dir = dir;
    }

    info!(
        host = %config.host,
        control = config.control_port,
        binary = config.binary_port,
        event = config.event_port,
        auth = config.auth_token.is_some(),
        "Starting droidd"
    );

    let engine = AgentEngine::new(config).await;
    AgentEngine::install(engine.clone())?;
    engine.start().await?;

    tokio::select! {
        _ = engine.wait_for_shutdown() => {
            info!("Shutdown requested over control channel");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Signal handler failed: {}", e);
            }
            info!("Interrupted; shutting down");
        }
    }

    engine.stop().await;
    Ok(())
}
