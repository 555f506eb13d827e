//! vip-switch -- floating VIP ownership daemon.
//!
//! Startup announces `Ready`, then follows Raft leadership until SIGINT or
//! SIGTERM. Shutdown runs the `ToDestroy` hook before leaving the cluster
//! so the address is released while peers can still take it over.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vipswitch::cluster::raft::{Consensus, RaftNode};
use vipswitch::config::{load_config, Config};
use vipswitch::hooks::executor::ProcessExecutor;
use vipswitch::hooks::system::HookSystem;
use vipswitch::role::RoleMachine;

/// Command-line arguments for the vip-switch daemon.
#[derive(Parser, Debug)]
#[command(
    name = "vip-switch",
    version,
    about = "Raft-driven floating VIP ownership with event hooks"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: String,

    /// Override node.id.
    #[arg(long)]
    node_id: Option<String>,

    /// Override node.raft_addr.
    #[arg(long)]
    raft_addr: Option<String>,

    /// Override node.data_dir.
    #[arg(long)]
    data_dir: Option<String>,

    /// Override logging.level (debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Override logging.format (text, json).
    #[arg(long)]
    log_format: Option<String>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(id) = &self.node_id {
            config.node.id = id.clone();
        }
        if let Some(addr) = &self.raft_addr {
            config.node.raft_addr = addr.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.node.data_dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config))?;
    cli.apply_overrides(&mut config);
    config.validate().context("invalid configuration")?;

    vipswitch::logging::init(&config.logging)?;
    info!(
        node_id = %config.node.id,
        raft_addr = %config.node.raft_addr,
        data_dir = %config.node.data_dir,
        "starting vip-switch"
    );

    if config.observability.enabled && config.observability.metrics {
        vipswitch::metrics::init_metrics()?;
        vipswitch::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    std::fs::create_dir_all(&config.node.data_dir)
        .with_context(|| format!("failed to create data dir {}", config.node.data_dir))?;

    let peers = config.cluster_peers();
    if !peers.is_empty() {
        warn!(
            peers = ?peers,
            "multi-node cluster: leadership follows whatever drives the raft node"
        );
    }
    let raft = Arc::new(RaftNode::new(
        config.node.id.clone(),
        config.node.raft_addr.clone(),
        peers,
    ));
    let consensus: Arc<dyn Consensus> = raft.clone();

    let hooks = Arc::new(HookSystem::new(&config, Arc::new(ProcessExecutor::new())));
    let machine = Arc::new(RoleMachine::from_config(
        config.node.id.clone(),
        &config.state,
        hooks,
        consensus.clone(),
    ));

    if let Err(err) = machine.announce_ready().await {
        error!(error = %err, "ready hook failed");
    }

    machine.start();
    raft.start()?;

    let server_stop = CancellationToken::new();
    let server = if config.observability.enabled {
        let state = Arc::new(vipswitch::AppState {
            config: config.clone(),
            machine: machine.clone(),
            consensus: consensus.clone(),
        });
        let listen = config.observability.listen.clone();
        let stop = server_stop.clone();
        Some(tokio::spawn(async move {
            if let Err(err) =
                vipswitch::server::serve(state, &listen, async move { stop.cancelled().await }).await
            {
                error!(error = %err, "status endpoint failed");
            }
        }))
    } else {
        None
    };

    info!(node_id = %config.node.id, "vip-switch running");
    shutdown_signal().await;

    machine.shutdown().await;
    if let Err(err) = consensus.shutdown().await {
        error!(error = %err, "raft shutdown failed");
    }

    server_stop.cancel();
    if let Some(handle) = server {
        let _ = handle.await;
    }

    info!("vip-switch shut down");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
