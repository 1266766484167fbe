//! fabricmapd, the fabricmap daemon.
//!
//! Owns the state store, keeps the ISID pool in line with configuration,
//! runs the mechanism driver behind the port routes, polls the SDN
//! controller for completed transactions and serves the API.
//!
//! # Usage
//!
//! ```text
//! fabricmapd serve --config /etc/fabricmap/fabricmap.toml
//! fabricmapd check-config --config /etc/fabricmap/fabricmap.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use fabric_core::FabricConfig;
use fabricmap_api::{AgentRegistry, ApiState};
use fabricmap_binding::{
    FabricMechanismDriver, IsidTypeDriver, MappingAgent, SdnMappingAgent, TransactionPoller,
};
use fabricmap_sdn::SdnClient;
use fabricmap_state::StateStore;
use tokio::sync::watch;
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = "/etc/fabricmap/fabricmap.toml";

#[derive(Parser)]
#[command(name = "fabricmapd", about = "Fabric mapping daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon.
    Serve {
        /// Configuration file.
        #[arg(long, short, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Validate a configuration file and print it normalized.
    CheckConfig {
        #[arg(long, short, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new("info,fabricmapd=debug,fabricmap_binding=debug")
                }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => serve(&config).await,
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = FabricConfig::from_file(path)?;
    info!(path = ?path, "configuration is valid");
    print!("{}", config.to_toml_string()?);
    Ok(())
}

async fn serve(path: &Path) -> anyhow::Result<()> {
    let config = FabricConfig::from_file(path)?;
    info!(path = ?path, "fabricmap daemon starting");

    // ── State ──────────────────────────────────────────────────

    if let Some(dir) = config.database.path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let store = StateStore::open(&config.database.path)?;
    info!(path = ?config.database.path, "state store opened");

    let isid_ranges = config.isid_ranges()?;
    let mut isid = IsidTypeDriver::new(store.clone(), isid_ranges.clone());
    isid.initialize()?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Mechanism driver and transaction poller ────────────────

    let registry = Arc::new(AgentRegistry::new(Duration::from_secs(
        config.binding.agent_down_time,
    )));
    let mut api_state = ApiState::new(store.clone(), isid_ranges, registry.clone());

    let poller_handle = match &config.sdn {
        Some(sdn) => {
            let client = SdnClient::from_config(sdn)?;
            let agent = Arc::new(SdnMappingAgent::new(client, store.clone()));
            let mapping_agent: Arc<dyn MappingAgent> = agent.clone();
            let driver = FabricMechanismDriver::from_config(
                &config,
                store.clone(),
                registry,
                Arc::new(store.clone()),
                mapping_agent,
            )?;
            api_state = api_state.with_driver(Arc::new(driver));

            let tls = agent.client().is_secure();
            let poller = TransactionPoller::new(agent, store.clone());
            let interval = Duration::from_secs(sdn.tx_check_interval.max(1));
            info!(
                url = %sdn.url,
                tls,
                interval_secs = interval.as_secs(),
                "SDN controller configured"
            );
            Some(tokio::spawn(async move {
                poller.run(interval, shutdown_rx).await;
            }))
        }
        None => {
            warn!("no [sdn] section, port events and transaction polling disabled");
            None
        }
    };

    // ── API server ─────────────────────────────────────────────

    let router = fabricmap_api::build_router(api_state);
    let addr: SocketAddr = config.api.listen.parse()?;
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    if let Some(handle) = poller_handle {
        let _ = handle.await;
    }

    info!("fabricmap daemon stopped");
    Ok(())
}
