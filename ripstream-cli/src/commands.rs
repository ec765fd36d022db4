//! CLI command implementations

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use ripstream_core::backend::{BackendFactory, PeerDiscovery};
use ripstream_core::simulation::{SimulatedBackendFactory, SimulatedDiscovery, SimulatedTorrent};
use ripstream_core::{FfprobeProber, MediaProber, RipstreamConfig, spawn_engine_registry};
use ripstream_web::{AppState, run_server};
use tracing::{info, warn};

/// Delay between pieces of a simulated download.
const SIMULATED_PIECE_INTERVAL: Duration = Duration::from_millis(250);

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
        /// Serve generated torrents instead of downloading real ones
        #[arg(long)]
        simulate: bool,
    },
    /// Print container and stream metadata of a media URL as JSON
    Probe {
        /// URL of the media to probe
        url: String,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of the command that failed
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Serve {
            host,
            port,
            simulate,
        } => serve(host, port, simulate).await,
        Commands::Probe { url } => probe(url).await,
    }
}

/// Run the HTTP server until ctrl-c, then destroy every session.
///
/// # Errors
/// - Registry configuration is invalid
/// - Server address could not be bound
pub async fn serve(host: Option<String>, port: Option<u16>, simulate: bool) -> Result<()> {
    let mut config = RipstreamConfig::from_env();
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config
        .registry
        .validate()
        .context("invalid registry configuration")?;

    let (factory, discovery): (Option<Arc<dyn BackendFactory>>, Option<Arc<dyn PeerDiscovery>>) =
        if simulate {
            info!("Serving simulated torrents");
            (
                Some(Arc::new(SimulatedBackendFactory::paced(
                    SimulatedTorrent::default(),
                    SIMULATED_PIECE_INTERVAL,
                ))),
                Some(Arc::new(SimulatedDiscovery::new())),
            )
        } else {
            warn!("No download backend configured, session creation will fail (try --simulate)");
            (None, None)
        };

    let registry = spawn_engine_registry(config.registry.clone(), factory, discovery);
    let state = AppState {
        registry: registry.clone(),
        prober: Arc::new(FfprobeProber::new(&config.probe)),
        server: config.server.clone(),
    };

    run_server(state, shutdown_signal()).await?;
    registry.shutdown().await?;
    Ok(())
}

/// Probe a media URL and print the result.
///
/// # Errors
/// - Prober missing, failed or timed out
pub async fn probe(url: String) -> Result<()> {
    let config = RipstreamConfig::from_env();
    let prober = FfprobeProber::new(&config.probe);

    let metadata = prober
        .probe(&url)
        .await
        .with_context(|| format!("failed to probe {url}"))?;
    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
