//! ret2frp controller binary
//!
//! Wires the configuration, the shared KV store, the tunnel master client,
//! the traffic engine with its garbage-collection sweeps, and the HTTP API.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ret2frp_cache::Cache;
use ret2frp_config::Settings;
use ret2frp_engine::{Reaper, TrafficManager, TunnelServer};
use ret2frp_master::MasterClient;

/// Traffic controller fronting an frp-style tunnel master
#[derive(Parser, Debug)]
#[command(name = "ret2frp")]
#[command(about = "Broker traffic port sets into tunnel proxy configurations", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "RET2FRP_CONFIG", default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let settings = Settings::load(&cli.config)?;
    info!(
        config = %cli.config,
        servers = settings.servers.len(),
        "starting ret2frp controller"
    );

    let cache = Cache::connect(&settings.cache.url).await?;
    let master = Arc::new(MasterClient::new(
        &settings.master.api_base,
        &settings.master.username,
        &settings.master.password,
        cache.clone(),
    )?);

    let servers = settings
        .servers
        .iter()
        .map(|server| TunnelServer {
            node_name: server.node_name.clone(),
            port_range: (server.port_range[0], server.port_range[1]),
            remote_addr: server.remote_addr.clone(),
        })
        .collect();

    let manager = Arc::new(TrafficManager::new(
        cache,
        master,
        settings.master.username.clone(),
        servers,
    ));

    let _sweeps = Reaper::new(
        manager.clone(),
        Duration::from_secs(settings.app.cleanup_interval),
    )
    .spawn();
    info!(
        interval = settings.app.cleanup_interval,
        "garbage-collection sweeps started"
    );

    let app = ret2frp_api::router(manager, settings.app.auth_token.clone());
    let listener = tokio::net::TcpListener::bind(&settings.app.listen).await?;
    info!("API listening on http://{}", settings.app.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
