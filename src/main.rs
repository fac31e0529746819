use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sso_counters::admission::AdmissionFilter;
use sso_counters::cache::{CounterCache, InMemoryCache};
use sso_counters::config::AppConfig;
use sso_counters::counter::{GenericCounter, IpCounter};
use sso_counters::server::{AppState, HttpServer};

/// Abuse-prevention counters for SSO request admission.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "SSO_COUNTERS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    info!("Starting SSO counter service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.http_addr = listen;
    }
    info!(
        http_addr = %config.server.http_addr,
        fail_mode = ?config.server.fail_mode,
        "Configuration loaded"
    );

    // One cache shared by both counter families; scopes keep them apart.
    let memory = Arc::new(InMemoryCache::new());
    let _sweeper = memory.spawn_sweeper(Duration::from_secs(config.cache.sweep_interval_secs));
    let cache: Arc<dyn CounterCache> = memory;

    let ip_counter = IpCounter::new(cache.clone(), &config.counters.ip)?;
    let generic_counter = GenericCounter::new(cache, &config.counters.generic)?;
    info!(
        ip_ttl_secs = config.counters.ip.entry_ttl_secs,
        ip_limit = config.counters.ip.number_of_safe_requests,
        generic_ttl_secs = config.counters.generic.entry_ttl_secs,
        generic_limit = config.counters.generic.number_of_safe_requests,
        "Counters initialized"
    );

    let admission = AdmissionFilter::from_config(ip_counter.clone(), &config.server);
    let state = AppState {
        ip_counter,
        generic_counter,
    };

    HttpServer::new(config.server.http_addr, state, admission)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("SSO counter service stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
