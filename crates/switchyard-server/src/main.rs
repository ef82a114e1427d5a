use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use switchyard_server::config::ServerConfig;
use switchyard_server::http::{build_router, AppState};

/// Switchyard: credential and webhook gateway for platform integrators.
#[derive(Parser, Debug)]
#[command(name = "switchyard", version, about, long_about = None)]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, env = "SWITCHYARD_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides the config file)
    #[arg(long, env = "SWITCHYARD_BIND")]
    bind: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long, env = "SWITCHYARD_LOG_JSON")]
    json_logs: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,switchyard=debug"))
    };

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.with_target(false).init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ServerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            std::process::exit(1);
        }
    };
    init_tracing(cli.verbose, cli.json_logs || config.log_json);

    if let Err(e) = run(cli, config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, mut config: ServerConfig) -> anyhow::Result<()> {
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }

    let gateway = switchyard_server::build_gateway(&config)?;
    if config.admin_token.is_none() {
        warn!("no admin token configured; management routes are closed");
    }
    let app = build_router(Arc::new(AppState {
        gateway,
        admin_token: config.admin_token.clone(),
    }));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(addr = %config.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
}
