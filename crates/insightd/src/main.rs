//! insightd — the Insight daemon.
//!
//! Loads one config file, wires the backend clients, and serves the
//! status and log API until interrupted.
//!
//! # Usage
//!
//! ```text
//! insightd serve --config /etc/insight/insight.toml
//! insightd check-config --config /etc/insight/insight.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use insight_api::{build_router, ApiState};
use insight_auth::JwtVerifier;
use insight_backends::Backends;
use insight_core::InsightConfig;
use insight_logs::LogEngine;
use insight_status::StatusAggregator;

const DEFAULT_FILTER: &str = "info,insightd=debug,insight=debug";

#[derive(Parser)]
#[command(name = "insightd", about = "Insight status and log daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        /// Path to the TOML config file.
        #[arg(long, default_value = "/etc/insight/insight.toml")]
        config: PathBuf,

        /// Port to listen on, overriding `[server].port`.
        #[arg(long)]
        port: Option<u16>,

        #[arg(long, value_enum, default_value = "text")]
        log_format: LogFormat,
    },
    /// Parse and validate a config file, then exit.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            log_format,
        } => {
            init_tracing(log_format);
            run_server(&config, port).await
        }
        Command::CheckConfig { config } => {
            let parsed = InsightConfig::from_file(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            println!("config ok: handle={} mode={:?}", parsed.handle, parsed.mode);
            Ok(())
        }
    }
}

/// Contents of an optional token file, trimmed.
fn read_token(path: Option<&Path>) -> anyhow::Result<Option<String>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let token = std::fs::read_to_string(path)
        .with_context(|| format!("reading token file {}", path.display()))?;
    Ok(Some(token.trim().to_string()))
}

async fn run_server(config_path: &Path, port: Option<u16>) -> anyhow::Result<()> {
    let config = InsightConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!(handle = %config.handle, mode = ?config.mode, "insight daemon starting");

    // ── Backends ───────────────────────────────────────────────

    let kube_token = read_token(config.kubernetes.token_file.as_deref())?;
    let gcp_token = read_token(config.gcp.as_ref().and_then(|g| g.token_file.as_deref()))?;
    let backends = Backends::http(&config, kube_token, gcp_token);
    info!(
        api_url = %config.kubernetes.api_url,
        ingress = ?config.ingress.strategy,
        "backend clients ready"
    );

    let status = StatusAggregator::from_config(&config, &backends)?;
    let logs = LogEngine::from_config(&config, &backends);
    let verifier = JwtVerifier::from_config(&config.auth)?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start API server ───────────────────────────────────────

    let state = ApiState::new(&config.handle, status, logs, Arc::new(verifier), shutdown_rx);
    let router = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(config.server.port)));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    info!("insight daemon stopped");
    Ok(())
}

/// Ctrl-C, or SIGTERM on unix.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
