use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use regscore_core::registers::RegisterStore;
use regscore_pipeline::grading::{GraderOptions, RhaiGrader};
use regscore_pipeline::orchestrator::Orchestrator;
use regscore_pipeline::upload::ScoringServiceClient;
use regscore_server::config::Config;
use regscore_server::modbus::{self, RegisterService};
use regscore_sourcer::client::SourcerClient;
use regscore_sourcer::protocol::HandshakeConfig;

#[derive(Parser)]
#[command(
    name = "regscore-server",
    version,
    about = "Modbus-triggered image scoring server"
)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(value_name = "CONFIGFILE")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading config '{}'", cli.config.display()))?;
    tracing::info!(
        listen_addr = %config.listen_addr,
        service_url = %config.service_url,
        sourcer_cmd = %config.sourcer_cmd,
        step_timeout = ?config.step_timeout,
        "Loaded configuration"
    );

    // --- Grader ---
    let options = GraderOptions {
        max_operations: config.max_operations,
    };
    let grader = RhaiGrader::load_with(&config.grader_script, &options).context("loading grading script")?;
    tracing::info!("Grading script loaded");

    // --- Sourcer ---
    let sourcer = SourcerClient::launch(&config.sourcer_cmd, &HandshakeConfig::default())
        .await
        .context("procuring sourcer")?;
    tracing::info!(pid = ?sourcer.pid(), "Obtained sourcer");

    // --- Pipeline ---
    let orchestrator = Arc::new(
        Orchestrator::new(
            Arc::new(RegisterStore::new()),
            Arc::new(sourcer),
            Arc::new(ScoringServiceClient::new(config.service_url.clone())),
            Arc::new(grader),
        )
        .with_step_timeout(config.step_timeout),
    );

    // --- Modbus listener ---
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding Modbus listener on {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "Modbus server listening");

    modbus::serve(listener, RegisterService::new(orchestrator), shutdown_signal())
        .await
        .context("serving Modbus")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
