//! graceful-exit server.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!   SIGINT        │  ┌──────────────────┐     ┌───────────────────────┐  │
//!   SIGTERM ──────┼─▶│ SignalDispatcher │────▶│ ShutdownOrchestrator  │  │
//!   SIGHUP        │  └──────────────────┘     │ Running → Draining →  │  │
//!                 │                           │ Forcing → Exiting     │  │
//!                 │                           └──┬─────────┬──────┬───┘  │
//!                 │                  stop accept │   phase │      │ destroy
//!                 │                              ▼         ▼      ▼      │
//!   Client ───────┼─▶ listener ──▶ ConnectionTracker ──▶ RequestGate ──▶ handlers
//!                 └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use graceful_exit::config::{load_config, validate_config, AppConfig};
use graceful_exit::http::handlers::demo_router;
use graceful_exit::lifecycle::{self, SignalDispatcher};
use graceful_exit::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "graceful-exit")]
#[command(about = "HTTP server that drains connections before exiting", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

fn load(cli: &Cli) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
        validate_config(&config).map_err(graceful_exit::config::ConfigError::Validation)?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging is configured from the file, so this error goes to stderr.
    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("graceful-exit: {e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!(pid = std::process::id(), "graceful-exit v0.1.0 starting");

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            if let Err(e) = metrics::init_metrics(addr) {
                tracing::error!(error = %e, "Failed to start metrics exporter");
            }
        }
    }

    let started = match lifecycle::start(&config, demo_router(&config.demo)).await {
        Ok(started) => started,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    let dispatcher = SignalDispatcher::new(started.orchestrator.trigger_handle());
    if let Err(e) = dispatcher.install() {
        tracing::error!(error = %e, "Failed to install signal handlers");
        return ExitCode::FAILURE;
    }

    match started.orchestrator.run().await {
        Ok(report) => {
            tracing::info!(
                source = %report.source,
                drained = report.drained,
                forced = report.forced,
                lingering = report.lingering,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Shutdown complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Shutdown failed");
            ExitCode::FAILURE
        }
    }
}
