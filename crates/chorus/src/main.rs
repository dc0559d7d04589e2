//! # chorus
//!
//! Chorus broadcast hub binary. Loads configuration, starts logging and
//! serves until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chorus_server::config::ServerConfig;
use chorus_server::metrics;
use chorus_server::server::ChorusServer;
use chorus_telemetry::{LogFormat, TelemetryConfig};
use clap::Parser;

/// Chorus broadcast hub.
#[derive(Parser, Debug)]
#[command(name = "chorus", about = "WebSocket broadcast hub")]
struct Cli {
    /// JSON config file, layered over defaults and under `CHORUS_*` env vars.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter directive. `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            level: self.log_level.clone(),
            format: if self.log_json {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            },
        }
    }

    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = ServerConfig::load(self.config.as_deref())
            .context("Failed to load server configuration")?;
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    if let Err(e) = chorus_telemetry::init_telemetry(&args.telemetry_config()) {
        eprintln!("chorus: {e}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "chorus exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    let config = args.server_config()?;

    let metrics_handle = match metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder unavailable");
            None
        }
    };

    let server = ChorusServer::new(config, metrics_handle);
    let (addr, handle) = server.listen().await.context("Failed to start server")?;
    tracing::info!(%addr, "chorus ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let report = server.stop(handle).await;
    tracing::info!(
        closed = report.closed_connections,
        aborted = report.aborted,
        "clients drained"
    );

    tracing::info!("Shutdown complete");
    Ok(())
}
