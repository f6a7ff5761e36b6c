//! # courier
//!
//! Broker binary: loads settings, installs telemetry, and serves the
//! WebSocket broker until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use courier_core::{Broker, BrokerConfig};
use courier_server::ServerConfig;
use courier_settings::CourierSettings;
use courier_telemetry::TelemetryConfig;

/// Topic-based publish/subscribe broker over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "courier", about = "Topic-based publish/subscribe broker")]
struct Cli {
    /// Settings file (defaults to `~/.courier/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Per-session outbound queue capacity.
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Default log level (`RUST_LOG` takes precedence).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Flags win over file and environment values.
    fn apply(&self, settings: &mut CourierSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(capacity) = self.queue_capacity {
            settings.broker.outbound_queue_capacity = capacity;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

fn load(cli: &Cli) -> Result<CourierSettings> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(courier_settings::settings_path);
    let mut settings = courier_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

fn server_config(settings: &CourierSettings) -> ServerConfig {
    let server = &settings.server;
    ServerConfig {
        host: server.host.clone(),
        port: server.port,
        heartbeat_interval: Duration::from_millis(server.heartbeat_interval_ms),
        client_timeout: Duration::from_millis(server.client_timeout_ms),
        reap_interval: Duration::from_millis(server.reap_interval_ms),
        drain_timeout: Duration::from_millis(server.drain_timeout_ms),
    }
}

fn broker_config(settings: &CourierSettings) -> BrokerConfig {
    BrokerConfig {
        outbound_queue_capacity: settings.broker.outbound_queue_capacity,
        acknowledge: settings.broker.acknowledge,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    courier_telemetry::init_telemetry(&TelemetryConfig {
        log_level: courier_telemetry::parse_level(&settings.logging.level),
        module_levels: Vec::new(),
        json: settings.logging.json,
    });

    let metrics = match courier_telemetry::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let broker = Broker::new(broker_config(&settings));
    let handle = courier_server::start_with_metrics(server_config(&settings), broker, metrics)
        .await
        .context("failed to start server")?;

    tracing::info!(
        port = handle.port,
        queue_capacity = settings.broker.outbound_queue_capacity,
        "courier ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
