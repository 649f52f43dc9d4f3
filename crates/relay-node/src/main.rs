//! # relay-node
//!
//! Relay hub binary. Loads settings, starts the hub actor, one ingestion
//! bridge per bus topic and the HTTP/WebSocket server, then waits for a
//! shutdown signal.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::LogFormat;
use relay_server::config::ServerConfig;
use relay_server::hub::Hub;
use relay_server::ingest::BridgeExit;
use relay_server::server::RelayServer;
use relay_server::shutdown::{ShutdownCoordinator, shutdown_signal};
use relay_settings::RelaySettings;
use tokio::task::JoinHandle;

/// Real-time relay hub.
#[derive(Parser, Debug)]
#[command(name = "relay-node", about = "Real-time WebSocket relay hub")]
struct Cli {
    /// Settings file (defaults to `$RELAY_CONFIG` or `~/.relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 to auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Bus brokers, comma-separated (overrides settings).
    #[arg(long)]
    brokers: Option<String>,

    /// Bus topic to consume. Repeat for several; replaces the configured list.
    #[arg(long = "topic")]
    topics: Vec<String>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Layer command-line flags over loaded settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(brokers) = &self.brokers {
            settings.bus.brokers.clone_from(brokers);
        }
        if !self.topics.is_empty() {
            settings.bus.topics.clone_from(&self.topics);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.format = LogFormat::Json;
        }
    }
}

fn load(cli: &Cli) -> Result<RelaySettings> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(relay_settings::settings_path);
    let mut settings = relay_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings
        .validate()
        .context("Invalid settings after command-line overrides")?;
    Ok(settings)
}

#[cfg(feature = "kafka")]
fn spawn_bridges(
    settings: &RelaySettings,
    hub: &relay_server::hub::HubHandle,
    shutdown: &ShutdownCoordinator,
) -> Result<Vec<JoinHandle<BridgeExit>>> {
    use relay_server::ingest::{IngestionBridge, KafkaConsumer};

    settings
        .bus
        .topics
        .iter()
        .map(|topic| {
            let consumer = KafkaConsumer::subscribe(&settings.bus, topic)
                .with_context(|| format!("Failed to subscribe to topic {topic}"))?;
            tracing::info!(topic, brokers = %settings.bus.brokers, "bus consumer subscribed");
            Ok(IngestionBridge::new(consumer, hub.clone(), shutdown.child_token()).spawn())
        })
        .collect()
}

#[cfg(not(feature = "kafka"))]
fn spawn_bridges(
    settings: &RelaySettings,
    _hub: &relay_server::hub::HubHandle,
    _shutdown: &ShutdownCoordinator,
) -> Result<Vec<JoinHandle<BridgeExit>>> {
    if !settings.bus.topics.is_empty() {
        tracing::warn!(
            topics = ?settings.bus.topics,
            "built without the `kafka` feature, bus topics are ignored"
        );
    }
    Ok(Vec::new())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    relay_core::logging::init_subscriber(&settings.logging.level, settings.logging.format);
    let metrics = relay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let config = ServerConfig::from(&settings);

    let (hub, hub_task) = Hub::new(&config.hub).start(shutdown.child_token());
    let bridges = spawn_bridges(&settings, &hub, &shutdown)?;

    let server = RelayServer::new(config, hub, shutdown.clone(), metrics);
    let (addr, server_task) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        %addr,
        topics = bridges.len(),
        "relay listening on ws://{addr}/ws"
    );

    shutdown_signal().await;
    tracing::info!("shutting down");

    shutdown.graceful_shutdown(bridges, None).await;
    shutdown
        .graceful_shutdown(vec![server_task, hub_task], None)
        .await;

    tracing::info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["relay-node"]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, RelaySettings::default().server.port);
        assert!(settings.bus.topics.is_empty());
        assert_eq!(settings.logging.format, LogFormat::Compact);
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::parse_from([
            "relay-node",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--topic",
            "X",
            "--topic",
            "Y",
            "--log-level",
            "debug",
            "--log-json",
        ]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.bus.topics, vec!["X", "Y"]);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn cli_topics_replace_configured_list() {
        let cli = Cli::parse_from(["relay-node", "--topic", "Z"]);
        let mut settings = RelaySettings::default();
        settings.bus.topics = vec!["X".into()];
        cli.apply(&mut settings);
        assert_eq!(settings.bus.topics, vec!["Z"]);
    }

    #[test]
    fn load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 7001}}"#).unwrap();

        let cli = Cli::parse_from(["relay-node", "--config", path.to_str().unwrap()]);
        let settings = load(&cli).unwrap();
        assert_eq!(settings.server.port, 7001);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let cli = Cli::parse_from(["relay-node", "--config", path.to_str().unwrap()]);
        let settings = load(&cli).unwrap();
        assert_eq!(settings.hub.outbound_queue_capacity, 256);
    }
}
