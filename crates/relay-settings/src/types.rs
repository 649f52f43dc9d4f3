//! Settings types.

use std::time::Duration;

use relay_core::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Hub mailbox and per-connection queues.
    pub hub: HubSettings,
    /// Keepalive and deadline timings for the pumps.
    pub keepalive: KeepaliveSettings,
    /// External bus ingestion.
    pub bus: BusSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject combinations the pumps and hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.hub.outbound_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.outboundQueueCapacity must be non-zero".into(),
            ));
        }
        if self.hub.event_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.eventBuffer must be non-zero".into(),
            ));
        }
        if self.keepalive.write_wait_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "keepalive.writeWaitMs must be non-zero".into(),
            ));
        }
        if self.keepalive.ping_period_ms == 0
            || self.keepalive.ping_period_ms >= self.keepalive.pong_wait_ms
        {
            return Err(SettingsError::InvalidValue(format!(
                "keepalive.pingPeriodMs ({}) must be non-zero and shorter than keepalive.pongWaitMs ({})",
                self.keepalive.ping_period_ms, self.keepalive.pong_wait_ms
            )));
        }
        if self.bus.topics.iter().any(String::is_empty) {
            return Err(SettingsError::InvalidValue(
                "bus.topics must not contain empty names".into(),
            ));
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` to auto-assign).
    pub port: u16,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_message_size: 512 * 1024,
        }
    }
}

/// Hub sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Capacity of the hub's event mailbox.
    pub event_buffer: usize,
    /// Capacity of each connection's outbound queue, in messages.
    pub outbound_queue_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            event_buffer: 1024,
            outbound_queue_capacity: 256,
        }
    }
}

/// Pump timings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeepaliveSettings {
    /// Time allowed to write one frame.
    pub write_wait_ms: u64,
    /// Time allowed between pongs before the peer is considered dead.
    pub pong_wait_ms: u64,
    /// Interval between server pings. Must be shorter than `pong_wait_ms`.
    pub ping_period_ms: u64,
}

impl KeepaliveSettings {
    /// Write deadline.
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Read deadline, refreshed on every pong.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Ping cadence.
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            write_wait_ms: 10_000,
            pong_wait_ms: 60_000,
            // 9/10 of the pong wait
            ping_period_ms: 54_000,
        }
    }
}

/// External bus settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Comma-separated bootstrap brokers.
    pub brokers: String,
    /// Consumer group ID.
    pub group_id: String,
    /// Topics to ingest. One consume loop runs per topic.
    pub topics: Vec<String>,
    /// Where to start when the group has no committed offset
    /// (`earliest` or `latest`).
    pub auto_offset_reset: String,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "relay".to_string(),
            topics: Vec::new(),
            auto_offset_reset: "latest".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
