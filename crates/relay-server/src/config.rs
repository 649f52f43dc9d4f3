//! Server configuration.

use relay_settings::RelaySettings;

use crate::hub::HubConfig;
use crate::websocket::session::SessionConfig;

/// Configuration for the relay server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` to auto-assign).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Hub mailbox sizing.
    pub hub: HubConfig,
    /// Per-connection queue and pump timings.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&RelaySettings::default())
    }
}

impl From<&RelaySettings> for ServerConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            hub: HubConfig::from(&settings.hub),
            session: SessionConfig::from(settings),
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
