//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Sink, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use relay_core::Identity;
use relay_settings::RelaySettings;
use tokio::task::JoinError;
use tracing::{error, info, instrument, warn};

use super::connection::{ClientConnection, OutboundQueue};
use super::pumps::{BoxError, PumpConfig, TransportError, read_pump, write_pump};
use crate::hub::{Client, HubHandle};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Per-connection sizing and timings.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Outbound queue capacity, in messages.
    pub queue_capacity: usize,
    /// Pump timings.
    pub pumps: PumpConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&RelaySettings::default())
    }
}

impl From<&RelaySettings> for SessionConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            queue_capacity: settings.hub.outbound_queue_capacity,
            pumps: PumpConfig::from(&settings.keepalive),
        }
    }
}

/// Serve one upgraded socket until both pumps have exited.
///
/// 1. Creates the connection and registers the client with the hub
/// 2. Spawns the read and write pumps
/// 3. Waits for both, then records why the connection ended
pub async fn run_ws_session<T, E>(
    socket: T,
    identity: Identity,
    hub: HubHandle,
    config: SessionConfig,
) where
    T: Stream<Item = Result<Message, E>> + Sink<Message, Error = E> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    let (connection, queue) = ClientConnection::with_capacity(config.queue_capacity);
    let client = Arc::new(Client::new(identity, Arc::new(connection)));
    serve(socket, client, queue, hub, config.pumps).await;
}

#[instrument(skip_all, fields(conn_id = %client.id(), user_id = %client.user_id()))]
async fn serve<T, E>(
    socket: T,
    client: Arc<Client>,
    queue: OutboundQueue,
    hub: HubHandle,
    pumps: PumpConfig,
) where
    T: Stream<Item = Result<Message, E>> + Sink<Message, Error = E> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    info!(
        org = %client.organization(),
        roles = ?client.identity().roles,
        "client connected"
    );
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    if hub.register(Arc::clone(&client)).await.is_err() {
        warn!("hub not running, dropping connection");
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        return;
    }

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_pump(
        sink,
        queue,
        Arc::clone(&client),
        hub.clone(),
        pumps.clone(),
    ));
    let reader = tokio::spawn(read_pump(stream, Arc::clone(&client), hub, pumps));
    let (read, write) = tokio::join!(reader, writer);

    let read = pump_outcome("read", read);
    let write = pump_outcome("write", write);
    let reason = read.or(write).unwrap_or("closed");

    let connection = client.connection();
    info!(
        reason,
        dropped = connection.drop_count(),
        age_ms = u64::try_from(connection.age().as_millis()).unwrap_or(u64::MAX),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

/// Disconnect reason contributed by one pump, if it failed.
fn pump_outcome(
    pump: &'static str,
    joined: Result<Result<(), TransportError>, JoinError>,
) -> Option<&'static str> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(e)) => {
            info!(pump, error = %e, "pump ended with error");
            Some(e.reason())
        }
        Err(e) => {
            error!(pump, error = %e, "pump task failed");
            Some("task_failed")
        }
    }
}
