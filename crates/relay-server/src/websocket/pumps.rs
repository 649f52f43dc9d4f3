//! Read and write pumps: the two tasks serving one connection.
//!
//! Both are generic over the transport halves so tests can drive them with
//! in-memory channels. Whichever pump ends first closes the connection; the
//! other observes the close and ends too. Both unregister the client on the
//! way out (the hub ignores the second one).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::counter;
use relay_core::{ClientMessage, Payload};
use relay_settings::KeepaliveSettings;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, instrument, warn};

use super::connection::OutboundQueue;
use crate::hub::{Client, HubError, HubHandle};
use crate::metrics::DECODE_ERRORS_TOTAL;

/// Boxed transport error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Keepalive timings shared by both pumps.
#[derive(Clone, Debug)]
pub struct PumpConfig {
    /// Time allowed to write one frame.
    pub write_wait: Duration,
    /// Read deadline, refreshed on every pong.
    pub pong_wait: Duration,
    /// Ping cadence. Shorter than `pong_wait`.
    pub ping_period: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self::from(&KeepaliveSettings::default())
    }
}

impl From<&KeepaliveSettings> for PumpConfig {
    fn from(settings: &KeepaliveSettings) -> Self {
        Self {
            write_wait: settings.write_wait(),
            pong_wait: settings.pong_wait(),
            ping_period: settings.ping_period(),
        }
    }
}

/// Why a pump stopped. Always terminal for the connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Reading from the transport failed.
    #[error("read failed: {0}")]
    Read(#[source] BoxError),
    /// Writing to the transport failed.
    #[error("write failed: {0}")]
    Write(#[source] BoxError),
    /// No pong arrived within the read deadline.
    #[error("no pong within {0:?}")]
    ReadTimeout(Duration),
    /// A frame could not be written within the write deadline.
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
    /// The transport ended without a close frame.
    #[error("peer went away without a close frame")]
    UnexpectedEof,
}

impl TransportError {
    /// Short label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Read(_) => "read_error",
            Self::Write(_) => "write_error",
            Self::ReadTimeout(_) => "read_timeout",
            Self::WriteTimeout(_) => "write_timeout",
            Self::UnexpectedEof => "unexpected_eof",
        }
    }
}

/// Read frames until close, error, deadline, or the connection is closed.
///
/// Text and binary frames are decoded as [`ClientMessage`] and submitted to
/// the hub. A frame that fails to decode is logged and skipped. `Ok` means
/// an orderly end (close frame, local close, or hub gone).
#[instrument(skip_all, name = "read_pump", fields(conn_id = %client.id()))]
pub async fn read_pump<R, E>(
    mut stream: R,
    client: Arc<Client>,
    hub: HubHandle,
    config: PumpConfig,
) -> Result<(), TransportError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Into<BoxError>,
{
    let result = read_frames(&mut stream, &client, &hub, &config).await;
    client.connection().close();
    let _ = hub.unregister(Arc::clone(&client)).await;
    result
}

async fn read_frames<R, E>(
    stream: &mut R,
    client: &Client,
    hub: &HubHandle,
    config: &PumpConfig,
) -> Result<(), TransportError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Into<BoxError>,
{
    let connection = client.connection();
    let mut deadline = Instant::now() + config.pong_wait;
    loop {
        let next = tokio::select! {
            () = connection.closed() => return Ok(()),
            next = tokio::time::timeout_at(deadline, stream.next()) => next,
        };
        let frame = match next {
            Err(_) => return Err(TransportError::ReadTimeout(config.pong_wait)),
            Ok(None) => return Err(TransportError::UnexpectedEof),
            Ok(Some(Err(e))) => return Err(TransportError::Read(e.into())),
            Ok(Some(Ok(frame))) => frame,
        };
        let dispatched = match frame {
            Message::Text(text) => dispatch(text.as_str().as_bytes(), client, hub).await,
            Message::Binary(data) => dispatch(&data, client, hub).await,
            Message::Pong(_) => {
                deadline = Instant::now() + config.pong_wait;
                Ok(())
            }
            Message::Ping(_) => Ok(()),
            Message::Close(_) => {
                debug!("client sent close frame");
                return Ok(());
            }
        };
        if dispatched.is_err() {
            debug!("hub stopped, ending read pump");
            return Ok(());
        }
    }
}

async fn dispatch(frame: &[u8], client: &Client, hub: &HubHandle) -> Result<(), HubError> {
    match ClientMessage::parse(frame) {
        Ok(message) => hub.route(message.into_routed()).await,
        Err(e) => {
            warn!(
                user_id = %client.user_id(),
                len = frame.len(),
                error = %e,
                "dropping malformed client message"
            );
            counter!(DECODE_ERRORS_TOTAL, "origin" => "client", "kind" => e.kind()).increment(1);
            Ok(())
        }
    }
}

/// Drain the outbound queue to the transport and keep the peer alive.
///
/// Every write is bounded by `write_wait`; a ping goes out every
/// `ping_period`. When the connection is closed a close frame is sent and
/// the pump ends with `Ok`.
#[instrument(skip_all, name = "write_pump", fields(conn_id = %client.id()))]
pub async fn write_pump<S>(
    mut sink: S,
    mut queue: OutboundQueue,
    client: Arc<Client>,
    hub: HubHandle,
    config: PumpConfig,
) -> Result<(), TransportError>
where
    S: Sink<Message> + Unpin,
    S::Error: Into<BoxError>,
{
    let result = write_frames(&mut sink, &mut queue, &client, &config).await;
    client.connection().close();
    let _ = hub.unregister(Arc::clone(&client)).await;
    result
}

async fn write_frames<S>(
    sink: &mut S,
    queue: &mut OutboundQueue,
    client: &Client,
    config: &PumpConfig,
) -> Result<(), TransportError>
where
    S: Sink<Message> + Unpin,
    S::Error: Into<BoxError>,
{
    let connection = client.connection();
    let mut ping = tokio::time::interval_at(Instant::now() + config.ping_period, config.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = connection.closed() => {
                close_transport(sink, config.write_wait).await;
                return Ok(());
            }
            payload = queue.recv() => match payload {
                Some(payload) => write_frame(sink, outbound_frame(payload), config.write_wait).await?,
                None => {
                    close_transport(sink, config.write_wait).await;
                    return Ok(());
                }
            },
            _ = ping.tick() => write_frame(sink, Message::Ping(Bytes::new()), config.write_wait).await?,
        }
    }
}

/// Frame a payload for the wire: text when it is UTF-8, binary otherwise.
pub fn outbound_frame(payload: Payload) -> Message {
    let bytes = payload.into_bytes();
    match Utf8Bytes::try_from(bytes.clone()) {
        Ok(text) => Message::Text(text),
        Err(_) => Message::Binary(bytes),
    }
}

async fn write_frame<S>(sink: &mut S, frame: Message, wait: Duration) -> Result<(), TransportError>
where
    S: Sink<Message> + Unpin,
    S::Error: Into<BoxError>,
{
    match tokio::time::timeout(wait, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TransportError::Write(e.into())),
        Err(_) => Err(TransportError::WriteTimeout(wait)),
    }
}

async fn close_transport<S>(sink: &mut S, wait: Duration)
where
    S: Sink<Message> + Unpin,
    S::Error: Into<BoxError>,
{
    // Best effort: the peer may already be gone.
    let _ = write_frame(sink, Message::Close(None), wait).await;
    let _ = tokio::time::timeout(wait, sink.close()).await;
}
