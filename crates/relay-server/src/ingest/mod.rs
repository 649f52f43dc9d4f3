//! External bus ingestion.
//!
//! One consume loop per topic. Each record is an encoded envelope whose
//! `data` is a client message; it is decoded and submitted to the hub the
//! same way a client frame is. Bad records are logged and skipped.

pub mod consumer;
#[cfg(feature = "kafka")]
pub mod kafka;

use std::time::Duration;

use metrics::counter;
use relay_core::{ClientMessage, DecodeError, RoutedMessage, envelope};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::hub::HubHandle;
use crate::metrics::{BUS_ERRORS_TOTAL, BUS_RECORDS_TOTAL, DECODE_ERRORS_TOTAL};

pub use consumer::{BusConsumer, BusError, BusRecord, ChannelConsumer, ChannelPublisher};
#[cfg(feature = "kafka")]
pub use kafka::KafkaConsumer;

/// Pause after a transient receive error before trying again.
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Why a consume loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeExit {
    /// The shutdown token fired.
    Cancelled,
    /// The consumer reported no more records.
    ConsumerClosed,
    /// The consumer failed unrecoverably.
    ConsumerFailed(String),
    /// The hub is no longer accepting events.
    HubStopped,
}

/// Decode one bus record into a routed message.
pub fn decode_record(payload: &[u8]) -> Result<RoutedMessage, DecodeError> {
    let envelope = envelope::decode(payload)?;
    debug!(
        id = %envelope.id,
        event_type = %envelope.event_type,
        source = %envelope.source,
        "decoded envelope"
    );
    Ok(ClientMessage::from_value(envelope.data)?.into_routed())
}

/// Consume loop for one topic.
pub struct IngestionBridge<C> {
    consumer: C,
    hub: HubHandle,
    cancel: CancellationToken,
    retry_backoff: Duration,
}

impl<C: BusConsumer + Sync + 'static> IngestionBridge<C> {
    /// Create a bridge feeding `hub` from `consumer` until `cancel` fires.
    pub fn new(consumer: C, hub: HubHandle, cancel: CancellationToken) -> Self {
        Self {
            consumer,
            hub,
            cancel,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Override the pause after transient errors.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Spawn the loop on the runtime.
    pub fn spawn(self) -> JoinHandle<BridgeExit> {
        tokio::spawn(self.run())
    }

    /// Run until cancelled, the consumer ends, or the hub stops.
    #[instrument(skip_all, name = "ingest", fields(topic = %self.consumer.topic()))]
    pub async fn run(mut self) -> BridgeExit {
        info!("ingestion started");
        let exit = loop {
            let received = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break BridgeExit::Cancelled,
                received = self.consumer.recv() => received,
            };
            match received {
                Ok(record) => {
                    if !self.forward(&record).await {
                        break BridgeExit::HubStopped;
                    }
                }
                Err(e) => {
                    counter!(
                        BUS_ERRORS_TOTAL,
                        "topic" => self.consumer.topic().to_owned(),
                        "severity" => e.severity()
                    )
                    .increment(1);
                    match e {
                        BusError::Closed => break BridgeExit::ConsumerClosed,
                        BusError::Fatal(reason) => {
                            warn!(%reason, "bus consumer failed");
                            break BridgeExit::ConsumerFailed(reason);
                        }
                        BusError::Transient(reason) => {
                            warn!(%reason, "transient bus error, continuing");
                            tokio::select! {
                                () = self.cancel.cancelled() => break BridgeExit::Cancelled,
                                () = tokio::time::sleep(self.retry_backoff) => {}
                            }
                        }
                    }
                }
            }
        };
        info!(exit = ?exit, "ingestion stopped");
        exit
    }

    /// Decode and submit one record. Returns `false` once the hub is gone.
    async fn forward(&self, record: &BusRecord) -> bool {
        let topic = self.consumer.topic();
        counter!(BUS_RECORDS_TOTAL, "topic" => topic.to_owned()).increment(1);

        let message = match decode_record(&record.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "skipping undecodable bus record"
                );
                counter!(DECODE_ERRORS_TOTAL, "origin" => "bus", "kind" => e.kind()).increment(1);
                return true;
            }
        };
        debug!(
            partition = record.partition,
            offset = record.offset,
            kind = message.kind(),
            "forwarding bus record"
        );
        self.hub.route(message).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Client, Hub, HubConfig};
    use crate::websocket::connection::{ClientConnection, OutboundQueue};
    use assert_matches::assert_matches;
    use relay_core::{Identity, Payload};
    use serde_json::json;
    use std::sync::Arc;

    fn start_hub() -> HubHandle {
        let (hub, _task) = Hub::new(&HubConfig::default()).start(CancellationToken::new());
        hub
    }

    async fn registered(hub: &HubHandle, user: &str, roles: &[&str]) -> OutboundQueue {
        let (conn, queue) = ClientConnection::with_capacity(16);
        let client = Arc::new(Client::new(
            Identity::new(user, "acme", roles.iter().copied()),
            Arc::new(conn),
        ));
        hub.register(client).await.unwrap();
        queue
    }

    fn record(data: &serde_json::Value) -> bytes::Bytes {
        envelope::encode(data, "/dashboards", "evt-1", "relay.message").unwrap()
    }

    #[test]
    fn decode_record_routes_by_body() {
        let routed = decode_record(&record(&json!({"broadcast": true, "payload": {"k": 1}}))).unwrap();
        assert_eq!(routed, RoutedMessage::broadcast(Payload::from("{\"k\":1}")));

        let routed = decode_record(&record(&json!({"roles": ["ops"], "payload": 1}))).unwrap();
        assert_eq!(routed, RoutedMessage::targeted("1").with_role("ops"));
    }

    #[test]
    fn decode_record_errors_are_typed() {
        assert_eq!(decode_record(b"nope").unwrap_err().kind(), "malformed_envelope");
        let bad_body = record(&json!({"users": "not-a-list"}));
        assert_eq!(decode_record(&bad_body).unwrap_err().kind(), "malformed_message");
    }

    #[tokio::test]
    async fn broadcast_record_reaches_every_client() {
        let hub = start_hub();
        let mut qa = registered(&hub, "alice", &[]).await;
        let mut qb = registered(&hub, "bob", &[]).await;
        let (publisher, consumer) = ChannelConsumer::pair("X", 8);
        let _task = IngestionBridge::new(consumer, hub.clone(), CancellationToken::new()).spawn();

        publisher
            .publish(record(&json!({"broadcast": true, "payload": "hi"})))
            .await
            .unwrap();

        assert_eq!(qa.recv().await.unwrap().as_text(), Some("\"hi\""));
        assert_eq!(qb.recv().await.unwrap().as_text(), Some("\"hi\""));
    }

    #[tokio::test]
    async fn bad_records_are_skipped() {
        let hub = start_hub();
        let mut q = registered(&hub, "alice", &["ops"]).await;
        let (publisher, consumer) = ChannelConsumer::pair("X", 8);
        let task = IngestionBridge::new(consumer, hub.clone(), CancellationToken::new()).spawn();

        publisher.publish("not an envelope").await.unwrap();
        publisher
            .publish(r#"{"specversion":"2.0","type":"t","source":"/s","id":"1","data":{}}"#)
            .await
            .unwrap();
        publisher
            .publish(record(&json!({"roles": ["ops"], "payload": 42})))
            .await
            .unwrap();

        assert_eq!(q.recv().await.unwrap().as_text(), Some("42"));
        assert!(!task.is_finished());
    }

    #[tokio::test]
    async fn transient_error_does_not_stop_loop() {
        let hub = start_hub();
        let mut q = registered(&hub, "alice", &[]).await;
        let (publisher, consumer) = ChannelConsumer::pair("X", 8);
        let _task = IngestionBridge::new(consumer, hub.clone(), CancellationToken::new())
            .with_retry_backoff(Duration::from_millis(1))
            .spawn();

        publisher
            .fail(BusError::Transient("rebalance".into()))
            .await
            .unwrap();
        publisher
            .publish(record(&json!({"users": ["alice"], "payload": "after"})))
            .await
            .unwrap();

        assert_eq!(q.recv().await.unwrap().as_text(), Some("\"after\""));
    }

    #[tokio::test]
    async fn fatal_error_ends_only_that_topic() {
        let hub = start_hub();
        let mut q = registered(&hub, "alice", &[]).await;
        let (pub_x, cons_x) = ChannelConsumer::pair("X", 8);
        let (pub_y, cons_y) = ChannelConsumer::pair("Y", 8);
        let task_x = IngestionBridge::new(cons_x, hub.clone(), CancellationToken::new()).spawn();
        let _task_y = IngestionBridge::new(cons_y, hub.clone(), CancellationToken::new()).spawn();

        pub_x.fail(BusError::Fatal("auth".into())).await.unwrap();
        assert_eq!(task_x.await.unwrap(), BridgeExit::ConsumerFailed("auth".into()));

        pub_y
            .publish(record(&json!({"broadcast": true, "payload": "y"})))
            .await
            .unwrap();
        assert_eq!(q.recv().await.unwrap().as_text(), Some("\"y\""));
    }

    #[tokio::test]
    async fn closed_consumer_ends_loop() {
        let hub = start_hub();
        let (publisher, consumer) = ChannelConsumer::pair("X", 8);
        let task = IngestionBridge::new(consumer, hub, CancellationToken::new()).spawn();
        drop(publisher);
        assert_eq!(task.await.unwrap(), BridgeExit::ConsumerClosed);
    }

    #[tokio::test]
    async fn cancellation_ends_loop() {
        let hub = start_hub();
        let (_publisher, consumer) = ChannelConsumer::pair("X", 8);
        let cancel = CancellationToken::new();
        let task = IngestionBridge::new(consumer, hub, cancel.clone()).spawn();
        cancel.cancel();
        assert_eq!(task.await.unwrap(), BridgeExit::Cancelled);
    }

    #[tokio::test]
    async fn stopped_hub_ends_loop() {
        let (hub, hub_task) = Hub::new(&HubConfig::default()).start(CancellationToken::new());
        hub.stop();
        hub_task.await.unwrap();

        let (publisher, consumer) = ChannelConsumer::pair("X", 8);
        let task = IngestionBridge::new(consumer, hub, CancellationToken::new()).spawn();
        publisher
            .publish(record(&json!({"broadcast": true, "payload": 1})))
            .await
            .unwrap();
        assert_matches!(task.await.unwrap(), BridgeExit::HubStopped);
    }
}
