//! Bus consumer abstraction and an in-memory implementation.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// One record pulled from a bus topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusRecord {
    /// Topic it was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Record key, if any.
    pub key: Option<Bytes>,
    /// Record value: an encoded envelope.
    pub payload: Bytes,
}

/// Receive failures, by how the consume loop should react.
#[derive(Debug, Error)]
pub enum BusError {
    /// The consumer has no more records. Ends the loop.
    #[error("consumer closed")]
    Closed,
    /// Unrecoverable consumer failure. Ends the loop.
    #[error("fatal bus error: {0}")]
    Fatal(String),
    /// Recoverable failure. The loop logs it and keeps consuming.
    #[error("transient bus error: {0}")]
    Transient(String),
}

impl BusError {
    /// Whether the consume loop should stop.
    #[cfg(test)]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Fatal(_))
    }

    /// Short label for logs and metrics.
    pub fn severity(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Fatal(_) => "fatal",
            Self::Transient(_) => "transient",
        }
    }
}

/// Source of records for one topic.
#[async_trait]
pub trait BusConsumer: Send {
    /// The topic this consumer reads.
    fn topic(&self) -> &str;

    /// Wait for the next record.
    async fn recv(&mut self) -> Result<BusRecord, BusError>;
}

/// In-memory consumer fed by a [`ChannelPublisher`].
///
/// Used for local runs without a broker and in tests.
pub struct ChannelConsumer {
    topic: String,
    rx: mpsc::Receiver<Result<BusRecord, BusError>>,
}

/// Producer side of a [`ChannelConsumer`].
#[derive(Debug)]
pub struct ChannelPublisher {
    topic: String,
    tx: mpsc::Sender<Result<BusRecord, BusError>>,
    next_offset: AtomicI64,
}

impl ChannelConsumer {
    /// Create a connected publisher/consumer pair for `topic`.
    pub fn pair(topic: impl Into<String>, capacity: usize) -> (ChannelPublisher, Self) {
        let topic = topic.into();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let publisher = ChannelPublisher {
            topic: topic.clone(),
            tx,
            next_offset: AtomicI64::new(0),
        };
        (publisher, Self { topic, rx })
    }
}

#[async_trait]
impl BusConsumer for ChannelConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn recv(&mut self) -> Result<BusRecord, BusError> {
        self.rx.recv().await.unwrap_or(Err(BusError::Closed))
    }
}

impl ChannelPublisher {
    /// Publish a record value. Fails with [`BusError::Closed`] once the
    /// consumer is gone.
    pub async fn publish(&self, payload: impl Into<Bytes>) -> Result<(), BusError> {
        let record = BusRecord {
            topic: self.topic.clone(),
            partition: 0,
            offset: self.next_offset.fetch_add(1, Ordering::Relaxed),
            key: None,
            payload: payload.into(),
        };
        self.tx
            .send(Ok(record))
            .await
            .map_err(|_| BusError::Closed)
    }

    /// Deliver an error to the consumer in place of a record.
    pub async fn fail(&self, error: BusError) -> Result<(), BusError> {
        self.tx.send(Err(error)).await.map_err(|_| BusError::Closed)
    }

    /// The topic records are published to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}
