//! Kafka-backed [`BusConsumer`].

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message as KafkaMessage;
use relay_settings::BusSettings;
use tracing::info;

use super::consumer::{BusConsumer, BusError, BusRecord};

/// One subscription to one topic.
pub struct KafkaConsumer {
    topic: String,
    inner: StreamConsumer,
}

impl KafkaConsumer {
    /// Create a consumer in the configured group and subscribe to `topic`.
    ///
    /// Offsets are auto-committed; missed messages are not replayed beyond
    /// what `auto.offset.reset` allows.
    pub fn subscribe(settings: &BusSettings, topic: &str) -> Result<Self, BusError> {
        let inner: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", &settings.auto_offset_reset)
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BusError::Fatal(format!("create consumer: {e}")))?;
        inner
            .subscribe(&[topic])
            .map_err(|e| BusError::Fatal(format!("subscribe to {topic}: {e}")))?;
        info!(topic, brokers = %settings.brokers, group = %settings.group_id, "kafka consumer subscribed");
        Ok(Self {
            topic: topic.to_owned(),
            inner,
        })
    }
}

#[async_trait]
impl BusConsumer for KafkaConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn recv(&mut self) -> Result<BusRecord, BusError> {
        match self.inner.recv().await {
            Ok(message) => Ok(BusRecord {
                topic: message.topic().to_owned(),
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(Bytes::copy_from_slice),
                payload: message
                    .payload()
                    .map(Bytes::copy_from_slice)
                    .unwrap_or_default(),
            }),
            Err(e) => Err(classify(e)),
        }
    }
}

fn classify(error: KafkaError) -> BusError {
    match error {
        KafkaError::Canceled => BusError::Closed,
        KafkaError::MessageConsumptionFatal(code) => BusError::Fatal(code.to_string()),
        other => BusError::Transient(other.to_string()),
    }
}
