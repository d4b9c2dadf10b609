//! Kafka producer.

use crate::config::ModuleOptions;
use crate::error::{KafkaError, Result};
use kafka_messages::KafkaMessage;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as RdProducer};
use rdkafka::ClientConfig;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info};

/// A message to publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub key: Option<Vec<u8>>,
    /// `None` publishes a tombstone.
    pub value: Option<Vec<u8>>,
    pub headers: Vec<(String, Vec<u8>)>,
    /// Explicit partition; `None` lets the partitioner decide.
    pub partition: Option<i32>,
    pub timestamp: Option<i64>,
}

impl OutboundMessage {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    /// A message with a key and no value, marking the key as deleted on
    /// compacted topics.
    pub fn tombstone(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Serializes `value` as JSON.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        let payload =
            serde_json::to_vec(value).map_err(|e| KafkaError::Serialization(e.to_string()))?;
        Ok(Self::new(payload))
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }
}

/// Where a message landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Kafka producer.
///
/// # Example
///
/// ```no_run
/// use kafka_facade::{ModuleOptions, OutboundMessage, Producer};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let producer = Producer::from_options(&ModuleOptions::new("localhost:9092"))?;
///
///     let metadata = producer
///         .send("orders", &[OutboundMessage::new(r#"{"id":42}"#).with_key("k1")])
///         .await?;
///     println!("stored at offset {}", metadata[0].offset);
///     Ok(())
/// }
/// ```
pub struct Producer {
    inner: FutureProducer,
    queue_timeout: Duration,
}

impl Producer {
    /// Creates a producer from the `client` and `producer` sections.
    ///
    /// # Errors
    ///
    /// Returns an error if the producer cannot be created.
    pub fn from_options(options: &ModuleOptions) -> Result<Self> {
        let producer_options = options.producer.clone().unwrap_or_default();
        let brokers = options.client.bootstrap_servers();
        info!("Creating Kafka producer with brokers: {}", brokers);

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &brokers)
            .set(
                "message.timeout.ms",
                producer_options.message_timeout_ms.to_string(),
            )
            .set("queue.buffering.max.messages", "100000")
            .set("queue.buffering.max.kbytes", "1048576")
            .set("batch.num.messages", "10000");
        if let Some(client_id) = &options.client.client_id {
            config.set("client.id", client_id);
        }
        for (key, value) in options
            .client
            .properties
            .iter()
            .chain(producer_options.properties.iter())
        {
            config.set(key, value);
        }

        let mut producer = Self::from_config(config)?;
        producer.queue_timeout = Duration::from_millis(producer_options.message_timeout_ms);
        Ok(producer)
    }

    /// Creates a producer with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the producer cannot be created.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let producer: FutureProducer = config.create()?;
        Ok(Self {
            inner: producer,
            queue_timeout: Duration::from_secs(5),
        })
    }

    /// Sends messages to `topic` in order, returning where each one landed.
    ///
    /// Stops at the first failed delivery.
    pub async fn send(&self, topic: &str, messages: &[OutboundMessage]) -> Result<Vec<RecordMetadata>> {
        let mut delivered = Vec::with_capacity(messages.len());

        for message in messages {
            let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(topic);
            if let Some(key) = &message.key {
                record = record.key(key.as_slice());
            }
            if let Some(value) = &message.value {
                record = record.payload(value.as_slice());
            }
            if let Some(partition) = message.partition {
                record = record.partition(partition);
            }
            if let Some(timestamp) = message.timestamp {
                record = record.timestamp(timestamp);
            }
            if !message.headers.is_empty() {
                let headers = message.headers.iter().fold(
                    OwnedHeaders::new_with_capacity(message.headers.len()),
                    |headers, (name, value)| {
                        headers.insert(Header {
                            key: name.as_str(),
                            value: Some(value.as_slice()),
                        })
                    },
                );
                record = record.headers(headers);
            }

            match self.inner.send(record, self.queue_timeout).await {
                Ok((partition, offset)) => {
                    delivered.push(RecordMetadata {
                        topic: topic.to_string(),
                        partition,
                        offset,
                    });
                }
                Err((kafka_err, _msg)) => {
                    error!("Failed to send messages to {}: {}", topic, kafka_err);
                    return Err(KafkaError::Kafka(kafka_err));
                }
            }
        }

        debug!("Sent {} messages to {}", delivered.len(), topic);
        Ok(delivered)
    }

    /// Sends a typed message to its topic, JSON encoded and keyed by
    /// [`KafkaMessage::key`].
    pub async fn send_typed<T: KafkaMessage>(&self, message: &T) -> Result<RecordMetadata> {
        let mut outbound = OutboundMessage::json(message)?;
        if let Some(key) = message.key() {
            outbound = outbound.with_key(key);
        }

        self.send(T::TOPIC, std::slice::from_ref(&outbound))
            .await?
            .pop()
            .ok_or_else(|| KafkaError::Other(format!("no delivery report for {}", T::TOPIC)))
    }

    /// Fetches cluster metadata once and returns how many brokers it lists.
    ///
    /// Creating the producer does not touch the network; this does.
    pub async fn probe(&self, timeout: Duration) -> Result<usize> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            inner
                .client()
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| KafkaError::Other(format!("metadata task failed: {e}")))?
        .map_err(KafkaError::from)
    }

    /// Flushes any pending messages.
    ///
    /// This blocks the calling thread for up to `timeout`.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        RdProducer::flush(&self.inner, timeout)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Order {
        id: u32,
    }

    #[test]
    fn json_message_carries_payload() {
        let message = OutboundMessage::json(&Order { id: 42 })
            .unwrap()
            .with_key("k1")
            .with_header("source", "test")
            .with_partition(2);

        assert_eq!(message.value.as_deref(), Some(br#"{"id":42}"#.as_slice()));
        assert_eq!(message.key.as_deref(), Some(b"k1".as_slice()));
        assert_eq!(message.headers, vec![("source".to_string(), b"test".to_vec())]);
        assert_eq!(message.partition, Some(2));
    }

    #[test]
    fn tombstone_has_no_value() {
        let message = OutboundMessage::tombstone("k1");
        assert!(message.value.is_none());
        assert_eq!(message.key.as_deref(), Some(b"k1".as_slice()));
    }
}
