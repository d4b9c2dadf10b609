//! Broker transport seam and its rdkafka implementation.
//!
//! The consumer lifecycle only talks to a [`ConsumerTransport`]. The default
//! transport wraps an rdkafka `StreamConsumer`; tests plug in their own.

use crate::config::ConsumerSettings;
use crate::error::{KafkaError, Result};
use crate::message::RawMessage;
use crate::pipeline::Pipeline;
use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer as RdConsumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Partition-level controls handed to handlers with each message.
#[async_trait]
pub trait PartitionControl: Send + Sync {
    async fn heartbeat(&self) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;
}

/// Connect/subscribe/run/disconnect primitives of a broker client.
///
/// `run` delivers every message to the pipeline, one at a time, and returns
/// once `disconnect` has been called.
#[async_trait]
pub trait ConsumerTransport: Send + Sync {
    async fn connect(&self, settings: &ConsumerSettings) -> Result<()>;

    async fn subscribe(&self, topic: &str, from_beginning: bool) -> Result<()>;

    async fn run(&self, pipeline: Arc<Pipeline>) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// rdkafka-backed consumer transport.
///
/// librdkafka applies `auto.offset.reset` to the whole consumer, so the
/// `from_beginning` choice is fixed by the settings passed to `connect`.
pub struct RdKafkaTransport {
    consumer: RwLock<Option<Arc<StreamConsumer>>>,
    settings: RwLock<Option<ConsumerSettings>>,
    topics: Mutex<Vec<String>>,
    shutdown: Arc<RwLock<bool>>,
    poll_timeout: Duration,
}

impl Default for RdKafkaTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RdKafkaTransport {
    pub fn new() -> Self {
        Self {
            consumer: RwLock::new(None),
            settings: RwLock::new(None),
            topics: Mutex::new(Vec::new()),
            shutdown: Arc::new(RwLock::new(false)),
            poll_timeout: Duration::from_secs(1),
        }
    }

    /// Sets how long each poll waits before re-checking the shutdown flag.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    async fn session(&self) -> Result<Arc<StreamConsumer>> {
        self.consumer
            .read()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or(KafkaError::NotConnected)
    }

    async fn auto_commit(&self) -> bool {
        self.settings
            .read()
            .await
            .as_ref()
            .map_or(true, |s| s.auto_commit)
    }
}

#[async_trait]
impl ConsumerTransport for RdKafkaTransport {
    async fn connect(&self, settings: &ConsumerSettings) -> Result<()> {
        info!(
            "Creating Kafka consumer with brokers: {}, group: {}",
            settings.brokers, settings.group_id
        );

        let connection_error = |reason: String| KafkaError::Connection {
            brokers: settings.brokers.clone(),
            reason,
        };

        let consumer =
            Arc::new(create_consumer(settings).map_err(|e| connection_error(e.to_string()))?);

        // Creating the client does not touch the network; a metadata round
        // trip proves the brokers are reachable.
        let probe = Arc::clone(&consumer);
        let timeout = settings.connect_timeout;
        let brokers_seen = tokio::task::spawn_blocking(move || {
            probe
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| connection_error(e.to_string()))?
        .map_err(|e| connection_error(e.to_string()))?;
        debug!("Cluster metadata lists {} broker(s)", brokers_seen);

        *self.settings.write().await = Some(settings.clone());
        *self.consumer.write().await = Some(consumer);
        *self.shutdown.write().await = false;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, from_beginning: bool) -> Result<()> {
        let consumer = self.session().await?;

        let reset_earliest = self
            .settings
            .read()
            .await
            .as_ref()
            .is_some_and(|s| s.from_beginning);
        if from_beginning && !reset_earliest {
            warn!(
                "Topic '{}' asked to start from the beginning, but the consumer was created with auto.offset.reset=latest",
                topic
            );
        }

        let mut topics = self.topics.lock().await;
        if topics.iter().any(|t| t == topic) {
            return Ok(());
        }

        // rdkafka replaces the subscription set on every call. The topic is
        // only kept once librdkafka has accepted the new set.
        let mut all: Vec<&str> = topics.iter().map(String::as_str).collect();
        all.push(topic);
        debug!("Updating subscription to topics: {:?}", all);
        consumer
            .subscribe(&all)
            .map_err(|e| KafkaError::Subscription {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        topics.push(topic.to_string());
        Ok(())
    }

    async fn run(&self, pipeline: Arc<Pipeline>) -> Result<()> {
        let consumer = self.session().await?;
        let auto_commit = self.auto_commit().await;
        info!("Starting consumer loop");

        loop {
            if *self.shutdown.read().await {
                info!("Shutdown signal received, stopping consumer");
                break;
            }

            let delivery = match tokio::time::timeout(self.poll_timeout, consumer.recv()).await {
                Ok(delivery) => delivery.map(|message| to_raw(&message)),
                // Timeout, check shutdown and continue
                Err(_) => continue,
            };
            let raw = match delivery {
                Ok(raw) => raw,
                Err(e) => {
                    error!("Error receiving message: {}", e);
                    sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let (topic, partition, offset) = (raw.topic.clone(), raw.partition, raw.offset);
            let control = Arc::new(RdKafkaPartitionControl {
                consumer: Arc::clone(&consumer),
                topic: topic.clone(),
                partition,
            });

            pipeline.process(raw, control).await;

            if !auto_commit {
                let mut tpl = TopicPartitionList::new();
                let committed = tpl
                    .add_partition_offset(&topic, partition, Offset::Offset(offset + 1))
                    .and_then(|_| consumer.commit(&tpl, CommitMode::Async));
                if let Err(e) = committed {
                    error!("Failed to commit offset: {}", e);
                }
            }
        }

        info!("Consumer stopped");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.shutdown.write().await = true;
        self.topics.lock().await.clear();

        if let Some(consumer) = self.consumer.write().await.take() {
            consumer.unsubscribe();
            debug!("Released consumer session");
        }
        Ok(())
    }
}

fn create_consumer(settings: &ConsumerSettings) -> Result<StreamConsumer> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &settings.brokers)
        .set("group.id", &settings.group_id)
        .set("enable.auto.commit", settings.auto_commit.to_string())
        .set(
            "auto.offset.reset",
            if settings.from_beginning { "earliest" } else { "latest" },
        )
        .set("session.timeout.ms", settings.session_timeout_ms.to_string())
        .set("enable.partition.eof", "false");
    if let Some(client_id) = &settings.client_id {
        client_config.set("client.id", client_id);
    }
    for (key, value) in &settings.properties {
        client_config.set(key, value);
    }

    Ok(client_config.create()?)
}

fn to_raw(message: &BorrowedMessage<'_>) -> RawMessage {
    let mut raw = RawMessage::new(message.topic(), message.partition(), message.offset());
    raw.key = message.key().map(<[u8]>::to_vec);
    raw.value = message.payload().map(<[u8]>::to_vec);
    raw.timestamp = message.timestamp().to_millis();

    if let Some(headers) = message.headers() {
        for header in headers.iter() {
            raw.headers.insert(
                header.key.to_string(),
                header.value.map(<[u8]>::to_vec).unwrap_or_default(),
            );
        }
    }
    raw
}

struct RdKafkaPartitionControl {
    consumer: Arc<StreamConsumer>,
    topic: String,
    partition: i32,
}

impl RdKafkaPartitionControl {
    fn partition_list(&self) -> TopicPartitionList {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(&self.topic, self.partition);
        tpl
    }
}

#[async_trait]
impl PartitionControl for RdKafkaPartitionControl {
    async fn heartbeat(&self) -> Result<()> {
        // librdkafka heartbeats from its own background thread.
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.consumer.pause(&self.partition_list())?;
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.consumer.resume(&self.partition_list())?;
        Ok(())
    }
}
