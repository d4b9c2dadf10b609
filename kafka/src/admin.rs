//! Topic administration.

use crate::config::{AdminOptions as AdminSection, ModuleOptions};
use crate::error::{KafkaError, Result};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Partition count used by [`Admin::create_topic_default`].
pub const DEFAULT_PARTITIONS: i32 = 1;

/// Replication factor used by [`Admin::create_topic_default`].
pub const DEFAULT_REPLICATION: i32 = 1;

/// Thin wrapper over the rdkafka admin client.
pub struct Admin {
    client: Arc<AdminClient<DefaultClientContext>>,
    timeout: Duration,
}

impl Admin {
    pub fn from_options(options: &ModuleOptions, admin: &AdminSection) -> Result<Self> {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", options.client.bootstrap_servers());
        if let Some(client_id) = &options.client.client_id {
            config.set("client.id", client_id);
        }
        for (key, value) in options.client.properties.iter().chain(admin.properties.iter()) {
            config.set(key, value);
        }

        let client: AdminClient<DefaultClientContext> = config.create()?;
        Ok(Self {
            client: Arc::new(client),
            timeout: Duration::from_millis(admin.operation_timeout_ms),
        })
    }

    /// Fetches cluster metadata once and returns how many brokers it lists.
    ///
    /// Creating the client does not touch the network; this does.
    pub async fn probe(&self, timeout: Duration) -> Result<usize> {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || {
            client
                .inner()
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| KafkaError::Other(format!("metadata task failed: {e}")))?
        .map_err(KafkaError::from)
    }

    /// Creates `topic` with one partition and a replication factor of one.
    pub async fn create_topic_default(&self, topic: &str) -> Result<()> {
        self.create_topic(topic, DEFAULT_PARTITIONS, DEFAULT_REPLICATION)
            .await
    }

    /// Creates `topic`. An already existing topic is not an error.
    pub async fn create_topic(&self, topic: &str, partitions: i32, replication: i32) -> Result<()> {
        let new_topic = NewTopic::new(topic, partitions, TopicReplication::Fixed(replication));
        let opts = AdminOptions::new().operation_timeout(Some(self.timeout));

        let results = self
            .client
            .create_topics(&[new_topic], &opts)
            .await
            .map_err(|e| {
                error!("Failed to create topic {}: {}", topic, e);
                KafkaError::Kafka(e)
            })?;

        for result in results {
            match result {
                Ok(name) => info!("Topic {} created", name),
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    info!("Topic {} already exists", name)
                }
                Err((name, code)) => {
                    error!("Failed to create topic {}: {}", name, code);
                    return Err(KafkaError::Kafka(rdkafka::error::KafkaError::AdminOp(code)));
                }
            }
        }
        Ok(())
    }

    /// Names of every topic in the cluster, sorted.
    pub async fn list_topics(&self) -> Result<Vec<String>> {
        let client = Arc::clone(&self.client);
        let timeout = self.timeout;

        let mut topics = tokio::task::spawn_blocking(move || {
            client.inner().fetch_metadata(None, timeout).map(|metadata| {
                metadata
                    .topics()
                    .iter()
                    .map(|t| t.name().to_string())
                    .collect::<Vec<_>>()
            })
        })
        .await
        .map_err(|e| KafkaError::Other(format!("metadata task failed: {e}")))??;

        topics.sort();
        Ok(topics)
    }
}
