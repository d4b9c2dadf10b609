//! Producer and admin lifecycle.

use crate::admin::Admin;
use crate::config::ModuleOptions;
use crate::error::{KafkaError, Result};
use crate::producer::{OutboundMessage, Producer, RecordMetadata};
use kafka_messages::KafkaMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

#[derive(Default)]
struct Clients {
    producer: Option<Arc<Producer>>,
    admin: Option<Arc<Admin>>,
    initialized: bool,
}

/// Owns the producer and, when configured, the admin client.
///
/// Every operation fails with [`KafkaError::NotInitialized`] until
/// [`initialize`](Self::initialize) has created the client it needs.
pub struct KafkaService {
    options: ModuleOptions,
    clients: RwLock<Clients>,
}

impl KafkaService {
    pub fn new(options: ModuleOptions) -> Self {
        Self {
            options,
            clients: RwLock::new(Clients::default()),
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.clients.read().await.initialized
    }

    /// Creates the producer and, if an `admin` section is configured, the
    /// admin client, then checks the brokers answer a metadata request.
    /// Calling it again once initialized is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        let mut clients = self.clients.write().await;
        if clients.initialized {
            return Ok(());
        }

        match self.create_clients().await {
            Ok((producer, admin)) => {
                info!("Kafka producer connected");
                if admin.is_some() {
                    info!("Kafka admin connected");
                }
                clients.producer = Some(producer);
                clients.admin = admin;
                clients.initialized = true;
                Ok(())
            }
            Err(e) => {
                error!("Failed to initialize Kafka service: {}", e);
                Err(e)
            }
        }
    }

    async fn create_clients(&self) -> Result<(Arc<Producer>, Option<Arc<Admin>>)> {
        let brokers = self.options.client.bootstrap_servers();
        let timeout = self.options.client.connect_timeout();
        let connection_error = |e: KafkaError| KafkaError::Connection {
            brokers: brokers.clone(),
            reason: e.to_string(),
        };

        let producer = Producer::from_options(&self.options).map_err(connection_error)?;
        let brokers_seen = producer.probe(timeout).await.map_err(connection_error)?;
        debug!("Producer sees {} broker(s)", brokers_seen);

        let admin = match &self.options.admin {
            Some(section) => {
                let admin = Admin::from_options(&self.options, section).map_err(connection_error)?;
                let brokers_seen = admin.probe(timeout).await.map_err(connection_error)?;
                debug!("Admin client sees {} broker(s)", brokers_seen);
                Some(Arc::new(admin))
            }
            None => None,
        };
        Ok((Arc::new(producer), admin))
    }

    pub async fn producer(&self) -> Result<Arc<Producer>> {
        self.clients
            .read()
            .await
            .producer
            .clone()
            .ok_or(KafkaError::NotInitialized("producer"))
    }

    pub async fn admin(&self) -> Result<Arc<Admin>> {
        self.clients
            .read()
            .await
            .admin
            .clone()
            .ok_or(KafkaError::NotInitialized("admin client"))
    }

    pub async fn send(&self, topic: &str, messages: &[OutboundMessage]) -> Result<Vec<RecordMetadata>> {
        self.producer().await?.send(topic, messages).await
    }

    pub async fn send_typed<T: KafkaMessage>(&self, message: &T) -> Result<RecordMetadata> {
        self.producer().await?.send_typed(message).await
    }

    /// Creates `topic` with the given partition count and replication factor.
    pub async fn create_topic(&self, topic: &str, partitions: i32, replication: i32) -> Result<()> {
        self.admin().await?.create_topic(topic, partitions, replication).await
    }

    /// Creates `topic` with one partition and a replication factor of one.
    pub async fn create_topic_default(&self, topic: &str) -> Result<()> {
        self.admin().await?.create_topic_default(topic).await
    }

    pub async fn list_topics(&self) -> Result<Vec<String>> {
        self.admin().await?.list_topics().await
    }

    /// Flushes the producer and releases the admin client concurrently.
    ///
    /// Both run to completion; the first failure is returned.
    pub async fn shutdown(&self) -> Result<()> {
        let (producer, admin) = {
            let mut clients = self.clients.write().await;
            clients.initialized = false;
            (clients.producer.take(), clients.admin.take())
        };
        let flush_timeout = Duration::from_millis(
            self.options
                .producer
                .as_ref()
                .map_or(5000, |p| p.message_timeout_ms),
        );

        let flush = async move {
            let Some(producer) = producer else {
                return Ok(());
            };
            let flushed = tokio::task::spawn_blocking(move || producer.flush(flush_timeout))
                .await
                .map_err(|e| KafkaError::Shutdown(e.to_string()))
                .and_then(|r| r);
            match &flushed {
                Ok(()) => info!("Producer disconnected"),
                Err(e) => error!("Error disconnecting producer: {}", e),
            }
            flushed
        };

        let release = async move {
            if let Some(admin) = admin {
                drop(admin);
                info!("Admin disconnected");
            } else {
                debug!("No admin client to release");
            }
            Ok::<(), KafkaError>(())
        };

        let (flushed, released) = tokio::join!(flush, release);
        flushed.and(released)
    }
}
