//! Composition root tying the producer/admin service and the consumer together.

use crate::config::ModuleOptions;
use crate::consumer::ConsumerService;
use crate::error::Result;
use crate::registry::TopicRegistry;
use crate::service::KafkaService;
use crate::transport::ConsumerTransport;
use std::sync::Arc;
use tracing::{error, info};

/// Everything built from one [`ModuleOptions`].
///
/// Call [`start`](Self::start) once at startup and
/// [`shutdown`](Self::shutdown) once at exit.
pub struct KafkaModule {
    service: KafkaService,
    consumer: ConsumerService,
}

impl KafkaModule {
    /// Builds the module with the rdkafka consumer transport.
    pub fn new(options: ModuleOptions, registry: TopicRegistry) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            service: KafkaService::new(options.clone()),
            consumer: ConsumerService::new(options, Arc::new(registry)),
        })
    }

    /// Builds the module over a custom consumer transport.
    pub fn with_transport(
        options: ModuleOptions,
        registry: TopicRegistry,
        transport: Arc<dyn ConsumerTransport>,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            service: KafkaService::new(options.clone()),
            consumer: ConsumerService::with_transport(options, Arc::new(registry), transport),
        })
    }

    pub fn service(&self) -> &KafkaService {
        &self.service
    }

    pub fn consumer(&self) -> &ConsumerService {
        &self.consumer
    }

    /// Initializes the producer/admin clients, then connects the consumer and
    /// subscribes every registered topic. Unreachable brokers fail the call
    /// before the consumer is touched.
    pub async fn start(&self) -> Result<()> {
        self.service.initialize().await?;
        self.consumer.start().await?;
        info!("Kafka module started");
        Ok(())
    }

    /// Tears down producer, admin and consumer concurrently. A failure in one
    /// does not stop the others; the first failure is returned.
    pub async fn shutdown(&self) -> Result<()> {
        let (service, consumer) = tokio::join!(self.service.shutdown(), self.consumer.stop());

        for e in [&service, &consumer].into_iter().filter_map(|r| r.as_ref().err()) {
            error!("Kafka module shutdown error: {}", e);
        }
        info!("Kafka module stopped");
        service.and(consumer)
    }
}
