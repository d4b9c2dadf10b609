//! Consumer lifecycle: connect, subscribe, run, disconnect.

use crate::config::ModuleOptions;
use crate::decoder::MessageDecoder;
use crate::error::{KafkaError, Result};
use crate::message::EachMessagePayload;
use crate::pipeline::Pipeline;
use crate::registry::{handler_from_fn, MessageHandler, SubscribeOptions, TopicRegistry};
use crate::schema_registry::SchemaRegistry;
use crate::transport::{ConsumerTransport, RdKafkaTransport};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connection state of a [`ConsumerService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribing,
    Running,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Subscribing => "subscribing",
            ConnectionState::Running => "running",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
struct Lifecycle {
    subscriptions: BTreeSet<String>,
    run_loop: Option<JoinHandle<Result<()>>>,
}

/// Owns the consumer session and binds registered handlers to it.
///
/// Lifecycle operations are serialized: overlapping `connect`, `subscribe` or
/// `disconnect` calls wait for each other, so a second `connect` sees the
/// session the first one created and does nothing.
///
/// # Example
///
/// ```no_run
/// use kafka_facade::{ConsumerService, ModuleOptions, SubscribeOptions, TopicRegistry};
/// use std::sync::Arc;
///
/// # async fn example() -> kafka_facade::Result<()> {
/// let mut registry = TopicRegistry::new();
/// registry.register(
///     "orders",
///     |payload| async move {
///         println!("{:?}", payload.message.value);
///         Ok(())
///     },
///     SubscribeOptions::default(),
/// );
///
/// let consumer = ConsumerService::new(ModuleOptions::new("localhost:9092"), Arc::new(registry));
/// consumer.start().await?;
/// // ...
/// consumer.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConsumerService {
    options: ModuleOptions,
    registry: Arc<TopicRegistry>,
    transport: Arc<dyn ConsumerTransport>,
    pipeline: Arc<Pipeline>,
    state: watch::Sender<ConnectionState>,
    lifecycle: Mutex<Lifecycle>,
}

impl ConsumerService {
    /// Creates a consumer backed by rdkafka.
    pub fn new(options: ModuleOptions, registry: Arc<TopicRegistry>) -> Self {
        Self::with_transport(options, registry, Arc::new(RdKafkaTransport::new()))
    }

    /// Creates a consumer over a custom transport.
    pub fn with_transport(
        options: ModuleOptions,
        registry: Arc<TopicRegistry>,
        transport: Arc<dyn ConsumerTransport>,
    ) -> Self {
        let schema_registry = options
            .schema_registry_host
            .as_deref()
            .map(|host| Arc::new(SchemaRegistry::new(host)));
        Self::with_parts(options, registry, transport, schema_registry)
    }

    /// Creates a consumer with an explicit schema registry handle, overriding
    /// `schema_registry_host`.
    pub fn with_parts(
        options: ModuleOptions,
        registry: Arc<TopicRegistry>,
        transport: Arc<dyn ConsumerTransport>,
        schema_registry: Option<Arc<SchemaRegistry>>,
    ) -> Self {
        let decoder = MessageDecoder::new(options.key_decoder, options.value_decoder, schema_registry);
        info!(
            "ConsumerService initialized (key decoder: {}, value decoder: {}, {} registered topic(s))",
            options.key_decoder,
            options.value_decoder,
            registry.len()
        );

        Self {
            options,
            registry,
            transport,
            pipeline: Arc::new(Pipeline::new(decoder)),
            state: watch::channel(ConnectionState::Disconnected).0,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Topics with an active subscription.
    pub async fn subscriptions(&self) -> Vec<String> {
        self.lifecycle.lock().await.subscriptions.iter().cloned().collect()
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    /// Connects and subscribes every registered topic.
    ///
    /// Any failure is fatal and returned to the caller.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let started = match self.connect_locked().await {
            Ok(()) => self.register_all_locked(&mut lifecycle).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &started {
            error!("Failed to initialize consumer: {}", e);
        }
        started
    }

    /// Disconnects. Safe to call at any time, any number of times.
    pub async fn stop(&self) -> Result<()> {
        self.disconnect().await
    }

    /// Establishes the consumer session. A no-op when already connected.
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.connect_locked().await
    }

    /// Subscribes `topic` with default options and binds `handler` to it.
    ///
    /// Fails with [`KafkaError::NotConnected`] before [`connect`](Self::connect).
    pub async fn subscribe<F, Fut>(&self, topic: &str, handler: F) -> Result<()>
    where
        F: Fn(EachMessagePayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe_with(topic, handler_from_fn(handler), SubscribeOptions::default())
            .await
    }

    /// Subscribes `topic` and binds an already type-erased handler.
    pub async fn subscribe_with(
        &self,
        topic: &str,
        handler: MessageHandler,
        options: SubscribeOptions,
    ) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.subscribe_locked(&mut lifecycle, topic, handler, options)
            .await
    }

    /// Subscribes every topic in the registry.
    pub async fn register_all_topics(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.register_all_locked(&mut lifecycle).await
    }

    /// Releases the consumer session. A no-op when already disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.disconnect_locked(&mut lifecycle).await
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Consumer state: {} -> {}", previous, state);
        }
    }

    async fn connect_locked(&self) -> Result<()> {
        if self.state() != ConnectionState::Disconnected {
            debug!("Consumer already {}, skipping connect", self.state());
            return Ok(());
        }

        info!("Attempting to connect consumer...");
        let settings = self
            .options
            .consumer_settings(self.registry.wants_from_beginning());
        debug!("Consumer config: {:?}", settings);

        self.set_state(ConnectionState::Connecting);
        match self.transport.connect(&settings).await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                info!("Kafka consumer connected successfully");
                debug!("Connected to brokers: {} successfully", settings.brokers);
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                let e = match e {
                    e @ KafkaError::Connection { .. } => e,
                    other => KafkaError::Connection {
                        brokers: settings.brokers.clone(),
                        reason: other.to_string(),
                    },
                };
                error!(brokers = %settings.brokers, error = %e, "Consumer connection error");
                Err(e)
            }
        }
    }

    async fn register_all_locked(&self, lifecycle: &mut Lifecycle) -> Result<()> {
        for (topic, entry) in self.registry.all() {
            self.subscribe_locked(lifecycle, topic, entry.handler.clone(), entry.options)
                .await?;
        }
        Ok(())
    }

    async fn subscribe_locked(
        &self,
        lifecycle: &mut Lifecycle,
        topic: &str,
        handler: MessageHandler,
        options: SubscribeOptions,
    ) -> Result<()> {
        let resume_state = match self.state() {
            state @ (ConnectionState::Connected | ConnectionState::Running) => state,
            _ => return Err(KafkaError::NotConnected),
        };

        if lifecycle.subscriptions.contains(topic) {
            self.pipeline.bind(topic, handler).await;
            debug!("Already subscribed to {}, handler rebound", topic);
            return Ok(());
        }

        info!("Subscribing to topic: {}", topic);
        self.set_state(ConnectionState::Subscribing);

        if let Err(e) = self.transport.subscribe(topic, options.from_beginning).await {
            self.set_state(resume_state);
            let e = match e {
                e @ KafkaError::Subscription { .. } => e,
                other => KafkaError::Subscription {
                    topic: topic.to_string(),
                    reason: other.to_string(),
                },
            };
            error!("Failed to subscribe to {}: {}", topic, e);
            return Err(e);
        }

        self.pipeline.bind(topic, handler).await;
        lifecycle.subscriptions.insert(topic.to_string());
        self.ensure_running(lifecycle);
        self.set_state(ConnectionState::Running);
        info!("Successfully subscribed to {}", topic);
        Ok(())
    }

    fn ensure_running(&self, lifecycle: &mut Lifecycle) {
        if lifecycle
            .run_loop
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            return;
        }

        let transport = Arc::clone(&self.transport);
        let pipeline = Arc::clone(&self.pipeline);
        lifecycle.run_loop = Some(tokio::spawn(async move {
            let result = transport.run(pipeline).await;
            if let Err(e) = &result {
                error!("Consumer run loop failed: {}", e);
            }
            result
        }));
    }

    async fn disconnect_locked(&self, lifecycle: &mut Lifecycle) -> Result<()> {
        if self.state() == ConnectionState::Disconnected {
            debug!("Consumer not connected, nothing to disconnect");
            return Ok(());
        }

        self.set_state(ConnectionState::Disconnecting);
        let result = self.transport.disconnect().await;

        if let Some(mut handle) = lifecycle.run_loop.take() {
            match tokio::time::timeout(self.options.shutdown_timeout, &mut handle).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Consumer run loop ended abnormally: {}", e),
                Err(_) => {
                    warn!(
                        "Consumer run loop did not stop within {:?}, aborting",
                        self.options.shutdown_timeout
                    );
                    handle.abort();
                }
            }
        }

        lifecycle.subscriptions.clear();
        self.pipeline.unbind_all().await;
        self.set_state(ConnectionState::Disconnected);

        match result {
            Ok(()) => {
                info!("Consumer disconnected successfully");
                Ok(())
            }
            Err(e) => {
                error!("Error during consumer disconnection: {}", e);
                Err(KafkaError::Shutdown(e.to_string()))
            }
        }
    }
}
