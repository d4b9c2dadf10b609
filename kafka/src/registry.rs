//! Topic handler registry.
//!
//! Handlers are registered by the application before the consumer connects.
//! The consumer only reads the registry; it never adds or removes entries.

use crate::error::{KafkaError, Result};
use crate::message::EachMessagePayload;
use kafka_messages::KafkaMessage;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by a [`MessageHandler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Type-erased message handler.
pub type MessageHandler = Arc<dyn Fn(EachMessagePayload) -> HandlerFuture + Send + Sync>;

/// Per-topic subscription options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Start at the earliest offset when the group has no committed offset.
    pub from_beginning: bool,
}

impl SubscribeOptions {
    pub fn from_beginning() -> Self {
        Self {
            from_beginning: true,
        }
    }
}

/// A handler bound to a topic.
#[derive(Clone)]
pub struct TopicHandlerEntry {
    pub handler: MessageHandler,
    pub options: SubscribeOptions,
}

impl fmt::Debug for TopicHandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicHandlerEntry")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Maps topic names to handlers. At most one handler per topic; registering a
/// topic again replaces the earlier entry.
#[derive(Clone, Default, Debug)]
pub struct TopicRegistry {
    entries: HashMap<String, TopicHandlerEntry>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an async handler over the decoded payload.
    ///
    /// # Example
    ///
    /// ```
    /// use kafka_facade::{SubscribeOptions, TopicRegistry};
    ///
    /// let mut registry = TopicRegistry::new();
    /// registry.register(
    ///     "orders",
    ///     |payload| async move {
    ///         println!("order {:?}", payload.message.value);
    ///         Ok(())
    ///     },
    ///     SubscribeOptions::default(),
    /// );
    /// assert!(registry.contains("orders"));
    /// ```
    pub fn register<F, Fut>(
        &mut self,
        topic: impl Into<String>,
        handler: F,
        options: SubscribeOptions,
    ) -> &mut Self
    where
        F: Fn(EachMessagePayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_handler(topic, handler_from_fn(handler), options)
    }

    /// Registers a handler for a [`KafkaMessage`] type, on its own topic and
    /// with its own `FROM_BEGINNING` setting.
    pub fn register_typed<T, F, Fut>(&mut self, handler: F) -> &mut Self
    where
        T: KafkaMessage + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let options = SubscribeOptions {
            from_beginning: T::FROM_BEGINNING,
        };
        self.register_typed_with(handler, options)
    }

    /// Like [`register_typed`](Self::register_typed) with explicit options.
    pub fn register_typed_with<T, F, Fut>(&mut self, handler: F, options: SubscribeOptions) -> &mut Self
    where
        T: KafkaMessage + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let typed: MessageHandler = Arc::new(move |payload: EachMessagePayload| -> HandlerFuture {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let msg: T = payload.value_as()?;
                handler(msg)
                    .await
                    .map_err(|e| KafkaError::Handler(format!("{e:#}")))
            })
        });
        self.register_handler(T::TOPIC, typed, options)
    }

    /// Registers an already type-erased handler.
    pub fn register_handler(
        &mut self,
        topic: impl Into<String>,
        handler: MessageHandler,
        options: SubscribeOptions,
    ) -> &mut Self {
        self.entries
            .insert(topic.into(), TopicHandlerEntry { handler, options });
        self
    }

    pub fn get(&self, topic: &str) -> Option<&TopicHandlerEntry> {
        self.entries.get(topic)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.contains_key(topic)
    }

    /// Iterates over all entries. The order is unspecified.
    pub fn all(&self) -> impl Iterator<Item = (&str, &TopicHandlerEntry)> + '_ {
        self.entries.iter().map(|(topic, entry)| (topic.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any registered topic asks to start from the earliest offset.
    pub fn wants_from_beginning(&self) -> bool {
        self.entries.values().any(|e| e.options.from_beginning)
    }
}

/// Wraps an `anyhow`-returning async closure into a [`MessageHandler`].
pub fn handler_from_fn<F, Fut>(handler: F) -> MessageHandler
where
    F: Fn(EachMessagePayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |payload: EachMessagePayload| -> HandlerFuture {
        let fut = handler(payload);
        Box::pin(async move { fut.await.map_err(|e| KafkaError::Handler(format!("{e:#}"))) })
    })
}
