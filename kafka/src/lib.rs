//! Kafka client facade built on top of `rdkafka` and `tokio`.
//!
//! # Features
//!
//! - Topic handler registry populated before any connection exists
//! - Consumer lifecycle (`connect` → subscribe every registered topic → run →
//!   `disconnect`) with idempotent connect and disconnect
//! - Per-field decoding: keys default to `string`, values to `json`, and
//!   either can use `avro` through a schema registry
//! - Per-message failure isolation: decode errors, unrouted topics and handler
//!   errors or panics are logged and the run loop keeps going
//! - Producer and admin client with explicit initialization
//! - Integrated tracing
//!
//! # Example
//!
//! ```no_run
//! use kafka_facade::{topic_handlers, KafkaMessage, KafkaModule, ModuleOptions};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct OrderPlaced {
//!     id: u64,
//! }
//!
//! impl KafkaMessage for OrderPlaced {
//!     const TOPIC: &'static str = "orders";
//! }
//!
//! async fn handle_order(order: OrderPlaced) -> anyhow::Result<()> {
//!     println!("order {}", order.id);
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = topic_handlers![
//!         OrderPlaced => handle_order,
//!     ];
//!
//!     let module = KafkaModule::new(ModuleOptions::from_env()?, registry)?;
//!     module.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     module.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod admin;
mod config;
mod consumer;
mod decoder;
mod error;
mod message;
mod module;
mod pipeline;
mod producer;
mod registry;
mod schema_registry;
mod service;
mod transport;

pub use admin::Admin;
pub use config::{
    AdminOptions, ClientOptions, ConsumerOptions, ConsumerSettings, ModuleOptions,
    ProducerOptions, DEFAULT_GROUP_ID,
};
pub use consumer::{ConnectionState, ConsumerService};
pub use decoder::{DecoderKind, MessageDecoder};
pub use error::{DecodeError, KafkaError, Result};
pub use message::{DecodedMessage, EachMessagePayload, RawMessage};
pub use module::KafkaModule;
pub use pipeline::Pipeline;
pub use producer::{OutboundMessage, Producer, RecordMetadata};
pub use registry::{
    handler_from_fn, HandlerFuture, MessageHandler, SubscribeOptions, TopicHandlerEntry,
    TopicRegistry,
};
pub use schema_registry::SchemaRegistry;
pub use service::KafkaService;
pub use transport::{ConsumerTransport, PartitionControl, RdKafkaTransport};

/// Re-export the KafkaMessage trait for convenience
pub use kafka_messages::KafkaMessage;

/// Builds a [`TopicRegistry`] from typed handlers.
///
/// Each entry binds a [`KafkaMessage`] type to an async handler. The topic and
/// `from_beginning` default come from the type; append `; options` to override
/// the options.
///
/// # Example
///
/// ```no_run
/// use kafka_facade::{topic_handlers, KafkaMessage, SubscribeOptions};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct UserCreated {
///     user_id: String,
/// }
///
/// impl KafkaMessage for UserCreated {
///     const TOPIC: &'static str = "user.created";
/// }
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct UserDeleted {
///     user_id: String,
/// }
///
/// impl KafkaMessage for UserDeleted {
///     const TOPIC: &'static str = "user.deleted";
/// }
///
/// async fn handle_created(msg: UserCreated) -> anyhow::Result<()> {
///     println!("User created: {:?}", msg);
///     Ok(())
/// }
///
/// async fn handle_deleted(msg: UserDeleted) -> anyhow::Result<()> {
///     println!("User deleted: {:?}", msg);
///     Ok(())
/// }
///
/// let registry = topic_handlers![
///     UserCreated => handle_created,
///     UserDeleted => handle_deleted; SubscribeOptions::from_beginning(),
/// ];
/// assert_eq!(registry.len(), 2);
/// ```
#[macro_export]
macro_rules! topic_handlers {
    ($($msg_type:ty => $handler:expr $(; $options:expr)?),* $(,)?) => {{
        let mut registry = $crate::TopicRegistry::new();
        $(
            let options = $crate::SubscribeOptions {
                from_beginning: <$msg_type as $crate::KafkaMessage>::FROM_BEGINNING,
            };
            $( let options = $options; )?
            registry.register_typed_with::<$msg_type, _, _>($handler, options);
        )*
        registry
    }};
}
