//! Error types for the Kafka facade.

use thiserror::Error;

/// Result type alias for Kafka operations.
pub type Result<T> = std::result::Result<T, KafkaError>;

/// Errors that can occur during Kafka operations.
///
/// Connection, subscription and initialization failures are fatal and reach the
/// caller. Decode, routing and handler failures only ever surface inside the
/// consumption pipeline, which logs and drops them.
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Error from the underlying rdkafka library.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// The consumer could not establish a session with the brokers.
    #[error("Failed to connect to brokers [{brokers}]: {reason}")]
    Connection { brokers: String, reason: String },

    /// Subscribing to a topic failed.
    #[error("Failed to subscribe to topic '{topic}': {reason}")]
    Subscription { topic: String, reason: String },

    /// An operation that needs a live consumer session was called before `connect`.
    #[error("Consumer is not connected")]
    NotConnected,

    /// A producer or admin operation was called before that client existed.
    #[error("Kafka {0} is not initialized")]
    NotInitialized(&'static str),

    /// A key or value payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A message arrived for a topic with no bound handler.
    #[error("No handler registered for topic '{0}'")]
    MissingHandler(String),

    /// Error serializing a message to JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error deserializing a decoded value into a typed message.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Error from a message handler.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Error during shutdown.
    #[error("Shutdown error: {0}")]
    Shutdown(String),

    /// Invalid module configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

/// Failures raised by a decoder strategy.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed JSON payload: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// Avro decoding was requested but no schema registry host is configured.
    #[error("schema registry is not configured")]
    RegistryUnavailable,

    #[error("schema lookup failed for id {id}: {reason}")]
    SchemaLookupFailed { id: u32, reason: String },

    /// The payload does not carry the registry framing (magic byte + schema id).
    #[error("invalid schema registry wire format: {0}")]
    InvalidWireFormat(String),

    #[error("avro decoding failed: {0}")]
    Avro(String),
}
