//! Topic-bound message types.
//!
//! This crate provides the `KafkaMessage` trait that ties a serde type to the
//! Kafka topic it travels on. Producers use it to pick the destination topic and
//! key; consumers use it to register typed handlers, including whether the
//! subscription should start from the earliest available offset.

use serde::{Deserialize, Serialize};

/// Trait for types that travel on a single Kafka topic.
///
/// Payloads are JSON encoded, so implementors need `Serialize` and
/// `Deserialize`.
///
/// # Example
///
/// ```
/// use kafka_messages::KafkaMessage;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct OrderPlaced {
///     order_id: u64,
///     customer: String,
/// }
///
/// impl KafkaMessage for OrderPlaced {
///     const TOPIC: &'static str = "orders";
///     const FROM_BEGINNING: bool = true;
///
///     fn key(&self) -> Option<String> {
///         Some(self.order_id.to_string())
///     }
/// }
///
/// assert_eq!(OrderPlaced::TOPIC, "orders");
/// ```
pub trait KafkaMessage: Serialize + for<'de> Deserialize<'de> + Send + Sync {
    /// The topic messages of this type are sent to and consumed from.
    const TOPIC: &'static str;

    /// Whether a consumer subscribing to `TOPIC` with no committed offset
    /// should start at the earliest offset instead of the latest.
    const FROM_BEGINNING: bool = false;

    /// Partitioning key for this message. `None` lets the broker pick.
    fn key(&self) -> Option<String> {
        None
    }
}
