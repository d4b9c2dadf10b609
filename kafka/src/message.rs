//! Inbound message shapes, before and after decoding.

use crate::error::{KafkaError, Result};
use crate::transport::PartitionControl;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A message as delivered by the broker transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: HashMap<String, Vec<u8>>,
    /// Milliseconds since epoch, when the broker supplied one.
    pub timestamp: Option<i64>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            value: None,
            headers: HashMap::new(),
            timestamp: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }
}

/// A message after key, value and header decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Value,
    pub value: Value,
    pub headers: HashMap<String, String>,
    pub timestamp: Option<i64>,
}

/// What a handler receives: the decoded message plus control over its partition.
#[derive(Clone)]
pub struct EachMessagePayload {
    pub topic: String,
    pub partition: i32,
    pub message: DecodedMessage,
    control: Arc<dyn PartitionControl>,
}

impl EachMessagePayload {
    pub fn new(message: DecodedMessage, control: Arc<dyn PartitionControl>) -> Self {
        Self {
            topic: message.topic.clone(),
            partition: message.partition,
            message,
            control,
        }
    }

    /// Deserializes the decoded value into `T`.
    pub fn value_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.message.value.clone())
            .map_err(|e| KafkaError::Deserialization(e.to_string()))
    }

    /// Signals liveness to the group coordinator during long-running handlers.
    pub async fn heartbeat(&self) -> Result<()> {
        self.control.heartbeat().await
    }

    /// Stops fetching from this message's partition.
    pub fn pause(&self) -> Result<()> {
        self.control.pause()
    }

    /// Resumes fetching from this message's partition.
    pub fn resume(&self) -> Result<()> {
        self.control.resume()
    }
}

impl fmt::Debug for EachMessagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EachMessagePayload")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}
