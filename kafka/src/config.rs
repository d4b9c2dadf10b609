//! Module configuration.
//!
//! One `ModuleOptions` value configures the consumer, producer, admin client and
//! decoders. It can be built programmatically, parsed from TOML or read from the
//! environment.

use crate::decoder::DecoderKind;
use crate::error::{KafkaError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Consumer group used when the configuration does not name one.
pub const DEFAULT_GROUP_ID: &str = "nestjs-group";

/// Broker connection settings shared by every client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientOptions {
    /// Bootstrap brokers, e.g. `["localhost:9092"]`.
    pub brokers: Vec<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    /// How long the first metadata round trip may take before a client is
    /// reported as unable to reach the brokers.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Raw librdkafka properties applied to every client.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ClientOptions {
    /// Comma-separated broker list as librdkafka expects it.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Consumer settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerOptions {
    /// Consumer group ID. Falls back to [`DEFAULT_GROUP_ID`].
    #[serde(default)]
    pub group_id: Option<String>,

    /// Let librdkafka commit offsets in the background. When disabled the
    /// transport commits after each processed message.
    #[serde(default = "default_true")]
    pub auto_commit: bool,

    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Raw librdkafka properties; these override the typed settings above.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            group_id: None,
            auto_commit: true,
            session_timeout_ms: default_session_timeout_ms(),
            properties: BTreeMap::new(),
        }
    }
}

/// Producer settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProducerOptions {
    #[serde(default = "default_timeout_ms")]
    pub message_timeout_ms: u64,

    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            message_timeout_ms: default_timeout_ms(),
            properties: BTreeMap::new(),
        }
    }
}

/// Admin client settings. The admin client only exists when this section is present.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminOptions {
    #[serde(default = "default_timeout_ms")]
    pub operation_timeout_ms: u64,

    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Default for AdminOptions {
    fn default() -> Self {
        Self {
            operation_timeout_ms: default_timeout_ms(),
            properties: BTreeMap::new(),
        }
    }
}

/// Top-level configuration for producer, consumer, admin and decoding.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleOptions {
    pub client: ClientOptions,

    #[serde(default)]
    pub producer: Option<ProducerOptions>,

    #[serde(default)]
    pub consumer: Option<ConsumerOptions>,

    #[serde(default)]
    pub admin: Option<AdminOptions>,

    /// Base URL of the schema registry used by the Avro decoder.
    #[serde(default)]
    pub schema_registry_host: Option<String>,

    #[serde(default = "DecoderKind::default_key")]
    pub key_decoder: DecoderKind,

    #[serde(default = "DecoderKind::default_value")]
    pub value_decoder: DecoderKind,

    /// How long `stop()` waits for the consumer run loop before aborting it.
    #[serde(default = "default_shutdown_timeout", with = "millis")]
    pub shutdown_timeout: Duration,
}

impl ModuleOptions {
    /// Creates options for the given comma-separated broker list with every
    /// other setting at its default.
    pub fn new(brokers: &str) -> Self {
        Self {
            client: ClientOptions {
                brokers: split_brokers(brokers),
                client_id: None,
                connect_timeout_ms: default_connect_timeout_ms(),
                properties: BTreeMap::new(),
            },
            producer: None,
            consumer: None,
            admin: None,
            schema_registry_host: None,
            key_decoder: DecoderKind::default_key(),
            value_decoder: DecoderKind::default_value(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }

    /// Parses options from a TOML document.
    ///
    /// Unknown decoder kinds are rejected here rather than at first use.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let options: Self =
            toml::from_str(input).map_err(|e| KafkaError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Reads options from `KAFKA_*` environment variables.
    ///
    /// `KAFKA_BROKERS` defaults to `localhost:9092`.
    pub fn from_env() -> Result<Self> {
        let brokers =
            std::env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string());
        let mut options = Self::new(&brokers);

        if let Ok(client_id) = std::env::var("KAFKA_CLIENT_ID") {
            options.client.client_id = Some(client_id);
        }
        if let Ok(group_id) = std::env::var("KAFKA_GROUP_ID") {
            options = options.with_group_id(group_id);
        }
        if let Ok(host) = std::env::var("KAFKA_SCHEMA_REGISTRY_HOST") {
            options.schema_registry_host = Some(host);
        }
        if let Ok(kind) = std::env::var("KAFKA_KEY_DECODER") {
            options.key_decoder = kind.parse()?;
        }
        if let Ok(kind) = std::env::var("KAFKA_VALUE_DECODER") {
            options.value_decoder = kind.parse()?;
        }

        options.validate()?;
        Ok(options)
    }

    /// Rejects configurations that can never connect.
    pub fn validate(&self) -> Result<()> {
        if self.client.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(KafkaError::Config("at least one broker is required".to_string()));
        }
        Ok(())
    }

    /// Sets the consumer group ID.
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.consumer.get_or_insert_with(ConsumerOptions::default).group_id = Some(group_id.into());
        self
    }

    /// Sets the consumer section.
    pub fn with_consumer(mut self, consumer: ConsumerOptions) -> Self {
        self.consumer = Some(consumer);
        self
    }

    /// Sets the producer section.
    pub fn with_producer(mut self, producer: ProducerOptions) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Enables the admin client.
    pub fn with_admin(mut self, admin: AdminOptions) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Sets the schema registry used for Avro decoding.
    pub fn with_schema_registry(mut self, host: impl Into<String>) -> Self {
        self.schema_registry_host = Some(host.into());
        self
    }

    /// Sets the decoder used for message keys.
    pub fn with_key_decoder(mut self, kind: DecoderKind) -> Self {
        self.key_decoder = kind;
        self
    }

    /// Sets the decoder used for message values.
    pub fn with_value_decoder(mut self, kind: DecoderKind) -> Self {
        self.value_decoder = kind;
        self
    }

    /// Sets how long clients wait for the brokers on connect.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.client.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets how long `stop()` waits for the run loop.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Resolves the settings handed to the consumer transport on connect.
    pub fn consumer_settings(&self, from_beginning: bool) -> ConsumerSettings {
        let consumer = self.consumer.clone().unwrap_or_default();
        let mut properties = self.client.properties.clone();
        properties.extend(consumer.properties);

        ConsumerSettings {
            brokers: self.client.bootstrap_servers(),
            group_id: consumer
                .group_id
                .unwrap_or_else(|| DEFAULT_GROUP_ID.to_string()),
            client_id: self.client.client_id.clone(),
            auto_commit: consumer.auto_commit,
            session_timeout_ms: consumer.session_timeout_ms,
            connect_timeout: self.client.connect_timeout(),
            from_beginning,
            properties,
        }
    }
}

/// Fully resolved consumer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub brokers: String,
    pub group_id: String,
    pub client_id: Option<String>,
    pub auto_commit: bool,
    pub session_timeout_ms: u64,
    pub connect_timeout: Duration,
    /// Start partitions without a committed offset at the earliest offset.
    pub from_beginning: bool,
    /// Caller overrides, applied last.
    pub properties: BTreeMap<String, String>,
}

fn split_brokers(brokers: &str) -> Vec<String> {
    brokers
        .split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(String::from)
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_session_timeout_ms() -> u64 {
    6000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
