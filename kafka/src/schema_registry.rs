//! Minimal schema registry client for Avro payloads.
//!
//! Payloads use the registry framing: a zero magic byte, a big-endian `u32`
//! schema id, then the Avro datum. Schemas are fetched once per id and cached
//! for the lifetime of the client.

use crate::error::DecodeError;
use apache_avro::Schema;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const MAGIC_BYTE: u8 = 0;
const HEADER_LEN: usize = 5;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    schema: String,
}

/// Schema registry handle shared by every pipeline invocation.
pub struct SchemaRegistry {
    base_url: String,
    http: reqwest::Client,
    cache: RwLock<HashMap<u32, Arc<Schema>>>,
}

impl SchemaRegistry {
    /// Creates a client for the registry at `host`, e.g. `http://localhost:8081`.
    pub fn new(host: &str) -> Self {
        let http = match reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(
                    "Failed to build schema registry HTTP client, falling back to defaults without a request timeout: {}",
                    e
                );
                reqwest::Client::new()
            }
        };

        Self {
            base_url: host.trim_end_matches('/').to_string(),
            http,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Seeds the cache with a known schema so `id` never hits the network.
    pub fn with_schema(mut self, id: u32, schema_json: &str) -> Result<Self, DecodeError> {
        let schema = Schema::parse_str(schema_json).map_err(|e| DecodeError::SchemaLookupFailed {
            id,
            reason: e.to_string(),
        })?;
        self.cache.get_mut().insert(id, Arc::new(schema));
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Decodes a registry-framed Avro payload into JSON.
    pub async fn decode(&self, payload: &[u8]) -> Result<Value, DecodeError> {
        let (id, mut datum) = split_frame(payload)?;
        let schema = self.schema(id).await?;

        let avro = apache_avro::from_avro_datum(&schema, &mut datum, None)
            .map_err(|e| DecodeError::Avro(e.to_string()))?;
        Value::try_from(avro).map_err(|e| DecodeError::Avro(e.to_string()))
    }

    /// Returns the schema for `id`, fetching it on first use.
    pub async fn schema(&self, id: u32) -> Result<Arc<Schema>, DecodeError> {
        if let Some(schema) = self.cache.read().await.get(&id) {
            return Ok(Arc::clone(schema));
        }

        let schema = Arc::new(self.fetch(id).await?);
        self.cache.write().await.insert(id, Arc::clone(&schema));
        Ok(schema)
    }

    async fn fetch(&self, id: u32) -> Result<Schema, DecodeError> {
        let url = format!("{}/schemas/ids/{}", self.base_url, id);
        debug!("Fetching schema {} from {}", id, url);

        let lookup_failed = |reason: String| DecodeError::SchemaLookupFailed { id, reason };

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.schemaregistry.v1+json")
            .send()
            .await
            .map_err(|e| lookup_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(lookup_failed(format!("registry responded with {status}")));
        }

        let body: SchemaResponse = response
            .json()
            .await
            .map_err(|e| lookup_failed(e.to_string()))?;
        Schema::parse_str(&body.schema).map_err(|e| lookup_failed(e.to_string()))
    }
}

fn split_frame(payload: &[u8]) -> Result<(u32, &[u8]), DecodeError> {
    if payload.len() < HEADER_LEN {
        return Err(DecodeError::InvalidWireFormat(format!(
            "payload is {} bytes, header needs {}",
            payload.len(),
            HEADER_LEN
        )));
    }
    if payload[0] != MAGIC_BYTE {
        return Err(DecodeError::InvalidWireFormat(format!(
            "unexpected magic byte {:#04x}",
            payload[0]
        )));
    }
    let id = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
    Ok((id, &payload[HEADER_LEN..]))
}
