//! Payload decoding strategies.
//!
//! Keys and values are decoded independently, each with its own
//! [`DecoderKind`]. Keys default to `string`, values to `json`.

use crate::error::{DecodeError, KafkaError};
use crate::schema_registry::SchemaRegistry;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// How raw bytes become a decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum DecoderKind {
    /// UTF-8 text. Invalid sequences are replaced, never rejected.
    String,
    /// A JSON document.
    Json,
    /// Avro framed with a schema registry id.
    Avro,
}

impl DecoderKind {
    /// Default decoder for message keys.
    pub fn default_key() -> Self {
        DecoderKind::String
    }

    /// Default decoder for message values.
    pub fn default_value() -> Self {
        DecoderKind::Json
    }
}

impl fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecoderKind::String => "string",
            DecoderKind::Json => "json",
            DecoderKind::Avro => "avro",
        };
        f.write_str(name)
    }
}

impl FromStr for DecoderKind {
    type Err = KafkaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" => Ok(DecoderKind::String),
            "json" => Ok(DecoderKind::Json),
            "avro" => Ok(DecoderKind::Avro),
            other => Err(KafkaError::Config(format!(
                "unknown decoder kind '{other}' (expected string, json or avro)"
            ))),
        }
    }
}

impl TryFrom<String> for DecoderKind {
    type Error = KafkaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Decodes message keys and values with the configured strategies.
///
/// A null payload decodes to `Value::Null` without consulting a decoder. The
/// `avro` kind still needs a schema registry, null payload or not.
#[derive(Clone)]
pub struct MessageDecoder {
    key_kind: DecoderKind,
    value_kind: DecoderKind,
    registry: Option<Arc<SchemaRegistry>>,
}

impl MessageDecoder {
    pub fn new(
        key_kind: DecoderKind,
        value_kind: DecoderKind,
        registry: Option<Arc<SchemaRegistry>>,
    ) -> Self {
        Self {
            key_kind,
            value_kind,
            registry,
        }
    }

    pub fn key_kind(&self) -> DecoderKind {
        self.key_kind
    }

    pub fn value_kind(&self) -> DecoderKind {
        self.value_kind
    }

    pub async fn decode_key(&self, raw: Option<&[u8]>) -> Result<Value, DecodeError> {
        self.decode(self.key_kind, raw).await
    }

    pub async fn decode_value(&self, raw: Option<&[u8]>) -> Result<Value, DecodeError> {
        self.decode(self.value_kind, raw).await
    }

    /// Decodes `raw` with the given strategy.
    pub async fn decode(&self, kind: DecoderKind, raw: Option<&[u8]>) -> Result<Value, DecodeError> {
        if kind == DecoderKind::Avro && self.registry.is_none() {
            return Err(DecodeError::RegistryUnavailable);
        }
        let Some(bytes) = raw else {
            return Ok(Value::Null);
        };

        match kind {
            DecoderKind::String => Ok(decode_string(bytes)),
            DecoderKind::Json => decode_json(bytes),
            DecoderKind::Avro => {
                let registry = self
                    .registry
                    .as_ref()
                    .ok_or(DecodeError::RegistryUnavailable)?;
                registry.decode(bytes).await
            }
        }
    }
}

fn decode_string(bytes: &[u8]) -> Value {
    Value::String(String::from_utf8_lossy(bytes).into_owned())
}

fn decode_json(bytes: &[u8]) -> Result<Value, DecodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decoder() -> MessageDecoder {
        MessageDecoder::new(DecoderKind::default_key(), DecoderKind::default_value(), None)
    }

    #[test]
    fn parses_kinds_case_insensitively() {
        assert_eq!("STRING".parse::<DecoderKind>().unwrap(), DecoderKind::String);
        assert_eq!(" json ".parse::<DecoderKind>().unwrap(), DecoderKind::Json);
        assert_eq!("Avro".parse::<DecoderKind>().unwrap(), DecoderKind::Avro);
        assert!(matches!(
            "xml".parse::<DecoderKind>(),
            Err(KafkaError::Config(_))
        ));
    }

    #[test]
    fn display_matches_parse() {
        for kind in [DecoderKind::String, DecoderKind::Json, DecoderKind::Avro] {
            assert_eq!(kind.to_string().parse::<DecoderKind>().unwrap(), kind);
        }
    }

    #[tokio::test]
    async fn string_decoding_preserves_text() {
        let text = "héllo, wörld ✓";
        let value = decoder()
            .decode(DecoderKind::String, Some(text.as_bytes()))
            .await
            .unwrap();
        assert_eq!(value, Value::String(text.to_string()));
    }

    #[tokio::test]
    async fn null_payload_stays_null() {
        let decoder = decoder();
        for kind in [DecoderKind::String, DecoderKind::Json] {
            assert_eq!(decoder.decode(kind, None).await.unwrap(), Value::Null);
        }

        let registry = Arc::new(SchemaRegistry::new("http://localhost:8081"));
        let avro = MessageDecoder::new(DecoderKind::String, DecoderKind::Avro, Some(registry));
        assert_eq!(avro.decode_value(None).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn null_avro_payload_still_needs_a_registry() {
        let decoder = MessageDecoder::new(DecoderKind::String, DecoderKind::Avro, None);
        let err = decoder.decode_value(None).await.unwrap_err();
        assert!(matches!(err, DecodeError::RegistryUnavailable));
    }

    #[tokio::test]
    async fn json_decoding_matches_encoded_value() {
        let original = json!({"id": 42, "tags": ["a", "b"], "nested": {"ok": true}});
        let bytes = serde_json::to_vec(&original).unwrap();
        let value = decoder().decode_value(Some(bytes.as_slice())).await.unwrap();
        assert_eq!(value, original);
    }

    #[tokio::test]
    async fn malformed_json_is_a_decode_error() {
        let err = decoder().decode_value(Some(&b"{not json"[..])).await.unwrap_err();
        assert!(matches!(err, DecodeError::MalformedJson(_)));
    }

    #[tokio::test]
    async fn avro_without_registry_is_unavailable() {
        let decoder = MessageDecoder::new(DecoderKind::String, DecoderKind::Avro, None);
        let err = decoder.decode_value(Some(&[0u8, 0, 0, 0, 1, 2][..])).await.unwrap_err();
        assert!(matches!(err, DecodeError::RegistryUnavailable));
    }
}
