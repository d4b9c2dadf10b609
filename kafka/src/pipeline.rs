//! Per-message decode and dispatch.
//!
//! Every failure past this point (decode, routing, handler error or panic) is
//! logged with its topic, partition and offset and then dropped, so the
//! transport's run loop keeps going.

use crate::decoder::MessageDecoder;
use crate::error::{KafkaError, Result};
use crate::message::{DecodedMessage, EachMessagePayload, RawMessage};
use crate::registry::MessageHandler;
use crate::transport::PartitionControl;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// Decodes inbound messages and routes them to the handler bound to their topic.
pub struct Pipeline {
    decoder: MessageDecoder,
    routes: RwLock<HashMap<String, MessageHandler>>,
}

impl Pipeline {
    pub fn new(decoder: MessageDecoder) -> Self {
        Self {
            decoder,
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn decoder(&self) -> &MessageDecoder {
        &self.decoder
    }

    /// Binds `handler` to `topic`, returning whether a handler was replaced.
    pub async fn bind(&self, topic: &str, handler: MessageHandler) -> bool {
        self.routes
            .write()
            .await
            .insert(topic.to_string(), handler)
            .is_some()
    }

    pub async fn unbind(&self, topic: &str) {
        self.routes.write().await.remove(topic);
    }

    pub async fn unbind_all(&self) {
        self.routes.write().await.clear();
    }

    pub async fn is_bound(&self, topic: &str) -> bool {
        self.routes.read().await.contains_key(topic)
    }

    /// Processes one delivery. Never fails; failures are logged.
    pub async fn process(&self, raw: RawMessage, control: Arc<dyn PartitionControl>) {
        let (topic, partition, offset) = (raw.topic.clone(), raw.partition, raw.offset);
        debug!(
            "Message received from topic '{}' (partition: {}, offset: {})",
            topic, partition, offset
        );

        if let Err(e) = self.dispatch(raw, control).await {
            error!(
                topic = %topic,
                partition,
                offset,
                error = %e,
                "Error processing message from {}",
                topic
            );
        }
    }

    /// Decodes the key, value and headers of a raw message.
    pub async fn decode(&self, raw: RawMessage) -> Result<DecodedMessage> {
        let key = self.decoder.decode_key(raw.key.as_deref()).await?;
        let value = self.decoder.decode_value(raw.value.as_deref()).await?;
        let headers = raw
            .headers
            .into_iter()
            .map(|(name, bytes)| (name, String::from_utf8_lossy(&bytes).into_owned()))
            .collect();

        Ok(DecodedMessage {
            topic: raw.topic,
            partition: raw.partition,
            offset: raw.offset,
            key,
            value,
            headers,
            timestamp: raw.timestamp,
        })
    }

    async fn dispatch(&self, raw: RawMessage, control: Arc<dyn PartitionControl>) -> Result<()> {
        let message = self.decode(raw).await?;

        let handler = self
            .routes
            .read()
            .await
            .get(&message.topic)
            .cloned()
            .ok_or_else(|| KafkaError::MissingHandler(message.topic.clone()))?;

        let payload = EachMessagePayload::new(message, control);
        AssertUnwindSafe(async move { handler(payload).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(KafkaError::Handler(panic_message(panic.as_ref()))))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("handler panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecoderKind;
    use crate::registry::handler_from_fn;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct NoopControl;

    #[async_trait]
    impl PartitionControl for NoopControl {
        async fn heartbeat(&self) -> Result<()> {
            Ok(())
        }

        fn pause(&self) -> Result<()> {
            Ok(())
        }

        fn resume(&self) -> Result<()> {
            Ok(())
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(MessageDecoder::new(
            DecoderKind::default_key(),
            DecoderKind::default_value(),
            None,
        ))
    }

    #[tokio::test]
    async fn headers_become_strings() {
        let raw = RawMessage::new("orders", 0, 1)
            .with_header("a", "1")
            .with_header("b", "x");
        let decoded = pipeline().decode(raw).await.unwrap();

        let expected: HashMap<String, String> = [("a", "1"), ("b", "x")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(decoded.headers, expected);
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced_not_rejected() {
        let raw = RawMessage::new("orders", 0, 1)
            .with_header("trace", vec![0x66u8, 0xff])
            .with_key(vec![0xffu8, 0x61])
            .with_value("{}");
        let decoded = pipeline().decode(raw).await.unwrap();

        assert_eq!(decoded.headers["trace"], "f\u{FFFD}");
        assert_eq!(decoded.key, json!("\u{FFFD}a"));
        assert_eq!(decoded.value, json!({}));
    }

    #[tokio::test]
    async fn decode_keeps_transport_metadata() {
        let raw = RawMessage::new("orders", 3, 99)
            .with_key("k1")
            .with_value(r#"{"id":42}"#)
            .with_timestamp(1_700_000_000_000);
        let decoded = pipeline().decode(raw).await.unwrap();

        assert_eq!(decoded.partition, 3);
        assert_eq!(decoded.offset, 99);
        assert_eq!(decoded.timestamp, Some(1_700_000_000_000));
        assert_eq!(decoded.key, json!("k1"));
        assert_eq!(decoded.value, json!({"id": 42}));
    }

    #[tokio::test]
    async fn bind_reports_replacement() {
        let pipeline = pipeline();
        let noop = handler_from_fn(|_p| async { Ok(()) });
        assert!(!pipeline.bind("orders", noop.clone()).await);
        assert!(pipeline.bind("orders", noop).await);
        pipeline.unbind("orders").await;
        assert!(!pipeline.is_bound("orders").await);
    }

    #[tokio::test]
    async fn missing_handler_is_swallowed() {
        // Nothing bound: must return without panicking.
        pipeline()
            .process(RawMessage::new("nobody", 0, 0).with_value("{}"), Arc::new(NoopControl))
            .await;
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        let pipeline = pipeline();
        let (tx, mut rx) = mpsc::unbounded_channel();

        pipeline
            .bind(
                "orders",
                handler_from_fn(move |payload: EachMessagePayload| {
                    let tx = tx.clone();
                    async move {
                        if payload.message.value == json!({"boom": true}) {
                            panic!("boom");
                        }
                        tx.send(payload.message.offset).unwrap();
                        Ok(())
                    }
                }),
            )
            .await;

        let control: Arc<dyn PartitionControl> = Arc::new(NoopControl);
        pipeline
            .process(
                RawMessage::new("orders", 0, 1).with_value(r#"{"boom":true}"#),
                Arc::clone(&control),
            )
            .await;
        pipeline
            .process(RawMessage::new("orders", 0, 2).with_value("{}"), control)
            .await;

        assert_eq!(rx.recv().await, Some(2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn panic_message_reads_str_and_string() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked: static");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked: owned");
    }
}
