//! Consumer lifecycle tests over the in-memory transport.

mod common;

use common::{recv, MemoryTransport};
use kafka_facade::{
    ConnectionState, ConsumerService, DecoderKind, EachMessagePayload, KafkaError,
    ModuleOptions, RawMessage, SubscribeOptions, TopicRegistry, DEFAULT_GROUP_ID,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn channel_registry(topics: &[&str]) -> (TopicRegistry, mpsc::UnboundedReceiver<EachMessagePayload>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut registry = TopicRegistry::new();
    for topic in topics {
        let tx = tx.clone();
        registry.register(
            *topic,
            move |payload: EachMessagePayload| {
                let tx = tx.clone();
                async move {
                    tx.send(payload).unwrap();
                    Ok(())
                }
            },
            SubscribeOptions::default(),
        );
    }
    (registry, rx)
}

fn consumer(registry: TopicRegistry, transport: Arc<MemoryTransport>) -> ConsumerService {
    ConsumerService::with_transport(
        ModuleOptions::new("localhost:9092"),
        Arc::new(registry),
        transport,
    )
}

#[tokio::test]
async fn malformed_json_is_skipped_and_the_next_message_delivered() {
    let (registry, mut rx) = channel_registry(&["orders"]);
    let transport = MemoryTransport::new();
    let consumer = consumer(registry, transport.clone());
    consumer.start().await.unwrap();

    transport.deliver(RawMessage::new("orders", 0, 0).with_value("{not json"));
    transport.deliver(RawMessage::new("orders", 0, 1).with_value(r#"{"ok":true}"#));

    let payload = recv(&mut rx).await;
    assert_eq!(payload.message.offset, 1);
    assert_eq!(payload.message.value, json!({"ok": true}));

    transport.wait_processed(2).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(consumer.state(), ConnectionState::Running);

    consumer.stop().await.unwrap();
}

#[tokio::test]
async fn avro_without_registry_never_reaches_the_handler() {
    let (registry, mut rx) = channel_registry(&["orders"]);
    let transport = MemoryTransport::new();
    let consumer = ConsumerService::with_transport(
        ModuleOptions::new("localhost:9092").with_value_decoder(DecoderKind::Avro),
        Arc::new(registry),
        transport.clone(),
    );
    consumer.start().await.unwrap();

    transport.deliver(RawMessage::new("orders", 0, 0).with_value(vec![0u8, 0, 0, 0, 1, 2]));
    transport.deliver(RawMessage::new("orders", 0, 1).with_value(vec![0u8, 0, 0, 0, 1, 4]));
    // Tombstones are held to the same rule.
    transport.deliver(RawMessage::new("orders", 0, 2));
    transport.wait_processed(3).await;

    assert!(rx.try_recv().is_err());
    assert_eq!(consumer.state(), ConnectionState::Running);

    consumer.stop().await.unwrap();
}

#[tokio::test]
async fn messages_for_unrouted_topics_are_dropped() {
    let (registry, mut rx) = channel_registry(&["orders"]);
    let transport = MemoryTransport::new();
    let consumer = consumer(registry, transport.clone());
    consumer.start().await.unwrap();

    transport.deliver(RawMessage::new("payments", 0, 0).with_value("{}"));
    transport.deliver(RawMessage::new("orders", 0, 5).with_value("{}"));

    assert_eq!(recv(&mut rx).await.message.offset, 5);
    consumer.stop().await.unwrap();
}

#[tokio::test]
async fn panicking_handler_does_not_stop_the_loop() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut registry = TopicRegistry::new();
    registry.register(
        "orders",
        move |payload: EachMessagePayload| {
            let tx = tx.clone();
            async move {
                if payload.message.offset == 0 {
                    panic!("handler blew up");
                }
                tx.send(payload.message.offset).unwrap();
                Ok(())
            }
        },
        SubscribeOptions::default(),
    );

    let transport = MemoryTransport::new();
    let consumer = consumer(registry, transport.clone());
    consumer.start().await.unwrap();

    transport.deliver(RawMessage::new("orders", 0, 0).with_value("{}"));
    transport.deliver(RawMessage::new("orders", 0, 1).with_value("{}"));

    assert_eq!(recv(&mut rx).await, 1);
    assert_eq!(consumer.state(), ConnectionState::Running);
    consumer.stop().await.unwrap();
}

#[tokio::test]
async fn subscribe_before_connect_fails_without_touching_the_transport() {
    let transport = MemoryTransport::new();
    let consumer = consumer(TopicRegistry::new(), transport.clone());

    let err = consumer
        .subscribe("orders", |_payload| async { Ok(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, KafkaError::NotConnected));
    assert!(transport.subscribes().is_empty());
    assert_eq!(consumer.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn disconnect_when_never_connected_is_a_no_op() {
    let transport = MemoryTransport::new();
    let consumer = consumer(TopicRegistry::new(), transport.clone());

    consumer.disconnect().await.unwrap();
    consumer.stop().await.unwrap();

    assert_eq!(transport.disconnects(), 0);
    assert_eq!(consumer.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn connect_twice_opens_one_session() {
    let transport = MemoryTransport::new();
    let consumer = consumer(TopicRegistry::new(), transport.clone());

    consumer.connect().await.unwrap();
    consumer.connect().await.unwrap();

    assert_eq!(transport.connects().len(), 1);
    assert_eq!(consumer.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn concurrent_connects_open_one_session() {
    let transport = MemoryTransport::new();
    let consumer = Arc::new(consumer(TopicRegistry::new(), transport.clone()));

    let (a, b) = tokio::join!(consumer.connect(), consumer.connect());
    a.unwrap();
    b.unwrap();

    assert_eq!(transport.connects().len(), 1);
}

#[tokio::test]
async fn register_all_topics_twice_does_not_duplicate_subscriptions() {
    let (registry, _rx) = channel_registry(&["orders", "payments"]);
    let transport = MemoryTransport::new();
    let consumer = consumer(registry, transport.clone());

    consumer.start().await.unwrap();
    consumer.register_all_topics().await.unwrap();

    let mut subscribed: Vec<String> = transport.subscribes().into_iter().map(|(t, _)| t).collect();
    subscribed.sort();
    assert_eq!(subscribed, vec!["orders", "payments"]);
    assert_eq!(consumer.subscriptions().await, vec!["orders", "payments"]);

    consumer.stop().await.unwrap();
}

#[tokio::test]
async fn empty_registry_connects_without_subscribing() {
    let transport = MemoryTransport::new();
    let consumer = consumer(TopicRegistry::new(), transport.clone());

    consumer.start().await.unwrap();

    assert_eq!(transport.connects().len(), 1);
    assert!(transport.subscribes().is_empty());
    assert_eq!(consumer.state(), ConnectionState::Connected);

    consumer.stop().await.unwrap();
    assert_eq!(transport.disconnects(), 1);
}

#[tokio::test]
async fn connect_failure_reports_brokers_and_stays_disconnected() {
    let transport = MemoryTransport::failing_connect();
    let consumer = ConsumerService::with_transport(
        ModuleOptions::new("kafka-1:9092,kafka-2:9092"),
        Arc::new(TopicRegistry::new()),
        transport.clone(),
    );

    let err = consumer.start().await.unwrap_err();
    match &err {
        KafkaError::Connection { brokers, .. } => assert_eq!(brokers, "kafka-1:9092,kafka-2:9092"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("kafka-1:9092"));
    assert_eq!(consumer.state(), ConnectionState::Disconnected);

    // A later stop has nothing to release.
    consumer.stop().await.unwrap();
    assert_eq!(transport.disconnects(), 0);
}

#[tokio::test]
async fn subscribe_failure_names_the_topic() {
    let (registry, _rx) = channel_registry(&["missing.topic"]);
    let transport = MemoryTransport::failing_subscribe("missing.topic");
    let consumer = consumer(registry, transport.clone());

    let err = consumer.start().await.unwrap_err();
    match &err {
        KafkaError::Subscription { topic, .. } => assert_eq!(topic, "missing.topic"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(consumer.state(), ConnectionState::Connected);
    assert!(consumer.subscriptions().await.is_empty());

    consumer.stop().await.unwrap();
    assert_eq!(consumer.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn from_beginning_reaches_connect_settings_and_subscribe() {
    let mut registry = TopicRegistry::new();
    registry.register(
        "audit",
        |_payload| async { Ok(()) },
        SubscribeOptions::from_beginning(),
    );
    let transport = MemoryTransport::new();
    let consumer = consumer(registry, transport.clone());

    consumer.start().await.unwrap();

    let connects = transport.connects();
    assert_eq!(connects.len(), 1);
    assert!(connects[0].from_beginning);
    assert_eq!(connects[0].group_id, DEFAULT_GROUP_ID);
    assert_eq!(connects[0].group_id, "nestjs-group");
    assert_eq!(transport.subscribes(), vec![("audit".to_string(), true)]);

    consumer.stop().await.unwrap();
}

#[tokio::test]
async fn configured_group_id_is_used() {
    let transport = MemoryTransport::new();
    let consumer = ConsumerService::with_transport(
        ModuleOptions::new("localhost:9092").with_group_id("billing"),
        Arc::new(TopicRegistry::new()),
        transport.clone(),
    );

    consumer.connect().await.unwrap();
    let connects = transport.connects();
    assert_eq!(connects[0].group_id, "billing");
    assert!(!connects[0].from_beginning);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let (registry, _rx) = channel_registry(&["orders"]);
    let transport = MemoryTransport::new();
    let consumer = consumer(registry, transport.clone());

    consumer.start().await.unwrap();
    consumer.stop().await.unwrap();
    consumer.stop().await.unwrap();

    assert_eq!(transport.disconnects(), 1);
    assert_eq!(consumer.state(), ConnectionState::Disconnected);
    assert!(consumer.subscriptions().await.is_empty());
}

#[tokio::test]
async fn runtime_subscribe_routes_messages() {
    let transport = MemoryTransport::new();
    let consumer = consumer(TopicRegistry::new(), transport.clone());
    consumer.connect().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    consumer
        .subscribe("late.topic", move |payload: EachMessagePayload| {
            let tx = tx.clone();
            async move {
                tx.send(payload.message.value).unwrap();
                Ok(())
            }
        })
        .await
        .unwrap();
    assert_eq!(consumer.state(), ConnectionState::Running);

    transport.deliver(RawMessage::new("late.topic", 2, 9).with_value(r#"[1,2]"#));
    assert_eq!(recv(&mut rx).await, json!([1, 2]));

    consumer.stop().await.unwrap();
}

#[tokio::test]
async fn resubscribing_rebinds_without_a_second_subscribe() {
    let transport = MemoryTransport::new();
    let consumer = consumer(TopicRegistry::new(), transport.clone());
    consumer.connect().await.unwrap();

    let (first_tx, mut first_rx) = mpsc::unbounded_channel::<i64>();
    let (second_tx, mut second_rx) = mpsc::unbounded_channel::<i64>();

    consumer
        .subscribe("orders", move |payload: EachMessagePayload| {
            let tx = first_tx.clone();
            async move {
                tx.send(payload.message.offset).unwrap();
                Ok(())
            }
        })
        .await
        .unwrap();
    consumer
        .subscribe("orders", move |payload: EachMessagePayload| {
            let tx = second_tx.clone();
            async move {
                tx.send(payload.message.offset).unwrap();
                Ok(())
            }
        })
        .await
        .unwrap();

    assert_eq!(transport.subscribes().len(), 1);

    transport.deliver(RawMessage::new("orders", 0, 4).with_value("{}"));
    assert_eq!(recv(&mut second_rx).await, 4);
    transport.wait_processed(1).await;
    assert!(first_rx.try_recv().is_err());

    consumer.stop().await.unwrap();
}

#[tokio::test]
async fn state_transitions_are_observable() {
    let (registry, _rx) = channel_registry(&["orders"]);
    let transport = MemoryTransport::new();
    let consumer = consumer(registry, transport.clone());
    let mut states = consumer.watch_state();

    consumer.start().await.unwrap();
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), ConnectionState::Running);

    consumer.stop().await.unwrap();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn reconnect_after_stop_resubscribes() {
    let (registry, mut rx) = channel_registry(&["orders"]);
    let transport = MemoryTransport::new();
    let consumer = consumer(registry, transport.clone());

    consumer.start().await.unwrap();
    consumer.stop().await.unwrap();
    consumer.start().await.unwrap();

    assert_eq!(transport.connects().len(), 2);
    assert_eq!(transport.subscribes().len(), 2);

    transport.deliver(RawMessage::new("orders", 0, 8).with_value("{}"));
    assert_eq!(recv(&mut rx).await.message.offset, 8);

    consumer.stop().await.unwrap();
}

#[tokio::test]
async fn headers_are_decoded_as_text() {
    let (registry, mut rx) = channel_registry(&["orders"]);
    let transport = MemoryTransport::new();
    let consumer = consumer(registry, transport.clone());
    consumer.start().await.unwrap();

    transport.deliver(
        RawMessage::new("orders", 0, 0)
            .with_value("{}")
            .with_header("trace-id", "abc-123")
            .with_timestamp(1_700_000_000_000),
    );

    let payload = recv(&mut rx).await;
    assert_eq!(payload.topic, "orders");
    assert_eq!(payload.message.headers.get("trace-id").map(String::as_str), Some("abc-123"));
    assert_eq!(payload.message.timestamp, Some(1_700_000_000_000));
    assert_eq!(payload.message.key, serde_json::Value::Null);

    tokio::time::timeout(Duration::from_secs(2), consumer.stop())
        .await
        .unwrap()
        .unwrap();
}
