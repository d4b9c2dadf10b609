//! Example producer built on `KafkaService`.
//!
//! This example shows how to:
//! - Initialize the producer and admin clients
//! - Create the topics the consumer example listens on
//! - Send typed messages keyed through `KafkaMessage::key`
//! - Send raw messages with headers
//!
//! To run this example:
//! ```bash
//! cargo run --example producer
//! ```
//!
//! Make sure you have a Kafka broker running on localhost:9092.

use kafka_facade::{AdminOptions, KafkaMessage, KafkaService, ModuleOptions, OutboundMessage};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, Level};

#[derive(Debug, Serialize, Deserialize)]
struct PaymentCaptured {
    payment_id: String,
    order_id: String,
    amount_cents: u64,
    currency: String,
}

impl KafkaMessage for PaymentCaptured {
    const TOPIC: &'static str = "payment.captured";

    fn key(&self) -> Option<String> {
        Some(self.order_id.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: String,
    user_id: String,
    amount: f64,
    items: Vec<String>,
}

impl KafkaMessage for OrderPlaced {
    const TOPIC: &'static str = "order.placed";

    // All orders for the same user land on the same partition
    fn key(&self) -> Option<String> {
        Some(self.user_id.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting Kafka producer example");

    let options = ModuleOptions::from_env()?.with_admin(AdminOptions::default());
    let service = KafkaService::new(options);
    service.initialize().await?;

    for topic in [PaymentCaptured::TOPIC, OrderPlaced::TOPIC, "audit.events"] {
        service.create_topic(topic, 3, 1).await?;
    }
    info!("Topics on cluster: {:?}", service.list_topics().await?);

    for i in 1..=3 {
        let payment = PaymentCaptured {
            payment_id: format!("pay-{}", i),
            order_id: format!("order-{}", i),
            amount_cents: 9_999 * i,
            currency: "EUR".to_string(),
        };

        info!("Capturing payment {} for {}", payment.payment_id, payment.order_id);
        service.send_typed(&payment).await?;
    }

    for i in 1..=3 {
        let order = OrderPlaced {
            order_id: format!("order-{}", i),
            user_id: format!("user-{}", i),
            amount: 99.99 * i as f64,
            items: vec![format!("item-{}", i), format!("item-{}", i + 1)],
        };

        info!("Sending OrderPlaced event for order_id: {}", order.order_id);
        let meta = service.send_typed(&order).await?;
        info!("   -> partition {}, offset {}", meta.partition, meta.offset);
    }

    let issued_at = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as i64;
    let audit = [
        OutboundMessage::new(r#"{"action":"login"}"#)
            .with_key("user-1")
            .with_header("source", "producer-example")
            .with_timestamp(issued_at),
        OutboundMessage::tombstone("user-2"),
    ];
    service.send("audit.events", &audit).await?;

    info!("Flushing pending messages");
    service.shutdown().await?;

    info!("All messages sent successfully!");
    Ok(())
}
