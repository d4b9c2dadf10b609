//! Example consumer built on `KafkaModule`.
//!
//! This example shows how to:
//! - Bind message types to handlers with the `topic_handlers!` macro
//! - Register an untyped handler that sees the decoded key, value and headers
//! - Load module options from `KAFKA_*` environment variables
//! - Start and shut down the module on Ctrl+C
//!
//! To run this example:
//! ```bash
//! cargo run --example consumer
//! ```
//!
//! Make sure you have a Kafka broker running on localhost:9092.
//! Run the producer example in another terminal to generate messages.

use kafka_facade::{
    topic_handlers, EachMessagePayload, KafkaMessage, KafkaModule, ModuleOptions,
    SubscribeOptions,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PaymentCaptured {
    payment_id: String,
    order_id: String,
    amount_cents: u64,
    currency: String,
}

// Payments are replayed from the earliest offset on a fresh consumer group
impl KafkaMessage for PaymentCaptured {
    const TOPIC: &'static str = "payment.captured";
    const FROM_BEGINNING: bool = true;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: String,
    user_id: String,
    amount: f64,
    items: Vec<String>,
}

impl KafkaMessage for OrderPlaced {
    const TOPIC: &'static str = "order.placed";
}

async fn handle_payment(msg: PaymentCaptured) -> anyhow::Result<()> {
    info!(
        payment = %msg.payment_id,
        order = %msg.order_id,
        "Captured {}.{:02} {}",
        msg.amount_cents / 100,
        msg.amount_cents % 100,
        msg.currency
    );
    Ok(())
}

async fn handle_order_placed(msg: OrderPlaced) -> anyhow::Result<()> {
    info!(
        "Order placed - ID: {}, User: {}, Amount: ${:.2}",
        msg.order_id, msg.user_id, msg.amount
    );
    info!("   Items: {:?}", msg.items);

    // Simulate some processing work
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}

async fn handle_audit(payload: EachMessagePayload) -> anyhow::Result<()> {
    info!(
        topic = %payload.topic,
        partition = payload.partition,
        offset = payload.message.offset,
        "Audit event key={} value={} headers={:?}",
        payload.message.key,
        payload.message.value,
        payload.message.headers
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Kafka consumer example");

    let options = ModuleOptions::from_env()?;
    info!(
        "Brokers: {}, key decoder: {}, value decoder: {}",
        options.client.bootstrap_servers(),
        options.key_decoder,
        options.value_decoder
    );

    let mut registry = topic_handlers![
        PaymentCaptured => handle_payment,
        OrderPlaced => handle_order_placed,
    ];
    registry.register("audit.events", handle_audit, SubscribeOptions::default());

    let module = KafkaModule::new(options, registry)?;
    module.start().await?;
    info!("Consuming messages... Press Ctrl+C to stop");

    signal::ctrl_c().await?;
    info!("Received shutdown signal (Ctrl+C)");

    module.shutdown().await?;
    info!("Consumer shut down gracefully");
    Ok(())
}
