//! In-Memory Round Trip Example
//!
//! Sends a mix of messages through the Producer and consumes them with
//! registered handlers, using the in-memory transport.
//!
//! Run with:
//! ```bash
//! RUST_LOG=messaging_client=debug cargo run --package messaging-client --example in_memory_roundtrip
//! ```

use messaging_client::{
    handler_fn, CheckpointPolicy, Consumer, Envelope, InMemoryTransport, OutgoingMessage,
    Producer, DEFAULT_MAX_BATCH_BYTES,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize, Deserialize)]
struct OrderPlaced {
    #[serde(rename = "orderId")]
    order_id: String,
    total_cents: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CustomerUpdated {
    customer_id: String,
    email: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("\n📨 Messaging Client Round Trip");
    println!("==============================\n");

    let transport = Arc::new(InMemoryTransport::new(DEFAULT_MAX_BATCH_BYTES).with_partitions(["0", "1"]));

    // Step 1: Produce
    println!("📤 Step 1: Sending messages");
    let producer = Producer::builder().transport(transport.clone()).build()?;

    let mut messages: Vec<OutgoingMessage> = (1..=60)
        .map(|i| {
            OutgoingMessage::new(OrderPlaced {
                order_id: format!("order-{}", i),
                total_cents: i * 250,
            })
        })
        .collect();
    messages.push(OutgoingMessage::named(
        "CustomerUpdatedV2",
        CustomerUpdated {
            customer_id: "c-7".to_string(),
            email: "ada@example.com".to_string(),
        },
    ));

    let report = producer.send_messages(messages).await?.wait().await?;
    println!(
        "   ✅ {} messages in {} batch(es), {} skipped\n",
        report.messages_sent, report.batches_sent, report.messages_skipped
    );

    // Step 2: Consume
    println!("📥 Step 2: Consuming");
    let consumer = Consumer::builder()
        .transport(transport.clone())
        .checkpoint_policy(CheckpointPolicy::every(25))
        .register_default::<OrderPlaced, _>(handler_fn(|env: Envelope<OrderPlaced>| async move {
            tracing::debug!(order_id = %env.message.order_id, partition_id = %env.partition_id, "Order placed");
            anyhow::Ok(())
        }))?
        .register::<CustomerUpdated, _>(
            "CustomerUpdatedV2",
            handler_fn(|env: Envelope<CustomerUpdated>| async move {
                println!("   👤 customer {} is now {}", env.message.customer_id, env.message.email);
                anyhow::Ok(())
            }),
        )?
        .build()?;

    // No more records will arrive; let the partition streams end.
    transport.close_all();

    let stats = consumer.consume(CancellationToken::new()).await?;
    println!(
        "   ✅ handled {} across {} partition(s), {} checkpoint(s)",
        stats.handled, stats.partitions, stats.checkpoints
    );
    for (partition, offset) in transport.checkpoints() {
        println!("      partition {} checkpointed at offset {}", partition, offset);
    }

    println!("\n🎉 Done\n");
    Ok(())
}
