//! End-to-end tests for Producer → InMemoryTransport → Consumer.
//!
//! These tests drive the public API only:
//! 1. Producer encodes, packs and appends messages
//! 2. The transport delivers appended batches to partitions
//! 3. Consumer routes records to handlers and checkpoints progress

use bytes::Bytes;
use messaging_client::{
    handler_fn, BatchItem, CheckpointPolicy, ClientError, Consumer, Envelope, InMemoryTransport,
    OutgoingMessage, Producer, Record, DEFAULT_MAX_BATCH_BYTES,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderPlaced {
    #[serde(rename = "orderId")]
    order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CustomerUpdated {
    name: String,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn producer(transport: &Arc<InMemoryTransport>) -> Producer {
    Producer::builder()
        .transport(transport.clone())
        .build()
        .unwrap()
}

fn order(id: usize) -> OutgoingMessage {
    OutgoingMessage::new(OrderPlaced {
        order_id: id.to_string(),
    })
}

#[tokio::test]
async fn test_order_placed_round_trip() {
    init_tracing();
    let transport = Arc::new(InMemoryTransport::new(DEFAULT_MAX_BATCH_BYTES).with_partitions(["0"]));

    let report = producer(&transport)
        .send_message(order(42))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.messages_sent, 1);
    transport.close_all();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let consumer = Consumer::builder()
        .transport(transport.clone())
        .register_default::<OrderPlaced, _>(handler_fn(move |env: Envelope<OrderPlaced>| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(env);
                anyhow::Ok(())
            }
        }))
        .unwrap()
        .build()
        .unwrap();

    let stats = consumer.consume(CancellationToken::new()).await.unwrap();
    assert_eq!(stats.partitions, 1);
    assert_eq!(stats.handled, 1);

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].message.order_id, "42");
    assert_eq!(seen[0].partition_id, "0");
    let sent_id = transport.appended_batches()[0].items()[0].message_id;
    assert_eq!(seen[0].message_id, sent_id);

    assert!(transport.is_started());
    assert!(transport.is_stopped());
}

#[tokio::test]
async fn test_checkpoints_every_fifty_records() {
    init_tracing();
    let transport = Arc::new(InMemoryTransport::new(DEFAULT_MAX_BATCH_BYTES).with_partitions(["0"]));

    producer(&transport)
        .send_messages((0..120).map(order).collect())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    transport.close_all();

    let consumer = Consumer::builder()
        .transport(transport.clone())
        .register_default::<OrderPlaced, _>(handler_fn(|_env: Envelope<OrderPlaced>| async {
            anyhow::Ok(())
        }))
        .unwrap()
        .build()
        .unwrap();

    let stats = consumer.consume(CancellationToken::new()).await.unwrap();
    assert_eq!(stats.handled, 120);
    assert_eq!(stats.checkpoints, 2);
    assert_eq!(
        transport.checkpoints(),
        vec![("0".to_string(), 49), ("0".to_string(), 99)]
    );
}

#[tokio::test]
async fn test_mixed_stream_keeps_flowing() {
    init_tracing();
    let transport = Arc::new(InMemoryTransport::new(DEFAULT_MAX_BATCH_BYTES).with_partitions(["0"]));

    producer(&transport)
        .send_messages(vec![
            order(1),
            OutgoingMessage::new(CustomerUpdated {
                name: "Ada".to_string(),
            }),
            OutgoingMessage::named("Unrouted", 7),
            OutgoingMessage::named("OrderPlaced", "not an order"),
            order(2),
        ])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    transport.close_all();

    let orders = Arc::new(AtomicUsize::new(0));
    let counter = orders.clone();
    let consumer = Consumer::builder()
        .transport(transport.clone())
        .checkpoint_policy(CheckpointPolicy::every(2))
        .register_default::<OrderPlaced, _>(handler_fn(move |_env: Envelope<OrderPlaced>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        }))
        .unwrap()
        .register_default::<CustomerUpdated, _>(handler_fn(|_env: Envelope<CustomerUpdated>| async {
            Err::<(), _>(anyhow::anyhow!("customer store unavailable"))
        }))
        .unwrap()
        .build()
        .unwrap();

    let stats = consumer.consume(CancellationToken::new()).await.unwrap();

    assert_eq!(orders.load(Ordering::SeqCst), 2);
    assert_eq!(stats.handled, 2);
    assert_eq!(stats.handler_failures, 1);
    assert_eq!(stats.ignored, 1);
    assert_eq!(stats.dropped, 1);
    // Counted: order 1, customer (failed), order 2. Checkpoint after the second.
    assert_eq!(transport.checkpoints(), vec![("0".to_string(), 1)]);
}

#[tokio::test]
async fn test_two_batches_spread_over_partitions() {
    init_tracing();
    // Each item is 1 + 11 + 1 + 16 + 36 = 65 bytes.
    let transport = Arc::new(InMemoryTransport::new(65).with_partitions(["0", "1"]));

    let report = producer(&transport)
        .send_messages(vec![
            OutgoingMessage::named("A", 1),
            OutgoingMessage::named("B", 2),
        ])
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.batches_sent, 2);
    transport.close_all();

    let by_partition = Arc::new(Mutex::new(Vec::new()));
    let sink_a = by_partition.clone();
    let sink_b = by_partition.clone();
    let consumer = Consumer::builder()
        .transport(transport.clone())
        .register::<u32, _>(
            "A",
            handler_fn(move |env: Envelope<u32>| {
                let sink = sink_a.clone();
                async move {
                    sink.lock().unwrap().push(("A", env.partition_id));
                    anyhow::Ok(())
                }
            }),
        )
        .unwrap()
        .register::<u32, _>(
            "B",
            handler_fn(move |env: Envelope<u32>| {
                let sink = sink_b.clone();
                async move {
                    sink.lock().unwrap().push(("B", env.partition_id));
                    anyhow::Ok(())
                }
            }),
        )
        .unwrap()
        .build()
        .unwrap();

    let stats = consumer.consume(CancellationToken::new()).await.unwrap();
    assert_eq!(stats.partitions, 2);
    assert_eq!(stats.handled, 2);

    let mut seen = by_partition.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec![("A", "0".to_string()), ("B", "1".to_string())]);
}

#[tokio::test]
async fn test_oversized_message_is_surfaced() {
    init_tracing();
    let transport = Arc::new(InMemoryTransport::new(100).with_partitions(["0"]));

    let result = producer(&transport)
        .send_messages(vec![OutgoingMessage::named("Big", "x".repeat(1000))])
        .await;

    assert!(matches!(result, Err(ClientError::MessageTooLarge { .. })));
    assert!(transport.appended_batches().is_empty());
}

#[tokio::test]
async fn test_record_without_message_name_is_ignored() {
    init_tracing();
    let transport = Arc::new(InMemoryTransport::new(DEFAULT_MAX_BATCH_BYTES).with_partitions(["0"]));

    let body = Bytes::from(r#"{"orderId":"7"}"#);
    let mut nameless = Record::from_item(
        &BatchItem::new("OrderPlaced", Uuid::new_v4(), body.clone()),
        "0",
        0,
    );
    nameless.properties.clear();
    transport.publish(nameless);
    transport.publish(Record::from_item(
        &BatchItem::new("OrderPlaced", Uuid::new_v4(), body),
        "0",
        1,
    ));
    transport.close_all();

    let consumer = Consumer::builder()
        .transport(transport.clone())
        .checkpoint_policy(CheckpointPolicy::every(2))
        .register_default::<OrderPlaced, _>(handler_fn(|_env: Envelope<OrderPlaced>| async {
            anyhow::Ok(())
        }))
        .unwrap()
        .build()
        .unwrap();

    let stats = consumer.consume(CancellationToken::new()).await.unwrap();
    assert_eq!(stats.ignored, 1);
    assert_eq!(stats.handled, 1);
    // Only the handled record counts, so the threshold of two is never reached.
    assert_eq!(stats.checkpoints, 0);
    assert!(transport.checkpoints().is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_consume() {
    init_tracing();
    let transport = Arc::new(InMemoryTransport::new(DEFAULT_MAX_BATCH_BYTES).with_partitions(["0", "1"]));

    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();
    let consumer = Consumer::builder()
        .transport(transport.clone())
        .register_default::<OrderPlaced, _>(handler_fn(move |_env: Envelope<OrderPlaced>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        }))
        .unwrap()
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let consumer = consumer.clone();
        let cancel = cancel.clone();
        async move { consumer.consume(cancel).await }
    });

    producer(&transport)
        .send_messages((0..3).map(order).collect())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while handled.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("records were not handled");

    // Streams are still open; only cancellation ends the consume call.
    cancel.cancel();
    let stats = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("consume did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(stats.handled, 3);
    assert!(transport.is_stopped());
    assert!(transport.cancellation_token().unwrap().is_cancelled());
}

#[tokio::test]
async fn test_receive_errors_do_not_stop_partition() {
    init_tracing();
    let transport = Arc::new(InMemoryTransport::new(DEFAULT_MAX_BATCH_BYTES).with_partitions(["0"]));

    transport.inject_receive_error("0", "link detached");
    producer(&transport)
        .send_message(order(1))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    transport.close_all();

    let consumer = Consumer::builder()
        .transport(transport.clone())
        .register_default::<OrderPlaced, _>(handler_fn(|_env: Envelope<OrderPlaced>| async {
            anyhow::Ok(())
        }))
        .unwrap()
        .build()
        .unwrap();

    let stats = consumer.consume(CancellationToken::new()).await.unwrap();
    assert_eq!(stats.receive_errors, 1);
    assert_eq!(stats.handled, 1);
}
