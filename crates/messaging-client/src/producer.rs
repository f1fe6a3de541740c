//! Producer API for sending typed messages to an event log.
//!
//! The Producer turns application payloads into JSON records, packs them into
//! as few batches as the log accepts and appends the batches in order.
//!
//! ## Send Path
//!
//! ```text
//! send_messages(Vec<OutgoingMessage>)
//!     │
//!     ├─→ Codec::encode        per message; failures logged and skipped
//!     ├─→ BatchBuilder::pack   MessageTooLarge returned to the caller
//!     │
//!     └─→ spawned task ──→ LogTransport::append (batch 1, batch 2, ...)
//!                          failures logged, never returned
//! ```
//!
//! ## Failure Semantics
//!
//! - **Oversized message**: the whole call fails before anything is sent. This
//!   is a caller bug, not an infrastructure problem.
//! - **Append failure**: logged and counted in the [`SendReport`]. The
//!   transport is responsible for retrying transient failures; the Producer
//!   does not retry again and moves on to the next batch.
//! - **Capacity query failure**: logged; every encoded message of the call is
//!   counted as skipped and nothing is appended.
//!
//! `send_messages` returns once the batches are handed to the sending task.
//! The returned [`SendHandle`] can be awaited for a delivery report, or
//! dropped for fire-and-forget behavior.
//!
//! ## Examples
//!
//! ```ignore
//! use messaging_client::{OutgoingMessage, Producer};
//!
//! let producer = Producer::builder()
//!     .transport(transport)
//!     .build()?;
//!
//! let handle = producer.send_messages(vec![
//!     OutgoingMessage::new(OrderPlaced { order_id: "42".into() }),
//!     OutgoingMessage::named("CustomerUpdatedV2", customer),
//! ]).await?;
//!
//! let report = handle.wait().await?;
//! println!("{} messages in {} batches", report.messages_sent, report.batches_sent);
//! ```

use crate::batch::{BatchBuilder, BatchItem, EventBatch};
use crate::codec::{Codec, OutgoingMessage};
use crate::error::{ClientError, Result};
use crate::transport::LogTransport;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Outcome of one `send_messages` call.
///
/// `messages_skipped` counts messages that were not delivered: those that
/// failed to encode, those dropped because the batch capacity could not be
/// queried, and those in batches the transport rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    pub batches_sent: usize,
    pub batches_failed: usize,
    pub messages_sent: usize,
    pub messages_skipped: usize,
}

/// Completion handle for a `send_messages` call.
///
/// Dropping the handle does not cancel sending.
#[derive(Debug)]
pub struct SendHandle {
    task: JoinHandle<SendReport>,
}

impl SendHandle {
    /// Wait until every batch was appended or failed.
    ///
    /// # Errors
    ///
    /// `Internal` if the sending task panicked or was aborted.
    pub async fn wait(self) -> Result<SendReport> {
        self.task
            .await
            .map_err(|e| ClientError::Internal(format!("send task failed: {}", e)))
    }

    /// Whether the sending task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

struct ProducerInner {
    transport: Arc<dyn LogTransport>,
    max_batch_bytes: Option<usize>,
}

/// Encodes, batches and sends messages through a [`LogTransport`].
///
/// Cloning is cheap; clones share the transport.
#[derive(Clone)]
pub struct Producer {
    inner: Arc<ProducerInner>,
}

impl Producer {
    /// Create a new ProducerBuilder.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let producer = Producer::builder()
    ///     .transport(Arc::new(InMemoryTransport::new(DEFAULT_MAX_BATCH_BYTES)))
    ///     .build()?;
    /// ```
    pub fn builder() -> ProducerBuilder {
        ProducerBuilder::new()
    }

    /// Send a list of messages, possibly of different types.
    ///
    /// Encoding and packing happen before this returns; appending happens in
    /// a background task, one batch at a time in call order.
    ///
    /// # Arguments
    ///
    /// * `messages` - Payloads with their resolved message names
    ///
    /// # Returns
    ///
    /// A [`SendHandle`] for the background appends. An empty list, or a list
    /// where nothing could be encoded, yields a handle whose report shows no
    /// batches.
    ///
    /// # Errors
    ///
    /// `MessageTooLarge` if a single message exceeds the batch capacity.
    /// Nothing is sent. Transport failures, including a failed capacity
    /// query, are logged and show up in the [`SendReport`] only.
    pub async fn send_messages(&self, messages: Vec<OutgoingMessage>) -> Result<SendHandle> {
        let requested = messages.len();
        let mut skipped = 0;
        let mut items: Vec<BatchItem> = Vec::with_capacity(requested);

        for message in &messages {
            match Codec::encode(message) {
                Ok(item) => items.push(item),
                Err(e) => {
                    skipped += 1;
                    error!(message_name = message.name(), error = %e, "Failed to encode message, skipping");
                }
            }
        }

        let batches = if items.is_empty() {
            Vec::new()
        } else {
            let max_batch_bytes = match self.inner.max_batch_bytes {
                Some(max) => max,
                None => match self.inner.transport.max_batch_bytes().await {
                    Ok(max) => max,
                    Err(e) => {
                        error!(
                            messages = items.len(),
                            error = %e,
                            "Failed to query batch capacity, skipping messages"
                        );
                        return Ok(self.spawn_append(Vec::new(), skipped + items.len()));
                    }
                },
            };
            BatchBuilder::new(max_batch_bytes).pack(items)?
        };

        debug!(
            messages = requested,
            skipped,
            batches = batches.len(),
            "Packed messages into batches"
        );

        Ok(self.spawn_append(batches, skipped))
    }

    fn spawn_append(&self, batches: Vec<EventBatch>, skipped: usize) -> SendHandle {
        let transport = Arc::clone(&self.inner.transport);
        let task = tokio::spawn(Self::append_batches(transport, batches, skipped));
        SendHandle { task }
    }

    /// Send a single message.
    pub async fn send_message(&self, message: OutgoingMessage) -> Result<SendHandle> {
        self.send_messages(vec![message]).await
    }

    async fn append_batches(
        transport: Arc<dyn LogTransport>,
        batches: Vec<EventBatch>,
        skipped: usize,
    ) -> SendReport {
        let mut report = SendReport {
            messages_skipped: skipped,
            ..Default::default()
        };
        let total = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            let count = batch.len();
            let size_bytes = batch.size_bytes();
            match transport.append(batch).await {
                Ok(()) => {
                    report.batches_sent += 1;
                    report.messages_sent += count;
                    debug!(batch = index + 1, total, messages = count, size_bytes, "Batch sent");
                }
                Err(e) => {
                    report.batches_failed += 1;
                    report.messages_skipped += count;
                    error!(
                        batch = index + 1,
                        total,
                        messages = count,
                        error = %e,
                        "Failed to send batch"
                    );
                }
            }
        }

        report
    }
}

/// Builder for constructing a Producer.
///
/// ## Required Fields
///
/// - `transport`: log the batches are appended to
///
/// ## Optional Fields
///
/// - `max_batch_bytes`: cap batches below the transport's own limit
pub struct ProducerBuilder {
    transport: Option<Arc<dyn LogTransport>>,
    max_batch_bytes: Option<usize>,
}

impl ProducerBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            max_batch_bytes: None,
        }
    }

    /// Set the log transport (required).
    pub fn transport(mut self, transport: Arc<dyn LogTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a fixed batch capacity instead of asking the transport per call.
    ///
    /// Must not exceed what the transport accepts, or appends will fail.
    pub fn max_batch_bytes(mut self, max_batch_bytes: usize) -> Self {
        self.max_batch_bytes = Some(max_batch_bytes);
        self
    }

    /// Build the Producer.
    ///
    /// # Errors
    ///
    /// `ConfigError` if no transport was set or the batch capacity is zero.
    pub fn build(self) -> Result<Producer> {
        let transport = self
            .transport
            .ok_or_else(|| ClientError::ConfigError("transport is required".to_string()))?;

        if self.max_batch_bytes == Some(0) {
            return Err(ClientError::ConfigError(
                "max_batch_bytes must be greater than zero".to_string(),
            ));
        }

        info!(max_batch_bytes = ?self.max_batch_bytes, "Producer initialized");

        Ok(Producer {
            inner: Arc::new(ProducerInner {
                transport,
                max_batch_bytes: self.max_batch_bytes,
            }),
        })
    }
}

impl Default for ProducerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryTransport, DEFAULT_MAX_BATCH_BYTES};
    use serde::Serialize;
    use std::collections::HashMap;

    #[derive(Serialize)]
    struct OrderPlaced {
        #[serde(rename = "orderId")]
        order_id: String,
    }

    fn producer_for(transport: &Arc<InMemoryTransport>) -> Producer {
        Producer::builder()
            .transport(Arc::clone(transport) as Arc<dyn LogTransport>)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_transport() {
        let result = Producer::builder().build();
        assert!(matches!(result, Err(ClientError::ConfigError(_))));
    }

    #[test]
    fn test_builder_rejects_zero_capacity() {
        let transport = Arc::new(InMemoryTransport::new(DEFAULT_MAX_BATCH_BYTES));
        let result = Producer::builder()
            .transport(transport)
            .max_batch_bytes(0)
            .build();
        assert!(matches!(result, Err(ClientError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_single_message_uses_type_name() {
        let transport = Arc::new(InMemoryTransport::new(DEFAULT_MAX_BATCH_BYTES));
        let producer = producer_for(&transport);

        let report = producer
            .send_message(OutgoingMessage::new(OrderPlaced {
                order_id: "42".into(),
            }))
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(report.batches_sent, 1);
        assert_eq!(report.messages_sent, 1);

        let batches = transport.appended_batches();
        let item = &batches[0].items()[0];
        assert_eq!(item.name, "OrderPlaced");
        assert_eq!(&item.body[..], br#"{"orderId":"42"}"#);
    }

    #[tokio::test]
    async fn test_messages_split_across_batches_in_order() {
        // Each item is 1 + 11 + 1 + 16 + 36 = 65 bytes; two fit in 130.
        let transport = Arc::new(InMemoryTransport::new(130));
        let producer = producer_for(&transport);

        let report = producer
            .send_messages(vec![
                OutgoingMessage::named("A", 1),
                OutgoingMessage::named("B", 2),
                OutgoingMessage::named("C", 3),
            ])
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(report.batches_sent, 2);
        assert_eq!(report.messages_sent, 3);

        let names: Vec<Vec<String>> = transport
            .appended_batches()
            .iter()
            .map(|b| b.items().iter().map(|i| i.name.clone()).collect())
            .collect();
        assert_eq!(names, vec![vec!["A", "B"], vec!["C"]]);
    }

    #[tokio::test]
    async fn test_oversized_message_fails_call_and_sends_nothing() {
        let transport = Arc::new(InMemoryTransport::new(100));
        let producer = producer_for(&transport);

        let err = producer
            .send_messages(vec![
                OutgoingMessage::named("Small", 1),
                OutgoingMessage::named("Big", "x".repeat(500)),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::MessageTooLarge { ref name, .. } if name == "Big"));
        assert!(transport.appended_batches().is_empty());
    }

    #[tokio::test]
    async fn test_append_failure_is_reported_not_returned() {
        let transport = Arc::new(InMemoryTransport::new(130));
        transport.fail_next_appends(1);
        let producer = producer_for(&transport);

        let handle = producer
            .send_messages(vec![
                OutgoingMessage::named("A", 1),
                OutgoingMessage::named("B", 2),
                OutgoingMessage::named("C", 3),
            ])
            .await
            .unwrap();
        let report = handle.wait().await.unwrap();

        assert_eq!(report.batches_failed, 1);
        assert_eq!(report.batches_sent, 1);
        assert_eq!(report.messages_skipped, 2);
        assert_eq!(report.messages_sent, 1);
        assert_eq!(transport.appended_batches()[0].items()[0].name, "C");
    }

    #[tokio::test]
    async fn test_unencodable_message_is_skipped() {
        let transport = Arc::new(InMemoryTransport::new(DEFAULT_MAX_BATCH_BYTES));
        let producer = producer_for(&transport);

        // JSON object keys must be strings.
        let bad: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);
        let report = producer
            .send_messages(vec![
                OutgoingMessage::named("Bad", bad),
                OutgoingMessage::named("Good", 1),
            ])
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(report.messages_skipped, 1);
        assert_eq!(report.messages_sent, 1);
        assert_eq!(transport.appended_batches()[0].items()[0].name, "Good");
    }

    #[tokio::test]
    async fn test_capacity_query_failure_is_reported_not_returned() {
        let transport = Arc::new(InMemoryTransport::new(DEFAULT_MAX_BATCH_BYTES));
        transport.fail_next_capacity_queries(1);
        let producer = producer_for(&transport);

        let handle = producer
            .send_messages(vec![OutgoingMessage::named("A", 1), OutgoingMessage::named("B", 2)])
            .await
            .expect("transport failures stay inside the report");
        let report = handle.wait().await.unwrap();

        assert_eq!(report.messages_skipped, 2);
        assert_eq!(report.messages_sent, 0);
        assert_eq!(report.batches_sent, 0);
        assert!(transport.appended_batches().is_empty());

        // The next call queries again and goes through.
        let report = producer
            .send_message(OutgoingMessage::named("C", 3))
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(report.messages_sent, 1);
    }

    #[tokio::test]
    async fn test_empty_send_appends_nothing() {
        let transport = Arc::new(InMemoryTransport::new(DEFAULT_MAX_BATCH_BYTES));
        let producer = producer_for(&transport);

        let report = producer.send_messages(Vec::new()).await.unwrap().wait().await.unwrap();
        assert_eq!(report, SendReport::default());
        assert!(transport.appended_batches().is_empty());
    }

    #[tokio::test]
    async fn test_fixed_capacity_overrides_transport() {
        let transport = Arc::new(InMemoryTransport::new(DEFAULT_MAX_BATCH_BYTES));
        let producer = Producer::builder()
            .transport(transport.clone())
            .max_batch_bytes(65)
            .build()
            .unwrap();

        producer
            .send_messages(vec![OutgoingMessage::named("A", 1), OutgoingMessage::named("B", 2)])
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(transport.appended_batches().len(), 2);
    }
}
