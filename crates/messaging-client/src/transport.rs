//! Seam between the client and the event log service.
//!
//! The client never opens network connections itself. Everything it needs from
//! the log is expressed by [`LogTransport`]: how large a batch may be, how to
//! append one, how to receive records per partition and how to checkpoint.

use crate::batch::{BatchItem, EventBatch};
use crate::codec::{wire_properties, CONTENT_TYPE_JSON, MESSAGE_NAME_PROPERTY};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// A record received from one partition of the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Partition the record was read from
    pub partition_id: String,
    /// Position within the partition
    pub offset: u64,
    /// String-encoded message id (a UUID when produced by this client)
    pub message_id: String,
    /// Time the log accepted the record
    pub enqueued_time: DateTime<Utc>,
    /// Content type of `body`
    pub content_type: Option<String>,
    /// Application properties; `MessageName` routes the record
    pub properties: HashMap<String, String>,
    /// Encoded payload
    pub body: Bytes,
}

impl Record {
    /// Build the record a log would deliver for an appended item.
    pub fn from_item(item: &BatchItem, partition_id: impl Into<String>, offset: u64) -> Self {
        Self {
            partition_id: partition_id.into(),
            offset,
            message_id: item.message_id.to_string(),
            enqueued_time: Utc::now(),
            content_type: Some(CONTENT_TYPE_JSON.to_string()),
            properties: wire_properties(item),
            body: item.body.clone(),
        }
    }

    /// Routing name, if the record carries one.
    pub fn message_name(&self) -> Option<&str> {
        self.properties
            .get(MESSAGE_NAME_PROPERTY)
            .map(String::as_str)
    }
}

/// The records of one partition, delivered in partition order.
///
/// A stream item of `Err` is a receive failure; the stream stays usable.
pub struct PartitionStream {
    pub partition_id: String,
    pub records: BoxStream<'static, Result<Record>>,
}

impl fmt::Debug for PartitionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionStream")
            .field("partition_id", &self.partition_id)
            .finish_non_exhaustive()
    }
}

/// Append, receive and checkpoint operations of an event log.
///
/// Implementations are expected to retry transient failures internally.
/// Errors that reach the client are logged and not retried again.
#[async_trait]
pub trait LogTransport: Send + Sync {
    /// Largest batch, in bytes, that `append` accepts.
    ///
    /// Batches are sized client-side with [`BatchItem::size_bytes`]. The
    /// returned limit must be net of any per-event overhead the transport
    /// adds on the wire, so that every batch whose [`EventBatch::size_bytes`]
    /// is at most this value is accepted by `append`.
    async fn max_batch_bytes(&self) -> Result<usize>;

    /// Append one batch to the log.
    async fn append(&self, batch: EventBatch) -> Result<()>;

    /// Begin receiving.
    ///
    /// `cancel` is the shutdown signal the consumer also observes; partition
    /// streams may end when it fires, but are not required to.
    async fn start(&self, cancel: CancellationToken) -> Result<()>;

    /// One stream per partition owned by this consumer.
    async fn receive(&self) -> Result<Vec<PartitionStream>>;

    /// Durably mark `record` as the last processed position of its partition.
    async fn checkpoint(&self, record: &Record) -> Result<()>;

    /// Stop receiving and release resources.
    async fn stop(&self) -> Result<()>;
}
