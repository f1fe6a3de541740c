//! Batch packing for the producer.
//!
//! Encoded messages are packed into the fewest capacity-bounded batches the
//! transport will accept, so that a `send_messages` call costs one append per
//! batch instead of one per message.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────┐
//! │  send_messages(...)    │ Producer API
//! └──────────┬─────────────┘
//!            │ Vec<BatchItem> (encoded, in call order)
//!            ▼
//! ┌────────────────────────┐
//! │  BatchBuilder::pack    │ greedy first-fit, one open batch
//! └──────────┬─────────────┘
//!            │ Vec<EventBatch> (each ≤ max_batch_bytes)
//!            ▼
//! ┌────────────────────────┐
//! │  LogTransport::append  │ one call per batch, in order
//! └────────────────────────┘
//! ```
//!
//! ## Ordering
//!
//! Items are never reordered or split. Concatenating the items of the returned
//! batches, in order, yields the input sequence.
//!
//! ## Oversized Items
//!
//! An item that does not fit into an *empty* batch can never be sent. Packing
//! fails with [`ClientError::MessageTooLarge`] and no batches are returned.

use crate::codec::{CONTENT_TYPE_JSON, MESSAGE_NAME_PROPERTY};
use crate::error::{ClientError, Result};
use bytes::Bytes;
use tracing::{debug, trace};
use uuid::Uuid;

/// Length of a hyphenated UUID, the wire form of a message id.
const MESSAGE_ID_LEN: usize = 36;

/// A single encoded message waiting to be packed.
///
/// # Fields
///
/// * `name` - Message name, written to the `MessageName` property
/// * `message_id` - Unique id assigned at encode time
/// * `body` - UTF-8 JSON payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    /// Message name used for routing on the consumer side
    pub name: String,
    /// Unique id of this message
    pub message_id: Uuid,
    /// Serialized payload
    pub body: Bytes,
}

impl BatchItem {
    /// Create a new batch item.
    pub fn new(name: impl Into<String>, message_id: Uuid, body: Bytes) -> Self {
        Self {
            name: name.into(),
            message_id,
            body,
        }
    }

    /// Size this item contributes to a batch.
    ///
    /// # Returns
    ///
    /// body + `MessageName` property (key and value) + content type + message id.
    ///
    /// This is the accounting `LogTransport::max_batch_bytes` is measured in.
    pub fn size_bytes(&self) -> usize {
        self.body.len()
            + MESSAGE_NAME_PROPERTY.len()
            + self.name.len()
            + CONTENT_TYPE_JSON.len()
            + MESSAGE_ID_LEN
    }
}

/// An ordered group of items whose total size never exceeds `max_size_bytes`.
///
/// # Lifecycle
///
/// 1. **Open**: `EventBatch::new(capacity)` with the transport's limit
/// 2. **Fill**: `try_add` until an item is rejected
/// 3. **Hand off**: passed by value to `LogTransport::append`
#[derive(Debug, Clone)]
pub struct EventBatch {
    items: Vec<BatchItem>,
    size_bytes: usize,
    max_size_bytes: usize,
}

impl EventBatch {
    /// Create an empty batch holding at most `max_size_bytes`.
    pub fn new(max_size_bytes: usize) -> Self {
        Self {
            items: Vec::new(),
            size_bytes: 0,
            max_size_bytes,
        }
    }

    /// Append an item if it fits.
    ///
    /// # Returns
    ///
    /// `Err(item)` hands the rejected item back so the caller can retry it
    /// against a fresh batch.
    pub fn try_add(&mut self, item: BatchItem) -> std::result::Result<(), BatchItem> {
        let item_size = item.size_bytes();
        if self.size_bytes + item_size > self.max_size_bytes {
            return Err(item);
        }

        self.size_bytes += item_size;
        self.items.push(item);
        trace!(
            item_count = self.items.len(),
            size_bytes = self.size_bytes,
            max_size_bytes = self.max_size_bytes,
            "Appended item to batch"
        );
        Ok(())
    }

    /// Check if the batch holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of items in the batch.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Sum of item sizes in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Capacity this batch was opened with.
    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    /// Items in insertion order.
    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    /// Consume the batch, yielding its items in insertion order.
    pub fn into_items(self) -> Vec<BatchItem> {
        self.items
    }
}

/// Packs encoded items into capacity-bounded batches.
///
/// # Algorithm
///
/// Greedy first-fit with a single open batch:
/// 1. Try to append the next item to the open batch
/// 2. If it overflows and the batch is empty, the item is too large: fail
/// 3. Otherwise close the batch, open a fresh one and retry the item there
/// 4. A retry that fails against the fresh (empty) batch is also too large
///
/// The last open batch is always part of the result when it holds items.
///
/// # Examples
///
/// ```ignore
/// let builder = BatchBuilder::new(transport.max_batch_bytes().await?);
/// for batch in builder.pack(items)? {
///     transport.append(batch).await?;
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct BatchBuilder {
    max_batch_bytes: usize,
}

impl BatchBuilder {
    /// Create a builder that opens batches of `max_batch_bytes` capacity.
    pub fn new(max_batch_bytes: usize) -> Self {
        Self { max_batch_bytes }
    }

    /// Capacity of every batch this builder opens.
    pub fn max_batch_bytes(&self) -> usize {
        self.max_batch_bytes
    }

    /// Pack `items` into the fewest batches, preserving order.
    ///
    /// # Errors
    ///
    /// `MessageTooLarge` naming the first item that cannot fit into an empty
    /// batch. No batches are returned in that case.
    pub fn pack<I>(&self, items: I) -> Result<Vec<EventBatch>>
    where
        I: IntoIterator<Item = BatchItem>,
    {
        let mut batches = Vec::new();
        let mut current = EventBatch::new(self.max_batch_bytes);

        for item in items {
            let rejected = match current.try_add(item) {
                Ok(()) => continue,
                Err(rejected) => rejected,
            };

            if current.is_empty() {
                return Err(self.too_large(&rejected));
            }

            let full = std::mem::replace(&mut current, EventBatch::new(self.max_batch_bytes));
            debug!(
                item_count = full.len(),
                size_bytes = full.size_bytes(),
                "Closed full batch"
            );
            batches.push(full);

            // `current` is empty again, so a second rejection means the item
            // alone exceeds the capacity.
            if let Err(rejected) = current.try_add(rejected) {
                return Err(self.too_large(&rejected));
            }
        }

        if !current.is_empty() {
            batches.push(current);
        }

        debug!(
            batch_count = batches.len(),
            max_batch_bytes = self.max_batch_bytes,
            "Packed items into batches"
        );
        Ok(batches)
    }

    fn too_large(&self, item: &BatchItem) -> ClientError {
        ClientError::MessageTooLarge {
            name: item.name.clone(),
            size: item.size_bytes(),
            max: self.max_batch_bytes,
        }
    }
}
