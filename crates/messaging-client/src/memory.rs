//! In-memory [`LogTransport`].
//!
//! Keeps appended batches, per-partition record queues and checkpoints in
//! process memory. Appended batches are delivered round-robin to the
//! partitions, one batch per partition, so a producer and a consumer sharing a
//! transport see each other's messages.
//!
//! Failures can be injected for capacity queries, appends, checkpoints and
//! receives.

use crate::batch::EventBatch;
use crate::error::{ClientError, Result};
use crate::transport::{LogTransport, PartitionStream, Record};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Event Hubs standard tier limit.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 1024 * 1024;

type RecordSender = mpsc::UnboundedSender<Result<Record>>;
type RecordReceiver = mpsc::UnboundedReceiver<Result<Record>>;

struct Partition {
    sender: Option<RecordSender>,
    receiver: Option<RecordReceiver>,
    next_offset: u64,
}

impl Partition {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: Some(sender),
            receiver: Some(receiver),
            next_offset: 0,
        }
    }

    fn push(&mut self, item: Result<Record>) {
        if let Some(sender) = &self.sender {
            // The receiver only goes away with the consumer; nothing to deliver to.
            let _ = sender.send(item);
        }
    }
}

#[derive(Default)]
struct State {
    partitions: BTreeMap<String, Partition>,
    appended: Vec<EventBatch>,
    checkpoints: Vec<(String, u64)>,
    next_partition: usize,
    fail_appends: usize,
    fail_checkpoints: usize,
    fail_capacity_queries: usize,
    cancel: Option<CancellationToken>,
    started: bool,
    stopped: bool,
}

/// Log transport backed by process memory.
///
/// ```ignore
/// let transport = Arc::new(InMemoryTransport::new(DEFAULT_MAX_BATCH_BYTES).with_partitions(["0", "1"]));
/// let producer = Producer::builder().transport(transport.clone()).build()?;
/// let consumer = Consumer::builder().transport(transport.clone()).build()?;
/// ```
pub struct InMemoryTransport {
    max_batch_bytes: usize,
    state: Mutex<State>,
}

impl InMemoryTransport {
    /// Create a transport accepting batches up to `max_batch_bytes`.
    pub fn new(max_batch_bytes: usize) -> Self {
        Self {
            max_batch_bytes,
            state: Mutex::new(State::default()),
        }
    }

    /// Add partitions, named in iteration order.
    pub fn with_partitions<I, S>(self, partition_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = self.state();
            for id in partition_ids {
                state.partitions.entry(id.into()).or_insert_with(Partition::new);
            }
        }
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a record to its partition, creating the partition if needed.
    pub fn publish(&self, record: Record) {
        let mut state = self.state();
        state
            .partitions
            .entry(record.partition_id.clone())
            .or_insert_with(Partition::new)
            .push(Ok(record));
    }

    /// Make the partition's stream yield a receive error.
    pub fn inject_receive_error(&self, partition_id: &str, message: &str) {
        let mut state = self.state();
        if let Some(partition) = state.partitions.get_mut(partition_id) {
            partition.push(Err(ClientError::Transport(message.to_string())));
        }
    }

    /// End the partition's stream once its queued records are drained.
    pub fn close_partition(&self, partition_id: &str) {
        let mut state = self.state();
        if let Some(partition) = state.partitions.get_mut(partition_id) {
            partition.sender = None;
        }
    }

    /// End every partition stream.
    pub fn close_all(&self) {
        let mut state = self.state();
        for partition in state.partitions.values_mut() {
            partition.sender = None;
        }
    }

    /// Fail the next `count` appends with a transport error.
    pub fn fail_next_appends(&self, count: usize) {
        self.state().fail_appends = count;
    }

    /// Fail the next `count` batch capacity queries with a transport error.
    pub fn fail_next_capacity_queries(&self, count: usize) {
        self.state().fail_capacity_queries = count;
    }

    /// Fail the next `count` checkpoints with a transport error.
    pub fn fail_next_checkpoints(&self, count: usize) {
        self.state().fail_checkpoints = count;
    }

    /// Successfully appended batches, in append order.
    pub fn appended_batches(&self) -> Vec<EventBatch> {
        self.state().appended.clone()
    }

    /// Committed checkpoints as `(partition_id, offset)`, in commit order.
    pub fn checkpoints(&self) -> Vec<(String, u64)> {
        self.state().checkpoints.clone()
    }

    pub fn is_started(&self) -> bool {
        self.state().started
    }

    pub fn is_stopped(&self) -> bool {
        self.state().stopped
    }

    /// Token passed to the last `start` call.
    pub fn cancellation_token(&self) -> Option<CancellationToken> {
        self.state().cancel.clone()
    }
}

#[async_trait]
impl LogTransport for InMemoryTransport {
    async fn max_batch_bytes(&self) -> Result<usize> {
        let mut state = self.state();
        if state.fail_capacity_queries > 0 {
            state.fail_capacity_queries -= 1;
            return Err(ClientError::Transport("link detached".to_string()));
        }
        Ok(self.max_batch_bytes)
    }

    async fn append(&self, batch: EventBatch) -> Result<()> {
        let mut state = self.state();
        if state.fail_appends > 0 {
            state.fail_appends -= 1;
            return Err(ClientError::Transport("injected append failure".to_string()));
        }
        if batch.size_bytes() > self.max_batch_bytes {
            return Err(ClientError::Transport(format!(
                "batch of {} bytes exceeds limit of {} bytes",
                batch.size_bytes(),
                self.max_batch_bytes
            )));
        }

        if !state.partitions.is_empty() {
            let index = state.next_partition % state.partitions.len();
            state.next_partition += 1;
            if let Some((partition_id, partition)) = state.partitions.iter_mut().nth(index) {
                for item in batch.items() {
                    let record = Record::from_item(item, partition_id.clone(), partition.next_offset);
                    partition.next_offset += 1;
                    partition.push(Ok(record));
                }
                debug!(partition_id = %partition_id, items = batch.len(), "Delivered batch");
            }
        }

        state.appended.push(batch);
        Ok(())
    }

    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let mut state = self.state();
        state.cancel = Some(cancel);
        state.started = true;
        state.stopped = false;
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<PartitionStream>> {
        let mut state = self.state();
        let mut streams = Vec::with_capacity(state.partitions.len());
        for (partition_id, partition) in state.partitions.iter_mut() {
            let receiver = partition.receiver.take().ok_or_else(|| {
                ClientError::Transport(format!("partition {} is already being received", partition_id))
            })?;
            let records = futures::stream::unfold(receiver, |mut receiver| async move {
                receiver.recv().await.map(|item| (item, receiver))
            })
            .boxed();
            streams.push(PartitionStream {
                partition_id: partition_id.clone(),
                records,
            });
        }
        Ok(streams)
    }

    async fn checkpoint(&self, record: &Record) -> Result<()> {
        let mut state = self.state();
        if state.fail_checkpoints > 0 {
            state.fail_checkpoints -= 1;
            return Err(ClientError::Transport(
                "injected checkpoint failure".to_string(),
            ));
        }
        state
            .checkpoints
            .push((record.partition_id.clone(), record.offset));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.state().stopped = true;
        Ok(())
    }
}
