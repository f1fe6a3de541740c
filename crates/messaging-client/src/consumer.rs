//! Consumer API: per-partition receive, dispatch and checkpoint.
//!
//! ## Architecture
//!
//! ```text
//! LogTransport::receive ─┬─→ partition "0" task ─┐
//!                        ├─→ partition "1" task ─┼─→ process_record
//!                        └─→ partition "n" task ─┘        │
//!                                                         ├─→ HandlerRegistry::resolve
//!                                                         ├─→ HandlerEntry::decode / dispatch
//!                                                         └─→ LogTransport::checkpoint (every N)
//! ```
//!
//! ## Record Processing
//!
//! For each received record:
//! 1. Cancelled? Drop the record, start no new work.
//! 2. No `MessageName`, or no handler for it? Ignore. Consumers routinely see
//!    message types they are not interested in.
//! 3. Decode with the registered type and invoke the handler. Decode failures
//!    drop the record; handler errors and panics are logged and the record is
//!    skipped. Neither ends the partition loop.
//! 4. Count the record. When the checkpoint policy says so, commit a
//!    checkpoint and reset the count.
//!
//! Receive errors reported by the transport are logged and the partition loop
//! keeps going. A slow handler only delays its own partition.

use crate::checkpoint::{CheckpointPolicy, PartitionCheckpointState};
use crate::error::{ClientError, Result};
use crate::registry::{DispatchContext, HandlerRegistry, MessageHandler};
use crate::transport::{LogTransport, PartitionStream, Record};
use futures::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Why a record was ignored without being dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Record has no `MessageName` property.
    MissingMessageName,
    /// No handler is registered for this name.
    Unregistered(String),
}

/// Result of the checkpoint step after a dispatched record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// Policy threshold not reached.
    NotDue,
    /// Checkpoint written; the partition counter is back at zero.
    Committed,
    /// The transport rejected the checkpoint; the counter is kept so the next
    /// record retries.
    Failed,
}

/// What happened to one received record.
#[derive(Debug)]
pub enum RecordOutcome {
    /// Cancellation was requested before processing started.
    Cancelled,
    /// Not routed to any handler.
    Ignored(IgnoreReason),
    /// Routed but undecodable (bad body or message id); not counted.
    Dropped(ClientError),
    /// Handler completed successfully.
    Handled(CheckpointOutcome),
    /// Handler returned an error or panicked; the record is skipped but counted.
    HandlerFailed(CheckpointOutcome),
}

/// Counters describing a finished `consume` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    pub partitions: usize,
    pub handled: u64,
    pub handler_failures: u64,
    pub ignored: u64,
    pub dropped: u64,
    pub cancelled: u64,
    pub checkpoints: u64,
    pub checkpoint_failures: u64,
    pub receive_errors: u64,
}

impl ConsumeStats {
    fn observe(&mut self, outcome: &RecordOutcome) {
        let checkpoint = match outcome {
            RecordOutcome::Cancelled => {
                self.cancelled += 1;
                return;
            }
            RecordOutcome::Ignored(_) => {
                self.ignored += 1;
                return;
            }
            RecordOutcome::Dropped(_) => {
                self.dropped += 1;
                return;
            }
            RecordOutcome::Handled(checkpoint) => {
                self.handled += 1;
                checkpoint
            }
            RecordOutcome::HandlerFailed(checkpoint) => {
                self.handler_failures += 1;
                checkpoint
            }
        };

        match checkpoint {
            CheckpointOutcome::NotDue => {}
            CheckpointOutcome::Committed => self.checkpoints += 1,
            CheckpointOutcome::Failed => self.checkpoint_failures += 1,
        }
    }

    fn merge(&mut self, other: ConsumeStats) {
        self.partitions += other.partitions;
        self.handled += other.handled;
        self.handler_failures += other.handler_failures;
        self.ignored += other.ignored;
        self.dropped += other.dropped;
        self.cancelled += other.cancelled;
        self.checkpoints += other.checkpoints;
        self.checkpoint_failures += other.checkpoint_failures;
        self.receive_errors += other.receive_errors;
    }
}

struct ConsumerInner {
    transport: Arc<dyn LogTransport>,
    registry: HandlerRegistry,
    checkpoint_policy: CheckpointPolicy,
}

/// Routes received records to registered handlers and checkpoints progress.
///
/// Cloning is cheap; clones share the registry and transport.
///
/// ## Example
///
/// ```ignore
/// use messaging_client::{handler_fn, Consumer, Envelope};
/// use tokio_util::sync::CancellationToken;
///
/// let consumer = Consumer::builder()
///     .transport(transport)
///     .register::<OrderPlacedV1, _>("OrderPlaced", handler_fn(|env: Envelope<OrderPlacedV1>| async move {
///         println!("order {}", env.message.order_id);
///         Ok(())
///     }))?
///     .build()?;
///
/// let cancel = CancellationToken::new();
/// consumer.consume(cancel.clone()).await?;
/// ```
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

/// Builder for constructing a Consumer.
pub struct ConsumerBuilder {
    transport: Option<Arc<dyn LogTransport>>,
    registry: HandlerRegistry,
    checkpoint_policy: CheckpointPolicy,
}

impl ConsumerBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            registry: HandlerRegistry::new(),
            checkpoint_policy: CheckpointPolicy::default(),
        }
    }

    /// Set the log transport records are received from.
    pub fn transport(mut self, transport: Arc<dyn LogTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the checkpoint cadence (default: every 50 records).
    pub fn checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.checkpoint_policy = policy;
        self
    }

    /// Register a handler under an explicit message name.
    ///
    /// # Errors
    ///
    /// `DuplicateHandler` if the name is already registered.
    pub fn register<T, H>(mut self, name: impl Into<String>, handler: H) -> Result<Self>
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T> + 'static,
    {
        self.registry.register::<T, H>(name, handler)?;
        Ok(self)
    }

    /// Register a handler under the type name of `T`.
    pub fn register_default<T, H>(mut self, handler: H) -> Result<Self>
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T> + 'static,
    {
        self.registry.register_default::<T, H>(handler)?;
        Ok(self)
    }

    /// Use a registry filled elsewhere, replacing any registrations so far.
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Build the Consumer.
    ///
    /// # Errors
    ///
    /// `ConfigError` if no transport was set or the checkpoint count is zero.
    pub fn build(self) -> Result<Consumer> {
        let transport = self
            .transport
            .ok_or_else(|| ClientError::ConfigError("transport is required".to_string()))?;

        if self.checkpoint_policy.every_events == 0 {
            return Err(ClientError::ConfigError(
                "checkpoint every_events must be at least 1".to_string(),
            ));
        }

        info!(
            handlers = self.registry.len(),
            checkpoint_every = self.checkpoint_policy.every_events,
            "Consumer initialized"
        );

        Ok(Consumer {
            inner: Arc::new(ConsumerInner {
                transport,
                registry: self.registry,
                checkpoint_policy: self.checkpoint_policy,
            }),
        })
    }
}

impl Default for ConsumerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Consumer {
    pub fn builder() -> ConsumerBuilder {
        ConsumerBuilder::new()
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    pub fn checkpoint_policy(&self) -> &CheckpointPolicy {
        &self.inner.checkpoint_policy
    }

    /// Consume all partitions until `cancel` fires or every stream ends.
    ///
    /// Starts the transport, runs one task per partition stream and stops the
    /// transport on the way out. Handler, decode, receive and checkpoint
    /// failures never surface here.
    ///
    /// # Errors
    ///
    /// Only failures to start the transport or open the partition streams.
    pub async fn consume(&self, cancel: CancellationToken) -> Result<ConsumeStats> {
        let transport = &self.inner.transport;
        transport.start(cancel.clone()).await?;

        let streams = match transport.receive().await {
            Ok(streams) => streams,
            Err(e) => {
                if let Err(stop_err) = transport.stop().await {
                    warn!(error = %stop_err, "Failed to stop transport after receive error");
                }
                return Err(e);
            }
        };

        info!(
            partitions = streams.len(),
            handlers = self.inner.registry.len(),
            "Consumer started"
        );

        let mut tasks = JoinSet::new();
        for stream in streams {
            let consumer = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { consumer.run_partition(stream, cancel).await });
        }

        let mut stats = ConsumeStats::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(partition_stats) => stats.merge(partition_stats),
                Err(e) => error!(error = %e, "Partition task failed"),
            }
        }

        if let Err(e) = transport.stop().await {
            warn!(error = %e, "Failed to stop transport");
        }

        info!(
            handled = stats.handled,
            handler_failures = stats.handler_failures,
            checkpoints = stats.checkpoints,
            "Consumer stopped"
        );
        Ok(stats)
    }

    /// Receive loop for one partition.
    async fn run_partition(&self, stream: PartitionStream, cancel: CancellationToken) -> ConsumeStats {
        let PartitionStream {
            partition_id,
            mut records,
        } = stream;
        let mut state = PartitionCheckpointState::new(partition_id.clone());
        let mut stats = ConsumeStats {
            partitions: 1,
            ..Default::default()
        };

        debug!(partition_id = %partition_id, "Partition receive loop started");

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = records.next() => next,
            };

            match next {
                None => {
                    debug!(partition_id = %partition_id, "Partition stream ended");
                    break;
                }
                Some(Err(e)) => {
                    stats.receive_errors += 1;
                    warn!(partition_id = %partition_id, error = %e, "Receive failed, continuing");
                }
                Some(Ok(record)) => {
                    let outcome = self.process_record(&mut state, record, &cancel).await;
                    stats.observe(&outcome);
                }
            }
        }

        debug!(
            partition_id = %partition_id,
            pending_events = state.events_since_last_checkpoint(),
            "Partition receive loop stopped"
        );
        stats
    }

    /// Process a single record of the partition tracked by `state`.
    ///
    /// This is one iteration of the partition loop; [`Consumer::consume`] calls
    /// it for every received record.
    pub async fn process_record(
        &self,
        state: &mut PartitionCheckpointState,
        record: Record,
        cancel: &CancellationToken,
    ) -> RecordOutcome {
        if cancel.is_cancelled() {
            trace!(partition_id = state.partition_id(), "Cancelled, discarding record");
            return RecordOutcome::Cancelled;
        }

        let Some(name) = record.message_name() else {
            debug!(
                partition_id = state.partition_id(),
                offset = record.offset,
                "Record has no message name, ignoring"
            );
            return RecordOutcome::Ignored(IgnoreReason::MissingMessageName);
        };

        let Some(entry) = self.inner.registry.resolve(name) else {
            debug!(
                partition_id = state.partition_id(),
                message_name = name,
                "No handler registered, ignoring"
            );
            return RecordOutcome::Ignored(IgnoreReason::Unregistered(name.to_string()));
        };

        let message_id = match Uuid::parse_str(&record.message_id) {
            Ok(id) => id,
            Err(_) => {
                let err = ClientError::InvalidMessageId(record.message_id.clone());
                error!(
                    partition_id = state.partition_id(),
                    message_name = name,
                    error = %err,
                    "Dropping record"
                );
                return RecordOutcome::Dropped(err);
            }
        };

        let payload = match entry.decode(name, &record.body) {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    partition_id = state.partition_id(),
                    message_name = name,
                    message_id = %message_id,
                    error = %e,
                    "Dropping record"
                );
                return RecordOutcome::Dropped(e);
            }
        };

        let ctx = DispatchContext {
            message_id,
            sent_at: record.enqueued_time,
            partition_id: record.partition_id.clone(),
        };

        let handler_ok = match AssertUnwindSafe(entry.dispatch(payload, ctx))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(
                    partition_id = state.partition_id(),
                    message_name = name,
                    message_id = %message_id,
                    error = %e,
                    "Exception handling message, skipping"
                );
                false
            }
            Err(_) => {
                error!(
                    partition_id = state.partition_id(),
                    message_name = name,
                    message_id = %message_id,
                    "Handler panicked, skipping"
                );
                false
            }
        };

        state.record_event();
        let checkpoint = self.maybe_checkpoint(state, &record).await;

        if handler_ok {
            RecordOutcome::Handled(checkpoint)
        } else {
            RecordOutcome::HandlerFailed(checkpoint)
        }
    }

    async fn maybe_checkpoint(
        &self,
        state: &mut PartitionCheckpointState,
        record: &Record,
    ) -> CheckpointOutcome {
        if !state.should_checkpoint(&self.inner.checkpoint_policy) {
            return CheckpointOutcome::NotDue;
        }

        match self.inner.transport.checkpoint(record).await {
            Ok(()) => {
                info!(
                    partition_id = state.partition_id(),
                    offset = record.offset,
                    events = state.events_since_last_checkpoint(),
                    "Checkpoint committed"
                );
                state.mark_committed();
                CheckpointOutcome::Committed
            }
            Err(e) => {
                warn!(
                    partition_id = state.partition_id(),
                    offset = record.offset,
                    error = %e,
                    "Checkpoint failed, retrying on next record"
                );
                CheckpointOutcome::Failed
            }
        }
    }
}
