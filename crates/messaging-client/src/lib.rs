//! Messaging Client - typed producer and consumer for event-hub style logs
//!
//! This crate sends and receives JSON messages over a partitioned event log.
//! Messages carry a `MessageName` property that routes them to the handler
//! registered for that name on the consuming side.
//!
//! The log itself sits behind [`LogTransport`]. [`InMemoryTransport`] is a
//! complete in-process implementation; network transports implement the same
//! trait and are configured from a [`MessagingConfig`].
//!
//! # Examples
//!
//! ## Producer
//!
//! ```ignore
//! use messaging_client::{OutgoingMessage, Producer};
//!
//! let producer = Producer::builder()
//!     .transport(transport.clone())
//!     .build()?;
//!
//! // Fire-and-forget: append failures are logged, not returned.
//! producer.send_messages(vec![
//!     OutgoingMessage::new(OrderPlaced { order_id: "42".into() }),
//!     OutgoingMessage::named("OrderPlacedV2", order_v2),
//! ]).await?;
//! ```
//!
//! ## Consumer
//!
//! ```ignore
//! use messaging_client::{handler_fn, Consumer, Envelope};
//! use tokio_util::sync::CancellationToken;
//!
//! let consumer = Consumer::builder()
//!     .transport(transport)
//!     .register_default::<OrderPlaced, _>(handler_fn(|env: Envelope<OrderPlaced>| async move {
//!         println!("order {} ({})", env.message.order_id, env.message_id);
//!         Ok(())
//!     }))?
//!     .build()?;
//!
//! let cancel = CancellationToken::new();
//! let stats = consumer.consume(cancel.clone()).await?;
//! ```

pub mod batch;
pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod credential;
pub mod error;
pub mod memory;
pub mod producer;
pub mod registry;
pub mod transport;

pub use batch::{BatchBuilder, BatchItem, EventBatch};
pub use checkpoint::{CheckpointPolicy, PartitionCheckpointState, DEFAULT_CHECKPOINT_EVERY};
pub use codec::{message_name, Codec, OutgoingMessage, CONTENT_TYPE_JSON, MESSAGE_NAME_PROPERTY};
pub use config::{CheckpointConfig, CheckpointStore, EventHubResourceId, MessagingConfig};
pub use consumer::{
    CheckpointOutcome, ConsumeStats, Consumer, ConsumerBuilder, IgnoreReason, RecordOutcome,
};
pub use credential::{
    AccessToken, CredentialProvider, StaticTokenCredential, EVENTHUBS_SCOPE, MANAGEMENT_SCOPE,
};
pub use error::{ClientError, Result};
pub use memory::{InMemoryTransport, DEFAULT_MAX_BATCH_BYTES};
pub use producer::{Producer, ProducerBuilder, SendHandle, SendReport};
pub use registry::{handler_fn, Envelope, FnHandler, HandlerEntry, HandlerRegistry, MessageHandler};
pub use transport::{LogTransport, PartitionStream, Record};
