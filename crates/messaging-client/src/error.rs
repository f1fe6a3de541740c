//! Error types for messaging client operations.
//!
//! Errors fall into the classes the producer and consumer treat differently:
//!
//! - **Fatal, surfaced to the caller**: `MessageTooLarge`, `DuplicateHandler`,
//!   `ConfigError`, `InvalidResourceId`
//! - **Per-message, logged and skipped**: `Serialization`, `Deserialization`,
//!   `InvalidMessageId`
//! - **Transient, logged and not retried here**: `Transport`
//!
//! ## Examples
//!
//! ```ignore
//! use messaging_client::{ClientError, OutgoingMessage};
//!
//! match producer.send_messages(vec![OutgoingMessage::new(order)]).await {
//!     Ok(handle) => drop(handle), // fire-and-forget
//!     Err(ClientError::MessageTooLarge { name, size, max }) => {
//!         eprintln!("'{}' is {} bytes, batches hold at most {}", name, size, max);
//!     }
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use thiserror::Error;

/// Convenience type alias for `Result<T, ClientError>`.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Error type for producer, consumer and setup operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A single encoded message does not fit into an empty batch.
    ///
    /// This is a caller bug, not an infrastructure failure: the message can
    /// never be sent as-is. The whole `send_messages` call is aborted and no
    /// batch is sent.
    ///
    /// ## Resolution
    /// - Split the payload into smaller messages
    /// - Store large blobs elsewhere and send a reference
    #[error("Message '{name}' is too large to send ({size} bytes, batch capacity {max} bytes)")]
    MessageTooLarge {
        name: String,
        size: usize,
        max: usize,
    },

    /// A handler is already registered for this message name.
    ///
    /// Raised at setup time. Each message name routes to exactly one handler.
    #[error("A handler for message '{0}' is already registered")]
    DuplicateHandler(String),

    /// Payload could not be serialized to JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Record body could not be decoded into the registered message type.
    #[error("Failed to decode message '{name}': {reason}")]
    Deserialization { name: String, reason: String },

    /// Record carried a message id that is not a UUID.
    #[error("Invalid message id '{0}'")]
    InvalidMessageId(String),

    /// Event hub resource id is missing one of its path elements.
    #[error("Invalid eventhub id, {0}")]
    InvalidResourceId(String),

    /// Invalid client configuration.
    ///
    /// ## Causes
    /// - No connection source (connection string, namespace or eventhub id)
    /// - More than one connection source
    /// - Checkpoint count of zero
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The log transport failed to append, receive or checkpoint.
    ///
    /// Transports are expected to retry transient failures internally; by the
    /// time this error reaches the client, it is logged and dropped.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Credential acquisition failed.
    #[error("Credential error: {0}")]
    Credential(String),

    /// Internal error that shouldn't normally occur.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Whether a retry at the transport layer could succeed.
    ///
    /// Only transport failures are transient. Everything else describes a
    /// message or a setup that will fail the same way again.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}
