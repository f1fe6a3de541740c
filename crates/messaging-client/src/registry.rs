//! Handler registry: message name → decode type + handler.
//!
//! Each registered handler is stored as a type-erased [`HandlerEntry`] that
//! owns two halves bound to the same message type `T`:
//!
//! - a decode function producing `Box<dyn Any + Send>` holding a `T`
//! - a dispatch closure that downcasts back to `T` and calls the typed handler
//!
//! Because both halves come from the same registration, the downcast cannot
//! fail for payloads produced by the entry's own decode function.
//!
//! The registry is owned by one consumer and is filled before consumption
//! starts. It is read-only afterwards and needs no locking.

use crate::codec::{message_name, Codec};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// A decoded message plus its identifying metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    /// Id assigned by the producer
    pub message_id: Uuid,
    /// When the log accepted the message
    pub sent_at: DateTime<Utc>,
    /// Partition the message was received from
    pub partition_id: String,
    /// Decoded payload
    pub message: T,
}

/// Application callback for one message type.
///
/// Errors are logged by the consumer and the message is skipped; they never
/// stop consumption.
#[async_trait]
pub trait MessageHandler<T: Send + 'static>: Send + Sync {
    async fn handle(&self, envelope: Envelope<T>) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

/// Wrap an async closure as a handler.
///
/// ```ignore
/// registry.register("OrderPlaced", handler_fn(|env: Envelope<OrderPlacedV1>| async move {
///     println!("order {}", env.message.order_id);
///     Ok(())
/// }))?;
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler(f)
}

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for FnHandler<F>
where
    T: Send + 'static,
    F: Fn(Envelope<T>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, envelope: Envelope<T>) -> anyhow::Result<()> {
        (self.0)(envelope).await
    }
}

/// Record metadata handed to a dispatch function next to the payload.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub message_id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub partition_id: String,
}

type DecodeFn = fn(&str, &[u8]) -> Result<Box<dyn Any + Send>>;

type DispatchFn = Box<
    dyn Fn(Box<dyn Any + Send>, DispatchContext) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

/// Type-erased handler registration.
pub struct HandlerEntry {
    message_type: &'static str,
    decode: DecodeFn,
    dispatch: DispatchFn,
}

impl HandlerEntry {
    fn new<T, H>(handler: H) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T> + 'static,
    {
        let handler = Arc::new(handler);
        let dispatch: DispatchFn = Box::new(
            move |payload: Box<dyn Any + Send>,
                  ctx: DispatchContext|
                  -> BoxFuture<'static, anyhow::Result<()>> {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let message = payload.downcast::<T>().map_err(|_| {
                        anyhow::anyhow!("payload is not a {}", std::any::type_name::<T>())
                    })?;
                    handler
                        .handle(Envelope {
                            message_id: ctx.message_id,
                            sent_at: ctx.sent_at,
                            partition_id: ctx.partition_id,
                            message: *message,
                        })
                        .await
                })
            },
        );

        Self {
            message_type: message_name::<T>(),
            decode: decode_as::<T>,
            dispatch,
        }
    }

    /// Unqualified name of the type this entry decodes into.
    pub fn message_type(&self) -> &'static str {
        self.message_type
    }

    /// Decode a body into this entry's message type.
    pub fn decode(&self, name: &str, body: &[u8]) -> Result<Box<dyn Any + Send>> {
        (self.decode)(name, body)
    }

    /// Invoke the handler with a payload produced by [`HandlerEntry::decode`].
    pub fn dispatch(
        &self,
        payload: Box<dyn Any + Send>,
        ctx: DispatchContext,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        (self.dispatch)(payload, ctx)
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("message_type", &self.message_type)
            .finish_non_exhaustive()
    }
}

fn decode_as<T>(name: &str, body: &[u8]) -> Result<Box<dyn Any + Send>>
where
    T: DeserializeOwned + Send + 'static,
{
    Codec::decode::<T>(name, body).map(|message| Box::new(message) as Box<dyn Any + Send>)
}

/// Message name → handler map, one handler per name.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for messages named `name`, decoded as `T`.
    ///
    /// # Errors
    ///
    /// `DuplicateHandler` if the name is already taken.
    pub fn register<T, H>(&mut self, name: impl Into<String>, handler: H) -> Result<&mut Self>
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T> + 'static,
    {
        match self.handlers.entry(name.into()) {
            Entry::Occupied(entry) => Err(ClientError::DuplicateHandler(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!(
                    message_name = entry.key().as_str(),
                    message_type = message_name::<T>(),
                    "Registered handler"
                );
                entry.insert(HandlerEntry::new::<T, H>(handler));
                Ok(self)
            }
        }
    }

    /// Register `handler` under the type name of `T`.
    pub fn register_default<T, H>(&mut self, handler: H) -> Result<&mut Self>
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T> + 'static,
    {
        self.register::<T, H>(message_name::<T>(), handler)
    }

    /// Look up the handler for a message name.
    ///
    /// Unknown names are not an error: the consumer simply ignores them.
    pub fn resolve(&self, name: &str) -> Option<&HandlerEntry> {
        self.handlers.get(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered message names, in no particular order.
    pub fn message_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}
