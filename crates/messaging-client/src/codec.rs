//! JSON codec for message payloads.
//!
//! A message on the wire is a UTF-8 JSON body plus a `MessageName` property
//! used for routing. The name defaults to the payload's unqualified type name
//! (`OrderPlaced` for `my_app::events::OrderPlaced`) unless an explicit name is
//! supplied.

use crate::batch::BatchItem;
use crate::error::{ClientError, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Record property carrying the routing name.
pub const MESSAGE_NAME_PROPERTY: &str = "MessageName";

/// Content type of every encoded body.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Unqualified type name of `T`, used as the default message name.
///
/// Module path and generic arguments are stripped:
/// `my_app::events::OrderPlaced` becomes `OrderPlaced`,
/// `my_app::Wrapper<u32>` becomes `Wrapper`.
pub fn message_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>().trim_start_matches('&');
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Wire properties for an encoded item.
pub fn wire_properties(item: &BatchItem) -> HashMap<String, String> {
    HashMap::from([(MESSAGE_NAME_PROPERTY.to_string(), item.name.clone())])
}

trait EncodePayload: Send {
    fn to_json(&self) -> serde_json::Result<Vec<u8>>;
}

impl<T: Serialize + Send> EncodePayload for T {
    fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// A payload queued for sending, with its message name resolved.
///
/// Heterogeneous payloads can be sent in one call:
///
/// ```ignore
/// producer.send_messages(vec![
///     OutgoingMessage::new(OrderPlaced { order_id: "42".into() }),
///     OutgoingMessage::named("CustomerUpdatedV2", customer),
/// ]).await?;
/// ```
pub struct OutgoingMessage {
    name: String,
    payload: Box<dyn EncodePayload>,
}

impl OutgoingMessage {
    /// Queue a payload under its type name.
    pub fn new<T>(payload: T) -> Self
    where
        T: Serialize + Send + 'static,
    {
        Self::named(message_name::<T>(), payload)
    }

    /// Queue a payload under an explicit message name.
    pub fn named<T>(name: impl Into<String>, payload: T) -> Self
    where
        T: Serialize + Send + 'static,
    {
        Self {
            name: name.into(),
            payload: Box::new(payload),
        }
    }

    /// Message name the payload will be routed by.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for OutgoingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingMessage")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Encodes outgoing payloads and decodes received bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec;

impl Codec {
    /// Serialize a payload into a batch item with a fresh message id.
    ///
    /// # Errors
    ///
    /// `Serialization` if the payload cannot be represented as JSON. The
    /// failure concerns this message only.
    pub fn encode(message: &OutgoingMessage) -> Result<BatchItem> {
        let body = message
            .payload
            .to_json()
            .map_err(|e| ClientError::Serialization(format!("{}: {}", message.name, e)))?;
        Ok(BatchItem::new(
            message.name.clone(),
            Uuid::new_v4(),
            Bytes::from(body),
        ))
    }

    /// Deserialize a JSON body into `T`.
    ///
    /// # Errors
    ///
    /// `Deserialization` naming the message when the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(name: &str, body: &[u8]) -> Result<T> {
        serde_json::from_slice(body).map_err(|e| ClientError::Deserialization {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}
