//! Connection settings for building a transport.
//!
//! Nothing in the send or consume path reads this; setup code resolves a
//! [`MessagingConfig`] into an endpoint, a checkpoint store location and a
//! [`CheckpointPolicy`], then constructs the concrete transport.
//!
//! A config comes from a TOML file:
//!
//! ```toml
//! eventhub_id = "/subscriptions/<s>/resourceGroups/<g>/providers/Microsoft.EventHub/namespaces/orders-ns/eventhubs/orders"
//! consumer_group = "billing"
//! storage_container_url = "https://acct.blob.core.windows.net/checkpoints"
//!
//! [checkpoint]
//! every_events = 50
//! max_interval_ms = 30000
//! ```
//!
//! or from `EVENTHUB_*` environment variables (see [`MessagingConfig::from_env`]).
//! Exactly one of `connection_string`, `fully_qualified_namespace` and
//! `eventhub_id` must be set.

use crate::checkpoint::{CheckpointPolicy, DEFAULT_CHECKPOINT_EVERY};
use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Host suffix of an Event Hubs namespace.
pub const NAMESPACE_HOST_SUFFIX: &str = ".servicebus.windows.net";

/// Consumer group every event hub has.
pub const DEFAULT_CONSUMER_GROUP: &str = "$Default";

fn default_consumer_group() -> String {
    DEFAULT_CONSUMER_GROUP.to_string()
}

fn default_every_events() -> u32 {
    DEFAULT_CHECKPOINT_EVERY
}

/// Checkpoint cadence as written in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Records between checkpoints. Defaults to 50.
    #[serde(default = "default_every_events")]
    pub every_events: u32,

    /// Optional time bound between checkpoints, in milliseconds.
    #[serde(default)]
    pub max_interval_ms: Option<u64>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            every_events: DEFAULT_CHECKPOINT_EVERY,
            max_interval_ms: None,
        }
    }
}

impl CheckpointConfig {
    pub fn policy(&self) -> CheckpointPolicy {
        let policy = CheckpointPolicy::every(self.every_events);
        match self.max_interval_ms {
            Some(ms) => policy.with_max_interval(Duration::from_millis(ms)),
            None => policy,
        }
    }
}

/// Where consumer checkpoints are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointStore {
    /// Blob container addressed by URL, accessed with a token credential.
    ContainerUrl(String),
    /// Storage account connection string plus container name.
    ConnectionString {
        connection_string: String,
        container: String,
    },
}

/// Settings for connecting to one event hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// `Endpoint=sb://...;SharedAccessKeyName=...;SharedAccessKey=...[;EntityPath=...]`
    #[serde(default)]
    pub connection_string: Option<String>,

    /// `<namespace>.servicebus.windows.net`, used with a token credential.
    #[serde(default)]
    pub fully_qualified_namespace: Option<String>,

    /// Azure resource id of the event hub.
    #[serde(default)]
    pub eventhub_id: Option<String>,

    /// Event hub name. Required with `fully_qualified_namespace`, optional with
    /// a connection string carrying `EntityPath`.
    #[serde(default)]
    pub event_hub_name: Option<String>,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    #[serde(default)]
    pub storage_connection_string: Option<String>,

    #[serde(default)]
    pub storage_container_url: Option<String>,

    #[serde(default)]
    pub storage_container: Option<String>,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            fully_qualified_namespace: None,
            eventhub_id: None,
            event_hub_name: None,
            consumer_group: default_consumer_group(),
            storage_connection_string: None,
            storage_container_url: None,
            storage_container: None,
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl MessagingConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: MessagingConfig = toml::from_str(contents)
            .map_err(|e| ClientError::ConfigError(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ClientError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ClientError::Serialization(e.to_string()))
    }

    /// Read and validate `EVENTHUB_*` environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `EVENTHUB_CONNECTION_STRING` | `connection_string` |
    /// | `EVENTHUB_NAMESPACE` | `fully_qualified_namespace` |
    /// | `EVENTHUB_ID` | `eventhub_id` |
    /// | `EVENTHUB_NAME` | `event_hub_name` |
    /// | `EVENTHUB_CONSUMER_GROUP` | `consumer_group` |
    /// | `EVENTHUB_STORAGE_CONNECTION_STRING` | `storage_connection_string` |
    /// | `EVENTHUB_STORAGE_CONTAINER_URL` | `storage_container_url` |
    /// | `EVENTHUB_STORAGE_CONTAINER` | `storage_container` |
    /// | `EVENTHUB_CHECKPOINT_EVERY` | `checkpoint.every_events` |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`MessagingConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = MessagingConfig {
            connection_string: get("EVENTHUB_CONNECTION_STRING"),
            fully_qualified_namespace: get("EVENTHUB_NAMESPACE"),
            eventhub_id: get("EVENTHUB_ID"),
            event_hub_name: get("EVENTHUB_NAME"),
            storage_connection_string: get("EVENTHUB_STORAGE_CONNECTION_STRING"),
            storage_container_url: get("EVENTHUB_STORAGE_CONTAINER_URL"),
            storage_container: get("EVENTHUB_STORAGE_CONTAINER"),
            ..Default::default()
        };

        if let Some(group) = get("EVENTHUB_CONSUMER_GROUP") {
            config.consumer_group = group;
        }
        if let Some(every) = get("EVENTHUB_CHECKPOINT_EVERY") {
            config.checkpoint.every_events = every.trim().parse().map_err(|_| {
                ClientError::ConfigError(format!(
                    "EVENTHUB_CHECKPOINT_EVERY must be a positive integer, got '{}'",
                    every
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the settings describe exactly one reachable event hub.
    ///
    /// # Errors
    ///
    /// `ConfigError` for a missing or ambiguous connection source, an
    /// unresolvable event hub name, an empty consumer group or a zero
    /// checkpoint count. `InvalidResourceId` for a malformed `eventhub_id`.
    pub fn validate(&self) -> Result<()> {
        let sources = [
            self.connection_string.is_some(),
            self.fully_qualified_namespace.is_some(),
            self.eventhub_id.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();

        match sources {
            0 => {
                return Err(ClientError::ConfigError(
                    "one of connection_string, fully_qualified_namespace or eventhub_id is required"
                        .to_string(),
                ))
            }
            1 => {}
            _ => {
                return Err(ClientError::ConfigError(
                    "only one of connection_string, fully_qualified_namespace or eventhub_id may be set"
                        .to_string(),
                ))
            }
        }

        if self.consumer_group.trim().is_empty() {
            return Err(ClientError::ConfigError(
                "consumer_group must not be empty".to_string(),
            ));
        }

        if self.checkpoint.every_events == 0 {
            return Err(ClientError::ConfigError(
                "checkpoint.every_events must be at least 1".to_string(),
            ));
        }

        self.resolve_endpoint().map(|_| ())
    }

    /// Resolve `(fully_qualified_namespace, event_hub_name)`.
    pub fn resolve_endpoint(&self) -> Result<(String, String)> {
        if let Some(id) = &self.eventhub_id {
            let id = EventHubResourceId::parse(id)?;
            return Ok((id.fully_qualified_namespace(), id.event_hub_name));
        }

        if let Some(namespace) = &self.fully_qualified_namespace {
            let name = self.event_hub_name.clone().ok_or_else(|| {
                ClientError::ConfigError(
                    "event_hub_name is required with fully_qualified_namespace".to_string(),
                )
            })?;
            return Ok((namespace.clone(), name));
        }

        if let Some(connection_string) = &self.connection_string {
            let parts = ConnectionStringParts::parse(connection_string)?;
            let name = self
                .event_hub_name
                .clone()
                .or(parts.entity_path)
                .ok_or_else(|| {
                    ClientError::ConfigError(
                        "event_hub_name is required when the connection string has no EntityPath"
                            .to_string(),
                    )
                })?;
            return Ok((parts.namespace, name));
        }

        Err(ClientError::ConfigError(
            "no connection source configured".to_string(),
        ))
    }

    /// Resolve where checkpoints are stored. Only consumers need this.
    pub fn checkpoint_store(&self) -> Result<CheckpointStore> {
        match (
            &self.storage_container_url,
            &self.storage_connection_string,
            &self.storage_container,
        ) {
            (Some(_), Some(_), _) => Err(ClientError::ConfigError(
                "only one of storage_container_url or storage_connection_string may be set"
                    .to_string(),
            )),
            (Some(url), None, _) => Ok(CheckpointStore::ContainerUrl(url.clone())),
            (None, Some(connection_string), Some(container)) => {
                Ok(CheckpointStore::ConnectionString {
                    connection_string: connection_string.clone(),
                    container: container.clone(),
                })
            }
            (None, Some(_), None) => Err(ClientError::ConfigError(
                "storage_container is required with storage_connection_string".to_string(),
            )),
            (None, None, _) => Err(ClientError::ConfigError(
                "storage_container_url or storage_connection_string is required for checkpointing"
                    .to_string(),
            )),
        }
    }

    pub fn checkpoint_policy(&self) -> CheckpointPolicy {
        self.checkpoint.policy()
    }
}

/// The pieces of a namespace connection string the client needs.
struct ConnectionStringParts {
    namespace: String,
    entity_path: Option<String>,
}

impl ConnectionStringParts {
    fn parse(connection_string: &str) -> Result<Self> {
        let mut endpoint = None;
        let mut entity_path = None;

        for pair in connection_string.split(';').filter(|p| !p.trim().is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key.trim() {
                k if k.eq_ignore_ascii_case("Endpoint") => endpoint = Some(value.trim()),
                k if k.eq_ignore_ascii_case("EntityPath") => {
                    entity_path = Some(value.trim().to_string())
                }
                _ => {}
            }
        }

        let endpoint = endpoint.ok_or_else(|| {
            ClientError::ConfigError("connection string has no Endpoint".to_string())
        })?;
        let namespace = endpoint
            .trim_start_matches("sb://")
            .trim_end_matches('/')
            .to_string();
        if namespace.is_empty() {
            return Err(ClientError::ConfigError(
                "connection string Endpoint is empty".to_string(),
            ));
        }

        Ok(Self {
            namespace,
            entity_path: entity_path.filter(|p| !p.is_empty()),
        })
    }
}

/// Parts of an event hub's Azure resource id.
///
/// The id is the one shown in the portal's JSON view:
/// `/subscriptions/<s>/resourceGroups/<g>/providers/Microsoft.EventHub/namespaces/<n>/eventhubs/<h>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHubResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    pub namespace: String,
    pub event_hub_name: String,
}

impl EventHubResourceId {
    /// Extract the identifying segments of a resource id.
    ///
    /// # Errors
    ///
    /// `InvalidResourceId` naming the first missing segment.
    pub fn parse(id: &str) -> Result<Self> {
        let subscription_id = segment_after(id, "subscriptions/")
            .ok_or_else(|| ClientError::InvalidResourceId("missing subscription id".to_string()))?;
        let resource_group = segment_after(id, "resourceGroups/")
            .ok_or_else(|| ClientError::InvalidResourceId("missing resource group".to_string()))?;
        let namespace = segment_after(id, "namespaces/")
            .ok_or_else(|| ClientError::InvalidResourceId("missing namespace".to_string()))?;
        let event_hub_name = segment_after(id, "eventhubs/")
            .ok_or_else(|| ClientError::InvalidResourceId("missing eventhub name".to_string()))?;

        Ok(Self {
            subscription_id: subscription_id.to_string(),
            resource_group: resource_group.to_string(),
            namespace: namespace.to_string(),
            event_hub_name: event_hub_name.to_string(),
        })
    }

    /// `<namespace>.servicebus.windows.net`
    pub fn fully_qualified_namespace(&self) -> String {
        format!("{}{}", self.namespace, NAMESPACE_HOST_SUFFIX)
    }
}

/// The path segment following `key`, if present and non-empty.
fn segment_after<'a>(id: &'a str, key: &str) -> Option<&'a str> {
    let start = id.find(key)? + key.len();
    let rest = &id[start..];
    let segment = rest.split('/').next().unwrap_or(rest);
    (!segment.is_empty()).then_some(segment)
}
