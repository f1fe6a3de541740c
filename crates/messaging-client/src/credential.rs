//! Bearer-token credentials for setup code.
//!
//! The producer and consumer never see credentials; a concrete
//! [`LogTransport`](crate::transport::LogTransport) asks a
//! [`CredentialProvider`] for a token when it connects.

use crate::error::{ClientError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

/// Scope for Azure resource management calls.
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// Scope for Event Hubs data-plane access.
pub const EVENTHUBS_SCOPE: &str = "https://eventhubs.azure.net/.default";

/// A bearer token and its expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_on,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_on <= Utc::now()
    }
}

// Keep tokens out of logs.
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Source of bearer tokens for a scope.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_token(&self, scope: &str) -> Result<AccessToken>;
}

/// Hands out one fixed token for every scope until it expires.
#[derive(Debug, Clone)]
pub struct StaticTokenCredential {
    token: AccessToken,
}

impl StaticTokenCredential {
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        if scope.trim().is_empty() {
            return Err(ClientError::Credential("scope must not be empty".to_string()));
        }
        if self.token.is_expired() {
            return Err(ClientError::Credential(format!(
                "token expired at {}",
                self.token.expires_on
            )));
        }
        Ok(self.token.clone())
    }
}
