//! Document fetcher
//!
//! Metadata documents are read from the local store when they come from the
//! merge bucket. Objects in any other bucket belong to a foreign owner and
//! are read through a store scoped to temporarily assumed credentials.

use crate::error::{PushError, Result};
use crate::event::StorageOrigin;
use crate::store::ObjectStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A fetched metadata document
pub type Document = serde_json::Value;

/// Short-lived credentials returned by a role assumption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemporaryCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

impl TemporaryCredentials {
    /// True once `expiration` has passed; no expiry never expires
    pub fn is_expired(&self) -> bool {
        self.expiration.is_some_and(|exp| exp <= Utc::now())
    }
}

/// Capability: assume a role and return scoped credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn assume_role(&self, role: &str, session_name: &str) -> Result<TemporaryCredentials>;
}

/// Capability: open an object store acting with the given credentials
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, credentials: &TemporaryCredentials) -> Result<Arc<dyn ObjectStore>>;
}

/// Credential provider returning a fixed set of credentials
///
/// For deployments where the role is assumed outside the process.
pub struct StaticCredentials {
    credentials: TemporaryCredentials,
}

impl StaticCredentials {
    pub fn new(credentials: TemporaryCredentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn assume_role(&self, role: &str, session_name: &str) -> Result<TemporaryCredentials> {
        tracing::debug!(role, session = session_name, "Using static credentials");
        Ok(self.credentials.clone())
    }
}

/// Connector that hands out one pre-built store regardless of credentials
pub struct SharedStoreConnector {
    store: Arc<dyn ObjectStore>,
}

impl SharedStoreConnector {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StoreConnector for SharedStoreConnector {
    async fn connect(&self, _credentials: &TemporaryCredentials) -> Result<Arc<dyn ObjectStore>> {
        Ok(self.store.clone())
    }
}

/// Resolves documents by origin
pub struct DocumentFetcher {
    local: Arc<dyn ObjectStore>,
    credentials: Arc<dyn CredentialProvider>,
    connector: Arc<dyn StoreConnector>,
    merge_bucket: String,
    role: String,
    session_name: String,
}

impl DocumentFetcher {
    /// Objects in `merge_bucket` are read from `local`; all others through
    /// credentials assumed for `role` as `session_name`
    pub fn new(
        local: Arc<dyn ObjectStore>,
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn StoreConnector>,
        merge_bucket: impl Into<String>,
        role: impl Into<String>,
        session_name: impl Into<String>,
    ) -> Self {
        Self {
            local,
            credentials,
            connector,
            merge_bucket: merge_bucket.into(),
            role: role.into(),
            session_name: session_name.into(),
        }
    }

    /// Origin of objects in `bucket`
    pub fn origin(&self, bucket: &str) -> StorageOrigin {
        StorageOrigin::of(bucket, &self.merge_bucket)
    }

    /// Fetch a document; `Ok(None)` means no document is available
    ///
    /// Local store failures are errors. Elevated fetch failures of any kind
    /// degrade to `Ok(None)`.
    pub async fn fetch(&self, bucket: &str, key: &str) -> Result<Option<Document>> {
        match self.origin(bucket) {
            StorageOrigin::Trusted => self.fetch_local(bucket, key).await,
            StorageOrigin::Foreign => Ok(self.fetch_elevated(bucket, key).await),
        }
    }

    async fn fetch_local(&self, bucket: &str, key: &str) -> Result<Option<Document>> {
        let object = self.local.get(bucket, key).await?;
        match object {
            Some(obj) => Ok(Some(obj.json()?)),
            None => {
                tracing::debug!(bucket, key, "Document not found");
                Ok(None)
            }
        }
    }

    /// Fetch from a foreign bucket under assumed credentials
    pub async fn fetch_elevated(&self, bucket: &str, key: &str) -> Option<Document> {
        tracing::debug!(bucket, key, role = %self.role, "Fetching with elevated credentials");
        match self.try_fetch_elevated(bucket, key).await {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(bucket, key, error = %e, "Elevated fetch failed");
                None
            }
        }
    }

    async fn try_fetch_elevated(&self, bucket: &str, key: &str) -> Result<Option<Document>> {
        let credentials = self
            .credentials
            .assume_role(&self.role, &self.session_name)
            .await?;
        if credentials.is_expired() {
            return Err(PushError::Credentials(format!(
                "credentials for role '{}' already expired",
                self.role
            )));
        }

        let store = self.connector.connect(&credentials).await?;
        match store.get(bucket, key).await? {
            Some(obj) => Ok(Some(obj.json()?)),
            None => Ok(None),
        }
    }
}
