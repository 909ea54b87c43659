//! Object store trait, the durable storage abstraction
//!
//! Both the subscription registry and the metadata documents live in an
//! object store addressed by `(bucket, key)`. Every stored object carries an
//! opaque version token so writers can perform compare-and-swap updates.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

pub mod file;
pub mod memory;

pub use file::FileObjectStore;
pub use memory::MemoryObjectStore;

/// Core trait for object storage backends
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object; `Ok(None)` when it does not exist
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>>;

    /// Write an object, returning its new version token
    ///
    /// Fails with `PushError::Conflict` when `condition` does not hold.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        condition: PutCondition,
    ) -> Result<String>;

    /// Backend name (e.g., "memory", "file")
    fn name(&self) -> &str;
}

/// An object read from a store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    /// Raw object body
    pub body: Bytes,

    /// Version token at the time of the read
    pub version: String,

    /// Content type recorded at write time
    pub content_type: Option<String>,
}

impl StoredObject {
    /// Decode the body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(Into::into)
    }
}

/// Precondition for a write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PutCondition {
    /// Unconditional overwrite (last write wins)
    #[default]
    Always,
    /// Only create; fail if the object already exists
    IfAbsent,
    /// Only replace the object if its version still matches
    IfVersion(String),
}

impl PutCondition {
    /// Condition that holds only if the object is unchanged since `seen` was read
    pub fn unchanged_since(seen: Option<&StoredObject>) -> Self {
        match seen {
            Some(obj) => PutCondition::IfVersion(obj.version.clone()),
            None => PutCondition::IfAbsent,
        }
    }

    /// Check the condition against the current version of the object
    pub(crate) fn holds(&self, current: Option<&str>) -> bool {
        match (self, current) {
            (PutCondition::Always, _) => true,
            (PutCondition::IfAbsent, current) => current.is_none(),
            (PutCondition::IfVersion(expected), Some(current)) => expected == current,
            (PutCondition::IfVersion(_), None) => false,
        }
    }
}

pub(crate) fn new_version() -> String {
    uuid::Uuid::new_v4().to_string()
}
