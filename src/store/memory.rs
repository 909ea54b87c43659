//! In-memory object store for testing and single-process use

use super::{new_version, ObjectStore, PutCondition, StoredObject};
use crate::error::{PushError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory object store
///
/// Objects are lost on drop. Conditional writes are checked and applied
/// under one write lock, so compare-and-swap is atomic.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience: store a JSON value unconditionally
    pub async fn put_json(&self, bucket: &str, key: &str, value: &serde_json::Value) -> Result<String> {
        let body = serde_json::to_vec(value)?;
        self.put(bucket, key, body.into(), "application/json", PutCondition::Always)
            .await
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>> {
        let objects = self.objects.read().await;
        Ok(objects.get(&(bucket.to_string(), key.to_string())).cloned())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        condition: PutCondition,
    ) -> Result<String> {
        let id = (bucket.to_string(), key.to_string());
        let mut objects = self.objects.write().await;

        let current = objects.get(&id).map(|o| o.version.as_str());
        if !condition.holds(current) {
            return Err(PushError::Conflict {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let version = new_version();
        objects.insert(
            id,
            StoredObject {
                body,
                version: version.clone(),
                content_type: Some(content_type.to_string()),
            },
        );

        tracing::debug!(bucket, key, version = %version, "Object stored");
        Ok(version)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryObjectStore::new();
        assert!(store.get("b", "k").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryObjectStore::new();
        let version = store
            .put("b", "k", Bytes::from_static(b"hello"), "text/plain", PutCondition::Always)
            .await
            .unwrap();

        let obj = store.get("b", "k").await.unwrap().unwrap();
        assert_eq!(obj.body, Bytes::from_static(b"hello"));
        assert_eq!(obj.version, version);
        assert_eq!(obj.content_type.as_deref(), Some("text/plain"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_buckets_are_separate() {
        let store = MemoryObjectStore::new();
        store.put_json("a", "k", &serde_json::json!(1)).await.unwrap();
        assert!(store.get("b", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_if_absent() {
        let store = MemoryObjectStore::new();
        store
            .put("b", "k", Bytes::from_static(b"1"), "text/plain", PutCondition::IfAbsent)
            .await
            .unwrap();

        let err = store
            .put("b", "k", Bytes::from_static(b"2"), "text/plain", PutCondition::IfAbsent)
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_if_version_detects_lost_update() {
        let store = MemoryObjectStore::new();
        store.put_json("b", "k", &serde_json::json!([])).await.unwrap();

        // Two writers read the same base
        let seen_a = store.get("b", "k").await.unwrap();
        let seen_b = store.get("b", "k").await.unwrap();

        store
            .put(
                "b",
                "k",
                Bytes::from_static(b"[1]"),
                "application/json",
                PutCondition::unchanged_since(seen_a.as_ref()),
            )
            .await
            .unwrap();

        let err = store
            .put(
                "b",
                "k",
                Bytes::from_static(b"[2]"),
                "application/json",
                PutCondition::unchanged_since(seen_b.as_ref()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Conflict { .. }));

        let obj = store.get("b", "k").await.unwrap().unwrap();
        assert_eq!(obj.body, Bytes::from_static(b"[1]"));
    }
}
