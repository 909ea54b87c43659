//! Subscription registry
//!
//! The registry is a single JSON array of subscriptions stored under one
//! object key. It is read in full on every lookup and rewritten in full on
//! every upsert, deduplicated by `endpoint` (last write wins).
//!
//! Upserts are read-modify-write. With [`UpsertPolicy::LastWriteWins`] two
//! concurrent registrations can read the same snapshot and one of them is
//! lost. [`UpsertPolicy::Conditional`] closes that window with a
//! version-checked write and retries on conflict.

use crate::error::{PushError, Result};
use crate::store::{ObjectStore, PutCondition, StoredObject};
use crate::types::Subscription;
use std::collections::HashMap;
use std::sync::Arc;

/// How `upsert` writes the rewritten snapshot back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpsertPolicy {
    /// Unconditional overwrite; concurrent upserts may lose updates
    #[default]
    LastWriteWins,
    /// Compare-and-swap on the snapshot version, retried on conflict
    Conditional { max_attempts: u32 },
}

/// Durable registry of push subscriptions keyed by endpoint
pub struct SubscriptionRegistry {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    policy: UpsertPolicy,
}

impl SubscriptionRegistry {
    /// Create a registry stored at `bucket/key`
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            key: key.into(),
            policy: UpsertPolicy::default(),
        }
    }

    /// Builder: set the upsert policy
    pub fn with_policy(mut self, policy: UpsertPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The policy `upsert` writes with
    pub fn policy(&self) -> UpsertPolicy {
        self.policy
    }

    /// Read every current subscription
    ///
    /// An absent registry object is an empty registry, not an error.
    pub async fn list_all(&self) -> Result<Vec<Subscription>> {
        let (subscriptions, _) = self.snapshot().await?;
        Ok(subscriptions)
    }

    /// Insert or fully replace the subscription for its endpoint
    pub async fn upsert(&self, subscription: Subscription) -> Result<()> {
        match self.policy {
            UpsertPolicy::LastWriteWins => {
                let (current, _) = self.snapshot().await?;
                let merged = merge(current, subscription);
                self.write(&merged, PutCondition::Always).await
            }
            UpsertPolicy::Conditional { max_attempts } => {
                let attempts = max_attempts.max(1);
                for attempt in 1..=attempts {
                    let (current, seen) = self.snapshot().await?;
                    let merged = merge(current, subscription.clone());
                    match self
                        .write(&merged, PutCondition::unchanged_since(seen.as_ref()))
                        .await
                    {
                        Err(PushError::Conflict { .. }) if attempt < attempts => {
                            tracing::debug!(
                                endpoint = %subscription.endpoint,
                                attempt,
                                "Registry changed under upsert, retrying"
                            );
                        }
                        other => return other,
                    }
                }
                Err(PushError::Conflict {
                    bucket: self.bucket.clone(),
                    key: self.key.clone(),
                })
            }
        }
    }

    async fn snapshot(&self) -> Result<(Vec<Subscription>, Option<StoredObject>)> {
        let object = self
            .store
            .get(&self.bucket, &self.key)
            .await
            .map_err(unavailable)?;

        let subscriptions = match &object {
            Some(obj) if !obj.body.iter().all(u8::is_ascii_whitespace) => {
                obj.json::<Vec<Subscription>>().map_err(|e| {
                    PushError::StorageUnavailable(format!(
                        "Registry {}/{} is not a subscription list: {}",
                        self.bucket, self.key, e
                    ))
                })?
            }
            _ => Vec::new(),
        };

        Ok((subscriptions, object))
    }

    async fn write(&self, subscriptions: &[Subscription], condition: PutCondition) -> Result<()> {
        let body = serde_json::to_vec(subscriptions)?;
        self.store
            .put(&self.bucket, &self.key, body.into(), "application/json", condition)
            .await
            .map_err(unavailable)?;

        tracing::info!(
            bucket = %self.bucket,
            key = %self.key,
            count = subscriptions.len(),
            "Subscription registry written"
        );
        Ok(())
    }
}

/// Deduplicate by endpoint, keeping first-seen order, newest value wins
fn merge(current: Vec<Subscription>, incoming: Subscription) -> Vec<Subscription> {
    let mut order: Vec<String> = Vec::with_capacity(current.len() + 1);
    let mut unique: HashMap<String, Subscription> = HashMap::with_capacity(current.len() + 1);

    for sub in current.into_iter().chain(std::iter::once(incoming)) {
        if !unique.contains_key(&sub.endpoint) {
            order.push(sub.endpoint.clone());
        }
        unique.insert(sub.endpoint.clone(), sub);
    }

    order
        .into_iter()
        .filter_map(|endpoint| unique.remove(&endpoint))
        .collect()
}

fn unavailable(e: PushError) -> PushError {
    match e {
        PushError::Conflict { .. } | PushError::StorageUnavailable(_) => e,
        other => PushError::StorageUnavailable(other.to_string()),
    }
}
