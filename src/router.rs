//! Change-event router
//!
//! Unwraps each outer record down to a storage change, skips reserved
//! keys, fetches the document by origin, and hands it to the notifier.
//! Records are processed one after another and in isolation: a record that
//! fails to parse or fetch is logged and the batch carries on.

use crate::error::Result;
use crate::event::{
    is_reserved_key, ChangeBatch, ObjectKey, RelayPayload, StorageRecord, TransportRecord,
};
use crate::fetch::DocumentFetcher;
use crate::notify::{Notifier, NotifyOutcome};
use serde_json::Value;
use std::sync::Arc;

/// What happened to one outer record
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Not from the relay
    UnknownSource,
    /// Relay message without storage records
    NotStorage,
    /// Storage notification with an empty record list
    EmptyNotification,
    /// Administrative object under the reserved prefix
    Reserved,
    /// No document could be fetched
    NoDocument,
    /// Document reached the notifier
    Handled(NotifyOutcome),
}

/// Per-batch counters
///
/// `processed` is every outer record, whatever happened to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub processed: usize,
    pub notified: usize,
    pub dropped: usize,
    pub failed: usize,
}

impl IngestSummary {
    /// Reply text for the caller; counts records received, not delivered
    pub fn message(&self) -> String {
        format!("Successfully processed {} messages.", self.processed)
    }
}

/// Unwraps change batches and routes each storage record to the notifier
///
/// Records are isolated: a failing record is counted and logged, and the
/// rest of the batch still runs.
pub struct ChangeRouter {
    fetcher: Arc<DocumentFetcher>,
    notifier: Arc<Notifier>,
    reserved_prefix: String,
}

impl ChangeRouter {
    /// Keys whose first segment is `reserved_prefix` are skipped unread
    pub fn new(fetcher: Arc<DocumentFetcher>, notifier: Arc<Notifier>, reserved_prefix: impl Into<String>) -> Self {
        Self {
            fetcher,
            notifier,
            reserved_prefix: reserved_prefix.into(),
        }
    }

    /// Route every record of a batch
    pub async fn ingest(&self, batch: &ChangeBatch) -> IngestSummary {
        let mut summary = IngestSummary {
            processed: batch.len(),
            ..Default::default()
        };

        for (index, raw) in batch.records.iter().enumerate() {
            match self.route_record(raw).await {
                Ok(RecordOutcome::Handled(NotifyOutcome::Notified(_))) => summary.notified += 1,
                Ok(_) => summary.dropped += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(record = index, error = %e, "Failed to route change record");
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            notified = summary.notified,
            dropped = summary.dropped,
            failed = summary.failed,
            "Change batch ingested"
        );
        summary
    }

    /// Route one outer record
    pub async fn route_record(&self, raw: &Value) -> Result<RecordOutcome> {
        let relay = match TransportRecord::from_value(raw.clone())? {
            TransportRecord::Relay(relay) => relay,
            TransportRecord::Unknown { source, .. } => {
                tracing::warn!(source = ?source, record = %raw, "Received unknown event");
                return Ok(RecordOutcome::UnknownSource);
            }
        };

        let notification = match relay.payload()? {
            RelayPayload::Storage(notification) => notification,
            RelayPayload::Other(message) => {
                tracing::info!(message = %message, "Unrecognised relay message");
                return Ok(RecordOutcome::NotStorage);
            }
        };

        if notification.records.len() > 1 {
            tracing::debug!(
                records = notification.records.len(),
                "Storage notification has several records, routing the first"
            );
        }
        match notification.first() {
            Some(record) => self.route_storage(record).await,
            None => {
                tracing::debug!("Storage notification has no records");
                Ok(RecordOutcome::EmptyNotification)
            }
        }
    }

    /// Route one storage change
    pub async fn route_storage(&self, record: &StorageRecord) -> Result<RecordOutcome> {
        let (bucket, key) = (record.bucket(), record.key());

        if is_reserved_key(key, &self.reserved_prefix) {
            tracing::debug!(bucket, key, "Reserved object skipped");
            return Ok(RecordOutcome::Reserved);
        }

        let object = ObjectKey::parse(key, self.fetcher.origin(bucket))?;
        let Some(doc) = self.fetcher.fetch(bucket, key).await? else {
            tracing::info!(bucket, key, "No document available");
            return Ok(RecordOutcome::NoDocument);
        };

        let outcome = self
            .notifier
            .handle(&doc, &object.entity_type, &object.pid)
            .await?;
        Ok(RecordOutcome::Handled(outcome))
    }
}
