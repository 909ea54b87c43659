//! Change-event envelopes
//!
//! A change batch arrives as nested envelopes:
//!
//! ```text
//! ChangeBatch { Records: [TransportRecord] }
//!   └─ relay record (EventSource = "aws:sns") { Sns: { Message: "<json>" } }
//!        └─ StorageNotification { Records: [StorageRecord] }
//!             └─ { s3: { bucket: { name }, object: { key } } }
//! ```
//!
//! Each stage is parsed on its own into an explicit variant or error so a
//! malformed record can be dropped without touching its neighbours.

use crate::error::{PushError, Result};
use crate::notify::EntityType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event source tag of the pub/sub relay
pub const RELAY_SOURCE: &str = "aws:sns";

/// Outer transport envelope: a batch of loosely-typed records
///
/// Records stay raw JSON until routed so one bad record cannot fail the
/// parse of the whole batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<Value>,
}

impl ChangeBatch {
    pub fn new(records: Vec<Value>) -> Self {
        Self { records }
    }

    /// Parse a batch from raw JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(Into::into)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One outer record, classified by its declared event source
#[derive(Debug, Clone, PartialEq)]
pub enum TransportRecord {
    /// Message delivered through the pub/sub relay
    Relay(RelayMessage),

    /// Any other source; logged and dropped
    Unknown { source: Option<String>, raw: Value },
}

impl TransportRecord {
    /// Classify a raw outer record
    ///
    /// A relay record without a message body is malformed and is an error.
    pub fn from_value(raw: Value) -> Result<Self> {
        let source = raw
            .get("EventSource")
            .and_then(Value::as_str)
            .map(str::to_string);

        match source.as_deref() {
            Some(RELAY_SOURCE) => {
                let sns = raw.get("Sns").ok_or_else(|| {
                    PushError::InvalidInput("relay record has no 'Sns' section".to_string())
                })?;
                let relay: RelayMessage = serde_json::from_value(sns.clone())?;
                Ok(TransportRecord::Relay(relay))
            }
            _ => Ok(TransportRecord::Unknown { source, raw }),
        }
    }

    /// Wrap a relay message body as an outer record
    pub fn relay_value(message: impl Into<String>) -> Value {
        serde_json::json!({
            "EventSource": RELAY_SOURCE,
            "Sns": { "Message": message.into() },
        })
    }
}

/// Pub/sub relay message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Embedded JSON body
    #[serde(rename = "Message")]
    pub message: String,

    #[serde(rename = "MessageId", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    #[serde(rename = "TopicArn", default, skip_serializing_if = "Option::is_none")]
    pub topic_arn: Option<String>,
}

/// Decoded body of a relay message
#[derive(Debug, Clone, PartialEq)]
pub enum RelayPayload {
    /// Object-storage change notification
    Storage(StorageNotification),

    /// Anything without a `Records` field; logged and dropped
    Other(Value),
}

impl RelayMessage {
    /// Parse the embedded body
    pub fn payload(&self) -> Result<RelayPayload> {
        let value: Value = serde_json::from_str(&self.message)?;
        if value.get("Records").is_some() {
            let notification: StorageNotification = serde_json::from_value(value)?;
            Ok(RelayPayload::Storage(notification))
        } else {
            Ok(RelayPayload::Other(value))
        }
    }
}

/// Object-storage change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageNotification {
    #[serde(rename = "Records")]
    pub records: Vec<StorageRecord>,
}

impl StorageNotification {
    /// The record routing is based on
    ///
    /// Only the first record is consulted; notifications are assumed to
    /// carry one record each.
    pub fn first(&self) -> Option<&StorageRecord> {
        self.records.first()
    }
}

/// One storage change: which object in which bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Object {
    pub key: String,
}

impl StorageRecord {
    /// Record for `key` in `bucket`
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            s3: S3Entity {
                bucket: S3Bucket { name: bucket.into() },
                object: S3Object { key: key.into() },
            },
        }
    }

    pub fn bucket(&self) -> &str {
        &self.s3.bucket.name
    }

    pub fn key(&self) -> &str {
        &self.s3.object.key
    }
}

/// Where a changed object lives, which decides how it is fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOrigin {
    /// The merge bucket; read directly
    Trusted,
    /// Any other bucket; read with elevated credentials
    Foreign,
}

impl StorageOrigin {
    /// `Trusted` only for the merge bucket itself
    pub fn of(bucket: &str, merge_bucket: &str) -> Self {
        if bucket == merge_bucket {
            StorageOrigin::Trusted
        } else {
            StorageOrigin::Foreign
        }
    }
}

/// A changed object's key, decoded according to its origin
///
/// Trusted keys look like `_/<entity_type>/<prefix>.<pid>...`; foreign keys
/// carry three more leading segments: `_/_/_/_/<entity_type>/<prefix>.<pid>...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    pub origin: StorageOrigin,
    pub entity_type: EntityType,
    pub pid: String,
}

impl ObjectKey {
    /// Decode entity type and pid, or `InvalidInput` when the key is too short
    pub fn parse(key: &str, origin: StorageOrigin) -> Result<Self> {
        let segments: Vec<&str> = key.split('/').collect();
        let entity_index = match origin {
            StorageOrigin::Trusted => 1,
            StorageOrigin::Foreign => 4,
        };

        let entity_type = segments
            .get(entity_index)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                PushError::InvalidInput(format!("object key '{}' has no entity type segment", key))
            })?;

        let pid = segments
            .get(entity_index + 1)
            .and_then(|s| s.split('.').nth(1))
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                PushError::InvalidInput(format!("object key '{}' has no pid segment", key))
            })?;

        Ok(Self {
            origin,
            entity_type: EntityType::from(*entity_type),
            pid: pid.to_string(),
        })
    }
}

/// Whether a key is an administrative object that never notifies
///
/// True when the first path segment, ignoring a leading `/`, equals `prefix`.
pub fn is_reserved_key(key: &str, prefix: &str) -> bool {
    key.trim_start_matches('/').split('/').next() == Some(prefix)
}
