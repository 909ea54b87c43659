//! Entity filter and notifier
//!
//! Decides per entity type whether a fetched document is worth a
//! notification and, if so, broadcasts it to the whole registry.
//!
//! | Entity type | Action |
//! |---|---|
//! | `clip`, `episode` | notify when the first language tag matches |
//! | `availability`, `brand`, `series` | drop |
//! | anything else | log the document, do not notify |

use crate::delivery::DeliveryEngine;
use crate::error::Result;
use crate::fetch::Document;
use crate::registry::SubscriptionRegistry;
use crate::types::{DeliveryOutcome, NotificationPayload, PushOptions};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Metadata entity type, derived from the object key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityType {
    Clip,
    Episode,
    Brand,
    Series,
    Availability,
    Other(String),
}

impl EntityType {
    pub fn as_str(&self) -> &str {
        match self {
            EntityType::Clip => "clip",
            EntityType::Episode => "episode",
            EntityType::Brand => "brand",
            EntityType::Series => "series",
            EntityType::Availability => "availability",
            EntityType::Other(s) => s,
        }
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        match s {
            "clip" => EntityType::Clip,
            "episode" => EntityType::Episode,
            "brand" => EntityType::Brand,
            "series" => EntityType::Series,
            "availability" => EntityType::Availability,
            other => EntityType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a document did not produce a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Document has no entry for its entity type
    MissingEntity,
    /// Entity carries no language list
    NoLanguages,
    /// First language tag is not the target language
    LanguageMismatch { found: String },
    /// Entity type is received but never notified
    IgnoredEntityType,
}

/// Outcome of filtering one document
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Notify(NotificationPayload),
    Drop(DropReason),
    /// Unrecognised entity type; the document is logged for diagnosis
    Unrecognised,
}

/// Pure decision table keyed by entity type
#[derive(Debug, Clone)]
pub struct EntityFilter {
    target_language: String,
}

impl EntityFilter {
    /// Accept documents whose first language tag equals `target_language`
    pub fn new(target_language: impl Into<String>) -> Self {
        Self {
            target_language: target_language.into(),
        }
    }

    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    pub fn decide(&self, doc: &Document, entity_type: &EntityType, pid: &str) -> Decision {
        match entity_type {
            EntityType::Clip | EntityType::Episode => {
                let Some(entity) = entity_of(doc, entity_type.as_str()) else {
                    return Decision::Drop(DropReason::MissingEntity);
                };
                let Some(languages) = entity.get("languages") else {
                    return Decision::Drop(DropReason::NoLanguages);
                };
                match first_language(languages) {
                    None => Decision::Drop(DropReason::NoLanguages),
                    Some(lang) if lang == self.target_language => Decision::Notify(
                        NotificationPayload::new(entity_type.as_str(), pid, entity.clone()),
                    ),
                    Some(lang) => Decision::Drop(DropReason::LanguageMismatch {
                        found: lang.to_string(),
                    }),
                }
            }
            EntityType::Availability | EntityType::Brand | EntityType::Series => {
                Decision::Drop(DropReason::IgnoredEntityType)
            }
            EntityType::Other(_) => Decision::Unrecognised,
        }
    }
}

/// The entity section of a document: `pips.<type>`, falling back to `<type>`
fn entity_of<'a>(doc: &'a Document, entity_type: &str) -> Option<&'a Value> {
    doc.get("pips")
        .and_then(|pips| pips.get(entity_type))
        .or_else(|| doc.get(entity_type))
}

/// Tag of the first language: `languages.language[0].$`
///
/// `language` may be a list or, for a single language, a bare object.
fn first_language(languages: &Value) -> Option<&str> {
    let list = languages.get("language").unwrap_or(languages);
    let first = match list {
        Value::Array(items) => items.first()?,
        other => other,
    };
    first.get("$").and_then(Value::as_str)
}

/// What the notifier did with one document
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyOutcome {
    Notified(DeliveryOutcome),
    Dropped(DropReason),
    Unrecognised,
}

/// Applies the entity filter and broadcasts passing documents
pub struct Notifier {
    filter: EntityFilter,
    registry: Arc<SubscriptionRegistry>,
    engine: DeliveryEngine,
    options: PushOptions,
}

impl Notifier {
    /// Notifier broadcasting with the default TTL
    pub fn new(filter: EntityFilter, registry: Arc<SubscriptionRegistry>, engine: DeliveryEngine) -> Self {
        Self {
            filter,
            registry,
            engine,
            options: PushOptions::default(),
        }
    }

    /// Builder: transport options for change notifications
    pub fn with_options(mut self, options: PushOptions) -> Self {
        self.options = options;
        self
    }

    pub fn filter(&self) -> &EntityFilter {
        &self.filter
    }

    /// Filter one document and broadcast it to every current subscriber
    pub async fn handle(&self, doc: &Document, entity_type: &EntityType, pid: &str) -> Result<NotifyOutcome> {
        match self.filter.decide(doc, entity_type, pid) {
            Decision::Notify(payload) => {
                tracing::info!(entity_type = %entity_type, pid, "{}", payload.msg);
                let subscriptions = self.registry.list_all().await?;
                let payload = serde_json::to_value(&payload)?;
                let outcome = self
                    .engine
                    .broadcast(subscriptions, &payload, self.options, Duration::ZERO)
                    .await;
                Ok(NotifyOutcome::Notified(outcome))
            }
            Decision::Drop(reason) => {
                tracing::debug!(entity_type = %entity_type, pid, reason = ?reason, "Document dropped");
                Ok(NotifyOutcome::Dropped(reason))
            }
            Decision::Unrecognised => {
                tracing::info!(
                    entity_type = %entity_type,
                    pid,
                    document = %doc,
                    "Unrecognised entity type"
                );
                Ok(NotifyOutcome::Unrecognised)
            }
        }
    }
}
