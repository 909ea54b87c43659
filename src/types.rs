//! Core types for the a3s-push pipeline
//!
//! Subscriptions keep the browser `PushSubscription` JSON shape so that
//! records written by clients round-trip through the registry untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// TTL applied when a caller supplies none
pub const DEFAULT_TTL: u32 = 5;

/// A browser push subscription
///
/// `endpoint` is the identity of the subscription. Everything else is
/// opaque key material owned by the push protocol and is carried as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Push service endpoint URL (registry key)
    pub endpoint: String,

    /// Encryption key material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<SubscriptionKeys>,

    /// Any other fields the client sent (e.g. `expirationTime`)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Subscription {
    /// Create a subscription with no key material
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            keys: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Builder: attach key material
    pub fn with_keys(mut self, p256dh: impl Into<String>, auth: impl Into<String>) -> Self {
        self.keys = Some(SubscriptionKeys {
            p256dh: Some(p256dh.into()),
            auth: Some(auth.into()),
            extra: serde_json::Map::new(),
        });
        self
    }

    /// Builder: attach an extra opaque field
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Client public key and auth secret of a push subscription
///
/// Opaque to this crate: missing members are tolerated and unknown ones are
/// carried through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p256dh: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Message broadcast to every subscriber when a document passes the filter
///
/// Field names are snake_case: the browser client reads `entity_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub msg: String,
    pub pid: String,
    pub entity_type: String,
    pub entity: Value,
}

impl NotificationPayload {
    /// Payload announcing a new or changed entity
    pub fn new(entity_type: impl Into<String>, pid: impl Into<String>, entity: Value) -> Self {
        let entity_type = entity_type.into();
        let pid = pid.into();
        Self {
            msg: format!("new or changed {} {}", entity_type, pid),
            pid,
            entity_type,
            entity,
        }
    }
}

/// Transport options for a push delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOptions {
    /// Seconds the push service may hold the message for an offline client
    #[serde(rename = "TTL")]
    pub ttl: u32,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self { ttl: DEFAULT_TTL }
    }
}

impl PushOptions {
    /// Options with an explicit TTL in seconds
    pub fn with_ttl(ttl: u32) -> Self {
        Self { ttl }
    }

    /// Build options from a client-supplied `ttl`
    ///
    /// Accepts a number or a string with leading digits. Absent, zero, or
    /// digit-less values fall back to `default_ttl`.
    pub fn from_client(ttl: Option<&Value>, default_ttl: u32) -> Self {
        let ttl = ttl
            .and_then(value_as_u64)
            .filter(|t| *t > 0)
            .map(|t| t.min(u32::MAX as u64) as u32)
            .unwrap_or(default_ttl);
        Self { ttl }
    }
}

/// Interpret a client-supplied `delay` in seconds
///
/// Numbers are truncated; strings count their leading digits. Absent or
/// digit-less values mean no delay.
pub fn client_delay(delay: Option<&Value>) -> Duration {
    delay
        .and_then(value_as_u64)
        .map(Duration::from_secs)
        .unwrap_or(Duration::ZERO)
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => leading_integer(s),
        _ => None,
    }
}

/// Leading decimal digits of `s`, so `"1.5"` is 1 and `"5s"` is 5
///
/// Negative or digit-less strings yield `None`.
fn leading_integer(s: &str) -> Option<u64> {
    let s = s.trim_start();
    let s = s.strip_prefix('+').unwrap_or(s);
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end].parse().ok()
}

/// Aggregate result of one broadcast
///
/// All-or-nothing: a single failed delivery fails the whole broadcast,
/// however many other recipients succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Every recipient accepted the payload
    Delivered { recipients: usize },

    /// At least one recipient failed; `error` is the first failure
    Failed { error: String },
}

impl DeliveryOutcome {
    /// Whether every recipient accepted the payload
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    /// HTTP-equivalent status: 201 on success, 500 on failure
    pub fn status_code(&self) -> u16 {
        match self {
            DeliveryOutcome::Delivered { .. } => 201,
            DeliveryOutcome::Failed { .. } => 500,
        }
    }

    /// Response body: `{}` on success, `{"error": ...}` on failure
    pub fn body(&self) -> Value {
        match self {
            DeliveryOutcome::Delivered { .. } => serde_json::json!({}),
            DeliveryOutcome::Failed { error } => serde_json::json!({ "error": error }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscription_browser_shape() {
        let json = r#"{
            "endpoint": "https://push.example.com/abc",
            "expirationTime": null,
            "keys": {"p256dh": "BPk", "auth": "x1"}
        }"#;

        let sub: Subscription = serde_json::from_str(json).unwrap();
        assert_eq!(sub.endpoint, "https://push.example.com/abc");
        assert_eq!(sub.keys.as_ref().unwrap().auth.as_deref(), Some("x1"));
        assert!(sub.extra.contains_key("expirationTime"));

        let back = serde_json::to_value(&sub).unwrap();
        assert_eq!(back["expirationTime"], Value::Null);
        assert_eq!(back["keys"]["p256dh"], "BPk");
    }

    #[test]
    fn test_subscription_without_keys() {
        let sub: Subscription = serde_json::from_value(json!({"endpoint": "A", "v": 2})).unwrap();
        assert!(sub.keys.is_none());
        assert_eq!(sub.extra["v"], 2);

        let back = serde_json::to_value(&sub).unwrap();
        assert!(back.get("keys").is_none());
    }

    #[test]
    fn test_subscription_keys_round_trip_as_is() {
        let raw = json!({
            "endpoint": "A",
            "keys": {"auth": "x1", "vendor": {"k": [1, 2]}}
        });
        let sub: Subscription = serde_json::from_value(raw.clone()).unwrap();
        let keys = sub.keys.as_ref().unwrap();
        assert!(keys.p256dh.is_none());
        assert_eq!(keys.extra["vendor"]["k"][1], 2);

        assert_eq!(serde_json::to_value(&sub).unwrap(), raw);
    }

    #[test]
    fn test_subscription_requires_endpoint() {
        let result = serde_json::from_value::<Subscription>(json!({"keys": {"p256dh": "a", "auth": "b"}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_notification_payload() {
        let payload = NotificationPayload::new("clip", "p0abc", json!({"title": {"$": "T"}}));
        assert_eq!(payload.msg, "new or changed clip p0abc");

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["entity_type"], "clip");
        assert_eq!(json["pid"], "p0abc");
        assert_eq!(json["entity"]["title"]["$"], "T");
    }

    #[test]
    fn test_ttl_defaulting() {
        assert_eq!(PushOptions::from_client(None, 5).ttl, 5);
        assert_eq!(PushOptions::from_client(Some(&json!(null)), 5).ttl, 5);
        assert_eq!(PushOptions::from_client(Some(&json!(0)), 5).ttl, 5);
        assert_eq!(PushOptions::from_client(Some(&json!("")), 5).ttl, 5);
        assert_eq!(PushOptions::from_client(Some(&json!(60)), 5).ttl, 60);
        // Numeric strings are honoured rather than bit-mangled
        assert_eq!(PushOptions::from_client(Some(&json!("12")), 5).ttl, 12);
        assert_eq!(PushOptions::from_client(Some(&json!("abc")), 5).ttl, 5);
    }

    #[test]
    fn test_push_options_wire_name() {
        let json = serde_json::to_string(&PushOptions::default()).unwrap();
        assert_eq!(json, r#"{"TTL":5}"#);
    }

    #[test]
    fn test_client_delay() {
        assert_eq!(client_delay(None), Duration::ZERO);
        assert_eq!(client_delay(Some(&json!(0))), Duration::ZERO);
        assert_eq!(client_delay(Some(&json!("5"))), Duration::from_secs(5));
        assert_eq!(client_delay(Some(&json!(3))), Duration::from_secs(3));
        assert_eq!(client_delay(Some(&json!("soon"))), Duration::ZERO);
    }

    #[test]
    fn test_leading_integer_strings() {
        assert_eq!(client_delay(Some(&json!("1.5"))), Duration::from_secs(1));
        assert_eq!(client_delay(Some(&json!("5s"))), Duration::from_secs(5));
        assert_eq!(client_delay(Some(&json!("  7"))), Duration::from_secs(7));
        assert_eq!(client_delay(Some(&json!("-3"))), Duration::ZERO);
        assert_eq!(client_delay(Some(&json!(2.9))), Duration::from_secs(2));
        assert_eq!(PushOptions::from_client(Some(&json!("30 seconds")), 5).ttl, 30);
    }

    #[test]
    fn test_delivery_outcome() {
        let ok = DeliveryOutcome::Delivered { recipients: 3 };
        assert!(ok.is_success());
        assert_eq!(ok.status_code(), 201);
        assert_eq!(ok.body(), json!({}));

        let failed = DeliveryOutcome::Failed {
            error: "boom".to_string(),
        };
        assert!(!failed.is_success());
        assert_eq!(failed.status_code(), 500);
        assert_eq!(failed.body()["error"], "boom");
    }
}
