//! Request handler for the boundary operations
//!
//! Transport independent: each operation takes an [`ApiRequest`] and returns
//! a [`Response`] with an HTTP-equivalent status and a string body. Hosting
//! (function runtime, HTTP server) maps these onto its own framing.

use crate::assets::StaticAssets;
use crate::config::PushConfig;
use crate::delivery::{DeliveryEngine, PushTransport};
use crate::error::{PushError, Result};
use crate::event::ChangeBatch;
use crate::fetch::{CredentialProvider, DocumentFetcher, StoreConnector};
use crate::notify::{EntityFilter, Notifier};
use crate::registry::SubscriptionRegistry;
use crate::router::ChangeRouter;
use crate::store::ObjectStore;
use crate::types::{client_delay, DeliveryOutcome, PushOptions, Subscription};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Resource that turns `register_or_send_to_all` into a registration
pub const REGISTER_RESOURCE: &str = "/register";

/// An inbound request
///
/// Fields other than `resource` and `body` are kept so the request can be
/// echoed back whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    #[serde(default)]
    pub resource: String,

    /// Raw JSON body
    #[serde(default)]
    pub body: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ApiRequest {
    pub fn new(resource: impl Into<String>, body: Option<String>) -> Self {
        Self {
            resource: resource.into(),
            body,
            extra: serde_json::Map::new(),
        }
    }

    /// Request with `body` serialised as JSON
    pub fn json(resource: impl Into<String>, body: &Value) -> Self {
        Self::new(resource, Some(body.to_string()))
    }

    /// Decode the body, reporting absence or bad JSON as invalid input
    pub fn parse_body<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self
            .body
            .as_deref()
            .ok_or_else(|| PushError::InvalidInput("missing request body".to_string()))?;
        serde_json::from_str(body)
            .map_err(|e| PushError::InvalidInput(format!("malformed request body: {}", e)))
    }
}

/// An outbound response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status_code: u16,
    pub body: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// `body` is standard base64 of raw bytes
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_base64_encoded: bool,
}

impl Response {
    /// String bodies are sent raw, anything else as pretty-printed JSON
    pub fn new(status_code: u16, body: &Value) -> Self {
        let body = match body {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        Self {
            status_code,
            body,
            headers: HashMap::new(),
            is_base64_encoded: false,
        }
    }

    /// Raw bytes: UTF-8 text as-is, anything else base64 encoded and flagged
    pub fn bytes(status_code: u16, body: &[u8]) -> Self {
        let (body, is_base64_encoded) = match std::str::from_utf8(body) {
            Ok(text) => (text.to_string(), false),
            Err(_) => (STANDARD.encode(body), true),
        };
        Self {
            status_code,
            body,
            headers: HashMap::new(),
            is_base64_encoded,
        }
    }

    /// Error response with `{"error": ...}` and the error's status
    pub fn error(err: &PushError) -> Self {
        Self::new(err.status_code(), &serde_json::json!({ "error": err.to_string() }))
    }

    /// Builder: add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Parse the body back into JSON
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// The body as raw bytes, decoding base64 when flagged
    pub fn body_bytes(&self) -> Result<Vec<u8>> {
        if self.is_base64_encoded {
            STANDARD
                .decode(&self.body)
                .map_err(|e| PushError::InvalidInput(format!("invalid base64 body: {}", e)))
        } else {
            Ok(self.body.as_bytes().to_vec())
        }
    }
}

impl From<&DeliveryOutcome> for Response {
    fn from(outcome: &DeliveryOutcome) -> Self {
        Response::new(outcome.status_code(), &outcome.body())
    }
}

/// `{subscription, payload, delay, ttl}`
#[derive(Debug, Deserialize)]
struct SendRequest {
    subscription: Subscription,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    delay: Option<Value>,
    #[serde(default)]
    ttl: Option<Value>,
}

/// `{payload, delay, ttl}`
#[derive(Debug, Deserialize)]
struct BroadcastRequest {
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    delay: Option<Value>,
    #[serde(default)]
    ttl: Option<Value>,
}

/// `{subscription}`
#[derive(Debug, Deserialize)]
struct RegisterRequest {
    subscription: Subscription,
}

/// Registration body: `{subscription}`, or a bare subscription
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RegisterBody {
    Wrapped(RegisterRequest),
    Bare(Subscription),
}

impl RegisterBody {
    fn into_subscription(self) -> Subscription {
        match self {
            RegisterBody::Wrapped(request) => request.subscription,
            RegisterBody::Bare(subscription) => subscription,
        }
    }
}

/// External capabilities the handler is wired to
pub struct Backends {
    /// Store holding the registry and trusted documents
    pub store: Arc<dyn ObjectStore>,
    pub transport: Arc<dyn PushTransport>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub connector: Arc<dyn StoreConnector>,
}

/// All boundary operations over one configured pipeline
pub struct Handler {
    vapid_public_key: String,
    default_ttl: u32,
    registry: Arc<SubscriptionRegistry>,
    engine: DeliveryEngine,
    router: ChangeRouter,
    assets: StaticAssets,
}

impl Handler {
    /// Wire the registry, engine, router and assets from `config`
    pub fn new(config: &PushConfig, backends: Backends) -> Self {
        let registry = Arc::new(
            SubscriptionRegistry::new(
                backends.store.clone(),
                config.state_bucket.clone(),
                config.registry_key.clone(),
            )
            .with_policy(config.upsert_policy()),
        );
        let engine = DeliveryEngine::new(backends.transport);

        let fetcher = Arc::new(DocumentFetcher::new(
            backends.store,
            backends.credentials,
            backends.connector,
            config.merge_bucket.clone(),
            config.elevated_role.clone(),
            config.role_session_name.clone(),
        ));
        let notifier = Arc::new(
            Notifier::new(
                EntityFilter::new(config.target_language.clone()),
                registry.clone(),
                engine.clone(),
            )
            .with_options(PushOptions::with_ttl(config.default_ttl)),
        );

        tracing::info!(
            state_bucket = %config.state_bucket,
            merge_bucket = %config.merge_bucket,
            transport = engine.transport_name(),
            "Push handler ready"
        );

        Self {
            vapid_public_key: config.vapid_public_key.clone(),
            default_ttl: config.default_ttl,
            registry,
            engine,
            router: ChangeRouter::new(fetcher, notifier, config.reserved_prefix.clone()),
            assets: StaticAssets::new(config.static_dir.clone()),
        }
    }

    /// The registry the handler registers into
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn router(&self) -> &ChangeRouter {
        &self.router
    }

    /// 200 with the VAPID public key
    pub fn vapid_public_key(&self) -> Response {
        Response::new(200, &Value::String(self.vapid_public_key.clone()))
    }

    /// Register `body.subscription` (a bare subscription body is also accepted)
    pub async fn register(&self, request: &ApiRequest) -> Response {
        let extract = |req: &ApiRequest| req.parse_body::<RegisterBody>().map(RegisterBody::into_subscription);
        match self.try_register(request, extract).await {
            Ok(response) | Err(response) => response,
        }
    }

    /// Deliver to the one subscription in the body
    pub async fn send_notification(&self, request: &ApiRequest) -> Response {
        let send: SendRequest = match request.parse_body() {
            Ok(send) => send,
            Err(e) => return Response::error(&e),
        };

        let options = PushOptions::from_client(send.ttl.as_ref(), self.default_ttl);
        let outcome = self
            .engine
            .broadcast(
                vec![send.subscription],
                &send.payload,
                options,
                client_delay(send.delay.as_ref()),
            )
            .await;
        Response::from(&outcome)
    }

    /// Register `body.subscription` on `/register`, otherwise broadcast to all
    pub async fn register_or_send_to_all(&self, request: &ApiRequest) -> Response {
        if request.resource == REGISTER_RESOURCE {
            let registered = self
                .try_register(request, |req| {
                    req.parse_body::<RegisterRequest>().map(|r| r.subscription)
                })
                .await;
            return match registered {
                Ok(response) | Err(response) => response,
            };
        }

        let broadcast: BroadcastRequest = match request.parse_body() {
            Ok(broadcast) => broadcast,
            Err(e) => return Response::error(&e),
        };
        let subscriptions = match self.registry.list_all().await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read subscription registry");
                return Response::error(&e);
            }
        };

        let options = PushOptions::from_client(broadcast.ttl.as_ref(), self.default_ttl);
        let outcome = self
            .engine
            .broadcast(
                subscriptions,
                &broadcast.payload,
                options,
                client_delay(broadcast.delay.as_ref()),
            )
            .await;
        Response::from(&outcome)
    }

    /// Route a change batch; the reply only reports how many records arrived
    pub async fn notify_new_or_changed(&self, batch: &ChangeBatch) -> String {
        self.router.ingest(batch).await.message()
    }

    /// Serve the static file named by the request resource
    pub async fn statics(&self, request: &ApiRequest) -> Response {
        match self.assets.serve(&request.resource).await {
            Ok(asset) => Response::bytes(200, &asset.body)
                .with_header("content-type", asset.content_type),
            Err(e) => {
                tracing::warn!(resource = %request.resource, error = %e, "Static asset unavailable");
                Response::error(&e)
            }
        }
    }

    async fn try_register<F>(&self, request: &ApiRequest, extract: F) -> std::result::Result<Response, Response>
    where
        F: FnOnce(&ApiRequest) -> Result<Subscription>,
    {
        let subscription = extract(request).map_err(|e| Response::error(&e))?;
        let endpoint = subscription.endpoint.clone();

        self.registry.upsert(subscription).await.map_err(|e| {
            tracing::error!(endpoint = %endpoint, error = %e, "Failed to register subscription");
            Response::error(&e)
        })?;

        let echo = serde_json::to_value(request).map_err(|e| Response::error(&PushError::from(e)))?;
        Ok(Response::new(201, &echo))
    }
}
