//! # a3s-push
//!
//! Web-push notification fan-out driven by metadata change events.
//!
//! ## Overview
//!
//! `a3s-push` keeps a registry of browser push subscriptions and broadcasts
//! to them, either on direct request or when a change notification for a
//! programme metadata document arrives and the document passes the
//! language/entity filter. Storage, credentials, and the push wire format
//! are capabilities behind traits, so the pipeline runs the same against
//! in-memory backends in tests and real ones in production.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_push::{
//!     ApiRequest, Backends, FileObjectStore, Handler, HttpGatewayTransport, PushConfig,
//!     SharedStoreConnector, StaticCredentials, TemporaryCredentials,
//! };
//! use std::sync::Arc;
//!
//! # async fn example(credentials: TemporaryCredentials) -> a3s_push::Result<()> {
//! let config = PushConfig::from_env()?;
//! let store = Arc::new(FileObjectStore::new("/var/lib/a3s-push"));
//! let gateway = config
//!     .gateway()
//!     .ok_or_else(|| a3s_push::PushError::Config("PUSH_GATEWAY_URL is not set".into()))?;
//!
//! let handler = Handler::new(
//!     &config,
//!     Backends {
//!         store: store.clone(),
//!         transport: Arc::new(HttpGatewayTransport::new(gateway)?),
//!         credentials: Arc::new(StaticCredentials::new(credentials)),
//!         connector: Arc::new(SharedStoreConnector::new(store)),
//!     },
//! );
//!
//! let request = ApiRequest::json(
//!     "/register",
//!     &serde_json::json!({"subscription": {"endpoint": "https://push.example.com/abc"}}),
//! );
//! let response = handler.register_or_send_to_all(&request).await;
//! println!("{}", response.status_code);
//! # Ok(())
//! # }
//! ```
//!
//! ## Relay Sources
//!
//! - **memory**: channel-backed source for testing and single-process use
//! - **nats**: NATS JetStream durable consumer
//!
//! ## Architecture
//!
//! - **ObjectStore** trait: versioned `(bucket, key)` storage
//! - **SubscriptionRegistry**: deduplicated subscription list with optional compare-and-swap upserts
//! - **DeliveryEngine**: delayed, concurrent, all-or-nothing broadcast over a `PushTransport`
//! - **ChangeRouter**: unwraps change batches, fetches documents, hands them to the `Notifier`
//! - **Handler**: the boundary operations as request/response functions

pub mod assets;
pub mod config;
pub mod delivery;
pub mod error;
pub mod event;
pub mod fetch;
pub mod handler;
pub mod notify;
pub mod registry;
pub mod relay;
pub mod router;
pub mod store;
pub mod types;

// Re-export core types
pub use config::{PushConfig, VapidKeys};
pub use error::{PushError, Result};
pub use event::{ChangeBatch, ObjectKey, StorageOrigin, TransportRecord};
pub use handler::{ApiRequest, Backends, Handler, Response};
pub use notify::{Decision, DropReason, EntityFilter, EntityType, Notifier, NotifyOutcome};
pub use registry::{SubscriptionRegistry, UpsertPolicy};
pub use router::{ChangeRouter, IngestSummary, RecordOutcome};
pub use types::{
    DeliveryOutcome, NotificationPayload, PushOptions, Subscription, SubscriptionKeys,
    DEFAULT_TTL,
};

// Re-export backends for convenience
pub use assets::StaticAssets;
pub use delivery::{DeliveryEngine, GatewayConfig, HttpGatewayTransport, PushTransport, ScheduledBroadcast};
pub use fetch::{
    CredentialProvider, DocumentFetcher, SharedStoreConnector, StaticCredentials, StoreConnector,
    TemporaryCredentials,
};
pub use relay::{MemoryRelay, MemoryRelaySender, NatsRelay, NatsRelayConfig, RelaySource};
pub use store::{FileObjectStore, MemoryObjectStore, ObjectStore, PutCondition, StoredObject};
