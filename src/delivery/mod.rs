//! Delivery engine: delayed, parallel, all-or-nothing broadcast
//!
//! The push wire format is owned by a [`PushTransport`]; the engine only
//! decides when to deliver, to whom, and how to aggregate the outcome.

use crate::error::{PushError, Result};
use crate::types::{DeliveryOutcome, PushOptions, Subscription};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub mod gateway;

pub use gateway::{GatewayConfig, HttpGatewayTransport};

/// Capability: deliver an opaque payload to one push subscription
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Deliver `payload` to `subscription`
    async fn send(&self, subscription: &Subscription, payload: &str, options: &PushOptions) -> Result<()>;

    /// Transport name (e.g., "gateway")
    fn name(&self) -> &str;
}

/// Broadcasts payloads to sets of subscriptions
///
/// Every recipient gets an independent attempt, run concurrently. There is
/// no retry: one failure fails the aggregate and is not pruned from the
/// registry.
#[derive(Clone)]
pub struct DeliveryEngine {
    transport: Arc<dyn PushTransport>,
}

impl DeliveryEngine {
    /// Engine delivering through `transport`
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self { transport }
    }

    /// Get the transport name
    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Wait `delay`, then deliver to every subscription and aggregate
    ///
    /// An empty subscription set succeeds trivially.
    pub async fn broadcast(
        &self,
        subscriptions: Vec<Subscription>,
        payload: &Value,
        options: PushOptions,
        delay: Duration,
    ) -> DeliveryOutcome {
        let broadcast_id = uuid::Uuid::new_v4().to_string();
        if !delay.is_zero() {
            tracing::debug!(broadcast = %broadcast_id, delay_ms = delay.as_millis() as u64, "Delaying broadcast");
            tokio::time::sleep(delay).await;
        }
        self.deliver_all(&broadcast_id, &subscriptions, &encode_payload(payload), &options)
            .await
    }

    /// Schedule a broadcast on the runtime and return a handle to it
    ///
    /// The delay runs in a spawned task; the caller continues immediately.
    /// The handle can be awaited for the outcome or cancelled before it
    /// completes.
    pub fn schedule(
        &self,
        subscriptions: Vec<Subscription>,
        payload: Value,
        options: PushOptions,
        delay: Duration,
    ) -> ScheduledBroadcast {
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            engine.broadcast(subscriptions, &payload, options, delay).await
        });
        ScheduledBroadcast { handle }
    }

    async fn deliver_all(
        &self,
        broadcast_id: &str,
        subscriptions: &[Subscription],
        payload: &str,
        options: &PushOptions,
    ) -> DeliveryOutcome {
        tracing::info!(
            broadcast = %broadcast_id,
            recipients = subscriptions.len(),
            ttl = options.ttl,
            transport = self.transport.name(),
            "Broadcasting notification"
        );

        let attempts = subscriptions
            .iter()
            .map(|sub| self.transport.send(sub, payload, options));
        let results = futures::future::join_all(attempts).await;

        let mut first_error: Option<PushError> = None;
        let mut failed = 0usize;
        for (sub, result) in subscriptions.iter().zip(results) {
            if let Err(e) = result {
                failed += 1;
                tracing::warn!(
                    broadcast = %broadcast_id,
                    endpoint = %sub.endpoint,
                    error = %e,
                    "Push delivery failed"
                );
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            None => DeliveryOutcome::Delivered {
                recipients: subscriptions.len(),
            },
            Some(e) => {
                tracing::error!(
                    broadcast = %broadcast_id,
                    failed,
                    recipients = subscriptions.len(),
                    "Broadcast failed"
                );
                DeliveryOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Handle to a broadcast scheduled with [`DeliveryEngine::schedule`]
pub struct ScheduledBroadcast {
    handle: JoinHandle<DeliveryOutcome>,
}

impl ScheduledBroadcast {
    /// Cancel the broadcast if it has not completed
    ///
    /// Deliveries already in flight when the delay has elapsed are dropped.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether the broadcast has finished (delivered, failed, or cancelled)
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the aggregate outcome
    pub async fn outcome(self) -> Result<DeliveryOutcome> {
        self.handle.await.map_err(|e| {
            if e.is_cancelled() {
                PushError::Cancelled("scheduled broadcast".to_string())
            } else {
                PushError::Delivery {
                    endpoint: "*".to_string(),
                    reason: format!("broadcast task failed: {}", e),
                }
            }
        })
    }
}

/// Strings are sent verbatim; any other JSON value compactly serialised
pub fn encode_payload(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
