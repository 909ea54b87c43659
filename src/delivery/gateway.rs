//! HTTP push gateway transport
//!
//! Hands each delivery to a push gateway that owns the encrypted web-push
//! wire format and VAPID signing. The gateway receives the subscription,
//! the opaque payload, the TTL, and the VAPID subject.

use super::PushTransport;
use crate::error::{PushError, Result};
use crate::types::{PushOptions, Subscription};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Push gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Gateway send URL
    pub url: String,

    /// VAPID subject (the service's contact domain)
    pub subject: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

/// Request body posted to the gateway
#[derive(Debug, Serialize)]
struct GatewayRequest<'a> {
    subscription: &'a Subscription,
    payload: &'a str,
    ttl: u32,
    subject: &'a str,
}

/// `PushTransport` backed by an HTTP push gateway
pub struct HttpGatewayTransport {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpGatewayTransport {
    /// Build the HTTP client; fails only if the client cannot be constructed
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PushError::Config(format!("Failed to build gateway HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

#[async_trait]
impl PushTransport for HttpGatewayTransport {
    async fn send(&self, subscription: &Subscription, payload: &str, options: &PushOptions) -> Result<()> {
        let request = GatewayRequest {
            subscription,
            payload,
            ttl: options.ttl,
            subject: &self.config.subject,
        };

        let response = self
            .client
            .post(&self.config.url)
            .header("TTL", options.ttl.to_string())
            .json(&request)
            .send()
            .await
            .map_err(|e| PushError::Delivery {
                endpoint: subscription.endpoint.clone(),
                reason: format!("gateway request failed: {}", e),
            })?;

        classify_status(&subscription.endpoint, response.status())?;

        tracing::debug!(endpoint = %subscription.endpoint, ttl = options.ttl, "Push delivered");
        Ok(())
    }

    fn name(&self) -> &str {
        "gateway"
    }
}

/// 2xx = delivered, 404/410 = subscription gone, anything else = failure
fn classify_status(endpoint: &str, status: StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        Err(PushError::Gone(endpoint.to_string()))
    } else {
        Err(PushError::Delivery {
            endpoint: endpoint.to_string(),
            reason: format!("gateway responded {}", status),
        })
    }
}
