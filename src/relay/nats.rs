//! NATS JetStream relay source
//!
//! Each JetStream message carries one relay message body (the same text a
//! relay record holds in `Sns.Message`). Messages are consumed through a
//! durable pull consumer and acknowledged after routing.

use super::{RelayDelivery, RelaySource};
use crate::error::{PushError, Result};
use crate::event::{ChangeBatch, TransportRecord};
use async_nats::jetstream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

/// NATS relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NatsRelayConfig {
    /// NATS server URL
    pub url: String,

    /// JetStream stream name
    pub stream_name: String,

    /// Subject the relay publishes change notifications on
    pub subject: String,

    /// Durable consumer name
    pub consumer_name: String,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Auth token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Max age of retained messages in seconds (0 = unlimited)
    pub max_age_secs: u64,
}

impl Default for NatsRelayConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            stream_name: "PUSH_CHANGES".to_string(),
            subject: "push.changes".to_string(),
            consumer_name: "push-router".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
            token: None,
            max_age_secs: 0,
        }
    }
}

type MessageStream = Pin<Box<jetstream::consumer::pull::Stream>>;

/// Durable JetStream consumer yielding relay deliveries
pub struct NatsRelay {
    jetstream: jetstream::Context,
    messages: MessageStream,
    config: NatsRelayConfig,
}

impl NatsRelay {
    /// Connect, ensure the stream and durable consumer exist, and start pulling
    pub async fn connect(config: NatsRelayConfig) -> Result<Self> {
        let client = build_connect_options(&config)
            .connect(&config.url)
            .await
            .map_err(|e| PushError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to NATS");

        let jetstream = jetstream::new(client);
        let stream = ensure_stream(&jetstream, &config).await?;

        let consumer = stream
            .get_or_create_consumer(
                &config.consumer_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(config.consumer_name.clone()),
                    filter_subject: config.subject.clone(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                PushError::Relay(format!(
                    "Failed to create durable consumer '{}': {}",
                    config.consumer_name, e
                ))
            })?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| PushError::Relay(format!("{}: {}", config.subject, e)))?;

        tracing::info!(
            consumer = %config.consumer_name,
            subject = %config.subject,
            "Durable relay consumer created"
        );

        Ok(Self {
            jetstream,
            messages: Box::pin(messages),
            config,
        })
    }

    /// Publish a relay message body, returning the stream sequence
    pub async fn publish(&self, message: &str) -> Result<u64> {
        let ack = self
            .jetstream
            .publish(self.config.subject.clone(), message.to_string().into())
            .await
            .map_err(|e| PushError::Relay(format!("{}: {}", self.config.subject, e)))?
            .await
            .map_err(|e| PushError::Relay(format!("ack failed: {}", e)))?;

        tracing::debug!(subject = %self.config.subject, sequence = ack.sequence, "Relay message published");
        Ok(ack.sequence)
    }

    pub fn config(&self) -> &NatsRelayConfig {
        &self.config
    }
}

#[async_trait]
impl RelaySource for NatsRelay {
    async fn next(&mut self) -> Result<Option<RelayDelivery>> {
        let message = match self.messages.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(PushError::Relay(e.to_string())),
            None => return Ok(None),
        };

        let body = String::from_utf8_lossy(&message.payload).into_owned();
        let batch = ChangeBatch::new(vec![TransportRecord::relay_value(body)]);

        Ok(Some(RelayDelivery::with_ack(batch, move || {
            Box::pin(async move {
                message
                    .ack()
                    .await
                    .map_err(|e| PushError::Relay(format!("ack failed: {}", e)))
            })
        })))
    }

    fn name(&self) -> &str {
        "nats"
    }
}

fn build_connect_options(config: &NatsRelayConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}

async fn ensure_stream(
    js: &jetstream::Context,
    config: &NatsRelayConfig,
) -> Result<jetstream::stream::Stream> {
    let stream_config = jetstream::stream::Config {
        name: config.stream_name.clone(),
        subjects: vec![config.subject.clone()],
        storage: jetstream::stream::StorageType::File,
        max_age: Duration::from_secs(config.max_age_secs),
        retention: jetstream::stream::RetentionPolicy::Limits,
        ..Default::default()
    };

    let stream = js.get_or_create_stream(stream_config).await.map_err(|e| {
        PushError::Relay(format!(
            "Failed to create/get stream '{}': {}",
            config.stream_name, e
        ))
    })?;

    tracing::info!(stream = %config.stream_name, subject = %config.subject, "JetStream stream ready");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NatsRelayConfig::default();
        assert_eq!(config.url, "nats://127.0.0.1:4222");
        assert_eq!(config.consumer_name, "push-router");
        assert!(config.token.is_none());
    }

    #[test]
    fn test_config_partial_deserialize() {
        let config: NatsRelayConfig =
            serde_json::from_str(r#"{"url": "nats://nats:4222", "subject": "appw.changes"}"#).unwrap();
        assert_eq!(config.url, "nats://nats:4222");
        assert_eq!(config.subject, "appw.changes");
        assert_eq!(config.stream_name, "PUSH_CHANGES");
        assert_eq!(config.request_timeout_secs, 10);
    }
}
