//! Relay sources feeding change batches to the router
//!
//! A `RelaySource` yields change batches with an acknowledgement handle.
//! [`run`] drains a source into a [`ChangeRouter`], acknowledging each
//! delivery after routing. Routing never fails a delivery, so every
//! delivery is acknowledged exactly once.

use crate::error::Result;
use crate::event::{ChangeBatch, TransportRecord};
use crate::router::{ChangeRouter, IngestSummary};
use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

pub mod nats;

pub use nats::{NatsRelay, NatsRelayConfig};

type AckFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// A change batch pending acknowledgement
pub struct RelayDelivery {
    pub batch: ChangeBatch,
    ack_fn: Option<AckFn>,
}

impl RelayDelivery {
    /// A delivery that needs no acknowledgement
    pub fn new(batch: ChangeBatch) -> Self {
        Self { batch, ack_fn: None }
    }

    /// A delivery acknowledged by calling `ack_fn`
    pub fn with_ack(
        batch: ChangeBatch,
        ack_fn: impl FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    ) -> Self {
        Self {
            batch,
            ack_fn: Some(Box::new(ack_fn)),
        }
    }

    /// Acknowledge the delivery to the source
    pub async fn ack(self) -> Result<()> {
        match self.ack_fn {
            Some(ack) => ack().await,
            None => Ok(()),
        }
    }
}

/// Async stream of relay deliveries
#[async_trait]
pub trait RelaySource: Send {
    /// Next delivery; `Ok(None)` once the source is closed
    async fn next(&mut self) -> Result<Option<RelayDelivery>>;

    /// Source name (e.g., "nats", "memory")
    fn name(&self) -> &str;
}

/// Totals for a drained source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub batches: usize,
    pub records: usize,
    pub notified: usize,
    pub failed: usize,
}

impl RelayStats {
    fn add(&mut self, summary: &IngestSummary) {
        self.batches += 1;
        self.records += summary.processed;
        self.notified += summary.notified;
        self.failed += summary.failed;
    }
}

/// Route every delivery of `source` until it closes
///
/// Returns early only when the source itself fails.
pub async fn run(source: &mut dyn RelaySource, router: &ChangeRouter) -> Result<RelayStats> {
    let mut stats = RelayStats::default();
    tracing::info!(source = source.name(), "Relay started");

    while let Some(delivery) = source.next().await? {
        let summary = router.ingest(&delivery.batch).await;
        stats.add(&summary);
        if let Err(e) = delivery.ack().await {
            tracing::warn!(source = source.name(), error = %e, "Failed to acknowledge relay delivery");
        }
    }

    tracing::info!(
        source = source.name(),
        batches = stats.batches,
        records = stats.records,
        "Relay closed"
    );
    Ok(stats)
}

/// In-process relay backed by a channel, for testing and single-process use
pub struct MemoryRelay {
    rx: mpsc::Receiver<ChangeBatch>,
}

/// Publishing half of a [`MemoryRelay`]
#[derive(Clone)]
pub struct MemoryRelaySender {
    tx: mpsc::Sender<ChangeBatch>,
}

impl MemoryRelay {
    /// Bounded relay and its sender
    pub fn channel(capacity: usize) -> (MemoryRelaySender, MemoryRelay) {
        let (tx, rx) = mpsc::channel(capacity);
        (MemoryRelaySender { tx }, MemoryRelay { rx })
    }
}

impl MemoryRelaySender {
    /// Publish a whole batch
    pub async fn send_batch(&self, batch: ChangeBatch) -> Result<()> {
        self.tx
            .send(batch)
            .await
            .map_err(|_| crate::error::PushError::Relay("memory relay closed".to_string()))
    }

    /// Publish one relay message body as a single-record batch
    pub async fn publish(&self, message: impl Into<String>) -> Result<()> {
        self.send_batch(ChangeBatch::new(vec![TransportRecord::relay_value(message)]))
            .await
    }
}

#[async_trait]
impl RelaySource for MemoryRelay {
    async fn next(&mut self) -> Result<Option<RelayDelivery>> {
        Ok(self.rx.recv().await.map(RelayDelivery::new))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
