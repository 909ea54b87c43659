//! In-memory integration tests
//!
//! End-to-end tests driving the full pipeline through the public API with
//! in-memory storage, a recording transport, and the channel relay. Covers
//! registration, broadcast aggregation, change ingestion, filtering, and
//! relay draining.

use a3s_push::relay;
use a3s_push::{
    ApiRequest, Backends, ChangeBatch, CredentialProvider, Handler, MemoryObjectStore,
    MemoryRelay, ObjectStore, PushConfig, PushError, PushOptions, PushTransport, PutCondition,
    Result, SharedStoreConnector, StoredObject, Subscription, TemporaryCredentials,
    TransportRecord,
};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const MERGE: &str = "merge";
const STATE: &str = "state";

// ─── Test doubles ───────────────────────────────────────────────

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, Value)>>,
    broken: Mutex<Option<String>>,
}

impl RecordingTransport {
    fn endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self.sent.lock().unwrap().iter().map(|(e, _)| e.clone()).collect();
        endpoints.sort();
        endpoints
    }

    fn payloads(&self) -> Vec<Value> {
        self.sent.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }

    fn break_endpoint(&self, endpoint: &str) {
        *self.broken.lock().unwrap() = Some(endpoint.to_string());
    }
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn send(&self, subscription: &Subscription, payload: &str, _: &PushOptions) -> Result<()> {
        if self.broken.lock().unwrap().as_deref() == Some(subscription.endpoint.as_str()) {
            return Err(PushError::Delivery {
                endpoint: subscription.endpoint.clone(),
                reason: "410 Gone".to_string(),
            });
        }
        let payload = serde_json::from_str(payload).unwrap_or_else(|_| Value::String(payload.to_string()));
        self.sent
            .lock()
            .unwrap()
            .push((subscription.endpoint.clone(), payload));
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Memory store that fails reads of one key
struct FlakyStore {
    inner: MemoryObjectStore,
    failing_key: String,
    reads: AtomicUsize,
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if key == self.failing_key {
            return Err(PushError::StorageUnavailable(format!("read of {} timed out", key)));
        }
        self.inner.get(bucket, key).await
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        condition: PutCondition,
    ) -> Result<String> {
        self.inner.put(bucket, key, body, content_type, condition).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

struct DeniedCredentials(AtomicUsize);

#[async_trait]
impl CredentialProvider for DeniedCredentials {
    async fn assume_role(&self, role: &str, _: &str) -> Result<TemporaryCredentials> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err(PushError::Credentials(format!("not authorised to assume {}", role)))
    }
}

struct Pipeline {
    handler: Handler,
    store: Arc<FlakyStore>,
    transport: Arc<RecordingTransport>,
    credentials: Arc<DeniedCredentials>,
}

fn config() -> PushConfig {
    let mut public = vec![0x04u8];
    public.extend([3u8; 64]);
    PushConfig {
        domain: "mailto:push@example.com".to_string(),
        vapid_public_key: URL_SAFE_NO_PAD.encode(public),
        vapid_private_key: URL_SAFE_NO_PAD.encode([5u8; 32]),
        state_bucket: STATE.to_string(),
        target_language: "en".to_string(),
        elevated_role: "arn:aws:iam::1:role/appw".to_string(),
        merge_bucket: MERGE.to_string(),
        ..Default::default()
    }
}

fn pipeline() -> Pipeline {
    let store = Arc::new(FlakyStore {
        inner: MemoryObjectStore::new(),
        failing_key: "pips/clip/pid.p0broken.json".to_string(),
        reads: AtomicUsize::new(0),
    });
    let transport = Arc::new(RecordingTransport::default());
    let credentials = Arc::new(DeniedCredentials(AtomicUsize::new(0)));

    let handler = Handler::new(
        &config(),
        Backends {
            store: store.clone(),
            transport: transport.clone(),
            credentials: credentials.clone(),
            connector: Arc::new(SharedStoreConnector::new(store.clone())),
        },
    );

    Pipeline {
        handler,
        store,
        transport,
        credentials,
    }
}

fn storage_record(bucket: &str, key: &str) -> Value {
    let message = json!({
        "Records": [{"s3": {"bucket": {"name": bucket}, "object": {"key": key}}}]
    });
    TransportRecord::relay_value(message.to_string())
}

fn document(entity_type: &str, lang: &str) -> Value {
    json!({"pips": {entity_type: {"title": "Programme", "languages": {"language": [{"$": lang}]}}}})
}

async fn put_doc(p: &Pipeline, key: &str, doc: &Value) {
    p.store.inner.put_json(MERGE, key, doc).await.unwrap();
}

async fn register(p: &Pipeline, endpoints: &[&str]) {
    for endpoint in endpoints {
        let request = ApiRequest::json("/register", &json!({"subscription": {"endpoint": endpoint}}));
        assert_eq!(p.handler.register_or_send_to_all(&request).await.status_code, 201);
    }
}

// ─── Registry ───────────────────────────────────────────────────

#[tokio::test]
async fn test_upsert_replaces_existing_endpoint() {
    let p = pipeline();
    register(&p, &["A", "B"]).await;

    let request = ApiRequest::json("/register", &json!({"endpoint": "A", "v": 2}));
    assert_eq!(p.handler.register(&request).await.status_code, 201);

    let mut all: Vec<Value> = p
        .handler
        .registry()
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .map(|s| serde_json::to_value(s).unwrap())
        .collect();
    all.sort_by_key(|v| v["endpoint"].as_str().unwrap_or_default().to_string());
    assert_eq!(all, vec![json!({"endpoint": "A", "v": 2}), json!({"endpoint": "B"})]);
}

#[tokio::test]
async fn test_distinct_endpoints_accumulate() {
    let p = pipeline();
    let endpoints: Vec<String> = (0..8).map(|i| format!("https://push.example.com/{}", i)).collect();
    let refs: Vec<&str> = endpoints.iter().map(String::as_str).collect();
    register(&p, &refs).await;

    assert_eq!(p.handler.registry().list_all().await.unwrap().len(), 8);
}

// ─── Direct broadcast ───────────────────────────────────────────

#[tokio::test]
async fn test_broadcast_to_empty_registry_succeeds() {
    let p = pipeline();
    let response = p
        .handler
        .register_or_send_to_all(&ApiRequest::json("/sendToAll", &json!({"payload": "hi"})))
        .await;
    assert_eq!(response.status_code, 201);
    assert_eq!(response.body, "{}");
    assert!(p.transport.endpoints().is_empty());
}

#[tokio::test]
async fn test_one_failed_delivery_fails_the_broadcast() {
    let p = pipeline();
    register(&p, &["A", "B", "C"]).await;
    p.transport.break_endpoint("B");

    let response = p
        .handler
        .register_or_send_to_all(&ApiRequest::json("/sendToAll", &json!({"payload": {"n": 1}})))
        .await;
    assert_eq!(response.status_code, 500);
    assert!(response.json().unwrap()["error"].as_str().unwrap().contains("B"));
    assert_eq!(p.transport.endpoints(), vec!["A", "C"]);
}

// ─── Change ingestion ───────────────────────────────────────────

#[tokio::test]
async fn test_mixed_batch_reports_every_record() {
    let p = pipeline();
    register(&p, &["A", "B"]).await;
    put_doc(&p, "pips/clip/pid.p0abc.json", &document("clip", "en")).await;

    let batch = ChangeBatch::new(vec![
        json!({"EventSource": "aws:sqs", "body": "{}"}),
        storage_record(MERGE, "pips/clip/pid.p0abc.json"),
        storage_record(MERGE, "pips/clip/pid.p0broken.json"),
    ]);

    let message = p.handler.notify_new_or_changed(&batch).await;
    assert_eq!(message, "Successfully processed 3 messages.");

    assert_eq!(p.transport.endpoints(), vec!["A", "B"]);
    let payload = &p.transport.payloads()[0];
    assert_eq!(payload["msg"], "new or changed clip p0abc");
    assert_eq!(payload["pid"], "p0abc");
    assert_eq!(payload["entity_type"], "clip");
    assert_eq!(payload["entity"]["title"], "Programme");
}

#[tokio::test]
async fn test_language_mismatch_and_ignored_types_stay_silent() {
    let p = pipeline();
    register(&p, &["A"]).await;
    put_doc(&p, "pips/episode/pid.p1.json", &document("episode", "cy")).await;
    for entity_type in ["availability", "brand", "series"] {
        put_doc(&p, &format!("pips/{}/pid.p2.json", entity_type), &document(entity_type, "en")).await;
    }

    let batch = ChangeBatch::new(vec![
        storage_record(MERGE, "pips/episode/pid.p1.json"),
        storage_record(MERGE, "pips/availability/pid.p2.json"),
        storage_record(MERGE, "pips/brand/pid.p2.json"),
        storage_record(MERGE, "pips/series/pid.p2.json"),
    ]);
    let summary = p.handler.router().ingest(&batch).await;

    assert_eq!(summary.processed, 4);
    assert_eq!(summary.notified, 0);
    assert!(p.transport.endpoints().is_empty());
}

#[tokio::test]
async fn test_reserved_prefix_never_fetches() {
    let p = pipeline();
    register(&p, &["A"]).await;
    let reads_before = p.store.reads.load(Ordering::SeqCst);

    let batch = ChangeBatch::new(vec![
        storage_record(MERGE, "schedule/2024/01/clip/pid.p3.json"),
        storage_record("foreign", "schedule/a/b/c/clip/pid.p3.json"),
    ]);
    p.handler.notify_new_or_changed(&batch).await;

    assert_eq!(p.store.reads.load(Ordering::SeqCst), reads_before);
    assert_eq!(p.credentials.0.load(Ordering::SeqCst), 0);
    assert!(p.transport.endpoints().is_empty());
}

#[tokio::test]
async fn test_foreign_fetch_failure_is_a_no_op() {
    let p = pipeline();
    register(&p, &["A"]).await;

    let batch = ChangeBatch::new(vec![storage_record("appw-partner", "a/b/c/d/clip/pid.p4.json")]);
    let summary = p.handler.router().ingest(&batch).await;

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(p.credentials.0.load(Ordering::SeqCst), 1);
    assert!(p.transport.endpoints().is_empty());
}

// ─── Relay ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_memory_relay_drains_into_router() {
    let p = pipeline();
    register(&p, &["A"]).await;
    put_doc(&p, "pips/clip/pid.p5.json", &document("clip", "en")).await;

    let (tx, mut source) = MemoryRelay::channel(8);
    let change = json!({
        "Records": [{"s3": {"bucket": {"name": MERGE}, "object": {"key": "pips/clip/pid.p5.json"}}}]
    });
    tx.publish(change.to_string()).await.unwrap();
    tx.publish(r#"{"not": "storage"}"#).await.unwrap();
    drop(tx);

    let stats = relay::run(&mut source, p.handler.router()).await.unwrap();
    assert_eq!(stats.batches, 2);
    assert_eq!(stats.records, 2);
    assert_eq!(stats.notified, 1);
    assert_eq!(p.transport.endpoints(), vec!["A"]);
}
