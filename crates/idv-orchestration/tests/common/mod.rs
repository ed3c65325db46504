//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use idv_orchestration::{
    BatchOperation, BlockSyncReconciler, CacheDb, CallbackConfig, CallbackDeliveryEngine,
    CallbackTransport, ErrorReporter, InMemoryKVStore, KVStoreError, KeyValueStore,
    LedgerClient, OrchestrationError, OrchestrationMetrics, RequestLockTable, RequestProcessor,
    Result, RetryPolicy, ScanResult, StaticRetryPolicy,
};
use parking_lot::Mutex;
use serde_json::Value;
use shared_types::entities::{BlockHeight, NodeId, RequestId};
use shared_types::ipc::{BusMessage, LedgerTransaction, RequestDetail};
use tokio::sync::Notify;

// =============================================================================
// LEDGER
// =============================================================================

#[derive(Default)]
pub struct StubLedger {
    pub height: AtomicU64,
    pub submitted: Mutex<Vec<LedgerTransaction>>,
    pub accessor_groups: Mutex<HashMap<String, String>>,
    pub request_details: Mutex<HashMap<RequestId, RequestDetail>>,
}

impl StubLedger {
    pub fn at(height: BlockHeight) -> Arc<Self> {
        let ledger = Self::default();
        ledger.height.store(height, Ordering::SeqCst);
        Arc::new(ledger)
    }

    pub fn advance_to(&self, height: BlockHeight) {
        self.height.fetch_max(height, Ordering::SeqCst);
    }

    pub fn submitted_fns(&self) -> Vec<String> {
        self.submitted
            .lock()
            .iter()
            .map(|tx| tx.fn_name.clone())
            .collect()
    }

    pub fn last_submitted(&self) -> Option<LedgerTransaction> {
        self.submitted.lock().last().cloned()
    }
}

#[async_trait]
impl LedgerClient for StubLedger {
    fn latest_block_height(&self) -> BlockHeight {
        self.height.load(Ordering::SeqCst)
    }

    async fn submit_transaction(&self, transaction: LedgerTransaction) -> Result<()> {
        self.submitted.lock().push(transaction);
        Ok(())
    }

    async fn get_accessor_group_id(&self, accessor_id: &str) -> Result<Option<String>> {
        Ok(self.accessor_groups.lock().get(accessor_id).cloned())
    }

    async fn get_request_detail(&self, request_id: &RequestId) -> Result<Option<RequestDetail>> {
        Ok(self.request_details.lock().get(request_id).cloned())
    }
}

// =============================================================================
// REQUEST PROCESSOR
// =============================================================================

/// Counts processing calls per request. Optionally parks the first call
/// until released.
#[derive(Default)]
pub struct CountingProcessor {
    pub calls: Mutex<Vec<(NodeId, RequestId)>>,
    gate: Option<Gate>,
}

impl CountingProcessor {
    pub fn gated() -> (Arc<Self>, Gate) {
        let gate = Gate::new();
        let processor = Self {
            calls: Mutex::new(Vec::new()),
            gate: Some(gate.clone()),
        };
        (Arc::new(processor), gate)
    }

    pub fn count(&self, request_id: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(_, r)| r.as_str() == request_id)
            .count()
    }

    pub fn total(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl RequestProcessor for CountingProcessor {
    async fn process_request(&self, node_id: &NodeId, message: BusMessage) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        self.calls
            .lock()
            .push((node_id.clone(), message.request_id));
        Ok(())
    }
}

/// Fails every processing call, as a role handler rejecting the request would.
#[derive(Default)]
pub struct RejectingProcessor {
    pub attempts: AtomicU64,
}

#[async_trait]
impl RequestProcessor for RejectingProcessor {
    async fn process_request(&self, _node_id: &NodeId, message: BusMessage) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(OrchestrationError::Ledger(format!(
            "request {} rejected",
            message.request_id
        )))
    }
}

// =============================================================================
// GATE
// =============================================================================

/// One-shot rendezvous: the first caller of `pass` signals `reached` and
/// waits for `open`. Later callers go straight through.
#[derive(Clone)]
pub struct Gate {
    armed: Arc<AtomicBool>,
    reached: Arc<Notify>,
    released: Arc<Notify>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            armed: Arc::new(AtomicBool::new(true)),
            reached: Arc::new(Notify::new()),
            released: Arc::new(Notify::new()),
        }
    }

    pub async fn pass(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.released.notified().await;
        }
    }

    pub async fn wait_reached(&self) {
        self.reached.notified().await;
    }

    pub fn open(&self) {
        self.released.notify_one();
    }
}

// =============================================================================
// STORE
// =============================================================================

/// In-memory store whose first batch write parks after applying.
pub struct GatedStore {
    inner: InMemoryKVStore,
    pub gate: Gate,
}

impl GatedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryKVStore::new(),
            gate: Gate::new(),
        })
    }
}

#[async_trait]
impl KeyValueStore for GatedStore {
    async fn get(&self, key: &[u8]) -> std::result::Result<Option<Vec<u8>>, KVStoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> std::result::Result<(), KVStoreError> {
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &[u8]) -> std::result::Result<(), KVStoreError> {
        self.inner.delete(key).await
    }

    async fn atomic_batch_write(
        &self,
        operations: Vec<BatchOperation>,
    ) -> std::result::Result<(), KVStoreError> {
        self.inner.atomic_batch_write(operations).await?;
        self.gate.pass().await;
        Ok(())
    }

    async fn prefix_scan(&self, prefix: &[u8]) -> std::result::Result<ScanResult, KVStoreError> {
        self.inner.prefix_scan(prefix).await
    }
}

// =============================================================================
// REPORTER / TRANSPORT
// =============================================================================

#[derive(Default)]
pub struct CapturingReporter {
    pub errors: Mutex<Vec<(NodeId, OrchestrationError)>>,
}

impl CapturingReporter {
    pub fn actions(&self) -> Vec<String> {
        self.errors
            .lock()
            .iter()
            .map(|(_, e)| e.action().unwrap_or("-").to_string())
            .collect()
    }
}

#[async_trait]
impl ErrorReporter for CapturingReporter {
    async fn report(&self, node_id: &NodeId, error: OrchestrationError) {
        self.errors.lock().push((node_id.clone(), error));
    }
}

/// Records every POST and answers with a fixed status.
pub struct RecordingTransport {
    pub posts: Mutex<Vec<(String, Value)>>,
    status: AtomicU64,
}

impl RecordingTransport {
    pub fn answering(status: u16) -> Arc<Self> {
        Arc::new(Self {
            posts: Mutex::new(Vec::new()),
            status: AtomicU64::new(status as u64),
        })
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status as u64, Ordering::SeqCst);
    }

    pub fn urls(&self) -> Vec<String> {
        self.posts.lock().iter().map(|(url, _)| url.clone()).collect()
    }
}

#[async_trait]
impl CallbackTransport for RecordingTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<u16> {
        self.posts.lock().push((url.to_string(), body.clone()));
        Ok(self.status.load(Ordering::SeqCst) as u16)
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

pub struct ReconcilerHarness {
    pub reconciler: Arc<BlockSyncReconciler>,
    pub cache: Arc<CacheDb>,
    pub ledger: Arc<StubLedger>,
    pub reporter: Arc<CapturingReporter>,
    pub metrics: Arc<OrchestrationMetrics>,
}

pub fn reconciler_with(
    store: Arc<dyn KeyValueStore>,
    ledger: Arc<StubLedger>,
    processor: Arc<dyn RequestProcessor>,
) -> ReconcilerHarness {
    let cache = Arc::new(CacheDb::new(store));
    let reporter = Arc::new(CapturingReporter::default());
    let metrics = Arc::new(OrchestrationMetrics::new());
    let reconciler = Arc::new(BlockSyncReconciler::new(
        Arc::new(RequestLockTable::new()),
        cache.clone(),
        ledger.clone(),
        processor,
        reporter.clone(),
        metrics.clone(),
    ));
    ReconcilerHarness {
        reconciler,
        cache,
        ledger,
        reporter,
        metrics,
    }
}

/// Fast fixed-interval retries; `max_attempts` of `0` retries forever.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff_ms: 10,
        max_backoff_ms: 10,
        multiplier: 1.0,
    }
}

pub fn engine_with(
    cache: Arc<CacheDb>,
    transport: Arc<dyn CallbackTransport>,
    policy: RetryPolicy,
    config: CallbackConfig,
) -> (Arc<CallbackDeliveryEngine>, Arc<OrchestrationMetrics>) {
    let metrics = Arc::new(OrchestrationMetrics::new());
    let engine = Arc::new(CallbackDeliveryEngine::new(
        cache,
        transport,
        Arc::new(StaticRetryPolicy::uniform(policy)),
        metrics.clone(),
        config,
    ));
    (engine, metrics)
}

/// Poll `condition` until it holds; panics after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
