//! Name-addressed workflow resumption.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use shared_types::entities::{NodeId, TxId};
use shared_types::ipc::{LedgerTransaction, TransactionOutcome};
use tracing::{debug, info, warn};

use crate::adapters::CacheDb;
use crate::domain::{CallbackDescriptor, ContinuationRecord, SavedArgs};
use crate::error::{ErrorPayload, OrchestrationError, Result};
use crate::metrics::OrchestrationMetrics;
use crate::ports::inbound::TransactionResultHandler;
use crate::ports::outbound::LedgerClient;

/// One resumable workflow step.
///
/// A step gets the registry back at resume time so it can submit the next
/// transaction or invoke the terminal callback.
#[async_trait]
pub trait ContinuationStep: Send + Sync {
    async fn resume(
        &self,
        registry: &ContinuationRegistry,
        node_id: &NodeId,
        outcome: TransactionOutcome,
        saved: SavedArgs,
        callback: CallbackDescriptor,
    ) -> Result<()>;
}

/// Final consumer of a workflow's result, named by the workflow's caller.
#[async_trait]
pub trait TerminalCallback: Send + Sync {
    async fn invoke(
        &self,
        node_id: &NodeId,
        payload: std::result::Result<Value, ErrorPayload>,
        additional_args: Option<Vec<Value>>,
    ) -> Result<()>;
}

/// Registry of named steps and callbacks, plus the persisted records of
/// steps waiting on a transaction.
pub struct ContinuationRegistry {
    ledger: Arc<dyn LedgerClient>,
    cache: Arc<CacheDb>,
    steps: RwLock<HashMap<String, Arc<dyn ContinuationStep>>>,
    callbacks: RwLock<HashMap<String, Arc<dyn TerminalCallback>>>,
    metrics: Arc<OrchestrationMetrics>,
}

impl ContinuationRegistry {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        cache: Arc<CacheDb>,
        metrics: Arc<OrchestrationMetrics>,
    ) -> Self {
        Self {
            ledger,
            cache,
            steps: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    pub fn register_step(&self, name: impl Into<String>, step: Arc<dyn ContinuationStep>) {
        let name = name.into();
        if self.steps.write().insert(name.clone(), step).is_some() {
            warn!(continuation = %name, "Continuation step registered twice, keeping the latest");
        }
    }

    pub fn register_callback(&self, name: impl Into<String>, callback: Arc<dyn TerminalCallback>) {
        let name = name.into();
        if self.callbacks.write().insert(name.clone(), callback).is_some() {
            warn!(callback = %name, "Terminal callback registered twice, keeping the latest");
        }
    }

    pub fn has_step(&self, name: &str) -> bool {
        self.steps.read().contains_key(name)
    }

    pub fn has_callback(&self, name: &str) -> bool {
        self.callbacks.read().contains_key(name)
    }

    /// Persist the continuation, then submit the transaction.
    ///
    /// The record is written before submission so a result that arrives
    /// immediately, or after a restart, always finds it. If submission
    /// fails the record is removed again.
    pub async fn submit(
        &self,
        transaction: LedgerTransaction,
        continuation: &str,
        saved: SavedArgs,
        callback: CallbackDescriptor,
    ) -> Result<TxId> {
        if !self.has_step(continuation) {
            return Err(OrchestrationError::UnknownContinuation(continuation.to_string()));
        }

        let tx_id = transaction.tx_id;
        let record = ContinuationRecord {
            tx_id,
            node_id: transaction.node_id.clone(),
            continuation: continuation.to_string(),
            saved_args: saved,
            callback,
            created_at: Utc::now(),
        };
        self.cache.put_continuation(&record).await?;
        self.metrics.record_continuation_saved();

        let fn_name = transaction.fn_name.clone();
        if let Err(e) = self.ledger.submit_transaction(transaction).await {
            if let Err(cleanup) = self.cache.remove_continuation(&tx_id).await {
                warn!(%tx_id, error = %cleanup, "Failed to drop continuation of unsent transaction");
            }
            return Err(e);
        }

        debug!(%tx_id, fn_name, continuation, "Transaction submitted, step suspended");
        Ok(tx_id)
    }

    /// Resume the step waiting on `tx_id`.
    ///
    /// Returns `Ok(false)` when nothing waits on it. A record naming an
    /// unregistered step is left in place and reported as an error.
    pub async fn resume(&self, tx_id: TxId, outcome: TransactionOutcome) -> Result<bool> {
        let Some(record) = self.cache.get_continuation(&tx_id).await? else {
            debug!(%tx_id, "No continuation waiting on transaction");
            self.metrics.record_stale_result();
            return Ok(false);
        };
        let step = self
            .steps
            .read()
            .get(&record.continuation)
            .cloned()
            .ok_or_else(|| OrchestrationError::UnknownContinuation(record.continuation.clone()))?;

        // Another delivery of the same result may have taken it meanwhile.
        let Some(record) = self.cache.take_continuation(&tx_id).await? else {
            debug!(%tx_id, "Continuation already resumed");
            self.metrics.record_stale_result();
            return Ok(false);
        };

        self.metrics.record_continuation_resumed();
        info!(
            %tx_id,
            node_id = %record.node_id,
            continuation = %record.continuation,
            committed = outcome.is_committed(),
            "Resuming continuation"
        );
        step.resume(
            self,
            &record.node_id,
            outcome,
            record.saved_args,
            record.callback,
        )
        .await?;
        Ok(true)
    }

    /// Hand a result to the workflow caller's terminal callback.
    pub async fn invoke_callback(
        &self,
        node_id: &NodeId,
        descriptor: CallbackDescriptor,
        payload: std::result::Result<Value, ErrorPayload>,
    ) -> Result<()> {
        let callback = self
            .callbacks
            .read()
            .get(&descriptor.fn_name)
            .cloned()
            .ok_or_else(|| OrchestrationError::UnknownCallback(descriptor.fn_name.clone()))?;
        callback
            .invoke(node_id, payload, descriptor.additional_args)
            .await
    }

    /// Steps currently waiting on a transaction
    pub async fn pending(&self) -> Result<Vec<ContinuationRecord>> {
        self.cache.list_continuations().await
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    pub fn cache(&self) -> &Arc<CacheDb> {
        &self.cache
    }
}

#[async_trait]
impl TransactionResultHandler for ContinuationRegistry {
    async fn on_transaction_result(
        &self,
        tx_id: TxId,
        outcome: TransactionOutcome,
    ) -> Result<bool> {
        self.resume(tx_id, outcome).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryKVStore;
    use parking_lot::Mutex;
    use serde_json::json;
    use shared_types::entities::{BlockHeight, RequestId};
    use shared_types::ipc::RequestDetail;

    #[derive(Default)]
    struct RecordingLedger {
        submitted: Mutex<Vec<LedgerTransaction>>,
        fail: bool,
    }

    #[async_trait]
    impl LedgerClient for RecordingLedger {
        fn latest_block_height(&self) -> BlockHeight {
            0
        }
        async fn submit_transaction(&self, tx: LedgerTransaction) -> Result<()> {
            if self.fail {
                return Err(OrchestrationError::Ledger("unreachable".into()));
            }
            self.submitted.lock().push(tx);
            Ok(())
        }
        async fn get_accessor_group_id(&self, _id: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn get_request_detail(&self, _id: &RequestId) -> Result<Option<RequestDetail>> {
            Ok(None)
        }
    }

    /// Forwards the outcome to the terminal callback.
    struct Finish;

    #[async_trait]
    impl ContinuationStep for Finish {
        async fn resume(
            &self,
            registry: &ContinuationRegistry,
            node_id: &NodeId,
            outcome: TransactionOutcome,
            _saved: SavedArgs,
            callback: CallbackDescriptor,
        ) -> Result<()> {
            let payload = match outcome {
                TransactionOutcome::Committed { result } => Ok(result),
                TransactionOutcome::Rejected { reason } => Err(ErrorPayload::rejected(reason)),
            };
            registry.invoke_callback(node_id, callback, payload).await
        }
    }

    #[derive(Default)]
    struct Captured(Mutex<Vec<(std::result::Result<Value, ErrorPayload>, Option<Vec<Value>>)>>);

    #[async_trait]
    impl TerminalCallback for Captured {
        async fn invoke(
            &self,
            _node_id: &NodeId,
            payload: std::result::Result<Value, ErrorPayload>,
            additional_args: Option<Vec<Value>>,
        ) -> Result<()> {
            self.0.lock().push((payload, additional_args));
            Ok(())
        }
    }

    fn registry(ledger: Arc<RecordingLedger>) -> (ContinuationRegistry, Arc<Captured>) {
        let registry = ContinuationRegistry::new(
            ledger,
            Arc::new(CacheDb::new(Arc::new(InMemoryKVStore::new()))),
            Arc::new(OrchestrationMetrics::new()),
        );
        let captured = Arc::new(Captured::default());
        registry.register_step("test.finish", Arc::new(Finish));
        registry.register_callback("test.done", captured.clone());
        (registry, captured)
    }

    fn tx() -> LedgerTransaction {
        LedgerTransaction::new(NodeId::from("idp1"), "SetValue", json!({"k": 1}))
    }

    fn saved() -> SavedArgs {
        SavedArgs::Custom { args: json!({}) }
    }

    #[tokio::test]
    async fn test_resume_once() {
        let ledger = Arc::new(RecordingLedger::default());
        let (registry, captured) = registry(ledger.clone());

        let descriptor = CallbackDescriptor::new("test.done").with_args(vec![json!("ref-1")]);
        let tx_id = registry.submit(tx(), "test.finish", saved(), descriptor).await.unwrap();
        assert_eq!(ledger.submitted.lock().len(), 1);
        assert_eq!(registry.pending().await.unwrap().len(), 1);

        let outcome = TransactionOutcome::Committed { result: json!({"ok": true}) };
        assert!(registry.resume(tx_id, outcome.clone()).await.unwrap());
        assert!(!registry.resume(tx_id, outcome).await.unwrap());

        let calls = captured.0.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, Ok(json!({"ok": true})));
        assert_eq!(calls[0].1, Some(vec![json!("ref-1")]));
    }

    #[tokio::test]
    async fn test_unknown_step_rejected_before_submit() {
        let ledger = Arc::new(RecordingLedger::default());
        let (registry, _) = registry(ledger.clone());

        let result = registry
            .submit(tx(), "test.missing", saved(), CallbackDescriptor::new("test.done"))
            .await;
        assert!(matches!(result, Err(OrchestrationError::UnknownContinuation(_))));
        assert!(ledger.submitted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_submit_drops_record() {
        let ledger = Arc::new(RecordingLedger {
            fail: true,
            ..RecordingLedger::default()
        });
        let (registry, _) = registry(ledger);

        let result = registry
            .submit(tx(), "test.finish", saved(), CallbackDescriptor::new("test.done"))
            .await;
        assert!(matches!(result, Err(OrchestrationError::Ledger(_))));
        assert!(registry.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_result_is_stale() {
        let (registry, captured) = registry(Arc::new(RecordingLedger::default()));
        let resumed = registry
            .resume(TxId::new(), TransactionOutcome::rejected("nope"))
            .await
            .unwrap();
        assert!(!resumed);
        assert!(captured.0.lock().is_empty());
    }
}
