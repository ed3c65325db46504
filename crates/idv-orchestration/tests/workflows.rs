//! Add-accessor workflow across transaction results and restarts.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::StubLedger;
use idv_orchestration::{
    add_accessor_after_consent, register_add_accessor_steps, CacheDb, CallbackDescriptor,
    ContinuationRegistry, ErrorPayload, FileBackedKVStore, IdentityRecord, InMemoryKVStore,
    KeyValueStore, OrchestrationError, OrchestrationMetrics, Result, TerminalCallback,
    TransactionResultHandler,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use shared_types::entities::{NodeId, RequestId};
use shared_types::ipc::{TransactionOutcome, FN_ADD_ACCESSOR, FN_REGISTER_MQ_DESTINATION};

const DONE: &str = "test.addAccessorDone";

type Call = (NodeId, std::result::Result<Value, ErrorPayload>, Option<Vec<Value>>);

#[derive(Default)]
struct CapturingCallback {
    calls: Mutex<Vec<Call>>,
}

#[async_trait]
impl TerminalCallback for CapturingCallback {
    async fn invoke(
        &self,
        node_id: &NodeId,
        payload: std::result::Result<Value, ErrorPayload>,
        additional_args: Option<Vec<Value>>,
    ) -> Result<()> {
        self.calls
            .lock()
            .push((node_id.clone(), payload, additional_args));
        Ok(())
    }
}

fn node() -> NodeId {
    NodeId::from("idp1")
}

fn request() -> RequestId {
    RequestId::from("R1")
}

fn identity(ial: Option<f64>) -> IdentityRecord {
    IdentityRecord {
        hash_id: "hash-of-cid".into(),
        ial,
        accessor_type: "RSA".into(),
        accessor_public_key: "-----BEGIN PUBLIC KEY-----".into(),
        accessor_id: "accessor-new".into(),
        sid: "citizen_id:1234".into(),
        associated: true,
        secret: "magic".into(),
    }
}

fn registry_over(
    store: Arc<dyn KeyValueStore>,
    ledger: Arc<StubLedger>,
) -> (ContinuationRegistry, Arc<CapturingCallback>) {
    let registry = ContinuationRegistry::new(
        ledger,
        Arc::new(CacheDb::new(store)),
        Arc::new(OrchestrationMetrics::new()),
    );
    register_add_accessor_steps(&registry);
    let callback = Arc::new(CapturingCallback::default());
    registry.register_callback(DONE, callback.clone());
    (registry, callback)
}

async fn seed(registry: &ContinuationRegistry, ledger: &StubLedger, ial: Option<f64>) {
    ledger
        .accessor_groups
        .lock()
        .insert("accessor-old".into(), "group-1".into());
    registry
        .cache()
        .set_identity_from_request_id(&node(), &request(), &identity(ial))
        .await
        .unwrap();
}

fn descriptor() -> CallbackDescriptor {
    CallbackDescriptor::new(DONE).with_args(vec![json!({"reference_id": "ref-42"})])
}

#[tokio::test]
async fn test_with_ial_submits_two_transactions() {
    let ledger = StubLedger::at(0);
    let (registry, callback) = registry_over(Arc::new(InMemoryKVStore::new()), ledger.clone());
    seed(&registry, &ledger, Some(2.3)).await;

    let first = add_accessor_after_consent(&registry, &node(), &request(), "accessor-old", descriptor())
        .await
        .unwrap();
    assert_eq!(ledger.submitted_fns(), vec![FN_ADD_ACCESSOR]);
    let add = ledger.last_submitted().unwrap();
    assert_eq!(add.args["accessor_group_id"], "group-1");
    assert_eq!(add.args["accessor_id"], "accessor-new");

    assert!(registry
        .on_transaction_result(first, TransactionOutcome::committed())
        .await
        .unwrap());
    assert_eq!(
        ledger.submitted_fns(),
        vec![FN_ADD_ACCESSOR, FN_REGISTER_MQ_DESTINATION]
    );
    assert!(callback.calls.lock().is_empty());

    let register = ledger.last_submitted().unwrap();
    assert_eq!(register.args["users"][0]["hash_id"], "hash-of-cid");
    assert!(registry
        .on_transaction_result(register.tx_id, TransactionOutcome::committed())
        .await
        .unwrap());

    let calls = callback.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, Ok(json!({"secret": "magic", "associated": true})));
    assert_eq!(calls[0].2, Some(vec![json!({"reference_id": "ref-42"})]));
    drop(calls);

    assert!(registry
        .cache()
        .get_identity_from_request_id(&node(), &request())
        .await
        .unwrap()
        .is_none());
    assert!(registry.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_without_ial_submits_one_transaction() {
    let ledger = StubLedger::at(0);
    let (registry, callback) = registry_over(Arc::new(InMemoryKVStore::new()), ledger.clone());
    seed(&registry, &ledger, None).await;

    let tx_id = add_accessor_after_consent(&registry, &node(), &request(), "accessor-old", descriptor())
        .await
        .unwrap();
    registry
        .on_transaction_result(tx_id, TransactionOutcome::committed())
        .await
        .unwrap();

    assert_eq!(ledger.submitted_fns(), vec![FN_ADD_ACCESSOR]);
    let calls = callback.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, Ok(json!({"secret": "magic", "associated": true})));
}

#[tokio::test]
async fn test_rejection_ends_chain_with_error() {
    let ledger = StubLedger::at(0);
    let (registry, callback) = registry_over(Arc::new(InMemoryKVStore::new()), ledger.clone());
    seed(&registry, &ledger, Some(1.1)).await;

    let tx_id = add_accessor_after_consent(&registry, &node(), &request(), "accessor-old", descriptor())
        .await
        .unwrap();
    registry
        .on_transaction_result(tx_id, TransactionOutcome::rejected("accessor exists"))
        .await
        .unwrap();

    // No further transaction, identity kept, error handed to the caller
    assert_eq!(ledger.submitted_fns(), vec![FN_ADD_ACCESSOR]);
    let calls = callback.calls.lock();
    assert_eq!(calls.len(), 1);
    let error = calls[0].1.as_ref().unwrap_err();
    assert_eq!(error.code, "transaction_rejected");
    assert!(error.message.contains("accessor exists"));
    drop(calls);
    assert!(registry
        .cache()
        .get_identity_from_request_id(&node(), &request())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_missing_identity_submits_nothing() {
    let ledger = StubLedger::at(0);
    let (registry, _) = registry_over(Arc::new(InMemoryKVStore::new()), ledger.clone());
    ledger
        .accessor_groups
        .lock()
        .insert("accessor-old".into(), "group-1".into());

    let result =
        add_accessor_after_consent(&registry, &node(), &request(), "accessor-old", descriptor()).await;
    assert!(matches!(result, Err(OrchestrationError::IdentityNotFound { .. })));
    assert!(ledger.submitted.lock().is_empty());
}

#[tokio::test]
async fn test_duplicate_result_resumes_once() {
    let ledger = StubLedger::at(0);
    let (registry, callback) = registry_over(Arc::new(InMemoryKVStore::new()), ledger.clone());
    seed(&registry, &ledger, None).await;

    let tx_id = add_accessor_after_consent(&registry, &node(), &request(), "accessor-old", descriptor())
        .await
        .unwrap();
    let (a, b) = tokio::join!(
        registry.on_transaction_result(tx_id, TransactionOutcome::committed()),
        registry.on_transaction_result(tx_id, TransactionOutcome::committed()),
    );
    assert_eq!([a.unwrap(), b.unwrap()].iter().filter(|r| **r).count(), 1);
    assert_eq!(callback.calls.lock().len(), 1);
}

#[tokio::test]
async fn test_chain_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.db");
    let ledger = StubLedger::at(0);

    // Before the restart: step 1 suspended on AddAccessor
    let first = {
        let store = Arc::new(FileBackedKVStore::open(&path).unwrap());
        let (registry, _) = registry_over(store, ledger.clone());
        seed(&registry, &ledger, Some(2.3)).await;
        add_accessor_after_consent(&registry, &node(), &request(), "accessor-old", descriptor())
            .await
            .unwrap()
    };

    // After the restart: a fresh registry resolves the steps by name
    let store = Arc::new(FileBackedKVStore::open(&path).unwrap());
    let (registry, callback) = registry_over(store, ledger.clone());
    assert_eq!(registry.pending().await.unwrap().len(), 1);

    registry
        .on_transaction_result(first, TransactionOutcome::committed())
        .await
        .unwrap();
    let second = ledger.last_submitted().unwrap().tx_id;
    registry
        .on_transaction_result(second, TransactionOutcome::committed())
        .await
        .unwrap();

    assert_eq!(
        ledger.submitted_fns(),
        vec![FN_ADD_ACCESSOR, FN_REGISTER_MQ_DESTINATION]
    );
    let calls = callback.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, node());
    assert_eq!(calls[0].1, Ok(json!({"secret": "magic", "associated": true})));
    assert_eq!(calls[0].2, Some(vec![json!({"reference_id": "ref-42"})]));
    drop(calls);
    assert!(registry.pending().await.unwrap().is_empty());
}
