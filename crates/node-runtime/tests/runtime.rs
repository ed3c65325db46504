//! End-to-end runs of a node over the shared bus, with a scripted ledger
//! connector on the other side.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use idv_orchestration::{
    add_accessor_after_consent, CallbackDescriptor, CallbackKind, CallbackTransport,
    IdentityRecord, LedgerClient, OrchestrationError, Result, RetryPolicy,
    NOTIFY_ADD_ACCESSOR_RESULT,
};
use node_runtime::{NodeConfig, NodeContainer, NodeRuntime};
use parking_lot::Mutex;
use serde_json::{json, Value};
use shared_bus::{EventFilter, EventPublisher, EventTopic, InMemoryEventBus, NodeEvent};
use shared_types::entities::{BlockHeight, NodeId, NodeRole, RequestId};
use shared_types::ipc::{
    BusMessage, DataRequestEntry, LedgerQuery, LedgerTransaction, ParsedBlock, ParsedTransaction, PrivateMessageType,
    RequestDetail, TransactionOutcome, FN_ADD_ACCESSOR, FN_CLOSE_REQUEST,
    FN_REGISTER_MQ_DESTINATION,
};

const CALLBACK_BASE: &str = "https://client.example";

// =============================================================================
// TEST DOUBLES
// =============================================================================

struct RecordingTransport {
    posts: Mutex<Vec<(String, Value)>>,
    status: AtomicU16,
}

impl RecordingTransport {
    fn answering(status: u16) -> Arc<Self> {
        Arc::new(Self {
            posts: Mutex::new(Vec::new()),
            status: AtomicU16::new(status),
        })
    }

    fn posts_to(&self, kind: &str) -> Vec<Value> {
        let url = format!("{CALLBACK_BASE}/{kind}");
        self.posts
            .lock()
            .iter()
            .filter(|(u, _)| *u == url)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl CallbackTransport for RecordingTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<u16> {
        self.posts.lock().push((url.to_string(), body.clone()));
        Ok(self.status.load(Ordering::SeqCst))
    }
}

/// Answers queries and commits every submitted transaction.
#[derive(Default)]
struct ScriptedLedger {
    accessor_groups: Mutex<HashMap<String, String>>,
    request_details: Mutex<HashMap<RequestId, RequestDetail>>,
    submitted: Mutex<Vec<String>>,
}

impl ScriptedLedger {
    fn connect(self: &Arc<Self>, bus: &Arc<InMemoryEventBus>) {
        let mut sub = bus.subscribe(EventFilter::topics(vec![EventTopic::LedgerRequest]));
        let ledger = self.clone();
        let bus = bus.clone();
        tokio::spawn(async move {
            while let Some(event) = sub.recv().await {
                match event {
                    NodeEvent::TransactionSubmitted(tx) => {
                        ledger.submitted.lock().push(tx.fn_name.clone());
                        bus.publish(NodeEvent::TransactionResult {
                            tx_id: tx.tx_id,
                            outcome: TransactionOutcome::committed(),
                        })
                        .await;
                    }
                    NodeEvent::LedgerQuery {
                        correlation_id,
                        query,
                    } => {
                        let result = ledger.answer(&query);
                        bus.publish(NodeEvent::LedgerQueryResponse {
                            correlation_id,
                            result: Ok(result),
                        })
                        .await;
                    }
                    _ => {}
                }
            }
        });
    }

    fn answer(&self, query: &LedgerQuery) -> Value {
        match query {
            LedgerQuery::GetAccessorGroupId { accessor_id } => self
                .accessor_groups
                .lock()
                .get(accessor_id)
                .map_or(Value::Null, |group| json!(group)),
            LedgerQuery::GetRequestDetail { request_id } => self
                .request_details
                .lock()
                .get(request_id)
                .map_or(Value::Null, |detail| json!(detail)),
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn config(node_id: &str, role: NodeRole, data_dir: &Path) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.node.node_id = NodeId::from(node_id);
    config.node.role = role;
    config.storage.data_dir = data_dir.to_path_buf();
    config.runtime.shutdown_grace_secs = 2;
    for kind in CallbackKind::ALL {
        config
            .callback
            .urls
            .insert(kind, format!("{CALLBACK_BASE}/{kind}"));
    }
    let fast = RetryPolicy {
        max_attempts: 0,
        initial_backoff_ms: 10,
        max_backoff_ms: 10,
        multiplier: 1.0,
    };
    config.callback.core.event_retry = fast.clone();
    config.callback.core.error_retry = fast;
    config
}

fn start_node(
    config: NodeConfig,
    bus: &Arc<InMemoryEventBus>,
    transport: Arc<RecordingTransport>,
) -> NodeRuntime {
    let container = NodeContainer::with_transport(config, bus.clone(), transport).unwrap();
    NodeRuntime::with_container(container, bus.clone())
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

fn new_blocks(from: BlockHeight, to: BlockHeight, transactions: Vec<ParsedTransaction>) -> NodeEvent {
    NodeEvent::NewBlocks {
        from_height: from,
        to_height: to,
        blocks: vec![ParsedBlock {
            height: to,
            transactions,
        }],
    }
}

fn consent_request(request_id: &str, height: BlockHeight) -> NodeEvent {
    NodeEvent::MessageReceived {
        node_id: NodeId::from("idp1"),
        message: BusMessage::new(PrivateMessageType::ConsentRequest, request_id, height)
            .with_initial_salt("salt-1")
            .with_field("min_ial", json!(2.3)),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ready_request_forwarded_to_client() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryEventBus::new());
    let transport = RecordingTransport::answering(200);
    let runtime = start_node(config("idp1", NodeRole::Idp, dir.path()), &bus, transport.clone());
    runtime.start().await.unwrap();

    bus.publish(new_blocks(1, 5, vec![])).await;
    eventually(|| runtime.container().ledger.latest_block_height() == 5).await;
    bus.publish(consent_request("R1", 3)).await;

    eventually(|| !transport.posts_to("incoming_request").is_empty()).await;
    let body = &transport.posts_to("incoming_request")[0];
    assert_eq!(body["node_id"], "idp1");
    assert_eq!(body["request_id"], "R1");
    assert_eq!(body["min_ial"], 2.3);
    assert!(body.get("initial_salt").is_none());

    let salt = runtime
        .container()
        .cache
        .get_initial_salt(&NodeId::from("idp1"), &RequestId::from("R1"))
        .await
        .unwrap();
    assert_eq!(salt.as_deref(), Some("salt-1"));

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_early_request_waits_for_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryEventBus::new());
    let transport = RecordingTransport::answering(200);
    let runtime = start_node(config("idp1", NodeRole::Idp, dir.path()), &bus, transport.clone());
    runtime.start().await.unwrap();

    bus.publish(new_blocks(1, 5, vec![])).await;
    eventually(|| runtime.container().ledger.latest_block_height() == 5).await;
    bus.publish(consent_request("R2", 10)).await;

    eventually(|| runtime.container().metrics.get("requests_buffered") == Some(1)).await;
    assert!(transport.posts_to("incoming_request").is_empty());

    bus.publish(new_blocks(6, 11, vec![])).await;
    eventually(|| transport.posts_to("incoming_request").len() == 1).await;
    assert_eq!(transport.posts_to("incoming_request")[0]["request_id"], "R2");

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_add_accessor_workflow_over_bus() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryEventBus::new());
    let ledger = Arc::new(ScriptedLedger::default());
    ledger
        .accessor_groups
        .lock()
        .insert("accessor-old".into(), "group-1".into());
    ledger.connect(&bus);

    let transport = RecordingTransport::answering(200);
    let runtime = start_node(config("idp1", NodeRole::Idp, dir.path()), &bus, transport.clone());
    runtime.start().await.unwrap();
    let container = runtime.container();

    let node = NodeId::from("idp1");
    let request = RequestId::from("R3");
    container
        .cache
        .set_identity_from_request_id(
            &node,
            &request,
            &IdentityRecord {
                hash_id: "hash-of-cid".into(),
                ial: Some(2.3),
                accessor_type: "RSA".into(),
                accessor_public_key: "-----BEGIN PUBLIC KEY-----".into(),
                accessor_id: "accessor-new".into(),
                sid: "citizen_id:1234".into(),
                associated: false,
                secret: "magic".into(),
            },
        )
        .await
        .unwrap();

    add_accessor_after_consent(
        &container.continuations,
        &node,
        &request,
        "accessor-old",
        CallbackDescriptor::new(NOTIFY_ADD_ACCESSOR_RESULT)
            .with_args(vec![json!({"reference_id": "ref-1"})]),
    )
    .await
    .unwrap();

    eventually(|| !transport.posts_to("identity_result").is_empty()).await;
    assert_eq!(
        *ledger.submitted.lock(),
        vec![FN_ADD_ACCESSOR.to_string(), FN_REGISTER_MQ_DESTINATION.to_string()]
    );
    let body = &transport.posts_to("identity_result")[0];
    assert_eq!(body["type"], "add_accessor_result");
    assert_eq!(body["reference_id"], "ref-1");
    assert_eq!(body["success"], true);
    assert_eq!(body["secret"], "magic");
    assert!(container.continuations.pending().await.unwrap().is_empty());

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_closed_data_request_cleaned_up_via_ledger_query() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryEventBus::new());
    let ledger = Arc::new(ScriptedLedger::default());
    let request = RequestId::from("R4");
    ledger.request_details.lock().insert(
        request.clone(),
        RequestDetail {
            request_id: request.clone(),
            data_request_list: vec![DataRequestEntry {
                service_id: "bank_statement".into(),
                as_id_list: vec![NodeId::from("as1")],
            }],
            closed: true,
            timed_out: false,
        },
    );
    ledger.connect(&bus);

    let runtime = start_node(
        config("as1", NodeRole::As, dir.path()),
        &bus,
        RecordingTransport::answering(200),
    );
    runtime.start().await.unwrap();
    let container = runtime.container();

    let node = NodeId::from("as1");
    container
        .cache
        .set_initial_salt(&node, &request, "salt-4")
        .await
        .unwrap();
    container
        .cache
        .set_rp_id_from_data_request_id(&node, &request, "bank_statement", &NodeId::from("rp1"))
        .await
        .unwrap();

    bus.publish(new_blocks(
        1,
        1,
        vec![ParsedTransaction::new(FN_CLOSE_REQUEST, json!({"request_id": "R4"}))],
    ))
    .await;

    for _ in 0..200 {
        let salt = container.cache.get_initial_salt(&node, &request).await.unwrap();
        if salt.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(container
        .cache
        .get_initial_salt(&node, &request)
        .await
        .unwrap()
        .is_none());
    assert!(container
        .cache
        .get_rp_id_from_data_request_id(&node, &request, "bank_statement")
        .await
        .unwrap()
        .is_none());

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_undelivered_callback_resumed_after_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let bus = Arc::new(InMemoryEventBus::new());
        let failing = RecordingTransport::answering(503);
        let runtime = start_node(config("idp1", NodeRole::Idp, dir.path()), &bus, failing.clone());
        runtime.start().await.unwrap();

        bus.publish(new_blocks(1, 5, vec![])).await;
        eventually(|| runtime.container().ledger.latest_block_height() == 5).await;
        bus.publish(consent_request("R5", 2)).await;
        eventually(|| failing.posts_to("incoming_request").len() >= 2).await;

        runtime.shutdown().await;
    }

    let bus = Arc::new(InMemoryEventBus::new());
    let transport = RecordingTransport::answering(200);
    let runtime = start_node(config("idp1", NodeRole::Idp, dir.path()), &bus, transport.clone());
    runtime.start().await.unwrap();

    eventually(|| transport.posts_to("incoming_request").len() == 1).await;
    assert_eq!(transport.posts_to("incoming_request")[0]["request_id"], "R5");
    runtime.container().callbacks.wait_idle().await;
    assert!(runtime.container().callbacks.stored_jobs().await.unwrap().is_empty());

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_message_queue_error_reported_to_client() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryEventBus::new());
    let transport = RecordingTransport::answering(200);
    let runtime = start_node(config("rp1", NodeRole::Rp, dir.path()), &bus, transport.clone());
    runtime.start().await.unwrap();

    bus.publish(NodeEvent::MessageQueueError {
        node_id: None,
        error: "socket closed".into(),
    })
    .await;

    eventually(|| !transport.posts_to("error").is_empty()).await;
    let body = &transport.posts_to("error")[0];
    assert_eq!(body["action"], "handleMessageQueueError");
    assert_eq!(body["error"]["code"], "message_queue_error");

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ledger_calls_fail_without_connector() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryEventBus::new());
    let runtime = start_node(
        config("idp1", NodeRole::Idp, dir.path()),
        &bus,
        RecordingTransport::answering(200),
    );
    runtime.start().await.unwrap();
    let container = runtime.container();

    let tx = LedgerTransaction::new(NodeId::from("idp1"), FN_ADD_ACCESSOR, json!({}));
    assert!(container.ledger.submit_transaction(tx).await.is_err());

    let started = std::time::Instant::now();
    let err = container
        .ledger
        .get_accessor_group_id("accessor-old")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::Ledger(_)));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(bus.stats().undelivered() >= 2);

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_metrics_text_exposes_core_counters() {
    // Another test in this binary may have registered already
    let _ = node_telemetry::register_metrics();

    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryEventBus::new());
    let transport = RecordingTransport::answering(200);
    let runtime = start_node(config("idp1", NodeRole::Idp, dir.path()), &bus, transport.clone());
    runtime.start().await.unwrap();

    bus.publish(new_blocks(1, 5, vec![])).await;
    eventually(|| runtime.container().ledger.latest_block_height() == 5).await;
    bus.publish(consent_request("R6", 2)).await;
    eventually(|| transport.posts_to("incoming_request").len() == 1).await;

    let text = runtime.metrics_text().unwrap();
    assert!(text.contains("idv_core_counter{counter=\"requests_processed\"}"));
    assert!(text.contains("idv_core_counter{counter=\"callbacks_delivered\"}"));

    runtime.shutdown().await;
}
