//! Ledger client over the shared bus.
//!
//! Transactions go out as `TransactionSubmitted`; queries go out as
//! `LedgerQuery` and wait for the `LedgerQueryResponse` carrying the same
//! correlation id. The event router feeds responses back via [`BusLedgerClient::complete`].
//!
//! Both outbound events travel on `EventTopic::LedgerRequest`, which only a
//! ledger connector subscribes to. A publish nobody accepts means there is
//! no connector, and the call fails at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use idv_orchestration::{LedgerClient, OrchestrationError, Result};
use node_telemetry::{
    log_event, metric_inc, time_histogram, LEDGER_HEIGHT, LEDGER_QUERY_DURATION, LEDGER_QUERY_TIMEOUTS,
    TRANSACTIONS_SUBMITTED,
};
use serde_json::Value;
use shared_bus::{EventPublisher, LedgerQueryError, NodeEvent};
use shared_types::entities::{BlockHeight, RequestId};
use shared_types::ipc::{LedgerQuery, LedgerTransaction, RequestDetail};
use tokio::sync::oneshot;
use uuid::Uuid;

const COMPONENT: &str = "ledger_bridge";

type QueryResult = std::result::Result<Value, LedgerQueryError>;

/// Query/response bridge to the ledger connector.
pub struct BusLedgerClient {
    publisher: Arc<dyn EventPublisher>,
    height: AtomicU64,
    pending: DashMap<String, oneshot::Sender<QueryResult>>,
    query_timeout: Duration,
}

impl BusLedgerClient {
    pub fn new(publisher: Arc<dyn EventPublisher>, query_timeout: Duration) -> Self {
        Self {
            publisher,
            height: AtomicU64::new(0),
            pending: DashMap::new(),
            query_timeout,
        }
    }

    /// Record a committed height. Lower heights are ignored.
    pub fn observe_height(&self, height: BlockHeight) {
        let previous = self.height.fetch_max(height, Ordering::SeqCst);
        if height > previous {
            LEDGER_HEIGHT.set(i64::try_from(height).unwrap_or(i64::MAX));
        }
    }

    /// Hand a query answer to its waiter.
    ///
    /// Returns false if nobody waits for `correlation_id` anymore.
    pub fn complete(&self, correlation_id: &str, result: QueryResult) -> bool {
        let Some((_, sender)) = self.pending.remove(correlation_id) else {
            log_event!(warn, COMPONENT, "Ledger answer for unknown or expired query", correlation_id);
            return false;
        };
        sender.send(result).is_ok()
    }

    /// Queries still waiting for an answer
    pub fn pending_queries(&self) -> usize {
        self.pending.len()
    }

    async fn query(&self, query: LedgerQuery) -> Result<Value> {
        let method = query.method();
        let correlation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), tx);

        let _timer = time_histogram!(LEDGER_QUERY_DURATION);
        let receivers = self
            .publisher
            .publish(NodeEvent::LedgerQuery {
                correlation_id: correlation_id.clone(),
                query,
            })
            .await;
        if receivers == 0 {
            self.pending.remove(&correlation_id);
            return Err(OrchestrationError::Ledger(format!(
                "no ledger connector to answer {method}"
            )));
        }
        log_event!(debug, COMPONENT, "Ledger query sent", %correlation_id, method);

        match tokio::time::timeout(self.query_timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(OrchestrationError::Ledger(format!(
                "{method} failed ({}): {}",
                e.code, e.message
            ))),
            Ok(Err(_)) => Err(OrchestrationError::Ledger(format!(
                "{method} answer channel closed"
            ))),
            Err(_) => {
                self.pending.remove(&correlation_id);
                metric_inc!(LEDGER_QUERY_TIMEOUTS);
                log_event!(warn, COMPONENT, "Ledger query timed out", %correlation_id, method);
                Err(OrchestrationError::LedgerTimeout {
                    method: method.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl LedgerClient for BusLedgerClient {
    fn latest_block_height(&self) -> BlockHeight {
        self.height.load(Ordering::SeqCst)
    }

    async fn submit_transaction(&self, transaction: LedgerTransaction) -> Result<()> {
        let tx_id = transaction.tx_id;
        let fn_name = transaction.fn_name.clone();
        let receivers = self
            .publisher
            .publish(NodeEvent::TransactionSubmitted(transaction))
            .await;
        if receivers == 0 {
            return Err(OrchestrationError::Ledger(format!(
                "no ledger connector to submit {fn_name}"
            )));
        }
        metric_inc!(TRANSACTIONS_SUBMITTED);
        log_event!(debug, COMPONENT, "Transaction submitted", %tx_id, fn_name);
        Ok(())
    }

    async fn get_accessor_group_id(&self, accessor_id: &str) -> Result<Option<String>> {
        let value = self
            .query(LedgerQuery::GetAccessorGroupId {
                accessor_id: accessor_id.to_string(),
            })
            .await?;
        match value {
            Value::Null => Ok(None),
            Value::String(group) => Ok(Some(group)),
            other => Err(OrchestrationError::Serialization(format!(
                "accessor group id is not a string: {other}"
            ))),
        }
    }

    async fn get_request_detail(&self, request_id: &RequestId) -> Result<Option<RequestDetail>> {
        let value = self
            .query(LedgerQuery::GetRequestDetail {
                request_id: request_id.clone(),
            })
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }
}
