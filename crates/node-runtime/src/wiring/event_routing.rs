//! # Event Routing
//!
//! Routes shared bus events into the orchestration core.
//!
//! ```text
//! MessageReceived ─────────► RoleDispatcher::handle_message_from_queue   (task)
//! MessageQueueError ───────► RoleDispatcher::handle_message_queue_error  (task)
//! NewBlocks ──► height ────► block worker ──► RoleDispatcher::handle_new_block
//! TransactionResult ───────► ContinuationRegistry::on_transaction_result (task)
//! LedgerQueryResponse ─────► BusLedgerClient::complete                   (inline)
//! ```
//!
//! Handlers may issue ledger queries whose answers arrive through this same
//! loop, so handlers never run on it. Block events are handled one range at
//! a time, in arrival order, and a range that skips heights is widened back
//! to the last height handled so no readiness window goes missing. Events
//! lost to bus lag are reported on the dead letter topic.

use std::sync::Arc;
use std::time::Duration;

use idv_orchestration::{NodeEventHandler, TransactionResultHandler};
use node_telemetry::{log_event, metric_inc, COMPONENT_ERRORS, EVENTS_ROUTED};
use shared_bus::{EventFilter, EventPublisher, EventTopic, InMemoryEventBus, NodeEvent, Subscription};
use shared_types::entities::{BlockHeight, TxId};
use shared_types::ipc::{ParsedBlock, TransactionOutcome};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::trace;

use crate::adapters::BusLedgerClient;

/// Component name used in logs, metrics and dead letters
const COMPONENT: &str = "event_router";

/// A committed block range waiting for the block worker.
struct BlockRange {
    from_height: BlockHeight,
    to_height: BlockHeight,
    blocks: Vec<ParsedBlock>,
}

/// Shared bus consumer feeding the orchestration core.
pub struct EventRouter {
    subscription: Subscription,
    events: Arc<dyn NodeEventHandler>,
    results: Arc<dyn TransactionResultHandler>,
    ledger: Arc<BusLedgerClient>,
    publisher: Arc<dyn EventPublisher>,
    grace: Duration,
}

impl EventRouter {
    /// Subscribe to the inbound topics.
    ///
    /// Events published after this returns are not missed, even before
    /// [`EventRouter::run`] starts.
    pub fn new(
        bus: &Arc<InMemoryEventBus>,
        events: Arc<dyn NodeEventHandler>,
        results: Arc<dyn TransactionResultHandler>,
        ledger: Arc<BusLedgerClient>,
        grace: Duration,
    ) -> Self {
        let subscription = bus.subscribe(EventFilter::topics(vec![
            EventTopic::MessageQueue,
            EventTopic::Ledger,
        ]));
        Self {
            subscription,
            events,
            results,
            ledger,
            publisher: bus.clone(),
            grace,
        }
    }

    /// Route events until `shutdown` flips or the bus closes, then wait up
    /// to the grace period for in-flight handlers.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();
        let (blocks_tx, blocks_rx) = mpsc::unbounded_channel();
        tasks.spawn(block_worker(self.events.clone(), blocks_rx));
        log_event!(info, COMPONENT, "Event router started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = self.subscription.recv() => match event {
                    Some(event) => {
                        self.report_lag().await;
                        self.route(event, &mut tasks, &blocks_tx);
                    }
                    None => {
                        log_event!(warn, COMPONENT, "Event bus closed");
                        break;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        log_event!(error, COMPONENT, "Event handler task failed", error = %e);
                        metric_inc!(COMPONENT_ERRORS, &[COMPONENT, "task_panic"]);
                    }
                }
            }
        }

        // The worker drains queued ranges once the sender is gone
        drop(blocks_tx);
        let in_flight = tasks.len();
        let drained = tokio::time::timeout(self.grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            log_event!(
                warn,
                COMPONENT,
                "Grace period elapsed, aborting event handlers",
                remaining = tasks.len()
            );
            tasks.abort_all();
        }
        log_event!(info, COMPONENT, "Event router stopped", in_flight);
    }

    async fn report_lag(&mut self) {
        let lost = self.subscription.take_lagged();
        if lost == 0 {
            return;
        }
        log_event!(error, COMPONENT, "Events lost to bus lag", lost);
        metric_inc!(COMPONENT_ERRORS, &[COMPONENT, "lagged"]);
        self.publisher
            .publish(NodeEvent::CriticalError {
                component: COMPONENT.into(),
                error: format!("{lost} events lost to bus lag"),
            })
            .await;
    }

    fn route(
        &self,
        event: NodeEvent,
        tasks: &mut JoinSet<()>,
        blocks: &mpsc::UnboundedSender<BlockRange>,
    ) {
        let kind = event.kind();
        match event {
            NodeEvent::MessageReceived { node_id, message } => {
                let events = self.events.clone();
                tasks.spawn(async move {
                    events.handle_message_from_queue(message, node_id).await;
                });
            }
            NodeEvent::MessageQueueError { node_id, error } => {
                let events = self.events.clone();
                tasks.spawn(async move {
                    events.handle_message_queue_error(node_id, error).await;
                });
            }
            NodeEvent::NewBlocks {
                from_height,
                to_height,
                blocks: parsed,
            } => {
                // Height first, so messages arriving from now on see it
                self.ledger.observe_height(to_height);
                let range = BlockRange {
                    from_height,
                    to_height,
                    blocks: parsed,
                };
                if blocks.send(range).is_err() {
                    log_event!(warn, COMPONENT, "Block worker gone, dropping range", from_height, to_height);
                    return;
                }
            }
            NodeEvent::TransactionResult { tx_id, outcome } => {
                let results = self.results.clone();
                let publisher = self.publisher.clone();
                tasks.spawn(resume_continuation(results, publisher, tx_id, outcome));
            }
            NodeEvent::LedgerQueryResponse {
                correlation_id,
                result,
            } => {
                self.ledger.complete(&correlation_id, result);
            }
            // Outbound, not subscribed to
            NodeEvent::TransactionSubmitted(_) | NodeEvent::LedgerQuery { .. } => {
                trace!(component = COMPONENT, kind, "Skipping outbound event");
                return;
            }
            NodeEvent::CriticalError { .. } => return,
        }
        metric_inc!(EVENTS_ROUTED, &[kind]);
        log_event!(debug, COMPONENT, "Event routed", kind);
    }
}

async fn block_worker(
    events: Arc<dyn NodeEventHandler>,
    mut ranges: mpsc::UnboundedReceiver<BlockRange>,
) {
    let mut last_to: Option<BlockHeight> = None;
    while let Some(range) = ranges.recv().await {
        let from_height = widened_start(last_to, range.from_height, range.to_height);
        last_to = Some(last_to.map_or(range.to_height, |last| last.max(range.to_height)));
        events
            .handle_new_block(from_height, range.to_height, range.blocks, None)
            .await;
    }
}

/// Start of the range to hand on. A range that skips heights after
/// `last_to` is stretched back so the missed heights are reconciled too;
/// only the received blocks' transactions are processed.
fn widened_start(
    last_to: Option<BlockHeight>,
    from_height: BlockHeight,
    to_height: BlockHeight,
) -> BlockHeight {
    match last_to {
        Some(last) if from_height > last.saturating_add(1) => {
            let missing_from = last + 1;
            log_event!(
                warn,
                COMPONENT,
                "Block range skipped heights, widening",
                missing_from,
                missing_to = from_height - 1,
                to_height
            );
            metric_inc!(COMPONENT_ERRORS, &[COMPONENT, "block_gap"]);
            missing_from
        }
        _ => from_height,
    }
}

async fn resume_continuation(
    results: Arc<dyn TransactionResultHandler>,
    publisher: Arc<dyn EventPublisher>,
    tx_id: TxId,
    outcome: TransactionOutcome,
) {
    match results.on_transaction_result(tx_id, outcome).await {
        Ok(true) => log_event!(debug, COMPONENT, "Continuation resumed", %tx_id),
        Ok(false) => log_event!(debug, COMPONENT, "No continuation waiting", %tx_id),
        Err(e) => {
            let code = e.to_payload().code;
            log_event!(error, COMPONENT, "Continuation failed", %tx_id, error = %e);
            metric_inc!(COMPONENT_ERRORS, &["continuation", code.as_str()]);
            publisher
                .publish(NodeEvent::CriticalError {
                    component: "continuation".into(),
                    error: format!("{tx_id}: {e}"),
                })
                .await;
        }
    }
}
