//! Bus/ledger ordering reconciliation.
//!
//! A request travels over the message bus carrying the ledger height its
//! sender saw. It may only be processed once the local ledger view is past
//! that height, because the on-ledger state it refers to must be visible.
//!
//! ```text
//! bus delivery ──► try_lock ──► latest > h ? ──yes──► process
//!                                   │ no
//!                                   ▼
//!                         buffer (mq_request + expected index)
//!                                   │
//!                     re-check under lock table mutex
//!                        │ still ≤ h          │ advanced
//!                        ▼                    ▼
//!                  release, return      unbuffer, process
//!
//! new blocks (from, to) ──► index window [from-1, to-1] ──► replay each
//!                           (skip locked, skip missing) ──► clear window
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use shared_types::entities::{BlockHeight, NodeId, RequestId};
use shared_types::ipc::BusMessage;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::adapters::CacheDb;
use crate::domain::{readiness_window, ReconcileOutcome, ReplaySummary, RequestLockTable};
use crate::error::Result;
use crate::metrics::OrchestrationMetrics;
use crate::ports::outbound::{ErrorReporter, LedgerClient, RequestProcessor};

/// Action name attached to errors raised while replaying buffered requests
pub const ACTION_PROCESS_EXPECTED_IN_BLOCKS: &str = "processRequestExpectedInBlocks";

/// Count of requests currently being evaluated, with a wake-up when it
/// drops to zero.
#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

struct InFlightGuard<'a>(&'a InFlight);

impl InFlight {
    fn enter(&self) -> InFlightGuard<'_> {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

enum ReplayResult {
    Replayed,
    SkippedLocked,
    Missing,
    Failed,
}

/// Decides, per request, whether to process now or wait for the ledger.
pub struct BlockSyncReconciler {
    locks: Arc<RequestLockTable>,
    cache: Arc<CacheDb>,
    ledger: Arc<dyn LedgerClient>,
    processor: Arc<dyn RequestProcessor>,
    reporter: Arc<dyn ErrorReporter>,
    metrics: Arc<OrchestrationMetrics>,
    in_flight: InFlight,
}

impl BlockSyncReconciler {
    pub fn new(
        locks: Arc<RequestLockTable>,
        cache: Arc<CacheDb>,
        ledger: Arc<dyn LedgerClient>,
        processor: Arc<dyn RequestProcessor>,
        reporter: Arc<dyn ErrorReporter>,
        metrics: Arc<OrchestrationMetrics>,
    ) -> Self {
        Self {
            locks,
            cache,
            ledger,
            processor,
            reporter,
            metrics,
            in_flight: InFlight::default(),
        }
    }

    /// Bus-delivery path.
    ///
    /// Errors are returned to the caller with the lock already released.
    pub async fn on_message(
        &self,
        node_id: &NodeId,
        message: BusMessage,
    ) -> Result<ReconcileOutcome> {
        let request_id = message.request_id.clone();
        let height = message.height;

        let Some(mut guard) = self.locks.try_lock(node_id, &request_id) else {
            debug!(%node_id, %request_id, "Request already being handled, skipping delivery");
            self.metrics.record_duplicate();
            return Ok(ReconcileOutcome::Duplicate);
        };
        let _in_flight = self.in_flight.enter();

        let latest = self.ledger.latest_block_height();
        if latest > height {
            self.process(node_id, message).await?;
            return Ok(ReconcileOutcome::ProcessedImmediately);
        }

        debug!(
            %node_id,
            %request_id,
            height,
            latest,
            "Ledger behind request height, buffering"
        );
        self.cache.buffer_request(node_id, &message).await?;

        let ledger = &self.ledger;
        if guard.release_if(|| ledger.latest_block_height() <= height) {
            self.metrics.record_buffered();
            return Ok(ReconcileOutcome::Buffered);
        }

        // The ledger moved past `height` while buffering. The block path
        // skipped this request because it was locked, so process it here.
        debug!(%node_id, %request_id, height, "Ledger advanced during buffering");
        self.cache
            .unbuffer_request(node_id, height, &request_id)
            .await?;
        self.process(node_id, message).await?;
        Ok(ReconcileOutcome::ProcessedAfterRecheck)
    }

    /// Block-arrival path for one node identity.
    ///
    /// Per-request failures are reported and counted; they never stop the
    /// rest of the window. The window's index entries are always cleared.
    pub async fn on_new_blocks(
        &self,
        node_id: &NodeId,
        from_height: BlockHeight,
        to_height: BlockHeight,
    ) -> Result<ReplaySummary> {
        let Some((lo, hi)) = readiness_window(from_height, to_height) else {
            return Ok(ReplaySummary::default());
        };
        let _in_flight = self.in_flight.enter();

        let expected = self
            .cache
            .get_request_ids_expected_in_block(node_id, lo, hi)
            .await?;
        if !expected.is_empty() {
            debug!(%node_id, lo, hi, count = expected.len(), "Replaying buffered requests");
        }

        let results = join_all(
            expected
                .iter()
                .map(|(height, request_id)| self.replay_one(node_id, *height, request_id)),
        )
        .await;

        let mut summary = ReplaySummary {
            from_height: lo,
            to_height: hi,
            ..ReplaySummary::default()
        };
        for result in results {
            match result {
                ReplayResult::Replayed => summary.replayed += 1,
                ReplayResult::SkippedLocked => summary.skipped_locked += 1,
                ReplayResult::Missing => summary.missing += 1,
                ReplayResult::Failed => summary.failed += 1,
            }
        }

        self.cache
            .remove_request_ids_expected_in_block(node_id, lo, hi)
            .await?;

        self.metrics
            .record_replay(summary.replayed, summary.skipped_locked, summary.missing);
        if summary.replayed + summary.failed > 0 {
            info!(
                %node_id,
                lo,
                hi,
                replayed = summary.replayed,
                failed = summary.failed,
                "Processed requests expected in blocks"
            );
        }
        Ok(summary)
    }

    async fn replay_one(
        &self,
        node_id: &NodeId,
        height: BlockHeight,
        request_id: &RequestId,
    ) -> ReplayResult {
        let Some(_guard) = self.locks.try_lock(node_id, request_id) else {
            debug!(%node_id, %request_id, height, "Request locked by bus path, skipping replay");
            return ReplayResult::SkippedLocked;
        };

        let outcome = self.replay_buffered(node_id, request_id).await;

        match outcome {
            Ok(true) => ReplayResult::Replayed,
            Ok(false) => {
                debug!(%node_id, %request_id, height, "Buffered request already consumed");
                ReplayResult::Missing
            }
            Err(e) => {
                warn!(%node_id, %request_id, height, error = %e, "Replay of buffered request failed");
                // The window entry is cleared below, nothing would reach the body again
                if let Err(cleanup) = self
                    .cache
                    .remove_request_received_from_mq(node_id, request_id)
                    .await
                {
                    warn!(%node_id, %request_id, error = %cleanup, "Failed to drop buffered request");
                }
                self.reporter
                    .report(
                        node_id,
                        e.with_context(node_id, ACTION_PROCESS_EXPECTED_IN_BLOCKS, Some(request_id)),
                    )
                    .await;
                ReplayResult::Failed
            }
        }
    }

    /// Process the buffered body, if still there. `Ok(false)` when missing.
    async fn replay_buffered(&self, node_id: &NodeId, request_id: &RequestId) -> Result<bool> {
        let Some(message) = self
            .cache
            .get_request_received_from_mq(node_id, request_id)
            .await?
        else {
            return Ok(false);
        };
        self.process(node_id, message).await?;
        self.cache
            .remove_request_received_from_mq(node_id, request_id)
            .await?;
        Ok(true)
    }

    async fn process(&self, node_id: &NodeId, message: BusMessage) -> Result<()> {
        let request_id = message.request_id.clone();
        self.processor.process_request(node_id, message).await?;
        self.metrics.record_processed();
        debug!(%node_id, %request_id, "Request processed");
        Ok(())
    }

    /// Number of reconciliations in progress
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Wait until no reconciliation is in progress.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn lock_table(&self) -> &Arc<RequestLockTable> {
        &self.locks
    }
}
