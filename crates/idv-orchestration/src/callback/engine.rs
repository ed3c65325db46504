//! At-least-once callback delivery.
//!
//! Each job is written to the store before its first attempt and removed
//! only after a 2xx response or after its retry policy gives up. A stop
//! signal cancels every pending retry timer but leaves the stored jobs in
//! place, so [`CallbackDeliveryEngine::resume_callback_to_client`] picks
//! them up on the next start.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use serde_json::Value;
use shared_types::entities::NodeId;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::CacheDb;
use crate::config::CallbackConfig;
use crate::domain::{CallbackJob, CallbackKind, JobStatus, RetryDecision};
use crate::error::Result;
use crate::metrics::OrchestrationMetrics;
use crate::ports::outbound::{CallbackTransport, RetryPolicyResolver};

/// How a job is enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Endpoint kind; `Error` marks an operational error notification
    pub kind: CallbackKind,
    /// Keep the job in the store until it completes
    pub persist: bool,
}

impl EnqueueOptions {
    pub fn new(kind: CallbackKind) -> Self {
        Self {
            kind,
            persist: true,
        }
    }

    /// Operational error notification
    pub fn error() -> Self {
        Self::new(CallbackKind::Error)
    }

    /// Do not survive a restart
    pub fn ephemeral(mut self) -> Self {
        self.persist = false;
        self
    }
}

/// Removes the job from the active set when its task ends.
struct ActiveJob<'a> {
    engine: &'a CallbackDeliveryEngine,
    id: Uuid,
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        self.engine.active.remove(&self.id);
        if self.engine.active.is_empty() {
            self.engine.idle.notify_waiters();
        }
    }
}

/// Delivers callbacks in background tasks, retrying per policy.
pub struct CallbackDeliveryEngine {
    cache: Arc<CacheDb>,
    transport: Arc<dyn CallbackTransport>,
    policies: Arc<dyn RetryPolicyResolver>,
    metrics: Arc<OrchestrationMetrics>,
    config: CallbackConfig,
    shutdown: watch::Sender<bool>,
    active: DashSet<Uuid>,
    idle: Notify,
}

impl CallbackDeliveryEngine {
    pub fn new(
        cache: Arc<CacheDb>,
        transport: Arc<dyn CallbackTransport>,
        policies: Arc<dyn RetryPolicyResolver>,
        metrics: Arc<OrchestrationMetrics>,
        config: CallbackConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            cache,
            transport,
            policies,
            metrics,
            config,
            shutdown,
            active: DashSet::new(),
            idle: Notify::new(),
        }
    }

    /// Queue a notification and start delivering it.
    ///
    /// Returns once the job is stored; delivery continues in the background
    /// and its failures never reach the caller.
    pub async fn enqueue(
        self: &Arc<Self>,
        node_id: &NodeId,
        url: impl Into<String>,
        body: Value,
        options: EnqueueOptions,
    ) -> Result<Uuid> {
        let mut job = CallbackJob::new(node_id.clone(), url, body, options.kind);
        job.persisted = options.persist && self.config.persist_jobs;
        if job.persisted {
            self.cache.put_callback_job(&job).await?;
        }

        let job_id = job.id;
        debug!(%node_id, %job_id, kind = %job.kind, url = %job.url, "Callback enqueued");
        if self.is_stopped() {
            if job.persisted {
                info!(%job_id, "Delivery stopped, callback kept for next start");
            } else {
                warn!(%job_id, "Delivery stopped, dropping non-persisted callback");
            }
            return Ok(job_id);
        }
        self.spawn(job);
        Ok(job_id)
    }

    /// Restart delivery of every stored, still pending job.
    ///
    /// Returns the number of jobs resubmitted.
    pub async fn resume_callback_to_client(self: &Arc<Self>) -> Result<usize> {
        let jobs = self.cache.list_callback_jobs().await?;
        let mut resumed = 0;
        for job in jobs {
            if !job.is_pending() || self.active.contains(&job.id) {
                continue;
            }
            debug!(job_id = %job.id, node_id = %job.node_id, attempts = job.attempts, "Resuming callback");
            self.spawn(job);
            resumed += 1;
        }
        if resumed > 0 {
            info!(resumed, "Resumed stored callbacks");
        }
        Ok(resumed)
    }

    /// Cancel every pending retry timer. Stored jobs are kept.
    pub fn stop_all_callback_retries(&self) {
        self.shutdown.send_replace(true);
        info!(active = self.active.len(), "Stopped all callback retries");
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Jobs with a running delivery task
    pub fn active_jobs(&self) -> usize {
        self.active.len()
    }

    /// Stored jobs, pending and exhausted
    pub async fn stored_jobs(&self) -> Result<Vec<CallbackJob>> {
        self.cache.list_callback_jobs().await
    }

    /// Wait until no delivery task is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn spawn(self: &Arc<Self>, job: CallbackJob) {
        if !self.active.insert(job.id) {
            return;
        }
        let engine = Arc::clone(self);
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            engine.deliver(job, shutdown).await;
        });
    }

    async fn deliver(&self, mut job: CallbackJob, mut shutdown: watch::Receiver<bool>) {
        let _active = ActiveJob {
            engine: self,
            id: job.id,
        };

        let initial_wait = (job.next_attempt_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        if !wait_or_stop(initial_wait, &mut shutdown).await {
            return;
        }

        loop {
            let failure = match self.transport.post_json(&job.url, &job.body).await {
                Ok(status) if (200..300).contains(&status) => {
                    self.metrics.record_callback_delivered();
                    info!(
                        job_id = %job.id,
                        node_id = %job.node_id,
                        kind = %job.kind,
                        status,
                        "Callback delivered"
                    );
                    if job.persisted {
                        self.store_op(job.id, self.cache.remove_callback_job(&job.id).await);
                    }
                    return;
                }
                Ok(status) => format!("HTTP status {status}"),
                Err(e) => e.to_string(),
            };

            job.attempts += 1;
            job.last_error = Some(failure.clone());
            let policy = self.policies.resolve(&job.node_id, job.kind, job.is_error);

            match policy.decide(job.attempts) {
                RetryDecision::GiveUp => {
                    self.metrics.record_callback_exhausted();
                    error!(
                        job_id = %job.id,
                        node_id = %job.node_id,
                        url = %job.url,
                        attempts = job.attempts,
                        error = %failure,
                        "Callback retries exhausted"
                    );
                    if job.persisted {
                        let result = if self.config.keep_exhausted {
                            job.status = JobStatus::Exhausted;
                            self.cache.put_callback_job(&job).await
                        } else {
                            self.cache.remove_callback_job(&job.id).await
                        };
                        self.store_op(job.id, result);
                    }
                    return;
                }
                RetryDecision::RetryAfter(delay) => {
                    self.metrics.record_callback_retried();
                    warn!(
                        job_id = %job.id,
                        node_id = %job.node_id,
                        attempts = job.attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %failure,
                        "Callback attempt failed, will retry"
                    );
                    job.next_attempt_at =
                        Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                    if job.persisted {
                        self.store_op(job.id, self.cache.put_callback_job(&job).await);
                    }
                    if !wait_or_stop(delay, &mut shutdown).await {
                        debug!(job_id = %job.id, "Callback retry cancelled by stop");
                        return;
                    }
                }
            }
        }
    }

    fn store_op(&self, job_id: Uuid, result: Result<()>) {
        if let Err(e) = result {
            warn!(%job_id, error = %e, "Failed to update stored callback job");
        }
    }
}

/// Sleep for `delay` unless stopped first. Returns `false` when stopped.
async fn wait_or_stop(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow_and_update() {
        return false;
    }
    if delay.is_zero() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => !*shutdown.borrow(),
        _ = shutdown.changed() => false,
    }
}
