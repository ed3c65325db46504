//! # Node Runtime
//!
//! Startup and shutdown sequences around the node container.
//!
//! ## Startup Sequence
//!
//! 1. Warn about callback URLs the hosted roles need but lack
//! 2. Start the event router
//! 3. Resume callback jobs stored before the last shutdown
//! 4. Start mirroring core counters into Prometheus
//!
//! ## Shutdown Sequence
//!
//! 1. Signal the router and the metrics task
//! 2. Wait for the router to drain in-flight handlers
//! 3. Stop callback retries; stored jobs resume on the next start
//! 4. Wait (bounded) for in-flight reconciliations
//! 5. Clear the lock table and flush the store

use std::sync::Arc;

use anyhow::{Context, Result};
use node_telemetry::{encode_metrics, log_event, record_core_counters};
use parking_lot::Mutex;
use shared_bus::InMemoryEventBus;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::container::{NodeConfig, NodeContainer};
use crate::wiring::EventRouter;

const COMPONENT: &str = "runtime";

/// A running node.
pub struct NodeRuntime {
    container: Arc<NodeContainer>,
    bus: Arc<InMemoryEventBus>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeRuntime {
    /// Build the runtime over a shared bus.
    pub fn new(config: NodeConfig, bus: Arc<InMemoryEventBus>) -> Result<Self> {
        let container = NodeContainer::new(config, bus.clone())
            .context("Failed to build node container")?;
        Ok(Self::with_container(container, bus))
    }

    /// Build the runtime around an existing container.
    pub fn with_container(container: NodeContainer, bus: Arc<InMemoryEventBus>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            container: Arc::new(container),
            bus,
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start routing events and resume stored callbacks.
    pub async fn start(&self) -> Result<()> {
        let config = &self.container.config;
        info!("===========================================");
        info!("  IDV Node Runtime v{}", env!("CARGO_PKG_VERSION"));
        info!("  Node: {} ({})", config.node.node_id, config.node.role);
        info!("===========================================");

        for (node_id, kind) in self.container.dispatcher.check_callback_urls() {
            log_event!(warn, COMPONENT, "Callback URL not set", %node_id, %kind);
        }

        let router = EventRouter::new(
            &self.bus,
            self.container.dispatcher.clone(),
            self.container.continuations.clone(),
            self.container.ledger.clone(),
            config.runtime.shutdown_grace(),
        );
        let router_task = tokio::spawn(router.run(self.shutdown_rx.clone()));

        let resumed = self
            .container
            .callbacks
            .resume_callback_to_client()
            .await
            .context("Failed to resume stored callbacks")?;
        log_event!(info, COMPONENT, "Stored callbacks resumed", resumed);

        let metrics_task = tokio::spawn(mirror_metrics(
            self.container.clone(),
            self.shutdown_rx.clone(),
        ));

        self.tasks.lock().extend([router_task, metrics_task]);
        log_event!(info, COMPONENT, "Node is running", data_dir = ?config.storage.data_dir);
        Ok(())
    }

    /// Stop gracefully. Safe to call more than once.
    pub async fn shutdown(&self) {
        log_event!(info, COMPONENT, "Initiating graceful shutdown...");
        if let Err(e) = self.shutdown_tx.send(true) {
            log_event!(error, COMPONENT, "Failed to send shutdown signal", error = %e);
        }

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                log_event!(error, COMPONENT, "Runtime task failed", error = %e);
            }
        }

        let container = &self.container;
        container.callbacks.stop_all_callback_retries();
        let grace = container.config.runtime.shutdown_grace();
        if tokio::time::timeout(grace, container.reconciler.wait_idle())
            .await
            .is_err()
        {
            log_event!(
                warn,
                COMPONENT,
                "Reconciliations still running after grace period",
                in_flight = container.reconciler.in_flight()
            );
        }
        container.locks.clear();

        let bus = self.bus.stats();
        if bus.lagged() > 0 {
            log_event!(warn, COMPONENT, "Subscribers fell behind the bus during this run", lost = bus.lagged());
        }
        log_event!(
            info,
            COMPONENT,
            "Bus totals",
            published = bus.published(),
            undelivered = bus.undelivered()
        );

        match self.metrics_text() {
            Ok(text) => log_event!(debug, COMPONENT, "Final metrics", metrics = %text),
            Err(e) => log_event!(warn, COMPONENT, "Failed to encode metrics", error = %e),
        }
        if let Err(e) = container.cache.flush().await {
            log_event!(error, COMPONENT, "Failed to flush store", error = %e);
        }
        log_event!(info, COMPONENT, "Shutdown complete");
    }

    /// Prometheus text exposition of the node's metrics, core counters
    /// refreshed first.
    pub fn metrics_text(&self) -> Result<String> {
        record_core_counters(self.container.metrics.snapshot());
        encode_metrics().context("Failed to encode metrics")
    }

    /// Get a reference to the node container.
    pub fn container(&self) -> Arc<NodeContainer> {
        Arc::clone(&self.container)
    }
}

async fn mirror_metrics(container: Arc<NodeContainer>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(container.config.runtime.metrics_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => record_core_counters(container.metrics.snapshot()),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
