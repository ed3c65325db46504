//! Error sink that notifies the node's `error` callback URL.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use shared_types::entities::NodeId;
use tracing::{error, warn};

use crate::callback::{CallbackDeliveryEngine, CallbackUrlRegistry, EnqueueOptions};
use crate::domain::CallbackKind;
use crate::error::OrchestrationError;
use crate::metrics::OrchestrationMetrics;
use crate::ports::outbound::ErrorReporter;

/// Logs the error and queues an error notification for the node's client.
pub struct CallbackErrorReporter {
    urls: Arc<CallbackUrlRegistry>,
    engine: Arc<CallbackDeliveryEngine>,
    metrics: Arc<OrchestrationMetrics>,
}

impl CallbackErrorReporter {
    pub fn new(
        urls: Arc<CallbackUrlRegistry>,
        engine: Arc<CallbackDeliveryEngine>,
        metrics: Arc<OrchestrationMetrics>,
    ) -> Self {
        Self {
            urls,
            engine,
            metrics,
        }
    }
}

#[async_trait]
impl ErrorReporter for CallbackErrorReporter {
    async fn report(&self, node_id: &NodeId, err: OrchestrationError) {
        self.metrics.record_error_reported();
        error!(
            %node_id,
            action = err.action().unwrap_or("-"),
            request_id = err.request_id().map_or("-", |r| r.as_str()),
            transient = err.is_transient(),
            error = %err,
            "Operational error"
        );

        let Some(url) = self.urls.get(node_id, CallbackKind::Error) else {
            warn!(%node_id, "Error callback URL is not set, error not forwarded");
            return;
        };
        let body = json!({
            "type": "error",
            "action": err.action(),
            "request_id": err.request_id(),
            "error": err.to_payload(),
        });
        if let Err(e) = self
            .engine
            .enqueue(node_id, url, body, EnqueueOptions::error())
            .await
        {
            error!(%node_id, error = %e, "Failed to enqueue error callback");
        }
    }
}
