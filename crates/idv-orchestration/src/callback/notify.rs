//! Terminal callbacks that notify the node's client.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use shared_types::entities::NodeId;
use tracing::warn;

use super::engine::{CallbackDeliveryEngine, EnqueueOptions};
use super::url_registry::CallbackUrlRegistry;
use crate::continuation::TerminalCallback;
use crate::domain::CallbackKind;
use crate::error::{ErrorPayload, OrchestrationError, Result};

/// Name under which [`IdentityResultNotifier`] is usually registered
pub const NOTIFY_ADD_ACCESSOR_RESULT: &str = "identity.notifyAddAccessorResult";

/// Posts a workflow result to the node's `identity_result` URL.
///
/// Object-valued extra arguments are merged into the body, so a caller can
/// carry its own reference ids through the workflow.
pub struct IdentityResultNotifier {
    result_type: String,
    urls: Arc<CallbackUrlRegistry>,
    engine: Arc<CallbackDeliveryEngine>,
}

impl IdentityResultNotifier {
    pub fn new(
        result_type: impl Into<String>,
        urls: Arc<CallbackUrlRegistry>,
        engine: Arc<CallbackDeliveryEngine>,
    ) -> Self {
        Self {
            result_type: result_type.into(),
            urls,
            engine,
        }
    }

    fn body(
        &self,
        payload: std::result::Result<Value, ErrorPayload>,
        additional_args: Option<Vec<Value>>,
    ) -> Value {
        let mut body = Map::new();
        body.insert("type".into(), json!(self.result_type));
        for arg in additional_args.into_iter().flatten() {
            match arg {
                Value::Object(fields) => body.extend(fields),
                other => warn!(arg = %other, "Ignoring non-object callback argument"),
            }
        }
        match payload {
            Ok(Value::Object(result)) => {
                body.insert("success".into(), json!(true));
                body.extend(result);
            }
            Ok(other) => {
                body.insert("success".into(), json!(true));
                body.insert("result".into(), other);
            }
            Err(error) => {
                body.insert("success".into(), json!(false));
                body.insert("error".into(), json!(error));
            }
        }
        Value::Object(body)
    }
}

#[async_trait]
impl TerminalCallback for IdentityResultNotifier {
    async fn invoke(
        &self,
        node_id: &NodeId,
        payload: std::result::Result<Value, ErrorPayload>,
        additional_args: Option<Vec<Value>>,
    ) -> Result<()> {
        let url = self
            .urls
            .get(node_id, CallbackKind::IdentityResult)
            .ok_or_else(|| OrchestrationError::CallbackUrlNotSet {
                node_id: node_id.clone(),
                kind: CallbackKind::IdentityResult.to_string(),
            })?;
        let body = self.body(payload, additional_args);
        self.engine
            .enqueue(node_id, url, body, EnqueueOptions::new(CallbackKind::IdentityResult))
            .await?;
        Ok(())
    }
}
