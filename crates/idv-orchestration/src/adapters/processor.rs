//! Default request processor: hand ready requests to the node's client.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use shared_types::entities::{NodeId, NodeRole};
use shared_types::ipc::BusMessage;
use tracing::debug;

use crate::callback::{CallbackDeliveryEngine, CallbackUrlRegistry, EnqueueOptions};
use crate::domain::CallbackKind;
use crate::error::{OrchestrationError, Result};
use crate::ports::outbound::RequestProcessor;

/// Callback kind a ready request of a node with `role` is delivered to
pub fn request_callback_kind(role: NodeRole) -> Option<CallbackKind> {
    match role {
        NodeRole::Idp => Some(CallbackKind::IncomingRequest),
        NodeRole::As => Some(CallbackKind::DataRequest),
        NodeRole::Rp => Some(CallbackKind::ResponseResult),
        NodeRole::Proxy => None,
    }
}

/// Forwards each ready request to the matching callback URL.
///
/// The salt stays on this node; it is stripped from the body.
pub struct IncomingRequestNotifier {
    roles: HashMap<NodeId, NodeRole>,
    urls: Arc<CallbackUrlRegistry>,
    engine: Arc<CallbackDeliveryEngine>,
}

impl IncomingRequestNotifier {
    pub fn new(
        roles: HashMap<NodeId, NodeRole>,
        urls: Arc<CallbackUrlRegistry>,
        engine: Arc<CallbackDeliveryEngine>,
    ) -> Self {
        Self {
            roles,
            urls,
            engine,
        }
    }
}

#[async_trait]
impl RequestProcessor for IncomingRequestNotifier {
    async fn process_request(&self, node_id: &NodeId, mut message: BusMessage) -> Result<()> {
        let role = self.roles.get(node_id).copied().ok_or_else(|| {
            OrchestrationError::Processing(format!("node {node_id} is not hosted here"))
        })?;
        let kind = request_callback_kind(role).ok_or_else(|| {
            OrchestrationError::Processing(format!("node {node_id} has no request callback"))
        })?;
        let url = self
            .urls
            .get(node_id, kind)
            .ok_or_else(|| OrchestrationError::CallbackUrlNotSet {
                node_id: node_id.clone(),
                kind: kind.to_string(),
            })?;

        message.initial_salt = None;
        let mut body = serde_json::to_value(&message)?;
        if let Value::Object(fields) = &mut body {
            fields.insert("node_id".into(), Value::String(node_id.to_string()));
        }

        debug!(%node_id, request_id = %message.request_id, %kind, "Forwarding request to client");
        self.engine
            .enqueue(node_id, url, body, EnqueueOptions::new(kind))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_per_role() {
        assert_eq!(request_callback_kind(NodeRole::Idp), Some(CallbackKind::IncomingRequest));
        assert_eq!(request_callback_kind(NodeRole::As), Some(CallbackKind::DataRequest));
        assert_eq!(request_callback_kind(NodeRole::Rp), Some(CallbackKind::ResponseResult));
        assert_eq!(request_callback_kind(NodeRole::Proxy), None);
    }
}
