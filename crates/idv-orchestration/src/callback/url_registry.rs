//! Callback URLs registered by each hosted node.

use dashmap::DashMap;
use shared_types::entities::{NodeId, NodeRole};
use tracing::warn;

use crate::domain::CallbackKind;

const RP_REQUIRED: &[CallbackKind] = &[CallbackKind::ResponseResult, CallbackKind::Error];
const IDP_REQUIRED: &[CallbackKind] = &[
    CallbackKind::IncomingRequest,
    CallbackKind::IdentityResult,
    CallbackKind::Error,
];
const AS_REQUIRED: &[CallbackKind] = &[CallbackKind::DataRequest, CallbackKind::Error];

/// Kinds a node of `role` must register to receive its notifications.
///
/// A proxy has no endpoints of its own; the nodes behind it are checked
/// with their own roles.
pub fn required_callback_kinds(role: NodeRole) -> &'static [CallbackKind] {
    match role {
        NodeRole::Rp => RP_REQUIRED,
        NodeRole::Idp => IDP_REQUIRED,
        NodeRole::As => AS_REQUIRED,
        NodeRole::Proxy => &[],
    }
}

/// Per-node, per-kind callback URLs.
#[derive(Debug, Default)]
pub struct CallbackUrlRegistry {
    urls: DashMap<(NodeId, CallbackKind), String>,
}

impl CallbackUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node_id: &NodeId, kind: CallbackKind) -> Option<String> {
        self.urls
            .get(&(node_id.clone(), kind))
            .map(|url| url.value().clone())
    }

    pub fn set(&self, node_id: &NodeId, kind: CallbackKind, url: impl Into<String>) {
        self.urls.insert((node_id.clone(), kind), url.into());
    }

    pub fn remove(&self, node_id: &NodeId, kind: CallbackKind) -> Option<String> {
        self.urls
            .remove(&(node_id.clone(), kind))
            .map(|(_, url)| url)
    }

    /// Warn about every required kind `node_id` has not registered.
    ///
    /// Returns the missing kinds; a missing URL never stops the node.
    pub fn check_callback_urls(&self, node_id: &NodeId, role: NodeRole) -> Vec<CallbackKind> {
        let missing: Vec<CallbackKind> = required_callback_kinds(role)
            .iter()
            .copied()
            .filter(|kind| self.get(node_id, *kind).is_none())
            .collect();
        for kind in &missing {
            warn!(%node_id, role = role.as_str(), %kind, "Callback URL is not set");
        }
        missing
    }
}
