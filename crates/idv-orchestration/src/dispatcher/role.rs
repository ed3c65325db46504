//! Role-specific handling of bus messages and new blocks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use shared_types::entities::{BlockHeight, NodeId, NodeRole};
use shared_types::ipc::{BusMessage, ParsedBlock, PrivateMessageType};
use tracing::{debug, info, warn};

use super::block_tasks;
use crate::adapters::CacheDb;
use crate::callback::CallbackUrlRegistry;
use crate::domain::{CallbackKind, ReconcileOutcome};
use crate::error::{OrchestrationError, Result};
use crate::ports::inbound::NodeEventHandler;
use crate::ports::outbound::{ErrorReporter, LedgerClient, SchemaCache};
use crate::reconciler::BlockSyncReconciler;

/// Action name for errors raised while handling a bus message
pub const ACTION_HANDLE_MESSAGE: &str = "handleMessageFromQueue";
/// Action name for errors raised while handling new blocks
pub const ACTION_HANDLE_NEW_BLOCK: &str = "handleTendermintNewBlock";
/// Action name for message bus transport errors
pub const ACTION_HANDLE_MQ_ERROR: &str = "handleMessageQueueError";

/// Collaborators shared by every role handler.
#[derive(Clone)]
pub struct RoleContext {
    pub reconciler: Arc<BlockSyncReconciler>,
    pub cache: Arc<CacheDb>,
    pub ledger: Arc<dyn LedgerClient>,
    pub reporter: Arc<dyn ErrorReporter>,
    pub urls: Arc<CallbackUrlRegistry>,
    pub schema_cache: Arc<dyn SchemaCache>,
}

/// Handler set of one concrete role, bound to one node identity.
#[async_trait]
pub trait RoleHandler: Send + Sync {
    fn role(&self) -> NodeRole;

    fn node_id(&self) -> &NodeId;

    fn context(&self) -> &RoleContext;

    /// Whether messages of this type wait for the ledger to catch up
    fn reconciles(&self, message_type: PrivateMessageType) -> bool;

    /// Role-specific side effects of the transactions in `blocks`
    async fn process_tasks_in_blocks(&self, blocks: &[ParsedBlock]) -> Result<()>;

    /// Store the salt, then reconcile. Errors are reported, never returned.
    async fn handle_message(&self, message: BusMessage) {
        let node_id = self.node_id();
        let request_id = message.request_id.clone();
        info!(%node_id, %request_id, message_type = ?message.message_type, "Received message from MQ");
        debug!(%node_id, message = ?message, "Message from MQ");

        if !self.reconciles(message.message_type) {
            debug!(%node_id, %request_id, message_type = ?message.message_type, "Message type not handled by role, ignoring");
            return;
        }

        match self.intake(message).await {
            Ok(outcome) => debug!(%node_id, %request_id, ?outcome, "Message reconciled"),
            Err(e) => {
                let ctx = self.context();
                ctx.reporter
                    .report(
                        node_id,
                        e.with_context(node_id, ACTION_HANDLE_MESSAGE, Some(&request_id)),
                    )
                    .await;
            }
        }
    }

    async fn intake(&self, message: BusMessage) -> Result<ReconcileOutcome> {
        let ctx = self.context();
        if let Some(salt) = &message.initial_salt {
            ctx.cache
                .set_initial_salt(self.node_id(), &message.request_id, salt)
                .await?;
        }
        ctx.reconciler.on_message(self.node_id(), message).await
    }

    /// Replay buffered requests and run block tasks concurrently.
    async fn handle_new_block(
        &self,
        from_height: BlockHeight,
        to_height: BlockHeight,
        blocks: &[ParsedBlock],
    ) {
        let node_id = self.node_id();
        let ctx = self.context();
        debug!(%node_id, from_height, to_height, "Handling new blocks");

        let (replay, tasks) = tokio::join!(
            ctx.reconciler.on_new_blocks(node_id, from_height, to_height),
            self.process_tasks_in_blocks(blocks),
        );
        for err in [replay.err(), tasks.err()].into_iter().flatten() {
            ctx.reporter
                .report(node_id, err.with_context(node_id, ACTION_HANDLE_NEW_BLOCK, None))
                .await;
        }
    }

    /// Warn about required callback URLs that are not set
    fn check_callback_urls(&self) -> Vec<CallbackKind> {
        self.context()
            .urls
            .check_callback_urls(self.node_id(), self.role())
    }
}

macro_rules! role_handler {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        pub struct $name {
            node_id: NodeId,
            ctx: RoleContext,
        }

        impl $name {
            pub fn new(node_id: NodeId, ctx: RoleContext) -> Self {
                Self { node_id, ctx }
            }
        }
    };
}

role_handler!(RpHandler, "Relying party: waits for IDP and AS responses.");
role_handler!(IdpHandler, "Identity provider: waits for consent and challenge requests.");
role_handler!(AsHandler, "Accessor service: waits for data requests.");

#[async_trait]
impl RoleHandler for RpHandler {
    fn role(&self) -> NodeRole {
        NodeRole::Rp
    }
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }
    fn context(&self) -> &RoleContext {
        &self.ctx
    }
    fn reconciles(&self, message_type: PrivateMessageType) -> bool {
        matches!(
            message_type,
            PrivateMessageType::IdpResponse | PrivateMessageType::AsDataResponse
        )
    }
    async fn process_tasks_in_blocks(&self, blocks: &[ParsedBlock]) -> Result<()> {
        block_tasks::process_rp_tasks(&self.ctx, &self.node_id, blocks).await
    }
}

#[async_trait]
impl RoleHandler for IdpHandler {
    fn role(&self) -> NodeRole {
        NodeRole::Idp
    }
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }
    fn context(&self) -> &RoleContext {
        &self.ctx
    }
    fn reconciles(&self, message_type: PrivateMessageType) -> bool {
        matches!(
            message_type,
            PrivateMessageType::ConsentRequest | PrivateMessageType::ChallengeRequest
        )
    }
    async fn process_tasks_in_blocks(&self, blocks: &[ParsedBlock]) -> Result<()> {
        block_tasks::process_idp_tasks(&self.ctx, &self.node_id, blocks).await
    }
}

#[async_trait]
impl RoleHandler for AsHandler {
    fn role(&self) -> NodeRole {
        NodeRole::As
    }
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }
    fn context(&self) -> &RoleContext {
        &self.ctx
    }
    fn reconciles(&self, message_type: PrivateMessageType) -> bool {
        message_type == PrivateMessageType::DataRequest
    }
    async fn process_tasks_in_blocks(&self, blocks: &[ParsedBlock]) -> Result<()> {
        block_tasks::process_as_tasks(&self.ctx, &self.node_id, blocks).await
    }
}

/// Fronts several node identities, each handled with its own role.
pub struct ProxyHandler {
    node_id: NodeId,
    members: Vec<RoleDispatcher>,
}

impl ProxyHandler {
    fn member(&self, node_id: &NodeId) -> Option<&dyn RoleHandler> {
        self.members
            .iter()
            .filter_map(RoleDispatcher::handler)
            .find(|handler| handler.node_id() == node_id)
    }

    fn handlers(&self) -> impl Iterator<Item = &dyn RoleHandler> + '_ {
        self.members.iter().filter_map(RoleDispatcher::handler)
    }
}

/// Handler set selected once at startup from the node's role.
pub enum RoleDispatcher {
    Rp(RpHandler),
    Idp(IdpHandler),
    As(AsHandler),
    Proxy(ProxyHandler),
}

impl RoleDispatcher {
    /// Build the handler set for `role`.
    ///
    /// A proxy needs at least one fronted identity, none of them a proxy.
    pub fn new(
        role: NodeRole,
        node_id: NodeId,
        proxied: &[(NodeId, NodeRole)],
        ctx: RoleContext,
    ) -> Result<Self> {
        Ok(match role {
            NodeRole::Rp => Self::Rp(RpHandler::new(node_id, ctx)),
            NodeRole::Idp => Self::Idp(IdpHandler::new(node_id, ctx)),
            NodeRole::As => Self::As(AsHandler::new(node_id, ctx)),
            NodeRole::Proxy => {
                if proxied.is_empty() {
                    return Err(OrchestrationError::InvalidConfig(format!(
                        "proxy {node_id} fronts no node"
                    )));
                }
                let members = proxied
                    .iter()
                    .map(|(member_id, member_role)| {
                        if *member_role == NodeRole::Proxy {
                            return Err(OrchestrationError::InvalidConfig(format!(
                                "proxy {node_id} cannot front proxy {member_id}"
                            )));
                        }
                        Self::new(*member_role, member_id.clone(), &[], ctx.clone())
                    })
                    .collect::<Result<Vec<_>>>()?;
                Self::Proxy(ProxyHandler { node_id, members })
            }
        })
    }

    pub fn role(&self) -> NodeRole {
        match self {
            Self::Rp(_) => NodeRole::Rp,
            Self::Idp(_) => NodeRole::Idp,
            Self::As(_) => NodeRole::As,
            Self::Proxy(_) => NodeRole::Proxy,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        match self {
            Self::Rp(h) => h.node_id(),
            Self::Idp(h) => h.node_id(),
            Self::As(h) => h.node_id(),
            Self::Proxy(p) => &p.node_id,
        }
    }

    /// Handler of a concrete role; `None` for a proxy
    fn handler(&self) -> Option<&dyn RoleHandler> {
        match self {
            Self::Rp(h) => Some(h as &dyn RoleHandler),
            Self::Idp(h) => Some(h as &dyn RoleHandler),
            Self::As(h) => Some(h as &dyn RoleHandler),
            Self::Proxy(_) => None,
        }
    }

    /// Every identity handled here with its concrete role
    pub fn hosted_roles(&self) -> HashMap<NodeId, NodeRole> {
        match self {
            Self::Proxy(proxy) => proxy
                .handlers()
                .map(|h| (h.node_id().clone(), h.role()))
                .collect(),
            _ => HashMap::from([(self.node_id().clone(), self.role())]),
        }
    }

    /// Warn about missing callback URLs of every hosted identity.
    pub fn check_callback_urls(&self) -> Vec<(NodeId, CallbackKind)> {
        let check = |handler: &dyn RoleHandler| {
            handler
                .check_callback_urls()
                .into_iter()
                .map(|kind| (handler.node_id().clone(), kind))
                .collect::<Vec<_>>()
        };
        match self {
            Self::Proxy(proxy) => proxy.handlers().flat_map(check).collect(),
            other => other.handler().map(check).unwrap_or_default(),
        }
    }

    fn handler_for(&self, node_id: &NodeId) -> Option<&dyn RoleHandler> {
        match self {
            Self::Proxy(proxy) => proxy.member(node_id),
            other => other.handler().filter(|h| h.node_id() == node_id),
        }
    }

    fn report_target(&self, node_id: Option<NodeId>) -> Vec<NodeId> {
        match (node_id, self) {
            (Some(id), _) => vec![id],
            (None, Self::Proxy(proxy)) => proxy.handlers().map(|h| h.node_id().clone()).collect(),
            (None, other) => vec![other.node_id().clone()],
        }
    }

    fn context(&self) -> Option<&RoleContext> {
        match self {
            Self::Proxy(proxy) => proxy.handlers().next().map(|h| h.context()),
            other => other.handler().map(|h| h.context()),
        }
    }
}

#[async_trait]
impl NodeEventHandler for RoleDispatcher {
    async fn handle_message_from_queue(&self, message: BusMessage, node_id: NodeId) {
        match self.handler_for(&node_id) {
            Some(handler) => handler.handle_message(message).await,
            None => warn!(
                %node_id,
                request_id = %message.request_id,
                "Message for a node not hosted here, dropping"
            ),
        }
    }

    async fn handle_new_block(
        &self,
        from_height: BlockHeight,
        to_height: BlockHeight,
        blocks: Vec<ParsedBlock>,
        node_id: Option<NodeId>,
    ) {
        let handlers: Vec<&dyn RoleHandler> = match (&node_id, self) {
            (Some(id), _) => self.handler_for(id).into_iter().collect(),
            (None, Self::Proxy(proxy)) => proxy.handlers().collect(),
            (None, other) => other.handler().into_iter().collect(),
        };
        if handlers.is_empty() {
            warn!(node_id = ?node_id, "New blocks for a node not hosted here, ignoring");
            return;
        }
        join_all(
            handlers
                .into_iter()
                .map(|h| h.handle_new_block(from_height, to_height, &blocks)),
        )
        .await;
    }

    async fn handle_message_queue_error(&self, node_id: Option<NodeId>, error: String) {
        let Some(ctx) = self.context() else {
            return;
        };
        for target in self.report_target(node_id) {
            let err = OrchestrationError::MessageQueue(error.clone()).with_context(
                &target,
                ACTION_HANDLE_MQ_ERROR,
                None,
            );
            ctx.reporter.report(&target, err).await;
        }
    }
}
