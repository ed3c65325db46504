//! Side effects of committed transactions on request-scoped state.
//!
//! Runs next to reconciliation for every new-block event and is independent
//! of it: a closed or timed-out request no longer needs its cached salt,
//! identity or RP mapping, and a service update stales the cached schema.

use std::future::Future;

use futures::future::join_all;
use shared_types::entities::{NodeId, RequestId};
use shared_types::ipc::{ParsedBlock, FN_UPDATE_SERVICE};
use tracing::{debug, warn};

use super::role::RoleContext;
use crate::error::Result;

/// Requests closed or timed out by the block, first occurrence order.
pub fn closed_request_ids(block: &ParsedBlock) -> Vec<RequestId> {
    let mut ids: Vec<RequestId> = Vec::new();
    for request_id in block
        .transactions
        .iter()
        .filter(|tx| tx.closes_request())
        .filter_map(|tx| tx.request_id())
    {
        if !ids.contains(&request_id) {
            ids.push(request_id);
        }
    }
    ids
}

/// Services whose metadata the block updated
pub fn updated_service_ids(block: &ParsedBlock) -> Vec<&str> {
    block
        .transactions
        .iter()
        .filter(|tx| tx.fn_name == FN_UPDATE_SERVICE)
        .filter_map(|tx| tx.service_id())
        .collect()
}

/// Run `cleanup` for every closed request of every block, concurrently.
///
/// All cleanups run to completion; the first failure is returned.
async fn for_each_closed<F, Fut>(blocks: &[ParsedBlock], cleanup: F) -> Result<()>
where
    F: Fn(RequestId) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let results = join_all(
        blocks
            .iter()
            .flat_map(closed_request_ids)
            .map(cleanup),
    )
    .await;

    let mut first = None;
    for result in results {
        if let Err(e) = result {
            if first.is_none() {
                first = Some(e);
            } else {
                warn!(error = %e, "Additional closed-request cleanup failure");
            }
        }
    }
    first.map_or(Ok(()), Err)
}

/// AS: drop RP mappings and salt of closed requests, invalidate schemas.
pub async fn process_as_tasks(
    ctx: &RoleContext,
    node_id: &NodeId,
    blocks: &[ParsedBlock],
) -> Result<()> {
    for block in blocks {
        for service_id in updated_service_ids(block) {
            ctx.schema_cache.invalidate(service_id);
        }
    }
    for_each_closed(blocks, |request_id| cleanup_as_request(ctx, node_id, request_id)).await
}

async fn cleanup_as_request(ctx: &RoleContext, node_id: &NodeId, request_id: RequestId) -> Result<()> {
    // Without a salt this node never took part, nothing to clean.
    if ctx.cache.get_initial_salt(node_id, &request_id).await?.is_none() {
        return Ok(());
    }
    match ctx.ledger.get_request_detail(&request_id).await? {
        Some(detail) => {
            for entry in &detail.data_request_list {
                ctx.cache
                    .remove_rp_id_from_data_request_id(node_id, &request_id, &entry.service_id)
                    .await?;
            }
        }
        None => warn!(%node_id, %request_id, "Closed request has no detail on the ledger"),
    }
    ctx.cache.remove_initial_salt(node_id, &request_id).await?;
    debug!(%node_id, %request_id, "Cleaned up closed data request");
    Ok(())
}

/// IDP: drop the temporary identity and salt of closed requests.
pub async fn process_idp_tasks(
    ctx: &RoleContext,
    node_id: &NodeId,
    blocks: &[ParsedBlock],
) -> Result<()> {
    for_each_closed(blocks, |request_id| async move {
        ctx.cache
            .remove_identity_from_request_id(node_id, &request_id)
            .await?;
        ctx.cache.remove_initial_salt(node_id, &request_id).await
    })
    .await
}

/// RP: drop the salt of closed requests.
pub async fn process_rp_tasks(
    ctx: &RoleContext,
    node_id: &NodeId,
    blocks: &[ParsedBlock],
) -> Result<()> {
    for_each_closed(blocks, |request_id| async move {
        ctx.cache.remove_initial_salt(node_id, &request_id).await
    })
    .await
}
