//! Adding an accessor to an identity once its owner consented.
//!
//! ```text
//! add_accessor_after_consent
//!     └─ AddAccessor tx ──► AFTER_ADD_ACCESSOR_METHOD
//!                              ├─ ial present: RegisterMsqDestination tx ──► AFTER_REGISTER_MQ_DEST
//!                              └─ ial absent ─────────────────────────────────────┐
//!                                                                                 ▼
//!                                        drop identity record, invoke terminal callback
//! ```
//!
//! A rejected transaction or a failing step invokes the terminal callback
//! with an error payload and ends the chain. Ledger writes already
//! committed stay as they are.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use shared_types::entities::{NodeId, RequestId, TxId};
use shared_types::ipc::{
    LedgerTransaction, TransactionOutcome, FN_ADD_ACCESSOR, FN_REGISTER_MQ_DESTINATION,
};
use tracing::{debug, warn};

use super::registry::{ContinuationRegistry, ContinuationStep};
use crate::domain::{CallbackDescriptor, SavedArgs};
use crate::error::{OrchestrationError, Result};

/// Resumes after the `AddAccessor` transaction
pub const AFTER_ADD_ACCESSOR_METHOD: &str =
    "identity.addAccessorAfterConsentAfterAddAccessorMethod";
/// Resumes after the `RegisterMsqDestination` transaction
pub const AFTER_REGISTER_MQ_DEST: &str = "identity.addAccessorAfterConsentAfterRegisterMqDest";
/// Action name attached to errors of this workflow
pub const ACTION_ADD_ACCESSOR: &str = "addAccessorAfterConsent";

/// Register both steps of the workflow.
pub fn register_add_accessor_steps(registry: &ContinuationRegistry) {
    registry.register_step(AFTER_ADD_ACCESSOR_METHOD, Arc::new(AfterAddAccessorMethod));
    registry.register_step(AFTER_REGISTER_MQ_DEST, Arc::new(AfterRegisterMqDest));
}

/// Start the workflow: submit `AddAccessor` for the identity cached under
/// `request_id`, joining the accessor group of `old_accessor_id`.
///
/// Lookups failing here are returned to the caller; nothing was submitted.
pub async fn add_accessor_after_consent(
    registry: &ContinuationRegistry,
    node_id: &NodeId,
    request_id: &RequestId,
    old_accessor_id: &str,
    callback: CallbackDescriptor,
) -> Result<TxId> {
    debug!(%node_id, %request_id, old_accessor_id, "Got consent, adding accessor");

    let accessor_group_id = registry
        .ledger()
        .get_accessor_group_id(old_accessor_id)
        .await?
        .ok_or_else(|| OrchestrationError::AccessorGroupNotFound {
            accessor_id: old_accessor_id.to_string(),
        })?;
    let identity = registry
        .cache()
        .get_identity_from_request_id(node_id, request_id)
        .await?
        .ok_or_else(|| OrchestrationError::IdentityNotFound {
            request_id: request_id.clone(),
        })?;

    let transaction = LedgerTransaction::new(
        node_id.clone(),
        FN_ADD_ACCESSOR,
        json!({
            "request_id": request_id,
            "accessor_group_id": accessor_group_id,
            "accessor_type": identity.accessor_type,
            "accessor_id": identity.accessor_id,
            "accessor_public_key": identity.accessor_public_key,
        }),
    );
    let saved = SavedArgs::AfterAddAccessorMethod {
        request_id: request_id.clone(),
        hash_id: identity.hash_id,
        ial: identity.ial,
        secret: identity.secret,
        associated: identity.associated,
    };
    registry
        .submit(transaction, AFTER_ADD_ACCESSOR_METHOD, saved, callback)
        .await
}

/// Step 1 resumed: the accessor is on the ledger.
struct AfterAddAccessorMethod;

#[async_trait]
impl ContinuationStep for AfterAddAccessorMethod {
    async fn resume(
        &self,
        registry: &ContinuationRegistry,
        node_id: &NodeId,
        outcome: TransactionOutcome,
        saved: SavedArgs,
        callback: CallbackDescriptor,
    ) -> Result<()> {
        let SavedArgs::AfterAddAccessorMethod {
            request_id,
            hash_id,
            ial,
            secret,
            associated,
        } = saved
        else {
            return Err(OrchestrationError::MismatchedArgs {
                continuation: AFTER_ADD_ACCESSOR_METHOD.to_string(),
            });
        };

        let step = async {
            ensure_committed(outcome)?;
            // No ial: an existing owner adds an accessor, destinations stay.
            match ial {
                Some(ial) => {
                    let transaction = LedgerTransaction::new(
                        node_id.clone(),
                        FN_REGISTER_MQ_DESTINATION,
                        json!({ "users": [{ "hash_id": hash_id, "ial": ial }] }),
                    );
                    let saved = SavedArgs::AfterRegisterMqDest {
                        request_id: request_id.clone(),
                        secret: secret.clone(),
                        associated,
                    };
                    registry
                        .submit(transaction, AFTER_REGISTER_MQ_DEST, saved, callback.clone())
                        .await
                        .map(|_| ())
                }
                None => {
                    finish(registry, node_id, &request_id, &secret, associated, &callback).await
                }
            }
        };

        match step.await {
            Ok(()) => Ok(()),
            Err(e) => fail(registry, node_id, &request_id, e, callback).await,
        }
    }
}

/// Step 2 resumed: the bus destination is registered.
struct AfterRegisterMqDest;

#[async_trait]
impl ContinuationStep for AfterRegisterMqDest {
    async fn resume(
        &self,
        registry: &ContinuationRegistry,
        node_id: &NodeId,
        outcome: TransactionOutcome,
        saved: SavedArgs,
        callback: CallbackDescriptor,
    ) -> Result<()> {
        let SavedArgs::AfterRegisterMqDest {
            request_id,
            secret,
            associated,
        } = saved
        else {
            return Err(OrchestrationError::MismatchedArgs {
                continuation: AFTER_REGISTER_MQ_DEST.to_string(),
            });
        };

        let step = async {
            ensure_committed(outcome)?;
            finish(registry, node_id, &request_id, &secret, associated, &callback).await
        };

        match step.await {
            Ok(()) => Ok(()),
            Err(e) => fail(registry, node_id, &request_id, e, callback).await,
        }
    }
}

fn ensure_committed(outcome: TransactionOutcome) -> Result<()> {
    match outcome {
        TransactionOutcome::Committed { .. } => Ok(()),
        TransactionOutcome::Rejected { reason } => {
            Err(OrchestrationError::TransactionRejected(reason))
        }
    }
}

/// Last effect: drop the cached identity and report the secret.
async fn finish(
    registry: &ContinuationRegistry,
    node_id: &NodeId,
    request_id: &RequestId,
    secret: &str,
    associated: bool,
    callback: &CallbackDescriptor,
) -> Result<()> {
    registry
        .cache()
        .remove_identity_from_request_id(node_id, request_id)
        .await?;
    registry
        .invoke_callback(
            node_id,
            callback.clone(),
            Ok(json!({ "secret": secret, "associated": associated })),
        )
        .await
}

async fn fail(
    registry: &ContinuationRegistry,
    node_id: &NodeId,
    request_id: &RequestId,
    error: OrchestrationError,
    callback: CallbackDescriptor,
) -> Result<()> {
    let error = error.with_context(node_id, ACTION_ADD_ACCESSOR, Some(request_id));
    warn!(%node_id, %request_id, error = %error, "Add accessor workflow failed");
    registry
        .invoke_callback(node_id, callback, Err(error.to_payload()))
        .await
}
