//! Typed access to the node's request-scoped state.
//!
//! Owns the key schema on top of a byte-level [`KeyValueStore`]:
//!
//! | Key | Value |
//! |-----|-------|
//! | `mq_request/{node}/{request}` | buffered [`BusMessage`] |
//! | `expected/{node}/{height:020}/{request}` | empty |
//! | `initial_salt/{node}/{request}` | salt |
//! | `rp_id/{node}/{request}:{service}` | RP node id |
//! | `identity/{node}/{request}` | [`IdentityRecord`] |
//! | `continuation/{tx_id}` | [`ContinuationRecord`] |
//! | `callback_job/{job_id}` | [`CallbackJob`] |
//!
//! Heights are zero-padded so a prefix scan returns them in numeric order.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::entities::{BlockHeight, NodeId, RequestId, TxId};
use shared_types::ipc::BusMessage;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{CallbackJob, ContinuationRecord, IdentityRecord};
use crate::error::Result;
use crate::ports::outbound::{BatchOperation, KeyValueStore};

fn mq_request_key(node_id: &NodeId, request_id: &RequestId) -> Vec<u8> {
    format!("mq_request/{node_id}/{request_id}").into_bytes()
}

fn expected_prefix(node_id: &NodeId) -> String {
    format!("expected/{node_id}/")
}

fn expected_key(node_id: &NodeId, height: BlockHeight, request_id: &RequestId) -> Vec<u8> {
    format!("{}{height:020}/{request_id}", expected_prefix(node_id)).into_bytes()
}

fn initial_salt_key(node_id: &NodeId, request_id: &RequestId) -> Vec<u8> {
    format!("initial_salt/{node_id}/{request_id}").into_bytes()
}

fn rp_id_key(node_id: &NodeId, request_id: &RequestId, service_id: &str) -> Vec<u8> {
    format!("rp_id/{node_id}/{request_id}:{service_id}").into_bytes()
}

fn identity_key(node_id: &NodeId, request_id: &RequestId) -> Vec<u8> {
    format!("identity/{node_id}/{request_id}").into_bytes()
}

const CONTINUATION_PREFIX: &str = "continuation/";
const CALLBACK_JOB_PREFIX: &str = "callback_job/";

fn continuation_key(tx_id: &TxId) -> Vec<u8> {
    format!("{CONTINUATION_PREFIX}{tx_id}").into_bytes()
}

fn callback_job_key(job_id: &Uuid) -> Vec<u8> {
    format!("{CALLBACK_JOB_PREFIX}{job_id}").into_bytes()
}

/// Parse `{height:020}/{request}` after the node prefix.
fn parse_expected_suffix(suffix: &str) -> Option<(BlockHeight, RequestId)> {
    let (height, request_id) = suffix.split_once('/')?;
    Some((height.parse().ok()?, RequestId::from(request_id)))
}

/// Typed facade over the key-value store.
pub struct CacheDb {
    store: Arc<dyn KeyValueStore>,
    /// Serializes read-then-delete of continuation records.
    take_lock: Mutex<()>,
}

impl CacheDb {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            take_lock: Mutex::new(()),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize + Sync>(&self, key: &[u8], value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.store.put(key, &bytes).await?;
        Ok(())
    }

    async fn scan_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for (key, bytes) in self.store.prefix_scan(prefix.as_bytes()).await? {
            match serde_json::from_slice(&bytes) {
                Ok(value) => values.push(value),
                Err(e) => warn!(
                    key = %String::from_utf8_lossy(&key),
                    error = %e,
                    "Skipping undecodable store entry"
                ),
            }
        }
        Ok(values)
    }

    // =========================================================================
    // MESSAGES RECEIVED FROM THE BUS
    // =========================================================================

    pub async fn get_request_received_from_mq(
        &self,
        node_id: &NodeId,
        request_id: &RequestId,
    ) -> Result<Option<BusMessage>> {
        self.get_json(&mq_request_key(node_id, request_id)).await
    }

    pub async fn remove_request_received_from_mq(
        &self,
        node_id: &NodeId,
        request_id: &RequestId,
    ) -> Result<()> {
        self.store
            .delete(&mq_request_key(node_id, request_id))
            .await?;
        Ok(())
    }

    /// Store the message and index it under its origin height, atomically.
    pub async fn buffer_request(&self, node_id: &NodeId, message: &BusMessage) -> Result<()> {
        let body = serde_json::to_vec(message)?;
        self.store
            .atomic_batch_write(vec![
                BatchOperation::put(mq_request_key(node_id, &message.request_id), body),
                BatchOperation::put(
                    expected_key(node_id, message.height, &message.request_id),
                    Vec::new(),
                ),
            ])
            .await?;
        Ok(())
    }

    /// Undo [`buffer_request`](Self::buffer_request).
    pub async fn unbuffer_request(
        &self,
        node_id: &NodeId,
        height: BlockHeight,
        request_id: &RequestId,
    ) -> Result<()> {
        self.store
            .atomic_batch_write(vec![
                BatchOperation::delete(mq_request_key(node_id, request_id)),
                BatchOperation::delete(expected_key(node_id, height, request_id)),
            ])
            .await?;
        Ok(())
    }

    // =========================================================================
    // EXPECTED-IN-BLOCK INDEX
    // =========================================================================

    pub async fn add_request_id_expected_in_block(
        &self,
        node_id: &NodeId,
        height: BlockHeight,
        request_id: &RequestId,
    ) -> Result<()> {
        self.store
            .put(&expected_key(node_id, height, request_id), &[])
            .await?;
        Ok(())
    }

    /// Request ids indexed at heights `from..=to`, in height order.
    pub async fn get_request_ids_expected_in_block(
        &self,
        node_id: &NodeId,
        from: BlockHeight,
        to: BlockHeight,
    ) -> Result<Vec<(BlockHeight, RequestId)>> {
        Ok(self
            .expected_entries(node_id)
            .await?
            .into_iter()
            .filter(|(height, _, _)| (from..=to).contains(height))
            .map(|(height, request_id, _)| (height, request_id))
            .collect())
    }

    /// Drop every index entry at heights `from..=to`.
    pub async fn remove_request_ids_expected_in_block(
        &self,
        node_id: &NodeId,
        from: BlockHeight,
        to: BlockHeight,
    ) -> Result<usize> {
        let operations: Vec<_> = self
            .expected_entries(node_id)
            .await?
            .into_iter()
            .filter(|(height, _, _)| (from..=to).contains(height))
            .map(|(_, _, key)| BatchOperation::delete(key))
            .collect();
        let removed = operations.len();
        if removed > 0 {
            self.store.atomic_batch_write(operations).await?;
        }
        Ok(removed)
    }

    async fn expected_entries(
        &self,
        node_id: &NodeId,
    ) -> Result<Vec<(BlockHeight, RequestId, Vec<u8>)>> {
        let prefix = expected_prefix(node_id);
        let mut entries = Vec::new();
        for (key, _) in self.store.prefix_scan(prefix.as_bytes()).await? {
            let parsed = std::str::from_utf8(&key)
                .ok()
                .and_then(|k| k.strip_prefix(prefix.as_str()))
                .and_then(parse_expected_suffix);
            match parsed {
                Some((height, request_id)) => entries.push((height, request_id, key)),
                None => warn!(
                    key = %String::from_utf8_lossy(&key),
                    "Skipping malformed expected-in-block key"
                ),
            }
        }
        Ok(entries)
    }

    // =========================================================================
    // WORKFLOW SCRATCH STATE
    // =========================================================================

    pub async fn set_initial_salt(
        &self,
        node_id: &NodeId,
        request_id: &RequestId,
        salt: &str,
    ) -> Result<()> {
        self.put_json(&initial_salt_key(node_id, request_id), &salt)
            .await
    }

    pub async fn get_initial_salt(
        &self,
        node_id: &NodeId,
        request_id: &RequestId,
    ) -> Result<Option<String>> {
        self.get_json(&initial_salt_key(node_id, request_id)).await
    }

    pub async fn remove_initial_salt(&self, node_id: &NodeId, request_id: &RequestId) -> Result<()> {
        self.store
            .delete(&initial_salt_key(node_id, request_id))
            .await?;
        Ok(())
    }

    pub async fn set_rp_id_from_data_request_id(
        &self,
        node_id: &NodeId,
        request_id: &RequestId,
        service_id: &str,
        rp_id: &NodeId,
    ) -> Result<()> {
        self.put_json(&rp_id_key(node_id, request_id, service_id), rp_id)
            .await
    }

    pub async fn get_rp_id_from_data_request_id(
        &self,
        node_id: &NodeId,
        request_id: &RequestId,
        service_id: &str,
    ) -> Result<Option<NodeId>> {
        self.get_json(&rp_id_key(node_id, request_id, service_id))
            .await
    }

    pub async fn remove_rp_id_from_data_request_id(
        &self,
        node_id: &NodeId,
        request_id: &RequestId,
        service_id: &str,
    ) -> Result<()> {
        self.store
            .delete(&rp_id_key(node_id, request_id, service_id))
            .await?;
        Ok(())
    }

    pub async fn set_identity_from_request_id(
        &self,
        node_id: &NodeId,
        request_id: &RequestId,
        identity: &IdentityRecord,
    ) -> Result<()> {
        self.put_json(&identity_key(node_id, request_id), identity)
            .await
    }

    pub async fn get_identity_from_request_id(
        &self,
        node_id: &NodeId,
        request_id: &RequestId,
    ) -> Result<Option<IdentityRecord>> {
        self.get_json(&identity_key(node_id, request_id)).await
    }

    pub async fn remove_identity_from_request_id(
        &self,
        node_id: &NodeId,
        request_id: &RequestId,
    ) -> Result<()> {
        self.store
            .delete(&identity_key(node_id, request_id))
            .await?;
        Ok(())
    }

    // =========================================================================
    // CONTINUATIONS
    // =========================================================================

    pub async fn put_continuation(&self, record: &ContinuationRecord) -> Result<()> {
        self.put_json(&continuation_key(&record.tx_id), record).await
    }

    pub async fn get_continuation(&self, tx_id: &TxId) -> Result<Option<ContinuationRecord>> {
        self.get_json(&continuation_key(tx_id)).await
    }

    /// Read and delete in one step. Of two concurrent takes, one gets `None`.
    pub async fn take_continuation(&self, tx_id: &TxId) -> Result<Option<ContinuationRecord>> {
        let _guard = self.take_lock.lock().await;
        let key = continuation_key(tx_id);
        let record = self.get_json(&key).await?;
        if record.is_some() {
            self.store.delete(&key).await?;
        }
        Ok(record)
    }

    pub async fn remove_continuation(&self, tx_id: &TxId) -> Result<()> {
        self.store.delete(&continuation_key(tx_id)).await?;
        Ok(())
    }

    pub async fn list_continuations(&self) -> Result<Vec<ContinuationRecord>> {
        self.scan_json(CONTINUATION_PREFIX).await
    }

    // =========================================================================
    // CALLBACK JOBS
    // =========================================================================

    pub async fn put_callback_job(&self, job: &CallbackJob) -> Result<()> {
        self.put_json(&callback_job_key(&job.id), job).await
    }

    pub async fn remove_callback_job(&self, job_id: &Uuid) -> Result<()> {
        self.store.delete(&callback_job_key(job_id)).await?;
        Ok(())
    }

    pub async fn list_callback_jobs(&self) -> Result<Vec<CallbackJob>> {
        self.scan_json(CALLBACK_JOB_PREFIX).await
    }

    /// Make all writes durable.
    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await?;
        Ok(())
    }
}
