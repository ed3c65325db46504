//! Per-request advisory exclusion.
//!
//! Protects one `(node, request)` pair against the bus-delivery path and the
//! block-replay path handling it at the same time inside this process. It is
//! not a distributed lock.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use shared_types::entities::{NodeId, RequestId};

type LockKey = (NodeId, RequestId);

/// Set of requests currently being evaluated or processed.
#[derive(Debug, Default)]
pub struct RequestLockTable {
    held: Mutex<HashSet<LockKey>>,
}

impl RequestLockTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock. Returns `false` if another path already holds it.
    pub fn acquire(&self, node_id: &NodeId, request_id: &RequestId) -> bool {
        self.held
            .lock()
            .insert((node_id.clone(), request_id.clone()))
    }

    /// Drop the lock. No-op if not held.
    pub fn release(&self, node_id: &NodeId, request_id: &RequestId) {
        self.held
            .lock()
            .remove(&(node_id.clone(), request_id.clone()));
    }

    /// Whether the lock is currently held
    pub fn is_locked(&self, node_id: &NodeId, request_id: &RequestId) -> bool {
        self.held
            .lock()
            .contains(&(node_id.clone(), request_id.clone()))
    }

    /// Take the lock and get a guard that releases it on drop.
    pub fn try_lock(
        self: &Arc<Self>,
        node_id: &NodeId,
        request_id: &RequestId,
    ) -> Option<RequestLockGuard> {
        if !self.acquire(node_id, request_id) {
            return None;
        }
        Some(RequestLockGuard {
            table: Arc::clone(self),
            key: Some((node_id.clone(), request_id.clone())),
        })
    }

    /// Number of locks held
    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    /// Whether no lock is held
    pub fn is_empty(&self) -> bool {
        self.held.lock().is_empty()
    }

    /// Forget every lock. Used at shutdown.
    pub fn clear(&self) {
        self.held.lock().clear();
    }
}

/// Held lock on one request. Released on drop, on every exit path.
#[derive(Debug)]
pub struct RequestLockGuard {
    table: Arc<RequestLockTable>,
    key: Option<LockKey>,
}

impl RequestLockGuard {
    /// Release the lock only if `condition` holds.
    ///
    /// `condition` runs while the table mutex is held, so no other path can
    /// observe the lock between the check and the release. Returns whether
    /// the lock was released. `condition` must not touch the lock table.
    pub fn release_if(&mut self, condition: impl FnOnce() -> bool) -> bool {
        let Some(key) = self.key.as_ref() else {
            return true;
        };
        let mut held = self.table.held.lock();
        if !condition() {
            return false;
        }
        held.remove(key);
        drop(held);
        self.key = None;
        true
    }

    /// Whether this guard still holds its lock
    pub fn is_held(&self) -> bool {
        self.key.is_some()
    }
}

impl Drop for RequestLockGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.table.held.lock().remove(&key);
        }
    }
}
