//! Cached data schemas, keyed by service id.

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::ports::outbound::SchemaCache;

/// In-process schema cache.
///
/// Entries are dropped when a block carries an `UpdateService` for the
/// service, so the next lookup fetches the new schema.
#[derive(Default)]
pub struct DataSchemaCache {
    schemas: DashMap<String, Value>,
}

impl DataSchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, service_id: &str) -> Option<Value> {
        self.schemas.get(service_id).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, service_id: impl Into<String>, schema: Value) {
        self.schemas.insert(service_id.into(), schema);
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl SchemaCache for DataSchemaCache {
    fn invalidate(&self, service_id: &str) {
        if self.schemas.remove(service_id).is_some() {
            debug!(service_id, "Data schema invalidated");
        }
    }
}
