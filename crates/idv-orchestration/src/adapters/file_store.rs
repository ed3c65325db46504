use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::memory_store::{apply_batch, scan_prefix};
use crate::error::KVStoreError;
use crate::ports::outbound::{BatchOperation, KeyValueStore, ScanResult};

type Snapshot = BTreeMap<Vec<u8>, Vec<u8>>;

/// File-backed key-value store.
///
/// Keeps the whole data set in memory and rewrites a `bincode` snapshot on
/// every write, atomically via temp file + rename. Meant for the modest
/// amount of request-scoped state a node carries, not as a general database.
///
/// Snapshot writes run on the blocking pool. Writers queue on `writer`;
/// readers only take `data` for the length of a lookup and keep seeing the
/// previous state until the new snapshot is on disk.
pub struct FileBackedKVStore {
    data: Mutex<Snapshot>,
    writer: tokio::sync::Mutex<()>,
    path: PathBuf,
}

impl FileBackedKVStore {
    /// Open the store at `path`, loading the existing snapshot if any.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, KVStoreError> {
        let path = path.as_ref().to_path_buf();
        let data = Self::load_from_file(&path)?;

        if data.is_empty() {
            info!(path = %path.display(), "No existing store snapshot");
        } else {
            info!(path = %path.display(), keys = data.len(), "Loaded store snapshot");
        }

        Ok(Self {
            data: Mutex::new(data),
            writer: tokio::sync::Mutex::new(()),
            path,
        })
    }

    /// Location of the snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_file(path: &Path) -> Result<Snapshot, KVStoreError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(io_error(e)),
        };
        if bytes.is_empty() {
            return Ok(BTreeMap::new());
        }
        bincode::deserialize(&bytes).map_err(|e| KVStoreError::Corrupted(e.to_string()))
    }

    async fn save_to_file(&self, data: &Snapshot) -> Result<(), KVStoreError> {
        let bytes = bincode::serialize(data).map_err(|e| KVStoreError::Corrupted(e.to_string()))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_snapshot(&path, &bytes))
            .await
            .map_err(|e| KVStoreError::IOError {
                message: format!("snapshot writer failed: {e}"),
            })??;

        debug!(path = %self.path.display(), keys = data.len(), "Store snapshot written");
        Ok(())
    }

    async fn mutate(&self, change: impl FnOnce(&mut Snapshot)) -> Result<(), KVStoreError> {
        let _writer = self.writer.lock().await;
        let mut next = self.data.lock().clone();
        change(&mut next);
        // Only publish the change once it is on disk.
        self.save_to_file(&next).await?;
        *self.data.lock() = next;
        Ok(())
    }
}

fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<(), KVStoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).map_err(io_error)?;
    file.write_all(bytes).map_err(io_error)?;
    file.sync_all().map_err(io_error)?;
    std::fs::rename(&temp_path, path).map_err(io_error)
}

fn io_error(e: std::io::Error) -> KVStoreError {
    KVStoreError::IOError {
        message: e.to_string(),
    }
}

#[async_trait]
impl KeyValueStore for FileBackedKVStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.mutate(|data| {
            data.insert(key.to_vec(), value.to_vec());
        })
        .await
    }

    async fn delete(&self, key: &[u8]) -> Result<(), KVStoreError> {
        if !self.data.lock().contains_key(key) {
            return Ok(());
        }
        self.mutate(|data| {
            data.remove(key);
        })
        .await
    }

    async fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        self.mutate(|data| apply_batch(data, operations)).await
    }

    async fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanResult, KVStoreError> {
        Ok(scan_prefix(&self.data.lock(), prefix))
    }

    async fn flush(&self) -> Result<(), KVStoreError> {
        let _writer = self.writer.lock().await;
        let data = self.data.lock().clone();
        self.save_to_file(&data).await
    }
}
