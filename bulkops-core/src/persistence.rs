//! Durable state boundary.
//!
//! Only two bounded slices ever leave the process: the most recent terminal
//! operations and the most recent undo entries, each serialized as a
//! versioned, checksummed MessagePack envelope under a namespaced key.
//! Selection state and in-flight operations are never persisted.
//!
//! Storage is pluggable behind [`StateStore`]: an in-memory fake for tests
//! and a file-backed store with atomic temp-file swapping and a backup copy
//! for production.

use crate::error::PersistenceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, warn};

/// Key of the persisted terminal-operation slice.
pub const OPERATIONS_KEY: &str = "bulkops/operations";

/// Key of the persisted undo-history slice.
pub const UNDO_KEY: &str = "bulkops/undo";

/// Current envelope format version.
const CURRENT_VERSION: u32 = 1;

/// Minimal byte-oriented storage backend.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), PersistenceError>;

    async fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}

/// Versioned envelope wrapping one persisted record slice.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    saved_at: DateTime<Utc>,
    checksum: u64,
    records: Vec<T>,
}

fn backup_key(key: &str) -> String {
    format!("{key}.bak")
}

fn checksum_of<T: Serialize>(records: &[T]) -> Result<u64, PersistenceError> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let bytes = rmp_serde::to_vec(records)?;
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    Ok(hasher.finish())
}

/// Encode and store one record slice, keeping the previous envelope as a
/// backup for corruption fallback.
pub async fn save_slice<T: Serialize + Sync>(
    store: &dyn StateStore,
    key: &str,
    records: &[T],
) -> Result<(), PersistenceError> {
    // Borrowed mirror of `Envelope` so saving never clones the records;
    // both encode to the same MessagePack layout.
    #[derive(Serialize)]
    struct EnvelopeRef<'a, T> {
        version: u32,
        saved_at: DateTime<Utc>,
        checksum: u64,
        records: &'a [T],
    }

    let bytes = rmp_serde::to_vec(&EnvelopeRef {
        version: CURRENT_VERSION,
        saved_at: Utc::now(),
        checksum: checksum_of(records)?,
        records,
    })?;

    if let Some(previous) = store.get(key).await? {
        store.put(&backup_key(key), previous).await?;
    }

    store.put(key, bytes).await?;
    debug!(key, count = records.len(), "Persisted state slice");
    Ok(())
}

/// Load one record slice, falling back to the backup envelope when the main
/// one is corrupted, and to an empty slice when neither is readable.
pub async fn load_slice<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> Result<Vec<T>, PersistenceError>
where
    T: Serialize,
{
    match try_load(store, key).await {
        Ok(records) => Ok(records),
        Err(err) if err.is_corruption() => {
            warn!(key, error = %err, "Persisted state corrupted, trying backup");
            match try_load(store, &backup_key(key)).await {
                Ok(records) => Ok(records),
                Err(backup_err) => {
                    warn!(key, error = %backup_err, "Backup unusable, starting empty");
                    Ok(Vec::new())
                }
            }
        }
        Err(err) => Err(err),
    }
}

async fn try_load<T: DeserializeOwned + Serialize>(
    store: &dyn StateStore,
    key: &str,
) -> Result<Vec<T>, PersistenceError> {
    let Some(bytes) = store.get(key).await? else {
        return Ok(Vec::new());
    };

    let envelope: Envelope<T> = rmp_serde::from_slice(&bytes)?;

    if envelope.version > CURRENT_VERSION {
        return Err(PersistenceError::VersionMismatch {
            expected: CURRENT_VERSION,
            found: envelope.version,
        });
    }

    let computed = checksum_of(&envelope.records)?;
    if computed != envelope.checksum {
        return Err(PersistenceError::ChecksumMismatch {
            key: key.to_string(),
        });
    }

    Ok(envelope.records)
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        self.entries.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// File-backed store: one file per key under a root directory, written via
/// temp file and atomic rename.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Result<Self, PersistenceError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are namespaced with '/'; flatten them into one file name.
        self.root.join(format!("{}.msgpack", key.replace('/', "__")))
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(&path).await?))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");

        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::item::{ItemId, ItemKind};
    use crate::model::operation::{ActionKind, BulkOperation, OperationStatus};
    use tempfile::TempDir;

    fn terminal_op(n: usize) -> BulkOperation {
        let ids: Vec<ItemId> = (0..n).map(|i| ItemId::from(format!("p{i}"))).collect();
        let mut op = BulkOperation::new(ActionKind::Close, ItemKind::Position, ids);
        op.status = OperationStatus::Completed;
        op.processed_items = n;
        op.completed_at = Some(Utc::now());
        op
    }

    #[tokio::test]
    async fn memory_round_trip() {
        let store = MemoryStore::new();
        let ops = vec![terminal_op(3), terminal_op(1)];

        save_slice(&store, OPERATIONS_KEY, &ops).await.unwrap();
        let loaded: Vec<BulkOperation> = load_slice(&store, OPERATIONS_KEY).await.unwrap();

        assert_eq!(loaded, ops);
    }

    #[tokio::test]
    async fn missing_key_loads_empty() {
        let store = MemoryStore::new();
        let loaded: Vec<BulkOperation> = load_slice(&store, UNDO_KEY).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn file_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).unwrap();
        let ops = vec![terminal_op(2)];

        save_slice(&store, OPERATIONS_KEY, &ops).await.unwrap();
        let loaded: Vec<BulkOperation> = load_slice(&store, OPERATIONS_KEY).await.unwrap();

        assert_eq!(loaded, ops);
        assert!(dir.path().join("bulkops__operations.msgpack").exists());
    }

    #[tokio::test]
    async fn corrupted_main_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).unwrap();

        let first = vec![terminal_op(1)];
        save_slice(&store, OPERATIONS_KEY, &first).await.unwrap();

        // Second save moves the first envelope into the backup slot.
        let second = vec![terminal_op(1), terminal_op(2)];
        save_slice(&store, OPERATIONS_KEY, &second).await.unwrap();

        // Corrupt the main file.
        store
            .put(OPERATIONS_KEY, b"garbage".to_vec())
            .await
            .unwrap();

        let loaded: Vec<BulkOperation> = load_slice(&store, OPERATIONS_KEY).await.unwrap();
        assert_eq!(loaded, first);
    }

    #[tokio::test]
    async fn both_copies_unusable_starts_empty() {
        let store = MemoryStore::new();
        store.put(UNDO_KEY, b"junk".to_vec()).await.unwrap();

        let loaded: Vec<BulkOperation> = load_slice(&store, UNDO_KEY).await.unwrap();
        assert!(loaded.is_empty());
    }
}
