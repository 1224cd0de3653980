//! Replay Stores
//!
//! The durable side of the replay cache. A store only has to make each write
//! succeed or fail as a whole; last write wins.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::record::{decode_record, encode_record, CacheRecord};
use super::CacheKey;
use crate::error::CacheError;
use crate::snapshot::StreamSnapshot;

/// Keyed storage for finished snapshots
#[async_trait]
pub trait ReplayStore: Send + Sync {
    /// Load the snapshot stored under `key`
    async fn get(&self, key: &CacheKey) -> Result<Option<StreamSnapshot>, CacheError>;

    /// Store `snapshot` under `key`, replacing any previous value
    async fn put(&self, key: &CacheKey, snapshot: &StreamSnapshot) -> Result<(), CacheError>;
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<CacheKey, StreamSnapshot>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ReplayStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<StreamSnapshot>, CacheError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &CacheKey, snapshot: &StreamSnapshot) -> Result<(), CacheError> {
        self.entries.insert(key.clone(), snapshot.clone());
        Ok(())
    }
}

/// One checksummed record file per key
///
/// Records are written to a temporary file and renamed into place.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store records under `dir` (created on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the records
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a key is stored in
    #[must_use]
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!(
            "{}-{}.rec",
            hex::encode(&key.conversation_id),
            hex::encode(&key.message_id)
        ))
    }
}

#[async_trait]
impl ReplayStore for FileStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<StreamSnapshot>, CacheError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record = decode_record(&bytes)?;
        if !record.matches(key) {
            debug!(path = %path.display(), key = %key, "Record belongs to a different key");
            return Ok(None);
        }
        Ok(Some(record.snapshot))
    }

    async fn put(&self, key: &CacheKey, snapshot: &StreamSnapshot) -> Result<(), CacheError> {
        let bytes = encode_record(&CacheRecord::new(key, snapshot.clone()))?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let target = self.path_for(key);
        let temp = self.dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&temp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!(path = %target.display(), bytes = bytes.len(), "Stored replay record");
        Ok(())
    }
}
