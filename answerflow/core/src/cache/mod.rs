//! Replay Cache
//!
//! Durable, keyed storage of finished snapshots so an answer can be replayed
//! (text or audio) without generating it again.
//!
//! Caching is best-effort: every store failure is logged and swallowed, and
//! corrupted records read back as misses. A disabled cache neither reads nor
//! writes.

mod record;
mod store;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::chunk::{AudioChunk, ChunkPayload, StreamChunk, TextChunk};
use crate::snapshot::StreamSnapshot;

pub use record::{decode_record, encode_record, CacheRecord, MAX_RECORD_SIZE};
pub use store::{FileStore, MemoryStore, ReplayStore};

/// Identifies one assistant message
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Conversation id
    pub conversation_id: String,
    /// Message id
    pub message_id: String,
}

impl CacheKey {
    /// Create a key
    pub fn new(conversation_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.conversation_id, self.message_id)
    }
}

/// Best-effort facade over a [`ReplayStore`]
#[derive(Clone)]
pub struct ReplayCache {
    store: Option<Arc<dyn ReplayStore>>,
}

impl ReplayCache {
    /// Cache backed by `store`
    #[must_use]
    pub fn new(store: Arc<dyn ReplayStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Cache that never reads or writes
    #[must_use]
    pub fn disabled() -> Self {
        Self { store: None }
    }

    /// Cache backed by a fresh [`MemoryStore`]
    #[must_use]
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Cache backed by a [`FileStore`] in `dir`
    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileStore::new(dir)))
    }

    /// Whether reads and writes go to a store
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Store the final snapshot of a message
    pub async fn persist(&self, key: &CacheKey, snapshot: &StreamSnapshot) {
        let Some(store) = &self.store else {
            return;
        };
        match store.put(key, snapshot).await {
            Ok(()) => debug!(key = %key, "Persisted replay snapshot"),
            Err(e) => warn!(key = %key, error = %e, "Failed to persist replay snapshot"),
        }
    }

    /// Load the cached snapshot of a message
    pub async fn get_cached_snapshot(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Option<StreamSnapshot> {
        let store = self.store.as_ref()?;
        let key = CacheKey::new(conversation_id, message_id);
        match store.get(&key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read replay snapshot");
                None
            }
        }
    }

    /// Replay a cached message's audio as one final audio chunk
    ///
    /// `listener` is called only when the snapshot carries audio. Returns the
    /// cached snapshot, if any.
    pub async fn replay_audio<F>(
        &self,
        conversation_id: &str,
        message_id: &str,
        listener: F,
    ) -> Option<StreamSnapshot>
    where
        F: FnOnce(&StreamChunk),
    {
        let snapshot = self.get_cached_snapshot(conversation_id, message_id).await?;
        if let Some(track) = snapshot.audio.as_ref().filter(|t| !t.is_empty()) {
            let chunk = StreamChunk::audio(
                snapshot.transport,
                AudioChunk {
                    mime_type: track.mime_type.clone(),
                    bytes: track.buffer(),
                    spectrum: Some(track.spectrum.clone()),
                    waveform: Some(track.waveform.clone()),
                    is_final: true,
                },
            );
            listener(&chunk);
        }
        Some(snapshot)
    }

    /// Replay a cached message's text as one final text chunk
    pub async fn replay_text<F>(
        &self,
        conversation_id: &str,
        message_id: &str,
        listener: F,
    ) -> Option<StreamSnapshot>
    where
        F: FnOnce(&StreamChunk),
    {
        let snapshot = self.get_cached_snapshot(conversation_id, message_id).await?;
        let chunk = StreamChunk::new(
            snapshot.transport,
            ChunkPayload::Text(TextChunk {
                text: snapshot.text.clone(),
                subtitles: Some(snapshot.subtitles.clone()),
                emoji_cues: Some(snapshot.emoji_cues.clone()),
                highlight_keywords: Some(snapshot.highlight_keywords.clone()),
                done: true,
            }),
        );
        listener(&chunk);
        Some(snapshot)
    }
}

impl fmt::Debug for ReplayCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayCache")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
