//! Core types for memex.
//!
//! Shared data structures used across the indexing pipeline:
//!
//! - [`RawEvent`]: a filesystem change notification from the event source
//! - [`IndexIntent`]: a debounced, deduplicated reindex instruction
//! - [`FileRecord`]: per-file indexing state, keyed by canonical path
//! - [`EmbeddingRecord`]: an embedded document ready for the upsert sink
//! - [`StoreOp`]: the unit of a batched vector-store write
//! - [`SearchHit`]: one ranked result from a semantic query

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Raw filesystem events
// ============================================================================

/// Kind of a raw filesystem notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventKind {
    Created,
    Modified,
    Deleted,
}

/// A raw filesystem change notification, as delivered by the event source.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Affected path
    pub path: PathBuf,
    /// What happened
    pub kind: RawEventKind,
    /// When the notification was observed
    pub timestamp: DateTime<Utc>,
}

impl RawEvent {
    pub fn new(path: PathBuf, kind: RawEventKind) -> Self {
        Self {
            path,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn created(path: PathBuf) -> Self {
        Self::new(path, RawEventKind::Created)
    }

    pub fn modified(path: PathBuf) -> Self {
        Self::new(path, RawEventKind::Modified)
    }

    pub fn deleted(path: PathBuf) -> Self {
        Self::new(path, RawEventKind::Deleted)
    }
}

// ============================================================================
// Index intents
// ============================================================================

/// What the pipeline should do for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    /// (Re)index the file's current content
    Upsert,
    /// Remove the file from the index
    Delete,
}

/// A debounced reindex instruction, consumed exactly once by one worker.
///
/// Intents for the same path are applied in enqueue order; a later intent
/// supersedes an earlier one (last-writer-wins by enqueue order).
#[derive(Debug, Clone)]
pub struct IndexIntent {
    pub path: PathBuf,
    pub kind: IntentKind,
    pub enqueued_at: DateTime<Utc>,
}

impl IndexIntent {
    pub fn upsert(path: PathBuf) -> Self {
        Self {
            path,
            kind: IntentKind::Upsert,
            enqueued_at: Utc::now(),
        }
    }

    pub fn delete(path: PathBuf) -> Self {
        Self {
            path,
            kind: IntentKind::Delete,
            enqueued_at: Utc::now(),
        }
    }
}

// ============================================================================
// File records
// ============================================================================

/// Indexing state for one file, keyed by canonical absolute path.
///
/// `last_indexed_hash` is written only by the upsert sink after a confirmed
/// batch commit; a file is forwarded to embedding only when its current
/// content hash differs from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Canonical absolute path
    pub path: PathBuf,
    /// blake3 hex digest of the file bytes as last observed
    pub content_hash: Option<String>,
    /// Last modification time
    pub mtime: DateTime<Utc>,
    /// File size in bytes
    pub size: u64,
    /// Digest of the content most recently committed to the store
    pub last_indexed_hash: Option<String>,
    /// When the last commit happened (None if never indexed)
    pub indexed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Embedding records
// ============================================================================

/// Metadata stored alongside a document vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub path: PathBuf,
    pub mtime: DateTime<Utc>,
    pub size: u64,
}

/// An embedded document, immutable once created.
///
/// Owned by the worker that produced it until handed to the upsert sink.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    /// Stable id derived from the canonical path, see [`record_id`]
    pub id: String,
    /// Fixed-dimension embedding vector
    pub vector: Vec<f32>,
    pub metadata: DocumentMetadata,
}

/// Stable store id for a path: blake3 hex digest of the path bytes.
///
/// Identical paths always map to the same id, so upserts replace rather
/// than accumulate.
pub fn record_id(path: &Path) -> String {
    blake3::hash(path.to_string_lossy().as_bytes())
        .to_hex()
        .to_string()
}

// ============================================================================
// Store operations
// ============================================================================

/// One element of a batched vector-store write.
///
/// Upsert-by-id and delete-by-id are idempotent, so a failed batch can be
/// retried whole.
#[derive(Debug, Clone)]
pub enum StoreOp {
    Upsert(EmbeddingRecord),
    Delete { id: String, path: PathBuf },
}

// ============================================================================
// Search
// ============================================================================

/// One ranked semantic search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: PathBuf,
    /// Similarity score, higher is closer
    pub score: f32,
    pub mtime: DateTime<Utc>,
    pub size: u64,
}

// ============================================================================
// Embedding configuration
// ============================================================================

/// Configuration for embedding generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Normalize embeddings to unit length
    pub normalize: bool,
    /// Batch size for model inference
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            normalize: true,
            batch_size: 32,
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Vector store statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    /// Live document entries
    pub total_documents: u64,
    /// Tracked file records
    pub total_files: u64,
    /// On-disk size of the index
    pub index_size_bytes: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Pipeline counters, updated as batches commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub indexed_files: u64,
    pub removed_files: u64,
    pub failed_files: u64,
    pub batches_committed: u64,
    pub last_update: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_record_id_stable() {
        let a = record_id(Path::new("/home/user/notes.md"));
        let b = record_id(Path::new("/home/user/notes.md"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64); // blake3 hex
    }

    #[test]
    fn test_record_id_distinct_paths() {
        let a = record_id(Path::new("/home/user/a.md"));
        let b = record_id(Path::new("/home/user/b.md"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_intent_constructors() {
        let up = IndexIntent::upsert(PathBuf::from("/tmp/x.txt"));
        assert_eq!(up.kind, IntentKind::Upsert);

        let del = IndexIntent::delete(PathBuf::from("/tmp/x.txt"));
        assert_eq!(del.kind, IntentKind::Delete);
        assert!(del.enqueued_at >= up.enqueued_at);
    }

    #[test]
    fn test_raw_event_constructors() {
        let ev = RawEvent::created(PathBuf::from("/tmp/new.txt"));
        assert_eq!(ev.kind, RawEventKind::Created);
        assert_eq!(ev.path, PathBuf::from("/tmp/new.txt"));

        assert_eq!(
            RawEvent::deleted(PathBuf::from("/tmp/x")).kind,
            RawEventKind::Deleted
        );
    }

    #[test]
    fn test_file_record_serialization() {
        let record = FileRecord {
            path: PathBuf::from("/test/file.txt"),
            content_hash: Some("abc".to_string()),
            mtime: Utc::now(),
            size: 1024,
            last_indexed_hash: None,
            indexed_at: None,
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: FileRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(record.path, back.path);
        assert_eq!(record.content_hash, back.content_hash);
        assert_eq!(record.size, back.size);
    }

    #[test]
    fn test_embedding_config_default() {
        let config = EmbeddingConfig::default();
        assert!(config.normalize);
        assert_eq!(config.batch_size, 32);
    }

    #[test]
    fn test_index_stats_default() {
        let stats = IndexStats::default();
        assert_eq!(stats.indexed_files, 0);
        assert_eq!(stats.failed_files, 0);
        assert!(stats.last_update.is_none());
    }
}
