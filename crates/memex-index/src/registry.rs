//! In-process file record registry.
//!
//! Tracks per-path indexing state ([`FileRecord`]). Workers read
//! `last_indexed_hash` to skip unchanged content; only the upsert sink
//! writes, and only after a confirmed batch commit. Warm-loaded from the
//! store's persisted records at startup so restarts skip unchanged files.

use chrono::{DateTime, Utc};
use memex_core::{FileRecord, StoreError, VectorStore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

/// Shared registry of file records.
#[derive(Default)]
pub struct FileRegistry {
    files: RwLock<HashMap<PathBuf, FileRecord>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate from the store's persisted file records.
    pub async fn warm_load(&self, store: &dyn VectorStore) -> Result<(), StoreError> {
        let records = store.all_files().await?;
        let count = records.len();

        let mut files = self.files.write().await;
        for record in records {
            files.insert(record.path.clone(), record);
        }

        info!("Registry warm-loaded {count} file records");
        Ok(())
    }

    /// Hash of the content most recently committed for a path.
    pub async fn last_indexed_hash(&self, path: &Path) -> Option<String> {
        let files = self.files.read().await;
        files.get(path).and_then(|r| r.last_indexed_hash.clone())
    }

    /// Record a confirmed commit. Called by the sink only.
    pub async fn mark_indexed(
        &self,
        path: &Path,
        content_hash: &str,
        mtime: DateTime<Utc>,
        size: u64,
    ) -> FileRecord {
        let record = FileRecord {
            path: path.to_path_buf(),
            content_hash: Some(content_hash.to_string()),
            mtime,
            size,
            last_indexed_hash: Some(content_hash.to_string()),
            indexed_at: Some(Utc::now()),
        };

        let mut files = self.files.write().await;
        files.insert(path.to_path_buf(), record.clone());
        record
    }

    /// Drop a path's record after its delete committed.
    pub async fn remove(&self, path: &Path) -> Option<FileRecord> {
        let mut files = self.files.write().await;
        files.remove(path)
    }

    /// Number of tracked files.
    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memex_store::MemoryStore;

    #[tokio::test]
    async fn test_mark_and_lookup() {
        let registry = FileRegistry::new();
        let path = PathBuf::from("/notes/a.md");

        assert!(registry.last_indexed_hash(&path).await.is_none());

        registry.mark_indexed(&path, "hash1", Utc::now(), 10).await;
        assert_eq!(
            registry.last_indexed_hash(&path).await,
            Some("hash1".to_string())
        );

        registry.mark_indexed(&path, "hash2", Utc::now(), 12).await;
        assert_eq!(
            registry.last_indexed_hash(&path).await,
            Some("hash2".to_string())
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = FileRegistry::new();
        let path = PathBuf::from("/notes/a.md");

        registry.mark_indexed(&path, "hash", Utc::now(), 10).await;
        assert_eq!(registry.len().await, 1);

        let removed = registry.remove(&path).await;
        assert!(removed.is_some());
        assert!(registry.is_empty().await);
        assert!(registry.last_indexed_hash(&path).await.is_none());
    }

    #[tokio::test]
    async fn test_warm_load_from_store() {
        let store = MemoryStore::new(4);
        store
            .upsert_file(&FileRecord {
                path: PathBuf::from("/notes/persisted.md"),
                content_hash: Some("h".to_string()),
                last_indexed_hash: Some("h".to_string()),
                mtime: Utc::now(),
                size: 5,
                indexed_at: Some(Utc::now()),
            })
            .await
            .unwrap();

        let registry = FileRegistry::new();
        registry.warm_load(&store).await.unwrap();

        assert_eq!(registry.len().await, 1);
        assert_eq!(
            registry
                .last_indexed_hash(Path::new("/notes/persisted.md"))
                .await,
            Some("h".to_string())
        );
    }
}
