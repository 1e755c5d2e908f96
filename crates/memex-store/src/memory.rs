//! In-memory store for testing without LanceDB.

use async_trait::async_trait;
use chrono::Utc;
use memex_core::{
    EmbeddingRecord, FileRecord, SearchHit, StoreError, StoreOp, StoreStats, VectorStore,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory vector store with brute-force cosine search.
///
/// Keeps everything in process memory; nothing survives restart. Intended
/// for tests and development builds, not production.
pub struct MemoryStore {
    dimension: usize,
    documents: RwLock<HashMap<String, EmbeddingRecord>>,
    files: RwLock<HashMap<PathBuf, FileRecord>>,
}

impl MemoryStore {
    /// Create a new in-memory store with the given embedding dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            documents: RwLock::new(HashMap::new()),
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Cosine similarity between two vectors.
    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        dot / (norm_a * norm_b)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn init(&self) -> Result<(), StoreError> {
        debug!("MemoryStore initialized (dimension: {})", self.dimension);
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn apply(&self, ops: &[StoreOp]) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        for op in ops {
            match op {
                StoreOp::Upsert(record) => {
                    if record.vector.len() != self.dimension {
                        return Err(StoreError::Insert(format!(
                            "vector width {} does not match store dimension {}",
                            record.vector.len(),
                            self.dimension
                        )));
                    }
                    documents.insert(record.id.clone(), record.clone());
                }
                StoreOp::Delete { id, .. } => {
                    documents.remove(id);
                }
            }
        }
        debug!("Applied {} ops", ops.len());
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, StoreError> {
        let documents = self.documents.read().await;

        let mut scored: Vec<(f32, &EmbeddingRecord)> = documents
            .values()
            .map(|record| (Self::cosine_similarity(vector, &record.vector), record))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, record)| SearchHit {
                path: record.metadata.path.clone(),
                score,
                mtime: record.metadata.mtime,
                size: record.metadata.size,
            })
            .collect())
    }

    async fn get_file(&self, path: &Path) -> Result<Option<FileRecord>, StoreError> {
        let files = self.files.read().await;
        Ok(files.get(path).cloned())
    }

    async fn upsert_file(&self, record: &FileRecord) -> Result<(), StoreError> {
        let mut files = self.files.write().await;
        files.insert(record.path.clone(), record.clone());
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<(), StoreError> {
        let mut files = self.files.write().await;
        files.remove(path);
        Ok(())
    }

    async fn all_files(&self) -> Result<Vec<FileRecord>, StoreError> {
        let files = self.files.read().await;
        Ok(files.values().cloned().collect())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let documents = self.documents.read().await;
        let files = self.files.read().await;

        Ok(StoreStats {
            total_documents: documents.len() as u64,
            total_files: files.len() as u64,
            index_size_bytes: 0, // in-memory
            last_updated: Some(Utc::now()),
        })
    }
}
