//! Core traits for memex components.
//!
//! - [`Embedder`]: turn text into fixed-dimension vectors
//! - [`VectorStore`]: persist and search those vectors
//!
//! Both sit at the pipeline's external seams so implementations can be
//! swapped (real model vs. test double, persistent store vs. in-memory)
//! without touching the pipeline itself.

use async_trait::async_trait;
use std::path::Path;

use crate::error::{EmbedError, StoreError};
use crate::types::{EmbeddingConfig, FileRecord, SearchHit, StoreOp, StoreStats};

// ============================================================================
// Embedding
// ============================================================================

/// Trait for generating embeddings.
///
/// Implementations must be deterministic: identical input text yields the
/// same vector for the lifetime of the process.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model name/identifier.
    fn model_name(&self) -> &str;

    /// Embedding dimension, fixed per model.
    fn dimension(&self) -> usize;

    /// Upper bound on input length in characters; longer content is
    /// truncated to its leading prefix before embedding.
    fn max_input_chars(&self) -> usize;

    /// Embed a batch of texts, one vector per input.
    async fn embed_texts(
        &self,
        texts: &[&str],
        config: &EmbeddingConfig,
    ) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a single query string.
    async fn embed_query(
        &self,
        query: &str,
        config: &EmbeddingConfig,
    ) -> Result<Vec<f32>, EmbedError> {
        let vectors = self.embed_texts(&[query], config).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Inference("empty embedding result".to_string()))
    }
}

// ============================================================================
// Vector storage
// ============================================================================

/// Trait for vector storage and nearest-neighbor search.
///
/// The store holds at most one live entry per id; upsert replaces, delete
/// removes. Batches applied through [`VectorStore::apply`] are atomic per
/// item, and since ops are keyed by id a failed batch can be retried whole.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Initialize the store. Fails with [`StoreError::Schema`] when an
    /// existing index was built with a different vector dimension.
    async fn init(&self) -> Result<(), StoreError>;

    /// Vector dimension this store was configured with.
    fn dimension(&self) -> usize;

    /// Apply a batch of upserts and deletes.
    async fn apply(&self, ops: &[StoreOp]) -> Result<(), StoreError>;

    /// Return up to `k` entries nearest to `vector`, best first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, StoreError>;

    /// Get the persisted record for a file.
    async fn get_file(&self, path: &Path) -> Result<Option<FileRecord>, StoreError>;

    /// Insert or replace a file record.
    async fn upsert_file(&self, record: &FileRecord) -> Result<(), StoreError>;

    /// Remove a file record.
    async fn delete_file(&self, path: &Path) -> Result<(), StoreError>;

    /// All persisted file records, used to warm the registry at startup.
    async fn all_files(&self) -> Result<Vec<FileRecord>, StoreError>;

    /// Store statistics.
    async fn stats(&self) -> Result<StoreStats, StoreError>;
}
