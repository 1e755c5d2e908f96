//! Query execution.

use memex_core::{Embedder, EmbeddingConfig, Error, SearchHit, VectorStore};
use std::sync::Arc;
use tracing::debug;

/// Executes semantic queries against the store.
///
/// Read-only: never touches the indexing side and may run concurrently
/// with it under the store's own isolation.
pub struct QueryExecutor {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    embed_config: EmbeddingConfig,
}

impl QueryExecutor {
    /// Create a query executor.
    ///
    /// Fails with [`Error::Config`] when the embedder's dimension does not
    /// match the store's: querying across models would silently misrank,
    /// so the mismatch is fatal up front.
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Result<Self, Error> {
        if embedder.dimension() != store.dimension() {
            return Err(Error::Config(format!(
                "embedding dimension mismatch: model '{}' produces {} dimensions, store expects {}",
                embedder.model_name(),
                embedder.dimension(),
                store.dimension()
            )));
        }

        Ok(Self {
            store,
            embedder,
            embed_config: EmbeddingConfig::default(),
        })
    }

    /// Embed `text` and return the `k` nearest files, best first.
    pub async fn search(&self, text: &str, k: usize) -> Result<Vec<SearchHit>, Error> {
        debug!("Executing query: {text}");

        let vector = self
            .embedder
            .embed_query(text, &self.embed_config)
            .await
            .map_err(Error::Embed)?;

        let mut hits = self.store.query(&vector, k).await.map_err(Error::Store)?;

        // The store contract already orders results, but enforce it here so
        // every backend behaves identically at the surface.
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);

        debug!("Found {} results", hits.len());
        Ok(hits)
    }
}
