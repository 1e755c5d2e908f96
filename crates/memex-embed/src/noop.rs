//! No-op embedder for testing without the Candle stack.

use async_trait::async_trait;
use memex_core::{EmbedError, Embedder, EmbeddingConfig};

/// Embedder that returns zero-vectors for all inputs.
///
/// Always available, even without the `candle` feature. Useful for
/// development builds and tests that exercise pipeline plumbing rather
/// than similarity.
pub struct NoopEmbedder {
    dimension: usize,
}

impl NoopEmbedder {
    /// Create a no-op embedder with the default dimension (384).
    #[must_use]
    pub fn new() -> Self {
        Self { dimension: 384 }
    }

    /// Create a no-op embedder with a custom dimension.
    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for NoopEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for NoopEmbedder {
    fn model_name(&self) -> &str {
        "noop"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_input_chars(&self) -> usize {
        8192
    }

    async fn embed_texts(
        &self,
        texts: &[&str],
        _config: &EmbeddingConfig,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|_| vec![0.0; self.dimension]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_defaults() {
        let embedder = NoopEmbedder::new();
        assert_eq!(embedder.dimension(), 384);
        assert_eq!(embedder.model_name(), "noop");
    }

    #[test]
    fn test_noop_with_dimension() {
        let embedder = NoopEmbedder::with_dimension(768);
        assert_eq!(embedder.dimension(), 768);
    }

    #[tokio::test]
    async fn test_noop_embed_texts() {
        let embedder = NoopEmbedder::new();
        let config = EmbeddingConfig::default();

        let outputs = embedder
            .embed_texts(&["Hello", "World"], &config)
            .await
            .unwrap();

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].len(), 384);
        assert!(outputs[0].iter().all(|&v| v == 0.0));
    }

    #[tokio::test]
    async fn test_noop_embed_empty() {
        let embedder = NoopEmbedder::new();
        let outputs = embedder
            .embed_texts(&[], &EmbeddingConfig::default())
            .await
            .unwrap();
        assert!(outputs.is_empty());
    }
}
