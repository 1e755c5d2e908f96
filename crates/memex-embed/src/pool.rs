//! Embedder pool: concurrency limiting, per-call timeouts, bounded retries.

use memex_core::{EmbedError, Embedder, EmbeddingConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

/// Retry and timeout policy for embedding calls.
///
/// A timed-out call counts as one failed attempt; exhausting attempts
/// surfaces the last error to the caller, who logs the path and moves on.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per call (first try included)
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Per-call timeout
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(200),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Pool wrapper around an [`Embedder`] with concurrency control.
///
/// Inference is CPU/GPU-bound; the semaphore caps how many embedding calls
/// run at once regardless of how many pipeline workers exist.
pub struct EmbedderPool {
    embedder: Arc<dyn Embedder>,
    semaphore: Semaphore,
    max_concurrent: usize,
    retry: RetryPolicy,
}

impl EmbedderPool {
    /// Create a new pool.
    pub fn new(embedder: Arc<dyn Embedder>, max_concurrent: usize) -> Self {
        Self {
            embedder,
            semaphore: Semaphore::new(max_concurrent),
            max_concurrent,
            retry: RetryPolicy::default(),
        }
    }

    /// Create a new pool with an explicit retry policy.
    pub fn with_retry(embedder: Arc<dyn Embedder>, max_concurrent: usize, retry: RetryPolicy) -> Self {
        Self {
            embedder,
            semaphore: Semaphore::new(max_concurrent),
            max_concurrent,
            retry,
        }
    }

    /// Embedding dimension of the wrapped model.
    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Model name of the wrapped model.
    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// Input cutoff in characters.
    pub fn max_input_chars(&self) -> usize {
        self.embedder.max_input_chars()
    }

    /// The wrapped embedder.
    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    /// Currently available permits.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Maximum concurrent inference calls.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Embed a batch under the retry policy.
    ///
    /// Each attempt runs under the per-call timeout; between failed
    /// attempts the pool waits `retry_delay`. The semaphore permit is held
    /// across attempts so a flapping model cannot multiply load.
    pub async fn embed_texts(
        &self,
        texts: &[&str],
        config: &EmbeddingConfig,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| EmbedError::Inference(format!("semaphore error: {e}")))?;

        let mut last_err = EmbedError::Inference("no attempts made".to_string());
        for attempt in 1..=self.retry.max_attempts {
            match tokio::time::timeout(self.retry.timeout, self.embedder.embed_texts(texts, config))
                .await
            {
                Ok(Ok(vectors)) => return Ok(vectors),
                Ok(Err(e)) => {
                    warn!(
                        "Embedding attempt {}/{} failed: {}",
                        attempt, self.retry.max_attempts, e
                    );
                    last_err = e;
                }
                Err(_) => {
                    warn!(
                        "Embedding attempt {}/{} timed out after {:?}",
                        attempt, self.retry.max_attempts, self.retry.timeout
                    );
                    last_err = EmbedError::Timeout(self.retry.timeout);
                }
            }

            if attempt < self.retry.max_attempts {
                tokio::time::sleep(self.retry.retry_delay).await;
            }
        }

        Err(last_err)
    }

    /// Embed a single query string under the same policy.
    pub async fn embed_query(
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
