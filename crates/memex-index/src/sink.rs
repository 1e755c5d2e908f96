//! Upsert sink.
//!
//! Single consumer of the workers' output. Accumulates [`SinkOp`]s and
//! writes them to the vector store as one batch when either the size or
//! the age threshold is reached. Batched writes amortize storage-engine
//! overhead far below per-record writes.
//!
//! After a successful commit the sink is the one place that advances
//! `last_indexed_hash` in the registry and persists file records; workers
//! never touch either. A failed batch is retried whole (ops are
//! idempotent by id); persistent failure drops the batch with an error
//! log rather than stalling the pipeline.

use memex_core::{EmbeddingRecord, IndexStats, StoreOp, VectorStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, warn};

use crate::pipeline::IndexUpdate;
use crate::registry::FileRegistry;

/// One unit of work for the sink.
#[derive(Debug, Clone)]
pub enum SinkOp {
    Upsert {
        record: EmbeddingRecord,
        /// Content hash to commit as `last_indexed_hash` once the batch
        /// lands.
        content_hash: String,
    },
    Delete {
        id: String,
        path: PathBuf,
    },
}

/// Batch thresholds and retry bounds for the sink.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Flush when this many ops are buffered
    pub max_ops: usize,
    /// Flush when the oldest buffered op reaches this age
    pub max_delay: Duration,
    /// Attempts per batch before it is dropped
    pub max_attempts: u32,
    /// Delay between attempts
    pub retry_delay: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_ops: 32,
            max_delay: Duration::from_secs(1),
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Run the sink until the op channel closes, then flush what remains.
pub(crate) async fn run_sink(
    mut ops: mpsc::Receiver<SinkOp>,
    store: Arc<dyn VectorStore>,
    registry: Arc<FileRegistry>,
    settings: BatchSettings,
    updates: broadcast::Sender<IndexUpdate>,
    stats: Arc<RwLock<IndexStats>>,
) {
    let mut batch: Vec<SinkOp> = Vec::with_capacity(settings.max_ops);
    let mut deadline: Option<Instant> = None;

    loop {
        let deadline_fut = async {
            match deadline {
                Some(d) => sleep_until(d).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            maybe_op = ops.recv() => {
                match maybe_op {
                    Some(op) => {
                        if batch.is_empty() {
                            deadline = Some(Instant::now() + settings.max_delay);
                        }
                        batch.push(op);
                        if batch.len() >= settings.max_ops {
                            flush(&mut batch, &store, &registry, &settings, &updates, &stats).await;
                            deadline = None;
                        }
                    }
                    None => break,
                }
            }
            () = deadline_fut => {
                flush(&mut batch, &store, &registry, &settings, &updates, &stats).await;
                deadline = None;
            }
        }
    }

    // Drain on shutdown: the partial batch must reach the store.
    if !batch.is_empty() {
        debug!("Sink shutting down, flushing {} buffered ops", batch.len());
        flush(&mut batch, &store, &registry, &settings, &updates, &stats).await;
    }
}

async fn flush(
    batch: &mut Vec<SinkOp>,
    store: &Arc<dyn VectorStore>,
    registry: &FileRegistry,
    settings: &BatchSettings,
    updates: &broadcast::Sender<IndexUpdate>,
    stats: &RwLock<IndexStats>,
) {
    if batch.is_empty() {
        return;
    }

    let ops: Vec<StoreOp> = batch
        .iter()
        .map(|op| match op {
            SinkOp::Upsert { record, .. } => StoreOp::Upsert(record.clone()),
            SinkOp::Delete { id, path } => StoreOp::Delete {
                id: id.clone(),
                path: path.clone(),
            },
        })
        .collect();

    let mut committed = false;
    for attempt in 1..=settings.max_attempts {
        match store.apply(&ops).await {
            Ok(()) => {
                committed = true;
                break;
            }
            Err(e) => {
                warn!(
                    "Batch commit attempt {}/{} failed: {e}",
                    attempt, settings.max_attempts
                );
                if attempt < settings.max_attempts {
                    tokio::time::sleep(settings.retry_delay).await;
                }
            }
        }
    }

    if !committed {
        error!("Dropping batch of {} ops after retries exhausted", batch.len());
        let mut s = stats.write().await;
        s.failed_files += batch.len() as u64;
        batch.clear();
        return;
    }

    // Commit confirmed: now, and only now, advance per-file state.
    let mut indexed = 0u64;
    let mut removed = 0u64;

    for op in batch.drain(..) {
        match op {
            SinkOp::Upsert {
                record,
                content_hash,
            } => {
                let file_record = registry
                    .mark_indexed(
                        &record.metadata.path,
                        &content_hash,
                        record.metadata.mtime,
                        record.metadata.size,
                    )
                    .await;
                if let Err(e) = store.upsert_file(&file_record).await {
                    warn!(
                        "Failed to persist file record for {:?}: {e}",
                        record.metadata.path
                    );
                }
                indexed += 1;
                let _ = updates.send(IndexUpdate::Indexed {
                    path: record.metadata.path,
                });
            }
            SinkOp::Delete { path, .. } => {
                registry.remove(&path).await;
                if let Err(e) = store.delete_file(&path).await {
                    warn!("Failed to remove file record for {:?}: {e}", path);
                }
                removed += 1;
                let _ = updates.send(IndexUpdate::Removed { path });
            }
        }
    }

    let mut s = stats.write().await;
    s.indexed_files += indexed;
    s.removed_files += removed;
    s.batches_committed += 1;
    s.last_update = Some(chrono::Utc::now());

    debug!("Committed batch: {indexed} upserts, {removed} deletes");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memex_core::{record_id, DocumentMetadata, FileRecord, SearchHit, StoreError, StoreStats};
    use memex_store::MemoryStore;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn upsert_op(path: &str, vector: Vec<f32>) -> SinkOp {
        let path = PathBuf::from(path);
        SinkOp::Upsert {
            record: EmbeddingRecord {
                id: record_id(&path),
                vector,
                metadata: DocumentMetadata {
                    path,
                    mtime: chrono::Utc::now(),
                    size: 3,
                },
            },
            content_hash: "hash".to_string(),
        }
    }

    fn fast_settings(max_ops: usize) -> BatchSettings {
        BatchSettings {
            max_ops,
            max_delay: Duration::from_millis(50),
            max_attempts: 2,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn spawn_sink(
        store: Arc<dyn VectorStore>,
        registry: Arc<FileRegistry>,
        settings: BatchSettings,
    ) -> (
        mpsc::Sender<SinkOp>,
        Arc<RwLock<IndexStats>>,
        tokio::task::JoinHandle<()>,
    ) {
        let (op_tx, op_rx) = mpsc::channel(64);
        let (update_tx, _) = broadcast::channel(64);
        let stats = Arc::new(RwLock::new(IndexStats::default()));
        let handle = tokio::spawn(run_sink(
            op_rx,
            store,
            registry,
            settings,
            update_tx,
            Arc::clone(&stats),
        ));
        (op_tx, stats, handle)
    }

    #[tokio::test]
    async fn test_flush_on_size_threshold() {
        let store = Arc::new(MemoryStore::new(2));
        let registry = Arc::new(FileRegistry::new());
        let (op_tx, stats, handle) =
            spawn_sink(store.clone(), registry.clone(), fast_settings(2));

        op_tx.send(upsert_op("/a.md", vec![1.0, 0.0])).await.unwrap();
        op_tx.send(upsert_op("/b.md", vec![0.0, 1.0])).await.unwrap();

        // Two ops hit the size threshold without waiting out the delay.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.stats().await.unwrap().total_documents, 2);

        drop(op_tx);
        handle.await.unwrap();
        assert_eq!(stats.read().await.indexed_files, 2);
    }

    #[tokio::test]
    async fn test_flush_on_time_threshold() {
        let store = Arc::new(MemoryStore::new(2));
        let registry = Arc::new(FileRegistry::new());
        let (op_tx, _stats, handle) =
            spawn_sink(store.clone(), registry.clone(), fast_settings(100));

        op_tx.send(upsert_op("/a.md", vec![1.0, 0.0])).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.stats().await.unwrap().total_documents, 1);

        drop(op_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flushes_partial_batch() {
        let store = Arc::new(MemoryStore::new(2));
        let registry = Arc::new(FileRegistry::new());
        // Thresholds far away: only the shutdown drain can flush.
        let settings = BatchSettings {
            max_ops: 1000,
            max_delay: Duration::from_secs(3600),
            ..fast_settings(1000)
        };
        let (op_tx, _stats, handle) = spawn_sink(store.clone(), registry.clone(), settings);

        op_tx.send(upsert_op("/a.md", vec![1.0, 0.0])).await.unwrap();
        drop(op_tx);
        handle.await.unwrap();

        assert_eq!(store.stats().await.unwrap().total_documents, 1);
    }

    #[tokio::test]
    async fn test_registry_updated_after_commit() {
        let store = Arc::new(MemoryStore::new(2));
        let registry = Arc::new(FileRegistry::new());
        let (op_tx, _stats, handle) =
            spawn_sink(store.clone(), registry.clone(), fast_settings(1));

        op_tx.send(upsert_op("/a.md", vec![1.0, 0.0])).await.unwrap();
        drop(op_tx);
        handle.await.unwrap();

        assert_eq!(
            registry.last_indexed_hash(Path::new("/a.md")).await,
            Some("hash".to_string())
        );
        // And persisted for the next process.
        let persisted = store.get_file(Path::new("/a.md")).await.unwrap().unwrap();
        assert_eq!(persisted.last_indexed_hash, Some("hash".to_string()));
    }

    #[tokio::test]
    async fn test_delete_removes_registry_entry() {
        let store = Arc::new(MemoryStore::new(2));
        let registry = Arc::new(FileRegistry::new());
        let path = PathBuf::from("/a.md");
        registry
            .mark_indexed(&path, "old", chrono::Utc::now(), 3)
            .await;

        let (op_tx, stats, handle) =
            spawn_sink(store.clone(), registry.clone(), fast_settings(1));

        op_tx
            .send(SinkOp::Delete {
                id: record_id(&path),
                path: path.clone(),
            })
            .await
            .unwrap();
        drop(op_tx);
        handle.await.unwrap();

        assert!(registry.last_indexed_hash(&path).await.is_none());
        assert_eq!(stats.read().await.removed_files, 1);
    }

    /// Store that fails a configurable number of apply calls.
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicU32,
    }

    #[async_trait]
    impl VectorStore for FlakyStore {
        async fn init(&self) -> Result<(), StoreError> {
            self.inner.init().await
        }
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
        async fn apply(&self, ops: &[StoreOp]) -> Result<(), StoreError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Insert("transient write hiccup".to_string()));
            }
            self.inner.apply(ops).await
        }
        async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, StoreError> {
            self.inner.query(vector, k).await
        }
        async fn get_file(&self, path: &Path) -> Result<Option<FileRecord>, StoreError> {
            self.inner.get_file(path).await
        }
        async fn upsert_file(&self, record: &FileRecord) -> Result<(), StoreError> {
            self.inner.upsert_file(record).await
        }
        async fn delete_file(&self, path: &Path) -> Result<(), StoreError> {
            self.inner.delete_file(path).await
        }
        async fn all_files(&self) -> Result<Vec<FileRecord>, StoreError> {
            self.inner.all_files().await
        }
        async fn stats(&self) -> Result<StoreStats, StoreError> {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn test_whole_batch_retried_after_transient_failure() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(2),
            failures: AtomicU32::new(1),
        });
        let registry = Arc::new(FileRegistry::new());
        let (op_tx, stats, handle) =
            spawn_sink(store.clone(), registry.clone(), fast_settings(1));

        op_tx.send(upsert_op("/a.md", vec![1.0, 0.0])).await.unwrap();
        drop(op_tx);
        handle.await.unwrap();

        // First attempt failed, retry landed the batch.
        assert_eq!(store.inner.stats().await.unwrap().total_documents, 1);
        assert_eq!(stats.read().await.indexed_files, 1);
    }

    #[tokio::test]
    async fn test_exhausted_batch_dropped_without_stall() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(2),
            failures: AtomicU32::new(100),
        });
        let registry = Arc::new(FileRegistry::new());
        let (op_tx, stats, handle) =
            spawn_sink(store.clone(), registry.clone(), fast_settings(1));

        op_tx.send(upsert_op("/a.md", vec![1.0, 0.0])).await.unwrap();
        drop(op_tx);
        handle.await.unwrap();

        assert_eq!(store.inner.stats().await.unwrap().total_documents, 0);
        assert_eq!(stats.read().await.failed_files, 1);
        // Registry never advanced for an uncommitted batch.
        assert!(registry
            .last_indexed_hash(Path::new("/a.md"))
            .await
            .is_none());
    }
}
