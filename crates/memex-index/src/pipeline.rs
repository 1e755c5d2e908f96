//! Pipeline orchestration.
//!
//! Wires the stages together and owns their lifecycle:
//!
//! ```text
//! watcher ─┐
//!          ├─ raw events ─→ debouncer ─→ work queue ─→ workers ─→ sink ─→ store
//! scanner ─┘                              (bounded)     (W)        (1)
//! ```
//!
//! The work queue is the only hand-off between the detection side and the
//! embedding side; its bounded sends are the backpressure points. Shutdown
//! is staged so nothing observed is lost: stop the sources, let the
//! debouncer flush, let the workers drain the queue, let the sink flush
//! its partial batch, then return.

use memex_core::{Error, IndexIntent, IndexStats, RawEvent, VectorStore};
use memex_embed::EmbedderPool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::debounce;
use crate::filter::PathFilter;
use crate::registry::FileRegistry;
use crate::scan;
use crate::sink::{self, BatchSettings, SinkOp};
use crate::watcher::WatchSource;
use crate::worker;

/// Capacity of the raw event channel between the sources and the debouncer.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of the channel between workers and the sink.
const SINK_CHANNEL_CAPACITY: usize = 64;

/// Progress notifications emitted as the pipeline works.
#[derive(Debug, Clone)]
pub enum IndexUpdate {
    /// A file's embedding was committed to the store
    Indexed { path: PathBuf },
    /// A file's entry was removed from the store
    Removed { path: PathBuf },
    /// A file could not be indexed (after retries)
    Failed { path: PathBuf, error: String },
    /// A file was skipped (unchanged content, vanished, empty)
    Skipped { path: PathBuf },
}

/// Pipeline configuration, immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory roots to watch
    pub roots: Vec<PathBuf>,
    /// Path relevance rules
    pub filter: PathFilter,
    /// Quiet window for the debouncer
    pub debounce_window: Duration,
    /// Work queue capacity (the backpressure bound)
    pub queue_capacity: usize,
    /// Worker count; 0 means available parallelism
    pub workers: usize,
    /// Sink batching thresholds
    pub batch: BatchSettings,
    /// Embedding parameters
    pub embed_config: memex_core::EmbeddingConfig,
    /// Walk the roots once at startup
    pub initial_scan: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            filter: PathFilter::default(),
            debounce_window: Duration::from_millis(500),
            queue_capacity: 256,
            workers: 0,
            batch: BatchSettings::default(),
            embed_config: memex_core::EmbeddingConfig::default(),
            initial_scan: true,
        }
    }
}

impl PipelineConfig {
    fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

/// The indexing pipeline.
pub struct IndexerPipeline {
    config: PipelineConfig,
    store: Arc<dyn VectorStore>,
    embedder: Arc<EmbedderPool>,
    registry: Arc<FileRegistry>,
    stats: Arc<RwLock<IndexStats>>,
    update_tx: broadcast::Sender<IndexUpdate>,
    event_tx: std::sync::Mutex<Option<mpsc::Sender<RawEvent>>>,
    event_rx: std::sync::Mutex<Option<mpsc::Receiver<RawEvent>>>,
}

impl IndexerPipeline {
    /// Create a pipeline. Nothing runs until [`IndexerPipeline::run`].
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn VectorStore>,
        embedder: Arc<EmbedderPool>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (update_tx, _) = broadcast::channel(256);

        Self {
            config,
            store,
            embedder,
            registry: Arc::new(FileRegistry::new()),
            stats: Arc::new(RwLock::new(IndexStats::default())),
            update_tx,
            event_tx: std::sync::Mutex::new(Some(event_tx)),
            event_rx: std::sync::Mutex::new(Some(event_rx)),
        }
    }

    /// Subscribe to progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<IndexUpdate> {
        self.update_tx.subscribe()
    }

    /// Sender for injecting raw events from outside the watcher (the
    /// ingestion listener uses this). `None` once the pipeline has shut
    /// down.
    pub fn event_sender(&self) -> Option<mpsc::Sender<RawEvent>> {
        self.event_tx.lock().expect("event_tx lock poisoned").clone()
    }

    /// Current pipeline counters.
    pub async fn stats(&self) -> IndexStats {
        self.stats.read().await.clone()
    }

    /// The file registry (exposed for tests and status reporting).
    pub fn registry(&self) -> Arc<FileRegistry> {
        Arc::clone(&self.registry)
    }

    /// Run the pipeline until `shutdown` is cancelled, then drain.
    ///
    /// Fatal errors (unreadable store, mismatched schema, no watchable
    /// root) surface here before any stage starts.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), Error> {
        self.store.init().await.map_err(Error::Store)?;
        self.registry
            .warm_load(self.store.as_ref())
            .await
            .map_err(Error::Store)?;

        let event_rx = self
            .event_rx
            .lock()
            .expect("event_rx lock poisoned")
            .take()
            .ok_or_else(|| Error::Other("pipeline already ran".to_string()))?;

        let event_tx = self
            .event_sender()
            .ok_or_else(|| Error::Other("pipeline already shut down".to_string()))?;

        // Event source: fatal only if no root can be watched at all.
        let watcher = WatchSource::subscribe(&self.config.roots, event_tx.clone())?;
        info!(
            "Pipeline watching {} roots with {} workers",
            watcher.roots().len(),
            self.config.effective_workers()
        );

        let scan_task = if self.config.initial_scan {
            Some(tokio::spawn(scan::scan_roots(
                watcher.roots().to_vec(),
                self.config.filter.clone(),
                event_tx.clone(),
                shutdown.clone(),
            )))
        } else {
            None
        };
        drop(event_tx);

        // The work queue: sole hand-off between detection and embedding.
        let (intent_tx, intent_rx) = mpsc::channel::<IndexIntent>(self.config.queue_capacity);
        let (op_tx, op_rx) = mpsc::channel::<SinkOp>(SINK_CHANNEL_CAPACITY);

        let debouncer = tokio::spawn(debounce::run(
            event_rx,
            intent_tx,
            self.config.filter.clone(),
            self.config.debounce_window,
        ));

        let shared_intents = Arc::new(Mutex::new(intent_rx));
        let mut workers = Vec::with_capacity(self.config.effective_workers());
        for worker_id in 0..self.config.effective_workers() {
            workers.push(tokio::spawn(worker::run_worker(
                worker_id,
                Arc::clone(&shared_intents),
                op_tx.clone(),
                Arc::clone(&self.registry),
                Arc::clone(&self.embedder),
                self.config.embed_config.clone(),
                self.update_tx.clone(),
                Arc::clone(&self.stats),
            )));
        }
        drop(op_tx); // only worker clones hold senders now

        let sink = tokio::spawn(sink::run_sink(
            op_rx,
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            self.config.batch.clone(),
            self.update_tx.clone(),
            Arc::clone(&self.stats),
        ));

        shutdown.cancelled().await;
        info!("Shutdown requested, draining pipeline");

        // Staged teardown. Order matters: each stage drains when its
        // upstream sender is gone.
        drop(watcher);
        if let Some(scan_task) = scan_task {
            let _ = scan_task.await;
        }
        self.event_tx
            .lock()
            .expect("event_tx lock poisoned")
            .take();

        let _ = debouncer.await;
        for handle in workers {
            let _ = handle.await;
        }
        let _ = sink.await;

        let stats = self.stats.read().await;
        info!(
            "Pipeline stopped: {} indexed, {} removed, {} failed, {} batches",
            stats.indexed_files, stats.removed_files, stats.failed_files, stats.batches_committed
        );
        debug!("Registry tracks {} files", self.registry.len().await);

        Ok(())
    }
}
