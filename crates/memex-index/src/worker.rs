//! Embedding worker pool.
//!
//! Workers pull whole intents off the shared work queue, read and hash
//! file content, skip unchanged files, and hand embedded records to the
//! upsert sink. Per-path failures are logged and skipped; they never stop
//! the pool.

use memex_core::{
    record_id, DocumentMetadata, EmbeddingConfig, EmbeddingRecord, IndexIntent, IndexStats,
    IntentKind,
};
use memex_embed::EmbedderPool;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, warn};

use crate::pipeline::IndexUpdate;
use crate::registry::FileRegistry;
use crate::sink::SinkOp;

/// Shared handle to the single work-queue receiver.
///
/// Workers lock it only for the duration of one `recv`, so dequeues stay
/// strictly FIFO while processing itself runs in parallel.
pub(crate) type SharedIntentReceiver = Arc<Mutex<mpsc::Receiver<IndexIntent>>>;

/// Run one worker until the work queue is closed and drained.
pub(crate) async fn run_worker(
    worker_id: usize,
    intents: SharedIntentReceiver,
    ops: mpsc::Sender<SinkOp>,
    registry: Arc<FileRegistry>,
    embedder: Arc<EmbedderPool>,
    embed_config: EmbeddingConfig,
    updates: broadcast::Sender<IndexUpdate>,
    stats: Arc<RwLock<IndexStats>>,
) {
    debug!("Worker {worker_id} started");

    loop {
        let intent = {
            let mut rx = intents.lock().await;
            rx.recv().await
        };

        let Some(intent) = intent else {
            break;
        };

        match intent.kind {
            IntentKind::Delete => {
                let op = SinkOp::Delete {
                    id: record_id(&intent.path),
                    path: intent.path,
                };
                if ops.send(op).await.is_err() {
                    break;
                }
            }
            IntentKind::Upsert => {
                match process_upsert(&intent, &registry, &embedder, &embed_config).await {
                    Outcome::Produced(op) => {
                        if ops.send(op).await.is_err() {
                            break;
                        }
                    }
                    Outcome::Skipped => {
                        let _ = updates.send(IndexUpdate::Skipped {
                            path: intent.path.clone(),
                        });
                    }
                    Outcome::Failed(reason) => {
                        warn!("Failed to index {:?}: {reason}", intent.path);
                        stats.write().await.failed_files += 1;
                        let _ = updates.send(IndexUpdate::Failed {
                            path: intent.path.clone(),
                            error: reason,
                        });
                    }
                }
            }
        }
    }

    debug!("Worker {worker_id} exiting");
}

enum Outcome {
    Produced(SinkOp),
    Skipped,
    Failed(String),
}

async fn process_upsert(
    intent: &IndexIntent,
    registry: &FileRegistry,
    embedder: &EmbedderPool,
    embed_config: &EmbeddingConfig,
) -> Outcome {
    // The file may have vanished between enqueue and read; a delete event
    // is already behind us in the queue or on its way. Not an error.
    let bytes = match tokio::fs::read(&intent.path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("File vanished before read: {:?}", intent.path);
            return Outcome::Skipped;
        }
        Err(e) => return Outcome::Failed(format!("read error: {e}")),
    };

    let metadata = match tokio::fs::metadata(&intent.path).await {
        Ok(m) => m,
        Err(_) => {
            debug!("File vanished before stat: {:?}", intent.path);
            return Outcome::Skipped;
        }
    };

    let content_hash = blake3::hash(&bytes).to_hex().to_string();
    if registry.last_indexed_hash(&intent.path).await.as_deref() == Some(content_hash.as_str()) {
        debug!("Content unchanged, skipping {:?}", intent.path);
        return Outcome::Skipped;
    }

    let content = String::from_utf8_lossy(&bytes);
    if content.trim().is_empty() {
        debug!("Empty content, skipping {:?}", intent.path);
        return Outcome::Skipped;
    }

    // Leading-prefix truncation; longer-document chunking is out of scope.
    let text = truncate_chars(&content, embedder.max_input_chars());

    let vector = match embedder.embed_texts(&[text], embed_config).await {
        Ok(mut vectors) if !vectors.is_empty() => vectors.swap_remove(0),
        Ok(_) => return Outcome::Failed("embedder returned no vector".to_string()),
        Err(e) => return Outcome::Failed(e.to_string()),
    };

    let mtime = metadata
        .modified()
        .map(chrono::DateTime::from)
        .unwrap_or_else(|_| chrono::Utc::now());

    let record = EmbeddingRecord {
        id: record_id(&intent.path),
        vector,
        metadata: DocumentMetadata {
            path: intent.path.clone(),
            mtime,
            size: metadata.len(),
        },
    };

    Outcome::Produced(SinkOp::Upsert {
        record,
        content_hash,
    })
}

/// Truncate to at most `max_chars` characters on a char boundary.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
