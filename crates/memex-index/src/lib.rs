//! Indexing pipeline for memex.
//!
//! Turns a stream of filesystem events into batched vector-store writes:
//!
//! ```text
//! watcher/scanner → debouncer → work queue → worker pool → upsert sink
//! ```
//!
//! # Components
//!
//! - [`IndexerPipeline`]: wires the stages and owns their lifecycle
//! - [`WatchSource`]: recursive filesystem watcher over configured roots
//! - [`PathFilter`]: relevance rules (extensions, ignore list, size cap)
//! - [`FileRegistry`]: per-file state, `last_indexed_hash` short-circuit
//! - [`BatchSettings`]: sink batching thresholds
//! - [`IndexUpdate`]: progress notifications
//!
//! # Example
//!
//! ```rust,ignore
//! use memex_index::{IndexerPipeline, PipelineConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let pipeline = IndexerPipeline::new(config, store, embedder);
//! let shutdown = CancellationToken::new();
//!
//! let mut updates = pipeline.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(update) = updates.recv().await {
//!         println!("{update:?}");
//!     }
//! });
//!
//! // Blocks until `shutdown.cancel()`, then drains and flushes.
//! pipeline.run(shutdown).await?;
//! ```

pub mod debounce;
pub mod filter;
pub mod pipeline;
pub mod registry;
pub mod scan;
pub mod sink;
pub mod watcher;
pub mod worker;

pub use filter::PathFilter;
pub use pipeline::{IndexUpdate, IndexerPipeline, PipelineConfig};
pub use registry::FileRegistry;
pub use sink::BatchSettings;
pub use watcher::WatchSource;
