//! # memex-core
//!
//! Core types and traits for memex, a semantic filesystem index.
//!
//! The pipeline turns filesystem events into vector-store writes:
//!
//! ```text
//! filesystem → RawEvent → IndexIntent → EmbeddingRecord → StoreOp → store
//!                                                                     ↓
//!                                              query text → SearchHit ←
//! ```
//!
//! ## Key types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RawEvent`] | Filesystem change notification |
//! | [`IndexIntent`] | Debounced reindex instruction for one path |
//! | [`FileRecord`] | Per-file indexing state (content hashes, mtime) |
//! | [`EmbeddingRecord`] | An embedded document ready for the sink |
//! | [`StoreOp`] | Unit of a batched store write |
//! | [`SearchHit`] | Ranked query result |
//!
//! ## Key traits
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`Embedder`] | Generate fixed-dimension vectors from text |
//! | [`VectorStore`] | Persist vectors, nearest-neighbor search |

pub mod error;
pub mod traits;
pub mod types;

pub use error::{EmbedError, Error, Result, StoreError, WatchError};
pub use traits::*;
pub use types::*;
