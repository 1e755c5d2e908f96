//! Error types for memex.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for memex operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Fatal configuration problem, aborts startup
    #[error("config error: {0}")]
    Config(String),

    /// Filesystem watching failed
    #[error("watch error: {0}")]
    Watch(#[from] WatchError),

    /// Embedding generation failed
    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),

    /// Vector store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Event source errors.
///
/// A single unwatchable root is reported but does not abort the other
/// roots; `NoRoots` is raised only when nothing could be watched at all.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("cannot watch {path:?}: {reason}")]
    Root { path: PathBuf, reason: String },

    #[error("no watchable roots")]
    NoRoots,
}

/// Embedding errors.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("model loading failed: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("embedding call timed out after {0:?}")]
    Timeout(Duration),
}

/// Vector store errors.
///
/// `Init` and `Schema` at startup are fatal (unreadable or mismatched
/// store); the rest are retried at batch granularity.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store initialization failed: {0}")]
    Init(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("insert failed: {0}")]
    Insert(String),

    #[error("delete failed: {0}")]
    Delete(String),

    #[error("query failed: {0}")]
    Query(String),
}

/// Result type alias for memex operations.
pub type Result<T> = std::result::Result<T, Error>;
