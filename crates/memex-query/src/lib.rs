//! Query execution for memex.
//!
//! The query path is read-only: it embeds the query text with the same
//! model used for indexing and runs a nearest-neighbor lookup against the
//! store. It never touches the work queue and may run concurrently with
//! indexing.

pub mod executor;

pub use executor::QueryExecutor;
