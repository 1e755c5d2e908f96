//! Vector storage layer for memex.
//!
//! Implements [`VectorStore`](memex_core::VectorStore) twice:
//!
//! - [`LanceStore`] (feature `lance`, default): persistent LanceDB storage
//!   that survives process restart and verifies the stored vector width
//!   against the configured model at startup
//! - [`MemoryStore`]: brute-force cosine store for tests and development

#[cfg(feature = "lance")]
pub mod lance;
pub mod memory;

#[cfg(feature = "lance")]
pub use lance::LanceStore;
pub use memory::MemoryStore;
