//! # memex-embed
//!
//! Local embedding generation for memex.
//!
//! Embeddings are computed on-device with the Candle ML stack running
//! `sentence-transformers/all-MiniLM-L6-v2`; no external API is involved.
//!
//! ## Model details
//!
//! | Property | Value |
//! |----------|-------|
//! | Model | `sentence-transformers/all-MiniLM-L6-v2` |
//! | Dimension | 384 |
//! | Max tokens | 256 |
//! | Architecture | BERT, mean pooling |
//!
//! ## Cargo features
//!
//! - `candle` (default): the real inference stack and [`MiniLmEmbedder`]
//! - without `candle`: only [`NoopEmbedder`] is available
//!
//! ## Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`MiniLmEmbedder`] | Transformer embeddings via Candle (feature `candle`) |
//! | [`EmbedderPool`] | Concurrency limit + retry/timeout policy (always available) |
//! | [`NoopEmbedder`] | Zero-vector embedder for tests (always available) |

#[cfg(feature = "candle")]
pub mod minilm;

#[cfg(feature = "candle")]
pub use minilm::MiniLmEmbedder;

pub mod noop;
pub mod pool;

pub use noop::NoopEmbedder;
pub use pool::{EmbedderPool, RetryPolicy};
