//! TCP ingestion listener for memex.
//!
//! External tooling can trigger reindexing by connecting to the listener
//! and sending length-prefixed frames (`0xBEEF` magic, u32 BE length)
//! whose payloads are UTF-8 file paths. Triggered paths are injected into
//! the pipeline upstream of the debouncer and take the normal route from
//! there. Disabled by default; enabled via configuration.

pub mod frame;
pub mod server;

pub use frame::{encode_frame, FrameDecoder, HEADER_LEN, MAGIC, MAX_FRAME_LEN};
pub use server::{run, IngestError};
