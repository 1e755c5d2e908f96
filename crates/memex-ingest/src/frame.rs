//! Length-prefixed frame decoding for the ingestion listener.
//!
//! Wire format: `[magic 0xBEEF][u32 BE payload length][payload]`.
//!
//! The decoder is self-healing: garbage before the next magic is
//! discarded (keeping a possible partial-magic tail), and a frame
//! declaring an implausible length is treated as stream desync and
//! resynchronized past its magic rather than trusted.

use tracing::warn;

/// Frame magic bytes.
pub const MAGIC: [u8; 2] = [0xBE, 0xEF];

/// Header size: 2 bytes magic + 4 bytes length.
pub const HEADER_LEN: usize = 6;

/// Largest payload a frame may declare. Anything above this is desync.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Incremental frame decoder over a byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently buffered awaiting a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed bytes in, get complete payloads out.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(data);
        let mut payloads = Vec::new();

        loop {
            let Some(magic_index) = find_magic(&self.buffer) else {
                // No magic in sight. Keep a trailing first-magic-byte in
                // case its partner arrives next read; drop the rest so a
                // garbage stream cannot grow the buffer without bound.
                if self.buffer.last() == Some(&MAGIC[0]) {
                    let tail = self.buffer.len() - 1;
                    self.buffer.drain(..tail);
                } else {
                    self.buffer.clear();
                }
                break;
            };

            if magic_index > 0 {
                warn!("Discarding {magic_index} bytes of garbage before frame");
                self.buffer.drain(..magic_index);
            }

            if self.buffer.len() < HEADER_LEN {
                break; // wait for the rest of the header
            }

            let declared = u32::from_be_bytes([
                self.buffer[2],
                self.buffer[3],
                self.buffer[4],
                self.buffer[5],
            ]) as usize;

            if declared > MAX_FRAME_LEN {
                // A corrupt length would make us wait forever; skip past
                // this magic and hunt for the next one.
                warn!("Frame declares {declared} bytes, treating as desync");
                self.buffer.drain(..MAGIC.len());
                continue;
            }

            let total = HEADER_LEN + declared;
            if self.buffer.len() < total {
                break; // wait for the full payload
            }

            payloads.push(self.buffer[HEADER_LEN..total].to_vec());
            self.buffer.drain(..total);
        }

        payloads
    }
}

/// Encode one payload as a frame. Used by tests and trigger clients.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&MAGIC);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn find_magic(buffer: &[u8]) -> Option<usize> {
    buffer.windows(MAGIC.len()).position(|w| w == MAGIC)
}
