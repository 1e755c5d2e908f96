//! TCP ingestion listener.
//!
//! Accepts framed reindex triggers from local tooling. Each frame payload
//! is a UTF-8 file path; valid paths are injected as `Modified` events
//! upstream of the debouncer, so triggered paths go through the same
//! filtering, debouncing, and queueing as watched ones.

use memex_core::RawEvent;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::frame::FrameDecoder;

/// Throttle reads once this much is buffered undecoded.
const SOFT_BUFFER_LIMIT: usize = 1024 * 1024;

/// Drop the connection once this much is buffered undecoded.
const HARD_BUFFER_LIMIT: usize = 10 * 1024 * 1024;

/// Disconnect a client after this long without data.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Read chunk size.
const READ_CHUNK: usize = 4096;

/// Ingestion listener errors.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// Run the listener until `shutdown` is cancelled.
pub async fn run(
    addr: SocketAddr,
    events: mpsc::Sender<RawEvent>,
    shutdown: CancellationToken,
) -> Result<(), IngestError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| IngestError::Bind { addr, source })?;

    info!("Ingestion listener on {addr}");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("Connected: {peer}");
                        tokio::spawn(handle_client(
                            stream,
                            peer,
                            events.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!("Accept failed: {e}"),
                }
            }
            () = shutdown.cancelled() => {
                info!("Ingestion listener shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    events: mpsc::Sender<RawEvent>,
    shutdown: CancellationToken,
) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        // Backpressure: a client outrunning the decoder gets throttled,
        // then dropped at the hard limit.
        if decoder.buffered() > HARD_BUFFER_LIMIT {
            warn!("Dropping {peer}: buffer exceeded {HARD_BUFFER_LIMIT} bytes");
            break;
        }
        if decoder.buffered() > SOFT_BUFFER_LIMIT {
            debug!("Backpressure active for {peer}, throttling");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let read = tokio::select! {
            read = tokio::time::timeout(IDLE_TIMEOUT, stream.read(&mut chunk)) => read,
            () = shutdown.cancelled() => break,
        };

        let n = match read {
            Ok(Ok(0)) => break, // EOF
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!("Read error from {peer}: {e}");
                break;
            }
            Err(_) => {
                warn!("Connection timed out: {peer} (idle > {IDLE_TIMEOUT:?})");
                break;
            }
        };

        for payload in decoder.push(&chunk[..n]) {
            match String::from_utf8(payload) {
                Ok(path) if !path.trim().is_empty() => {
                    let path = PathBuf::from(path.trim());
                    debug!("Reindex trigger from {peer}: {:?}", path);
                    if events.send(RawEvent::modified(path)).await.is_err() {
                        debug!("Pipeline gone, closing {peer}");
                        return;
                    }
                }
                Ok(_) => warn!("Empty path frame from {peer}"),
                Err(_) => warn!("Non-UTF-8 frame from {peer}"),
            }
        }
    }

    debug!("Disconnected: {peer}");
}
