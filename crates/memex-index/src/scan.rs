//! Initial directory scan.
//!
//! Walks each watch root once at startup and feeds pre-existing files into
//! the pipeline as synthetic `Created` events. Unchanged files fall out at
//! the worker's content-hash check, so a rescan after restart is cheap.

use memex_core::RawEvent;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::filter::PathFilter;

/// Scan all roots, emitting a `Created` event per eligible file.
///
/// The walk runs on the blocking pool; cancellation is checked between
/// directories so shutdown does not wait on a large tree.
pub async fn scan_roots(
    roots: Vec<PathBuf>,
    filter: PathFilter,
    event_tx: mpsc::Sender<RawEvent>,
    shutdown: CancellationToken,
) {
    let result = tokio::task::spawn_blocking(move || {
        let mut found = 0usize;
        for root in &roots {
            if shutdown.is_cancelled() {
                break;
            }
            visit_dir(root, &filter, &event_tx, &shutdown, &mut found);
        }
        found
    })
    .await;

    match result {
        Ok(found) => info!("Initial scan queued {found} files"),
        Err(e) => warn!("Initial scan task failed: {e}"),
    }
}

fn visit_dir(
    dir: &Path,
    filter: &PathFilter,
    event_tx: &mpsc::Sender<RawEvent>,
    shutdown: &CancellationToken,
    found: &mut usize,
) {
    if shutdown.is_cancelled() {
        return;
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read directory {:?}: {e}", dir);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();

        // Never follow directory symlinks: a link cycle would recurse
        // forever, and the link target is watched via its real path.
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };
        if file_type.is_symlink() {
            debug!("Skipping symlink {:?}", path);
            continue;
        }

        if file_type.is_dir() {
            if filter.is_ignored_dir(&path) {
                debug!("Pruning {:?}", path);
                continue;
            }
            visit_dir(&path, filter, event_tx, shutdown, found);
        } else if file_type.is_file() && filter.allows(&path) {
            if event_tx.blocking_send(RawEvent::created(path)).is_err() {
                return; // pipeline gone
            }
            *found += 1;
        }
    }
}
