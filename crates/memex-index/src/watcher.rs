//! Filesystem event source.
//!
//! Wraps a raw `notify` watcher and forwards change notifications as
//! [`RawEvent`]s over a tokio channel. Debouncing is not done here: the
//! debouncer owns those semantics (immediate deletes, last-kind-wins), so
//! this stage stays a thin bridge from OS notifications to the pipeline.

use memex_core::{Error, RawEvent, WatchError};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, warn};

/// Recursive watcher over a set of directory roots.
///
/// Watch handles live as long as this value; dropping it stops event
/// delivery, which is how the pipeline shuts the source off.
pub struct WatchSource {
    watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl WatchSource {
    /// Watch `roots` and forward events into `event_tx`.
    ///
    /// Roots are canonicalized and deduplicated first, so a symlinked root
    /// resolving to an already-watched tree is registered once. A root
    /// that cannot be watched is logged and skipped; only zero watchable
    /// roots is an error.
    pub fn subscribe(
        roots: &[PathBuf],
        event_tx: tokio_mpsc::Sender<RawEvent>,
    ) -> Result<Self, Error> {
        let (tx, rx) = mpsc::channel::<Result<Event, notify::Error>>();

        // notify delivers on its own thread; bridge to the async side
        // with a forwarding thread and blocking sends.
        std::thread::spawn(move || {
            while let Ok(result) = rx.recv() {
                match result {
                    Ok(event) => {
                        for raw in convert_event(&event) {
                            if event_tx.blocking_send(raw).is_err() {
                                debug!("Event channel closed, watcher bridge exiting");
                                return;
                            }
                        }
                    }
                    Err(e) => error!("Watch error: {e}"),
                }
            }
        });

        let mut watcher = notify::recommended_watcher(move |result| {
            let _ = tx.send(result);
        })
        .map_err(|e| Error::Other(format!("failed to create watcher: {e}")))?;

        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut watched = Vec::new();

        for root in roots {
            let canonical = match root.canonicalize() {
                Ok(p) => p,
                Err(e) => {
                    warn!("Cannot watch {:?}: {e}", root);
                    continue;
                }
            };

            if !seen.insert(canonical.clone()) {
                debug!("Root {:?} already watched, skipping", canonical);
                continue;
            }

            match watcher.watch(&canonical, RecursiveMode::Recursive) {
                Ok(()) => {
                    debug!("Watching {:?}", canonical);
                    watched.push(canonical);
                }
                Err(e) => {
                    warn!("Cannot watch {:?}: {e}", canonical);
                    seen.remove(&canonical);
                }
            }
        }

        if watched.is_empty() {
            return Err(WatchError::NoRoots.into());
        }

        Ok(Self {
            watcher,
            roots: watched,
        })
    }

    /// Roots actually being watched (canonicalized).
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Stop watching a single root.
    pub fn unwatch(&mut self, path: &Path) -> Result<(), Error> {
        self.watcher
            .unwatch(path)
            .map_err(|e| Error::Other(format!("unwatch error: {e}")))?;
        self.roots.retain(|r| r != path);
        Ok(())
    }
}

/// Convert one notify event into zero or more raw pipeline events.
fn convert_event(event: &Event) -> Vec<RawEvent> {
    let make = |path: &PathBuf| -> Option<RawEvent> {
        match event.kind {
            EventKind::Create(_) => Some(RawEvent::created(path.clone())),
            EventKind::Modify(_) => Some(RawEvent::modified(path.clone())),
            EventKind::Remove(_) => Some(RawEvent::deleted(path.clone())),
            _ => None,
        }
    };

    event.paths.iter().filter_map(make).collect()
}
