//! Event normalizer / debouncer.
//!
//! Collapses bursts of raw events for one path into a single
//! [`IndexIntent`] and filters irrelevant paths. One coordinating loop
//! owns a map of path → deadline; there is no timer object per path.
//!
//! Rules:
//! - `Created`/`Modified` reset the path's deadline to `now + window`; when
//!   the deadline passes with no further events, one `Upsert` intent is
//!   emitted.
//! - `Deleted` cancels any pending entry and emits a `Delete` intent
//!   immediately. The file is gone, there is nothing to re-check, and a
//!   queued delete must not wait behind a quiet window.
//! - Enqueueing into the bounded intent channel awaits when the channel is
//!   full, which is how backpressure reaches the event source.
//!
//! On shutdown (event channel closed) every pending entry is flushed as an
//! intent before the loop exits, so nothing observed is silently dropped.

use memex_core::{IndexIntent, RawEvent, RawEventKind};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use crate::filter::PathFilter;

/// Run the debounce loop until the event channel closes.
pub async fn run(
    mut events: mpsc::Receiver<RawEvent>,
    intents: mpsc::Sender<IndexIntent>,
    filter: PathFilter,
    window: Duration,
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        let next_deadline = pending.values().min().copied();
        let deadline_fut = async {
            match next_deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => {
                        handle_event(event, &mut pending, &intents, &filter, window).await;
                    }
                    None => break,
                }
            }
            () = deadline_fut => {
                flush_expired(&mut pending, &intents).await;
            }
        }
    }

    // Channel closed: flush whatever is still pending so intents observed
    // before shutdown reach the queue.
    debug!("Event channel closed, flushing {} pending paths", pending.len());
    for (path, _) in pending.drain() {
        let _ = intents.send(IndexIntent::upsert(path)).await;
    }
}

async fn handle_event(
    event: RawEvent,
    pending: &mut HashMap<PathBuf, Instant>,
    intents: &mpsc::Sender<IndexIntent>,
    filter: &PathFilter,
    window: Duration,
) {
    if !filter.allows(&event.path) {
        trace!("Filtered out {:?}", event.path);
        return;
    }

    match event.kind {
        RawEventKind::Created | RawEventKind::Modified => {
            if let Ok(metadata) = tokio::fs::metadata(&event.path).await {
                if !metadata.is_file() {
                    return;
                }
                if !filter.allows_size(metadata.len()) {
                    debug!(
                        "Skipping {:?}: {} bytes exceeds ceiling",
                        event.path,
                        metadata.len()
                    );
                    pending.remove(&event.path);
                    return;
                }
            }
            // Burst absorption: each event pushes the deadline out again.
            pending.insert(event.path, Instant::now() + window);
        }
        RawEventKind::Deleted => {
            pending.remove(&event.path);
            let _ = intents.send(IndexIntent::delete(event.path)).await;
        }
    }
}

async fn flush_expired(
    pending: &mut HashMap<PathBuf, Instant>,
    intents: &mpsc::Sender<IndexIntent>,
) {
    let now = Instant::now();
    let expired: Vec<PathBuf> = pending
        .iter()
        .filter(|(_, deadline)| **deadline <= now)
        .map(|(path, _)| path.clone())
        .collect();

    for path in expired {
        pending.remove(&path);
        trace!("Quiet window elapsed for {:?}", path);
        let _ = intents.send(IndexIntent::upsert(path)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memex_core::IntentKind;
    use std::path::Path;

    const WINDOW: Duration = Duration::from_millis(50);

    fn test_filter() -> PathFilter {
        PathFilter::default()
    }

    async fn collect_intents(
        rx: &mut mpsc::Receiver<IndexIntent>,
        wait: Duration,
    ) -> Vec<IndexIntent> {
        tokio::time::sleep(wait).await;
        let mut intents = Vec::new();
        while let Ok(intent) = rx.try_recv() {
            intents.push(intent);
        }
        intents
    }

    fn spawn_debouncer(
        filter: PathFilter,
    ) -> (
        mpsc::Sender<RawEvent>,
        mpsc::Receiver<IndexIntent>,
        tokio::task::JoinHandle<()>,
    ) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (intent_tx, intent_rx) = mpsc::channel(64);
        let handle = tokio::spawn(run(event_rx, intent_tx, filter, WINDOW));
        (event_tx, intent_rx, handle)
    }

    /// A real file is needed for the metadata check on upsert events.
    fn scratch_file(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, "content").unwrap();
        path
    }

    #[tokio::test]
    async fn test_burst_collapses_to_one_intent() {
        let dir = tempfile::tempdir().unwrap();
        let path = scratch_file(&dir, "doc.md");
        let (event_tx, mut intent_rx, handle) = spawn_debouncer(test_filter());

        // An editor saving: create followed by several modifies.
        event_tx.send(RawEvent::created(path.clone())).await.unwrap();
        for _ in 0..5 {
            event_tx.send(RawEvent::modified(path.clone())).await.unwrap();
        }

        let intents = collect_intents(&mut intent_rx, WINDOW * 4).await;
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].kind, IntentKind::Upsert);
        assert_eq!(intents[0].path, path);

        drop(event_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_is_immediate() {
        let (event_tx, mut intent_rx, handle) = spawn_debouncer(test_filter());

        event_tx
            .send(RawEvent::deleted(PathBuf::from("/tmp/gone.md")))
            .await
            .unwrap();

        // Well before the window would elapse.
        let intents = collect_intents(&mut intent_rx, Duration::from_millis(10)).await;
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].kind, IntentKind::Delete);

        drop(event_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_cancels_pending_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let path = scratch_file(&dir, "doc.md");
        let (event_tx, mut intent_rx, handle) = spawn_debouncer(test_filter());

        event_tx.send(RawEvent::modified(path.clone())).await.unwrap();
        event_tx.send(RawEvent::deleted(path.clone())).await.unwrap();

        let intents = collect_intents(&mut intent_rx, WINDOW * 4).await;
        assert_eq!(intents.len(), 1, "pending upsert must be cancelled");
        assert_eq!(intents[0].kind, IntentKind::Delete);

        drop(event_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_then_recreate_nets_to_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let path = scratch_file(&dir, "doc.md");
        let (event_tx, mut intent_rx, handle) = spawn_debouncer(test_filter());

        event_tx.send(RawEvent::deleted(path.clone())).await.unwrap();
        event_tx.send(RawEvent::created(path.clone())).await.unwrap();

        let intents = collect_intents(&mut intent_rx, WINDOW * 4).await;
        // Delete goes out immediately; the recreate schedules a fresh
        // upsert. Applied in order the net state is "indexed".
        assert_eq!(intents.last().unwrap().kind, IntentKind::Upsert);

        drop(event_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_distinct_paths_get_distinct_intents() {
        let dir = tempfile::tempdir().unwrap();
        let a = scratch_file(&dir, "a.md");
        let b = scratch_file(&dir, "b.md");
        let (event_tx, mut intent_rx, handle) = spawn_debouncer(test_filter());

        event_tx.send(RawEvent::modified(a.clone())).await.unwrap();
        event_tx.send(RawEvent::modified(b.clone())).await.unwrap();

        let intents = collect_intents(&mut intent_rx, WINDOW * 4).await;
        assert_eq!(intents.len(), 2);

        drop(event_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_irrelevant_paths_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let jpg = scratch_file(&dir, "photo.jpg");
        let (event_tx, mut intent_rx, handle) = spawn_debouncer(test_filter());

        event_tx.send(RawEvent::created(jpg)).await.unwrap();
        event_tx
            .send(RawEvent::deleted(PathBuf::from("/x/.git/f.md")))
            .await
            .unwrap();

        let intents = collect_intents(&mut intent_rx, WINDOW * 4).await;
        assert!(intents.is_empty());

        drop(event_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_file_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.md");
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();

        let filter = PathFilter {
            max_file_size: 1024,
            ..Default::default()
        };
        let (event_tx, mut intent_rx, handle) = spawn_debouncer(filter);

        event_tx.send(RawEvent::modified(path)).await.unwrap();

        let intents = collect_intents(&mut intent_rx, WINDOW * 4).await;
        assert!(intents.is_empty());

        drop(event_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = scratch_file(&dir, "doc.md");
        let (event_tx, mut intent_rx, handle) = spawn_debouncer(test_filter());

        event_tx.send(RawEvent::modified(path.clone())).await.unwrap();
        // Close the channel before the quiet window elapses.
        drop(event_tx);
        handle.await.unwrap();

        let intent = intent_rx.recv().await.expect("pending intent flushed");
        assert_eq!(intent.path, path);
        assert_eq!(intent.kind, IntentKind::Upsert);
    }

    #[tokio::test]
    async fn test_deadline_resets_on_new_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = scratch_file(&dir, "doc.md");
        let (event_tx, mut intent_rx, handle) = spawn_debouncer(test_filter());

        // Keep poking the file at sub-window intervals; nothing should be
        // emitted while events keep arriving.
        for _ in 0..4 {
            event_tx.send(RawEvent::modified(path.clone())).await.unwrap();
            tokio::time::sleep(WINDOW / 2).await;
            assert!(intent_rx.try_recv().is_err(), "window must keep resetting");
        }

        let intents = collect_intents(&mut intent_rx, WINDOW * 4).await;
        assert_eq!(intents.len(), 1);

        drop(event_tx);
        handle.await.unwrap();
    }

    #[test]
    fn test_filter_allows_scratch_paths() {
        // Guard for the tests above: default filter accepts .md files in
        // arbitrary temp dirs.
        assert!(test_filter().allows(Path::new("/tmp/anything/doc.md")));
    }
}
