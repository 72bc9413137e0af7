//! Background metadata enrichment.
//!
//! A bounded FIFO of filepaths drained by a small worker pool. Workers
//! yield while the interaction-pause deadline is in the future and park
//! while the maintenance flag is raised; they are never interrupted in the
//! middle of a write.

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::db::Database;
use crate::maintenance::MaintenanceGuard;
use crate::metadata::{write_enrichment, MetadataExtractor};

/// Shared deadline that keeps interactive UI work ahead of background
/// enrichment: every listing/search touches it, and workers sleep until it
/// passes.
#[derive(Debug, Default)]
pub struct PauseToken {
    deadline: Mutex<Option<Instant>>,
}

impl PauseToken {
    pub fn touch(&self, seconds: f64) {
        let until = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
        let mut deadline = self.deadline.lock().expect("pause lock");
        match *deadline {
            Some(current) if current >= until => {}
            _ => *deadline = Some(until),
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        let deadline = self.deadline.lock().expect("pause lock");
        deadline.and_then(|until| until.checked_duration_since(Instant::now()))
    }

    pub fn is_paused(&self) -> bool {
        self.remaining().is_some()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<String>,
    queued: HashSet<String>,
}

/// Bounded FIFO enrichment queue plus its worker pool.
#[derive(Debug)]
pub struct EnrichmentQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    queue_max: usize,
    max_raw_bytes: i64,
    shutdown: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pause: Arc<PauseToken>,
    maintenance: Arc<MaintenanceGuard>,
}

impl EnrichmentQueue {
    pub fn new(
        queue_max: usize,
        max_raw_bytes: i64,
        pause: Arc<PauseToken>,
        maintenance: Arc<MaintenanceGuard>,
    ) -> Arc<Self> {
        Arc::new(EnrichmentQueue {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            queue_max,
            max_raw_bytes,
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            pause,
            maintenance,
        })
    }

    pub fn pause_token(&self) -> &Arc<PauseToken> {
        &self.pause
    }

    /// Enqueue a filepath. Returns false (caller defers) when the queue is
    /// at its bound; duplicates already queued collapse silently.
    pub fn push(&self, filepath: &str) -> bool {
        let mut state = self.state.lock().expect("enrich queue lock");
        if state.queued.contains(filepath) {
            return true;
        }
        if state.queue.len() >= self.queue_max {
            return false;
        }
        state.queue.push_back(filepath.to_string());
        state.queued.insert(filepath.to_string());
        drop(state);
        self.notify.notify_one();
        true
    }

    pub fn queue_length(&self) -> usize {
        self.state.lock().expect("enrich queue lock").queue.len()
    }

    fn pop(&self) -> Option<String> {
        let mut state = self.state.lock().expect("enrich queue lock");
        let next = state.queue.pop_front();
        if let Some(path) = &next {
            state.queued.remove(path);
        }
        next
    }

    /// Start `concurrency` workers draining the queue.
    pub fn start(
        self: &Arc<Self>,
        concurrency: usize,
        db: Arc<Database>,
        extractor: Arc<dyn MetadataExtractor>,
    ) {
        let mut workers = self.workers.lock().expect("workers lock");
        for worker_id in 0..concurrency.max(1) {
            let this = Arc::clone(self);
            let db = Arc::clone(&db);
            let extractor = Arc::clone(&extractor);
            workers.push(tokio::spawn(async move {
                this.worker_loop(worker_id, db, extractor).await;
            }));
        }
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        db: Arc<Database>,
        extractor: Arc<dyn MetadataExtractor>,
    ) {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            // Maintenance and UI interactivity both outrank enrichment;
            // checks happen between tasks, never mid-write.
            if self.maintenance.is_active() {
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
            if let Some(remaining) = self.pause.remaining() {
                tokio::time::sleep(remaining.min(Duration::from_secs(2))).await;
                continue;
            }
            let Some(filepath) = self.pop() else {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                }
                continue;
            };
            self.enrich_one(&db, extractor.as_ref(), &filepath).await;
            debug!(worker_id, filepath = %filepath, "enrichment task done");
        }
    }

    async fn enrich_one(
        &self,
        db: &Arc<Database>,
        extractor: &dyn MetadataExtractor,
        filepath: &str,
    ) {
        let path = Path::new(filepath);
        let state_hash = match std::fs::metadata(path) {
            Ok(meta) => super::state_hash_for(filepath, &meta),
            Err(err) => {
                debug!(filepath, "skipping enrichment, stat failed: {err}");
                return;
            }
        };

        let extracted = match crate::metadata::cached_extraction(db, filepath, &state_hash)
            .await
        {
            Ok(Some(cached)) => cached,
            _ => match extractor.extract(path).await {
                Ok(extracted) => extracted,
                Err(err) => {
                    warn!(filepath, "metadata extraction failed: {err}");
                    majoor_model::ExtractedMetadata::degraded()
                }
            },
        };

        if let Err(err) =
            write_enrichment(db, filepath, &state_hash, &extracted, self.max_raw_bytes)
                .await
        {
            warn!(filepath, "enrichment write failed: {err}");
        }
    }

    /// Stop workers after their current task; bounded join.
    pub async fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
        let handles: Vec<JoinHandle<()>> =
            self.workers.lock().expect("workers lock").drain(..).collect();
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::NoopExtractor;
    use crate::params;
    use majoor_config::DbConfig;

    #[test]
    fn pause_token_extends_not_shrinks() {
        let token = PauseToken::default();
        assert!(!token.is_paused());
        token.touch(5.0);
        let first = token.remaining().expect("paused");
        token.touch(0.5);
        let second = token.remaining().expect("still paused");
        // A shorter touch must not shrink the active window.
        assert!(second >= first - Duration::from_millis(50));
    }

    #[tokio::test]
    async fn queue_bound_and_dedupe() {
        let queue = EnrichmentQueue::new(
            2,
            1 << 20,
            Arc::new(PauseToken::default()),
            Arc::new(MaintenanceGuard::new()),
        );
        assert!(queue.push("/a.png"));
        assert!(queue.push("/a.png"), "duplicate collapses, not rejected");
        assert_eq!(queue.queue_length(), 1);
        assert!(queue.push("/b.png"));
        assert!(!queue.push("/c.png"), "full queue defers");
        assert_eq!(queue.queue_length(), 2);
    }

    #[tokio::test]
    async fn worker_drains_queue_and_stops() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(
            Database::open(dir.path().join("assets.sqlite"), DbConfig::default())
                .await
                .expect("open"),
        );
        let file = dir.path().join("a.png");
        std::fs::write(&file, b"x").expect("write");
        let filepath = file.to_string_lossy().into_owned();
        db.execute(
            "INSERT INTO assets (filepath, filename, subfolder, source, kind, ext, size_bytes, mtime) \
             VALUES (?, 'a.png', '', 'output', 'image', 'png', 1, 1)",
            &params![filepath.clone()],
        )
        .await
        .expect("insert");

        let queue = EnrichmentQueue::new(
            100,
            1 << 20,
            Arc::new(PauseToken::default()),
            Arc::new(MaintenanceGuard::new()),
        );
        queue.start(1, Arc::clone(&db), Arc::new(NoopExtractor));
        queue.push(&filepath);

        for _ in 0..100 {
            if queue.queue_length() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queue.queue_length(), 0);
        queue.stop().await;
    }
}
