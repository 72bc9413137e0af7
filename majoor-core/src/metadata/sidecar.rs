//! Best-effort sidecar sync.
//!
//! When a request opts in via header, user rating/tags changes are queued
//! and written back next to the file as a `<name>.mjr.json` sidecar by a
//! single background worker. The queue is bounded; overflow drops the
//! oldest entry with a warning so the response path never blocks.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct SidecarUpdate {
    pub filepath: String,
    pub rating: i64,
    pub tags: Vec<String>,
}

#[derive(Debug)]
pub struct SidecarSync {
    queue: Mutex<VecDeque<SidecarUpdate>>,
    notify: Notify,
    queue_max: usize,
    shutdown: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SidecarSync {
    pub fn new(queue_max: usize) -> Arc<Self> {
        Arc::new(SidecarSync {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            queue_max,
            shutdown: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                if this.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                let next = this.queue.lock().expect("sidecar queue").pop_front();
                match next {
                    Some(update) => write_sidecar(&update).await,
                    None => {
                        tokio::select! {
                            _ = this.notify.notified() => {}
                            _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {}
                        }
                    }
                }
            }
        });
        *self.worker.lock().expect("sidecar worker") = Some(handle);
    }

    /// Enqueue an update; oldest entry is dropped (with a warning) when the
    /// queue is full.
    pub fn push(&self, update: SidecarUpdate) {
        {
            let mut queue = self.queue.lock().expect("sidecar queue");
            if queue.len() >= self.queue_max {
                if let Some(dropped) = queue.pop_front() {
                    warn!(
                        dropped = %dropped.filepath,
                        "sidecar queue full, dropping oldest update"
                    );
                }
            }
            queue.push_back(update);
        }
        self.notify.notify_one();
    }

    pub fn queue_length(&self) -> usize {
        self.queue.lock().expect("sidecar queue").len()
    }

    pub async fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
        let handle = self.worker.lock().expect("sidecar worker").take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;
        }
    }
}

async fn write_sidecar(update: &SidecarUpdate) {
    let target = sidecar_path(&update.filepath);
    let payload = match serde_json::to_vec_pretty(&serde_json::json!({
        "rating": update.rating,
        "tags": update.tags,
    })) {
        Ok(payload) => payload,
        Err(err) => {
            warn!("failed to encode sidecar payload: {err}");
            return;
        }
    };
    match tokio::fs::write(&target, payload).await {
        Ok(()) => debug!(path = %target.display(), "sidecar written"),
        Err(err) => warn!(path = %target.display(), "sidecar write failed: {err}"),
    }
}

fn sidecar_path(filepath: &str) -> PathBuf {
    PathBuf::from(format!("{filepath}.mjr.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_sidecar_next_to_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.png");
        std::fs::write(&file, b"png").expect("write");

        let sync = SidecarSync::new(10);
        sync.start();
        sync.push(SidecarUpdate {
            filepath: file.to_string_lossy().into_owned(),
            rating: 5,
            tags: vec!["hero".to_string()],
        });

        let sidecar = dir.path().join("a.png.mjr.json");
        for _ in 0..50 {
            if sidecar.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(sidecar.exists());
        let raw = std::fs::read_to_string(&sidecar).expect("read");
        assert!(raw.contains("\"rating\": 5"));
        sync.stop().await;
    }

    #[tokio::test]
    async fn overflow_drops_oldest_not_newest() {
        let sync = SidecarSync::new(2);
        for i in 0..3 {
            sync.push(SidecarUpdate {
                filepath: format!("/tmp/{i}.png"),
                rating: i,
                tags: vec![],
            });
        }
        let queue = sync.queue.lock().expect("queue");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.front().map(|u| u.rating), Some(1));
        assert_eq!(queue.back().map(|u| u.rating), Some(2));
    }
}
