//! Filesystem event watcher.
//!
//! A thin wrapper around `notify` that coalesces raw notifications into
//! debounced, deduplicated flushes of targeted re-index work. Overflow is
//! deferred, never dropped: when the pending set is full, new paths park in
//! an overflow map and ride the next flush. The watcher is a capability
//! with a no-op variant so the rest of the system never branches on
//! platform support.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use majoor_config::WatcherConfig;
use majoor_model::AssetSource;
use notify::event::{EventKind, ModifyKind, RemoveKind};
use notify::{
    Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{AssetError, Result};
use crate::index::Indexer;

/// One watched root with its index annotation.
#[derive(Debug, Clone)]
pub struct WatchRoot {
    pub path: PathBuf,
    pub source: AssetSource,
    pub root_id: Option<String>,
}

/// Watcher capability surface.
#[async_trait]
pub trait WatcherHandle: Send + Sync + fmt::Debug {
    fn is_running(&self) -> bool;
    fn watched_paths(&self) -> Vec<PathBuf>;
    fn pending_count(&self) -> usize;
    fn recent_alerts(&self) -> Vec<String>;
    async fn stop(&self);
}

/// Selected when watching is disabled or the platform backend is
/// unavailable.
#[derive(Debug, Default)]
pub struct NoopWatcher;

#[async_trait]
impl WatcherHandle for NoopWatcher {
    fn is_running(&self) -> bool {
        false
    }
    fn watched_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }
    fn pending_count(&self) -> usize {
        0
    }
    fn recent_alerts(&self) -> Vec<String> {
        Vec::new()
    }
    async fn stop(&self) {}
}

enum WatchMessage {
    Event(Event),
    Error(String),
}

#[derive(Debug, Default)]
struct WatchShared {
    pending_count: AtomicUsize,
    alerts: Mutex<Vec<String>>,
    running: AtomicBool,
}

/// Native notify-backed watcher.
pub struct WatchService {
    roots: Vec<WatchRoot>,
    shared: Arc<WatchShared>,
    watchers: Mutex<Option<Vec<RecommendedWatcher>>>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for WatchService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchService")
            .field("roots", &self.roots.len())
            .field("pending", &self.shared.pending_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl WatchService {
    /// Attach notify watchers to the given roots and start the processing
    /// loop. Returns an error when no root could be watched.
    pub fn start(
        roots: Vec<WatchRoot>,
        cfg: WatcherConfig,
        indexer: Arc<Indexer>,
    ) -> Result<Arc<WatchService>> {
        let capacity = (cfg.pending_max * 4).max(256);
        let (tx, rx) = mpsc::channel::<WatchMessage>(capacity);

        let mut watchers = Vec::new();
        let mut watched_roots = Vec::new();
        for root in roots {
            if !root.path.is_dir() {
                warn!(root = %root.path.display(), "skipping missing watch root");
                continue;
            }
            let tx_event = tx.clone();
            let root_display = root.path.display().to_string();
            let mut watcher = RecommendedWatcher::new(
                move |res: std::result::Result<Event, notify::Error>| match res {
                    Ok(event) => {
                        if tx_event.blocking_send(WatchMessage::Event(event)).is_err()
                        {
                            // Loop has shut down; nothing to deliver to.
                        }
                    }
                    Err(err) => {
                        let _ = tx_event
                            .blocking_send(WatchMessage::Error(err.to_string()));
                    }
                },
                NotifyConfig::default(),
            )
            .map_err(|err| {
                AssetError::internal(format!(
                    "failed to create watcher for {root_display}: {err}"
                ))
            })?;
            watcher
                .watch(&root.path, RecursiveMode::Recursive)
                .map_err(|err| {
                    AssetError::internal(format!(
                        "failed to watch {root_display}: {err}"
                    ))
                })?;
            watchers.push(watcher);
            watched_roots.push(root);
        }
        drop(tx);
        if watchers.is_empty() {
            return Err(AssetError::Unavailable(
                "no watchable roots".to_string(),
            ));
        }

        let shared = Arc::new(WatchShared::default());
        shared.running.store(true, Ordering::Release);
        let loop_task = tokio::spawn(watch_loop(
            rx,
            cfg,
            watched_roots.clone(),
            indexer,
            Arc::clone(&shared),
        ));

        info!(roots = watched_roots.len(), "filesystem watcher started");
        Ok(Arc::new(WatchService {
            roots: watched_roots,
            shared,
            watchers: Mutex::new(Some(watchers)),
            loop_task: Mutex::new(Some(loop_task)),
        }))
    }
}

#[async_trait]
impl WatcherHandle for WatchService {
    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn watched_paths(&self) -> Vec<PathBuf> {
        self.roots.iter().map(|root| root.path.clone()).collect()
    }

    fn pending_count(&self) -> usize {
        self.shared.pending_count.load(Ordering::Relaxed)
    }

    fn recent_alerts(&self) -> Vec<String> {
        self.shared.alerts.lock().expect("alerts lock").clone()
    }

    /// Stop the native observer and join the loop with a short timeout;
    /// outstanding debounce work is abandoned.
    async fn stop(&self) {
        // Dropping the notify watchers stops their threads and closes the
        // channel, which ends the loop after a final flush.
        self.watchers.lock().expect("watchers lock").take();
        let task = self.loop_task.lock().expect("loop task lock").take();
        if let Some(task) = task {
            if timeout(Duration::from_secs(5), task).await.is_err() {
                warn!("watcher loop did not stop in time");
            }
        }
        self.shared.running.store(false, Ordering::Release);
        self.shared.pending_count.store(0, Ordering::Relaxed);
    }
}

struct PendingEntry {
    root_index: usize,
    seen_at: Instant,
}

async fn watch_loop(
    mut rx: mpsc::Receiver<WatchMessage>,
    cfg: WatcherConfig,
    roots: Vec<WatchRoot>,
    indexer: Arc<Indexer>,
    shared: Arc<WatchShared>,
) {
    let debounce = Duration::from_millis(cfg.debounce_ms.max(1));
    let dedupe_ttl = Duration::from_millis(cfg.dedupe_ttl_ms);
    let flush_slots = Arc::new(Semaphore::new(cfg.max_flush_concurrency));

    let mut pending: HashMap<PathBuf, PendingEntry> = HashMap::new();
    let mut overflow: HashMap<PathBuf, PendingEntry> = HashMap::new();
    let mut dedupe: HashMap<PathBuf, Instant> = HashMap::new();
    let mut event_times: VecDeque<Instant> = VecDeque::new();
    let mut last_alert: Option<Instant> = None;

    loop {
        let message = if pending.is_empty() {
            rx.recv().await
        } else {
            match timeout(debounce, rx.recv()).await {
                Ok(message) => message,
                Err(_) => {
                    flush(
                        &mut pending,
                        &mut overflow,
                        &roots,
                        &indexer,
                        &shared,
                        &flush_slots,
                        cfg.flush_max_files,
                    )
                    .await;
                    continue;
                }
            }
        };

        let Some(message) = message else {
            // Channel closed: final flush, then exit.
            flush(
                &mut pending,
                &mut overflow,
                &roots,
                &indexer,
                &shared,
                &flush_slots,
                cfg.flush_max_files,
            )
            .await;
            break;
        };

        match message {
            WatchMessage::Event(event) => {
                if !event_is_relevant(&event.kind) {
                    continue;
                }
                track_event_rate(
                    &cfg,
                    &shared,
                    &mut event_times,
                    &mut last_alert,
                );
                for path in event.paths {
                    accept_path(
                        path,
                        &cfg,
                        &roots,
                        &mut pending,
                        &mut overflow,
                        &mut dedupe,
                        dedupe_ttl,
                    );
                }
                shared
                    .pending_count
                    .store(pending.len() + overflow.len(), Ordering::Relaxed);
                if pending.len() >= cfg.pending_max {
                    flush(
                        &mut pending,
                        &mut overflow,
                        &roots,
                        &indexer,
                        &shared,
                        &flush_slots,
                        cfg.flush_max_files,
                    )
                    .await;
                }
            }
            WatchMessage::Error(error) => {
                warn!("watcher backend error: {error}");
            }
        }
    }
    shared.running.store(false, Ordering::Release);
}

fn event_is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Remove(RemoveKind::File | RemoveKind::Any)
    )
}

fn accept_path(
    path: PathBuf,
    cfg: &WatcherConfig,
    roots: &[WatchRoot],
    pending: &mut HashMap<PathBuf, PendingEntry>,
    overflow: &mut HashMap<PathBuf, PendingEntry>,
    dedupe: &mut HashMap<PathBuf, Instant>,
    dedupe_ttl: Duration,
) {
    let filename = match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => return,
    };
    if majoor_model::classify_file(&filename).is_none() {
        return;
    }
    let Some(root_index) = locate_root(roots, &path) else {
        return;
    };
    // Size gates: tiny files are usually partial writes, huge ones are
    // not worth racing the producer for.
    if let Ok(meta) = std::fs::metadata(&path) {
        let size = meta.len();
        if size < cfg.min_file_size_bytes || size > cfg.max_file_size_bytes {
            return;
        }
    }
    let now = Instant::now();
    if let Some(last) = dedupe.get(&path) {
        if now.duration_since(*last) < dedupe_ttl {
            return;
        }
    }
    dedupe.insert(path.clone(), now);
    if dedupe.len() > cfg.pending_max * 4 {
        dedupe.retain(|_, at| now.duration_since(*at) < dedupe_ttl);
    }

    let entry = PendingEntry {
        root_index,
        seen_at: now,
    };
    if pending.len() >= cfg.pending_max && !pending.contains_key(&path) {
        // Deferred, not dropped: rides the next flush.
        overflow.insert(path, entry);
    } else {
        pending.insert(path, entry);
    }
}

fn locate_root(roots: &[WatchRoot], path: &Path) -> Option<usize> {
    roots.iter().position(|root| path.starts_with(&root.path))
}

fn track_event_rate(
    cfg: &WatcherConfig,
    shared: &Arc<WatchShared>,
    event_times: &mut VecDeque<Instant>,
    last_alert: &mut Option<Instant>,
) {
    let now = Instant::now();
    event_times.push_back(now);
    let window = Duration::from_secs_f64(cfg.stream_alert_window_s);
    while let Some(front) = event_times.front() {
        if now.duration_since(*front) > window {
            event_times.pop_front();
        } else {
            break;
        }
    }
    if event_times.len() >= cfg.stream_alert_threshold {
        let cooled = last_alert
            .map(|at| {
                now.duration_since(at).as_secs_f64() >= cfg.stream_alert_cooldown_s
            })
            .unwrap_or(true);
        if cooled {
            *last_alert = Some(now);
            let message = format!(
                "high filesystem event rate: {} events in {:.0}s",
                event_times.len(),
                cfg.stream_alert_window_s
            );
            warn!("{message}");
            let mut alerts = shared.alerts.lock().expect("alerts lock");
            alerts.push(message);
            if alerts.len() > 20 {
                alerts.remove(0);
            }
        }
    }
}

async fn flush(
    pending: &mut HashMap<PathBuf, PendingEntry>,
    overflow: &mut HashMap<PathBuf, PendingEntry>,
    roots: &[WatchRoot],
    indexer: &Arc<Indexer>,
    shared: &Arc<WatchShared>,
    flush_slots: &Arc<Semaphore>,
    flush_max_files: usize,
) {
    if pending.is_empty() && overflow.is_empty() {
        return;
    }
    // Oldest first, capped per flush; the remainder stays pending.
    let mut entries: Vec<(PathBuf, PendingEntry)> = pending.drain().collect();
    entries.sort_by_key(|(_, entry)| entry.seen_at);
    let carry = entries.split_off(entries.len().min(flush_max_files));
    for (path, entry) in carry {
        pending.insert(path, entry);
    }
    // Deferred overflow joins the pending set for the next round.
    for (path, entry) in overflow.drain() {
        pending.entry(path).or_insert(entry);
    }
    shared
        .pending_count
        .store(pending.len(), Ordering::Relaxed);

    let mut groups: HashMap<usize, Vec<PathBuf>> = HashMap::new();
    for (path, entry) in entries {
        groups.entry(entry.root_index).or_default().push(path);
    }

    for (root_index, paths) in groups {
        let Some(root) = roots.get(root_index) else {
            continue;
        };
        let permit = match Arc::clone(flush_slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        let indexer = Arc::clone(indexer);
        let source = root.source;
        let root_id = root.root_id.clone();
        tokio::spawn(async move {
            let _permit = permit;
            debug!(files = paths.len(), "watcher flush indexing");
            if let Err(err) = indexer
                .index_files(&paths, source, root_id.as_deref(), true, false, true)
                .await
            {
                warn!("watcher flush failed: {err}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> WatcherConfig {
        WatcherConfig {
            pending_max: 3,
            min_file_size_bytes: 0,
            dedupe_ttl_ms: 50,
            ..Default::default()
        }
    }

    fn roots_for(dir: &Path) -> Vec<WatchRoot> {
        vec![WatchRoot {
            path: dir.to_path_buf(),
            source: AssetSource::Output,
            root_id: None,
        }]
    }

    #[test]
    fn unknown_kinds_and_foreign_paths_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_cfg();
        let roots = roots_for(dir.path());
        let mut pending = HashMap::new();
        let mut overflow = HashMap::new();
        let mut dedupe = HashMap::new();

        accept_path(
            dir.path().join("notes.txt"),
            &cfg,
            &roots,
            &mut pending,
            &mut overflow,
            &mut dedupe,
            Duration::from_millis(50),
        );
        accept_path(
            PathBuf::from("/elsewhere/a.png"),
            &cfg,
            &roots,
            &mut pending,
            &mut overflow,
            &mut dedupe,
            Duration::from_millis(50),
        );
        assert!(pending.is_empty());
        assert!(overflow.is_empty());
    }

    #[test]
    fn overflow_defers_instead_of_dropping() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_cfg();
        let roots = roots_for(dir.path());
        let mut pending = HashMap::new();
        let mut overflow = HashMap::new();
        let mut dedupe = HashMap::new();

        for i in 0..5 {
            accept_path(
                dir.path().join(format!("{i}.png")),
                &cfg,
                &roots,
                &mut pending,
                &mut overflow,
                &mut dedupe,
                Duration::from_millis(50),
            );
        }
        assert_eq!(pending.len(), 3);
        assert_eq!(overflow.len(), 2, "excess events defer, never vanish");
    }

    #[test]
    fn duplicate_events_collapse_within_ttl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_cfg();
        let roots = roots_for(dir.path());
        let mut pending = HashMap::new();
        let mut overflow = HashMap::new();
        let mut dedupe = HashMap::new();

        for _ in 0..3 {
            accept_path(
                dir.path().join("same.png"),
                &cfg,
                &roots,
                &mut pending,
                &mut overflow,
                &mut dedupe,
                Duration::from_secs(60),
            );
        }
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn stream_alert_fires_once_per_cooldown() {
        let cfg = WatcherConfig {
            stream_alert_threshold: 5,
            stream_alert_window_s: 60.0,
            stream_alert_cooldown_s: 300.0,
            ..Default::default()
        };
        let shared = Arc::new(WatchShared::default());
        let mut times = VecDeque::new();
        let mut last_alert = None;
        for _ in 0..20 {
            track_event_rate(&cfg, &shared, &mut times, &mut last_alert);
        }
        assert_eq!(shared.alerts.lock().unwrap().len(), 1);
    }
}
