//! Maintenance coordination: the process-wide flag, status events, backups,
//! restore, and force-delete.
//!
//! Exactly one maintenance operation runs at a time. While the flag is
//! raised, listing/search/duplicates handlers short-circuit with
//! `DB_MAINTENANCE`, the watcher is stopped by the caller, and enrichment
//! workers park between tasks.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sqlx::Row;
use tokio::sync::{broadcast, Notify};
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{AssetError, Result};
use crate::params;

/// Step events emitted to connected status streams during maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceStatus {
    Started,
    StoppingWorkers,
    ResettingDb,
    ReplacingFiles,
    RecreateDb,
    RestartingScan,
    Done,
    Failed,
}

#[derive(Debug)]
pub struct MaintenanceGuard {
    active: AtomicBool,
    changed: Notify,
    status_tx: broadcast::Sender<MaintenanceStatus>,
}

impl Default for MaintenanceGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl MaintenanceGuard {
    pub fn new() -> Self {
        let (status_tx, _) = broadcast::channel(32);
        MaintenanceGuard {
            active: AtomicBool::new(false),
            changed: Notify::new(),
            status_tx,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Error early when a handler enters during maintenance.
    pub fn ensure_inactive(&self) -> Result<()> {
        if self.is_active() {
            Err(AssetError::Maintenance)
        } else {
            Ok(())
        }
    }

    /// Raise the flag; fails with `CONFLICT` if maintenance is already
    /// running. The returned session lowers the flag on drop.
    pub fn begin(self: &Arc<Self>) -> Result<MaintenanceSession> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AssetError::Conflict(
                "maintenance already in progress".to_string(),
            ));
        }
        let _ = self.status_tx.send(MaintenanceStatus::Started);
        Ok(MaintenanceSession {
            guard: Arc::clone(self),
            finished: false,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MaintenanceStatus> {
        self.status_tx.subscribe()
    }

    /// Wait until the flag is lowered, up to `timeout`. Returns false on
    /// timeout.
    pub async fn wait_inactive(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.is_active() {
            let remaining = deadline - tokio::time::Instant::now();
            if remaining.is_zero() {
                return false;
            }
            let _ = tokio::time::timeout(remaining, self.changed.notified()).await;
        }
        true
    }

    fn lower(&self) {
        self.active.store(false, Ordering::Release);
        self.changed.notify_waiters();
    }
}

/// RAII scope for one maintenance operation.
#[derive(Debug)]
pub struct MaintenanceSession {
    guard: Arc<MaintenanceGuard>,
    finished: bool,
}

impl MaintenanceSession {
    pub fn emit(&self, status: MaintenanceStatus) {
        let _ = self.guard.status_tx.send(status);
    }

    pub fn finish(mut self, ok: bool) {
        self.emit(if ok {
            MaintenanceStatus::Done
        } else {
            MaintenanceStatus::Failed
        });
        self.finished = true;
        self.guard.lower();
    }
}

impl Drop for MaintenanceSession {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.guard.status_tx.send(MaintenanceStatus::Failed);
            self.guard.lower();
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub name: String,
    pub size_bytes: u64,
    pub created_at: i64,
}

fn archive_dir(index_dir: &Path) -> PathBuf {
    index_dir.join("archive")
}

fn backup_name(now: chrono::DateTime<Utc>) -> String {
    format!("assets_{}.sqlite", now.format("%Y%m%dT%H%M%SZ"))
}

/// Write a consistent copy of the store into the archive directory.
pub async fn backup_save(db: &Arc<Database>, index_dir: &Path) -> Result<BackupInfo> {
    let archive = archive_dir(index_dir);
    tokio::fs::create_dir_all(&archive).await?;
    // Fold the WAL in first so the single-file copy is complete.
    db.checkpoint().await?;
    let name = backup_name(Utc::now());
    let target = archive.join(&name);
    tokio::fs::copy(db.path(), &target).await?;
    let size_bytes = tokio::fs::metadata(&target).await?.len();
    info!(backup = %target.display(), "index backup written");
    Ok(BackupInfo {
        name,
        size_bytes,
        created_at: Utc::now().timestamp(),
    })
}

/// List archived backups, newest first.
pub async fn list_backups(index_dir: &Path) -> Result<Vec<BackupInfo>> {
    let archive = archive_dir(index_dir);
    let mut out = Vec::new();
    let mut entries = match tokio::fs::read_dir(&archive).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(out)
        }
        Err(err) => return Err(err.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with("assets_") || !name.ends_with(".sqlite") {
            continue;
        }
        let meta = entry.metadata().await?;
        let created_at = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        out.push(BackupInfo {
            name,
            size_bytes: meta.len(),
            created_at,
        });
    }
    out.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(out)
}

/// Validate a backup name against the archive layout; rejects traversal.
pub fn resolve_backup_path(index_dir: &Path, name: &str) -> Result<PathBuf> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed.contains(['/', '\\'])
        || trimmed.contains("..")
        || !trimmed.starts_with("assets_")
        || !trimmed.ends_with(".sqlite")
    {
        return Err(AssetError::invalid("Invalid backup name"));
    }
    let path = archive_dir(index_dir).join(trimmed);
    if !path.is_file() {
        return Err(AssetError::NotFound(format!("backup not found: {trimmed}")));
    }
    Ok(path)
}

/// Replace the live store with a backup. The caller raises the maintenance
/// flag and stops workers first; this function only performs the storage
/// steps and emits progress on `session`.
pub async fn restore_from_backup(
    session: &MaintenanceSession,
    db: &Arc<Database>,
    backup_path: &Path,
) -> Result<()> {
    session.emit(MaintenanceStatus::ResettingDb);
    db.reset().await?;
    session.emit(MaintenanceStatus::ReplacingFiles);
    db.replace_with(backup_path).await?;
    session.emit(MaintenanceStatus::RecreateDb);
    if !db.integrity_ok().await {
        return Err(AssetError::internal("restored database failed integrity check"));
    }
    Ok(())
}

/// Force-delete the store files. Tries a clean reset first; on failure,
/// retries per-file deletion with a short backoff. Any surviving file
/// makes the whole operation `failed`.
pub async fn force_delete(
    session: &MaintenanceSession,
    db: &Arc<Database>,
) -> Result<()> {
    session.emit(MaintenanceStatus::ResettingDb);
    if db.reset().await.is_ok() {
        return Ok(());
    }

    session.emit(MaintenanceStatus::ReplacingFiles);
    db.close().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut failed = Vec::new();
    for file in db.storage_files() {
        let mut removed = false;
        for attempt in 0..6 {
            match tokio::fs::remove_file(&file).await {
                Ok(()) => {
                    removed = true;
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    removed = true;
                    break;
                }
                Err(err) => {
                    warn!(
                        file = %file.display(),
                        attempt,
                        "force-delete retry: {err}"
                    );
                    tokio::time::sleep(Duration::from_millis(100 * (attempt + 1)))
                        .await;
                }
            }
        }
        if !removed {
            failed.push(file);
        }
    }

    session.emit(MaintenanceStatus::RecreateDb);
    db.reset().await?;

    if failed.is_empty() {
        Ok(())
    } else {
        Err(AssetError::DeleteFailed(format!(
            "{} storage file(s) could not be deleted",
            failed.len()
        )))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CaseCleanupStats {
    pub groups: u64,
    pub removed: u64,
}

/// One-pass cleanup of historical case-duplicate rows, keeping the row
/// with the most recent mtime in each case-folded group.
pub async fn cleanup_case_duplicates(db: &Arc<Database>) -> Result<CaseCleanupStats> {
    let groups_row = db
        .query_one(
            "SELECT COUNT(*) AS n FROM (\
             SELECT lower(filepath) FROM assets \
             GROUP BY lower(filepath) HAVING COUNT(*) > 1)",
            &[],
        )
        .await?;
    let groups: i64 = groups_row
        .and_then(|row| row.try_get::<i64, _>("n").ok())
        .unwrap_or(0);
    if groups == 0 {
        return Ok(CaseCleanupStats::default());
    }

    let removed = db
        .execute(
            "DELETE FROM assets WHERE id IN (\
             SELECT id FROM (\
               SELECT id, ROW_NUMBER() OVER (\
                 PARTITION BY lower(filepath) \
                 ORDER BY mtime DESC, id DESC) AS rn \
               FROM assets \
               WHERE lower(filepath) IN (\
                 SELECT lower(filepath) FROM assets \
                 GROUP BY lower(filepath) HAVING COUNT(*) > 1)) \
             WHERE rn > 1)",
            &[],
        )
        .await?;

    // Journal rows for removed assets are orphaned; sweep them in the same
    // pass so the journal invariant holds.
    db.execute(
        "DELETE FROM scan_journal WHERE filepath NOT IN \
         (SELECT filepath FROM assets)",
        &params![],
    )
    .await?;

    Ok(CaseCleanupStats {
        groups: groups as u64,
        removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use majoor_config::DbConfig;

    async fn open_db(dir: &Path) -> Arc<Database> {
        Arc::new(
            Database::open(dir.join("assets.sqlite"), DbConfig::default())
                .await
                .expect("open"),
        )
    }

    async fn insert_asset(db: &Arc<Database>, filepath: &str, mtime: i64) {
        db.execute(
            "INSERT INTO assets (filepath, filename, subfolder, source, kind, ext, size_bytes, mtime) \
             VALUES (?, ?, '', 'output', 'image', 'png', 1, ?)",
            &params![filepath, filepath.rsplit('/').next().unwrap_or(filepath), mtime],
        )
        .await
        .expect("insert");
    }

    #[tokio::test]
    async fn guard_fences_and_releases() {
        let guard = Arc::new(MaintenanceGuard::new());
        assert!(guard.ensure_inactive().is_ok());

        let session = guard.begin().expect("begin");
        assert!(guard.is_active());
        assert!(matches!(guard.ensure_inactive(), Err(AssetError::Maintenance)));
        // Second begin conflicts while the first is running.
        assert!(matches!(guard.begin(), Err(AssetError::Conflict(_))));

        session.finish(true);
        assert!(!guard.is_active());
        assert!(guard.wait_inactive(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn session_drop_lowers_flag_as_failed() {
        let guard = Arc::new(MaintenanceGuard::new());
        let mut rx = guard.subscribe();
        {
            let _session = guard.begin().expect("begin");
        }
        assert!(!guard.is_active());
        assert_eq!(rx.recv().await.unwrap(), MaintenanceStatus::Started);
        assert_eq!(rx.recv().await.unwrap(), MaintenanceStatus::Failed);
    }

    #[tokio::test]
    async fn backup_and_restore_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(dir.path()).await;
        insert_asset(&db, "/out/a.png", 100).await;

        let backup = backup_save(&db, dir.path()).await.expect("backup");
        let listed = list_backups(dir.path()).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, backup.name);

        // Mutate, then restore to the snapshot.
        insert_asset(&db, "/out/b.png", 200).await;
        let guard = Arc::new(MaintenanceGuard::new());
        let session = guard.begin().expect("begin");
        let path = resolve_backup_path(dir.path(), &backup.name).expect("resolve");
        restore_from_backup(&session, &db, &path)
            .await
            .expect("restore");
        session.finish(true);

        let rows = db.query("SELECT filepath FROM assets", &[]).await.expect("q");
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn backup_name_validation_rejects_traversal() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(resolve_backup_path(dir.path(), "../evil.sqlite").is_err());
        assert!(resolve_backup_path(dir.path(), "assets_x/../../y.sqlite").is_err());
        assert!(resolve_backup_path(dir.path(), "nope.sqlite").is_err());
    }

    #[tokio::test]
    async fn case_cleanup_keeps_newest_mtime() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = open_db(dir.path()).await;
        insert_asset(&db, "/out/Image.png", 100).await;
        insert_asset(&db, "/out/image.png", 200).await;
        insert_asset(&db, "/out/other.png", 50).await;

        let stats = cleanup_case_duplicates(&db).await.expect("cleanup");
        assert_eq!(stats.groups, 1);
        assert_eq!(stats.removed, 1);

        let rows = db
            .query("SELECT filepath, mtime FROM assets ORDER BY mtime", &[])
            .await
            .expect("q");
        assert_eq!(rows.len(), 2);
        let kept: i64 = rows[1].try_get("mtime").unwrap();
        assert_eq!(kept, 200);
    }
}
