//! Embedded SQLite storage engine.
//!
//! Owns every byte of persistent state. All other components go through the
//! query/execute/transaction interfaces here; nothing else opens the database
//! file. WAL mode, foreign keys on, one writer at a time (SQLite's own
//! single-writer semantics), readers in parallel up to the pool bound.

pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use majoor_config::DbConfig;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Row, SqliteConnection};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::{AssetError, Result};

/// SQLite's default bind-parameter ceiling is 999; stay under it with margin.
pub const MAX_BIND_PARAMS: usize = 900;

/// Dynamically typed bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<usize> for SqlValue {
    fn from(v: usize) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Int(if v { 1 } else { 0 })
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&String> for SqlValue {
    fn from(v: &String) -> Self {
        SqlValue::Text(v.clone())
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => SqlValue::Null,
        }
    }
}

/// Build a `Vec<SqlValue>` from heterogeneous bind arguments.
#[macro_export]
macro_rules! params {
    () => { Vec::<$crate::db::SqlValue>::new() };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::db::SqlValue::from($value)),+]
    };
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    params: &'q [SqlValue],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for value in params {
        query = match value {
            SqlValue::Null => query.bind(None::<i64>),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Blob(v) => query.bind(v.as_slice()),
        };
    }
    query
}

/// Transaction locking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    Deferred,
    Immediate,
    Exclusive,
}

impl TxMode {
    fn begin_sql(&self) -> &'static str {
        match self {
            TxMode::Deferred => "BEGIN DEFERRED",
            TxMode::Immediate => "BEGIN IMMEDIATE",
            TxMode::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// Snapshot of engine health counters.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DbDiagnostics {
    pub locked: bool,
    pub malformed: bool,
    pub recovery_state: String,
    pub active_conns: u32,
    pub auto_reset_attempts: u64,
    pub auto_reset_successes: u64,
    pub auto_reset_failures: u64,
}

#[derive(Debug, Default)]
struct DiagState {
    locked: AtomicBool,
    malformed: AtomicBool,
    recovered: AtomicBool,
    auto_reset_attempts: AtomicU64,
    auto_reset_successes: AtomicU64,
    auto_reset_failures: AtomicU64,
}

/// The storage engine. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct Database {
    pool: RwLock<Option<SqlitePool>>,
    path: PathBuf,
    cfg: DbConfig,
    diag: DiagState,
    last_reset_attempt: Mutex<Option<Instant>>,
}

impl Database {
    /// Open (or create) the index database at `path` and ensure the schema.
    pub async fn open(path: impl AsRef<Path>, cfg: DbConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let pool = Self::build_pool(&path, &cfg).await?;
        Self::apply_schema(&pool).await?;
        info!(path = %path.display(), "asset index opened");
        Ok(Database {
            pool: RwLock::new(Some(pool)),
            path,
            cfg,
            diag: DiagState::default(),
            last_reset_attempt: Mutex::new(None),
        })
    }

    async fn build_pool(path: &Path, cfg: &DbConfig) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs_f64(cfg.busy_timeout_s));
        let pool = SqlitePoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(Duration::from_secs_f64(cfg.acquire_timeout_s))
            .connect_with(options)
            .await?;
        Ok(pool)
    }

    async fn apply_schema(pool: &SqlitePool) -> Result<()> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(pool)
            .await?;
        if version < schema::SCHEMA_VERSION {
            sqlx::raw_sql(schema::SCHEMA_SQL).execute(pool).await?;
            sqlx::raw_sql(&format!(
                "PRAGMA user_version = {}",
                schema::SCHEMA_VERSION
            ))
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record error flags for diagnostics and map into the domain error.
    fn note_error(&self, err: sqlx::Error) -> AssetError {
        let message = err.to_string().to_ascii_lowercase();
        if message.contains("database is locked") || message.contains("busy") {
            self.diag.locked.store(true, Ordering::Relaxed);
        }
        if message.contains("malformed")
            || message.contains("database disk image")
            || message.contains("not a database")
        {
            self.diag.malformed.store(true, Ordering::Relaxed);
            warn!("sqlite corruption detected: {message}");
        }
        AssetError::Db(err)
    }

    /// Auto-reset on detected corruption, rate-limited by the cooldown.
    async fn heal_if_needed(&self) {
        if !self.cfg.auto_reset || !self.diag.malformed.load(Ordering::Relaxed) {
            return;
        }
        let mut last = self.last_reset_attempt.lock().await;
        if let Some(at) = *last {
            if at.elapsed().as_secs_f64() < self.cfg.auto_reset_cooldown_s {
                return;
            }
        }
        *last = Some(Instant::now());
        drop(last);

        self.diag.auto_reset_attempts.fetch_add(1, Ordering::Relaxed);
        match self.reset().await {
            Ok(()) => {
                self.diag
                    .auto_reset_successes
                    .fetch_add(1, Ordering::Relaxed);
                self.diag.malformed.store(false, Ordering::Relaxed);
                self.diag.locked.store(false, Ordering::Relaxed);
                self.diag.recovered.store(true, Ordering::Relaxed);
                warn!("sqlite index auto-reset after corruption");
            }
            Err(err) => {
                self.diag
                    .auto_reset_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!("sqlite auto-reset failed: {err}");
            }
        }
    }

    async fn pool_handle(&self) -> Result<SqlitePool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| AssetError::Unavailable("storage engine closed".into()))
    }

    fn query_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.cfg.query_timeout_s)
    }

    /// Read-only query; never mutates state.
    pub async fn query(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<SqliteRow>> {
        self.heal_if_needed().await;
        let pool = self.pool_handle().await?;
        let fut = bind_params(sqlx::query(sql), params).fetch_all(&pool);
        match timeout(self.query_timeout(), fut).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(err)) => Err(self.note_error(err)),
            Err(_) => Err(AssetError::Timeout(format!(
                "query exceeded {:.0}s",
                self.cfg.query_timeout_s
            ))),
        }
    }

    pub async fn query_one(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<SqliteRow>> {
        self.heal_if_needed().await;
        let pool = self.pool_handle().await?;
        let fut = bind_params(sqlx::query(sql), params).fetch_optional(&pool);
        match timeout(self.query_timeout(), fut).await {
            Ok(Ok(row)) => Ok(row),
            Ok(Err(err)) => Err(self.note_error(err)),
            Err(_) => Err(AssetError::Timeout(format!(
                "query exceeded {:.0}s",
                self.cfg.query_timeout_s
            ))),
        }
    }

    /// Single-statement write; returns affected row count.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.heal_if_needed().await;
        let pool = self.pool_handle().await?;
        let fut = bind_params(sqlx::query(sql), params).execute(&pool);
        match timeout(self.query_timeout(), fut).await {
            Ok(Ok(done)) => Ok(done.rows_affected()),
            Ok(Err(err)) => Err(self.note_error(err)),
            Err(_) => Err(AssetError::Timeout(format!(
                "execute exceeded {:.0}s",
                self.cfg.query_timeout_s
            ))),
        }
    }

    /// Multi-statement script, for schema creation and migrations.
    pub async fn execute_script(&self, sql: &str) -> Result<()> {
        self.heal_if_needed().await;
        let pool = self.pool_handle().await?;
        sqlx::raw_sql(sql)
            .execute(&pool)
            .await
            .map_err(|err| self.note_error(err))?;
        Ok(())
    }

    /// Chunked `IN (...)` expansion. `sql` must contain a single `{IN}`
    /// placeholder which is replaced with the right number of binds per
    /// chunk; `prefix_params` bind before the chunk values.
    pub async fn query_in(
        &self,
        sql: &str,
        prefix_params: &[SqlValue],
        values: &[SqlValue],
    ) -> Result<Vec<SqliteRow>> {
        let mut rows = Vec::new();
        let chunk_size = MAX_BIND_PARAMS.saturating_sub(prefix_params.len()).max(1);
        for chunk in values.chunks(chunk_size) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let chunk_sql = sql.replace("{IN}", &placeholders);
            let mut params = prefix_params.to_vec();
            params.extend_from_slice(chunk);
            rows.extend(self.query(&chunk_sql, &params).await?);
        }
        Ok(rows)
    }

    /// Chunked `IN (...)` variant of [`execute`](Self::execute).
    pub async fn execute_in(
        &self,
        sql: &str,
        prefix_params: &[SqlValue],
        values: &[SqlValue],
    ) -> Result<u64> {
        let mut affected = 0;
        let chunk_size = MAX_BIND_PARAMS.saturating_sub(prefix_params.len()).max(1);
        for chunk in values.chunks(chunk_size) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let chunk_sql = sql.replace("{IN}", &placeholders);
            let mut params = prefix_params.to_vec();
            params.extend_from_slice(chunk);
            affected += self.execute(&chunk_sql, &params).await?;
        }
        Ok(affected)
    }

    /// Run `op` inside a transaction of the requested mode. Commits when the
    /// closure returns `Ok`, rolls back otherwise. The connection is held for
    /// the whole scope, so keep the work bounded.
    pub async fn transaction<T, F>(&self, mode: TxMode, op: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>>
            + Send,
    {
        self.heal_if_needed().await;
        let pool = self.pool_handle().await?;
        let mut conn = pool.acquire().await.map_err(|err| self.note_error(err))?;
        sqlx::query(mode.begin_sql())
            .execute(&mut *conn)
            .await
            .map_err(|err| self.note_error(err))?;
        let hard_ceiling = Duration::from_secs_f64(self.cfg.hard_timeout_s);
        match timeout(hard_ceiling, op(&mut *conn)).await {
            Ok(Ok(value)) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|err| self.note_error(err))?;
                Ok(value)
            }
            Ok(Err(err)) => {
                if let Err(rollback_err) =
                    sqlx::query("ROLLBACK").execute(&mut *conn).await
                {
                    warn!("rollback failed: {rollback_err}");
                }
                if let AssetError::Db(inner) = err {
                    Err(self.note_error(inner))
                } else {
                    Err(err)
                }
            }
            Err(_) => {
                if let Err(rollback_err) =
                    sqlx::query("ROLLBACK").execute(&mut *conn).await
                {
                    warn!("rollback failed: {rollback_err}");
                }
                Err(AssetError::Timeout(format!(
                    "transaction exceeded {:.0}s",
                    self.cfg.hard_timeout_s
                )))
            }
        }
    }

    /// Drain connections, delete the store files, reinitialize an empty
    /// schema. Waits for in-flight work to complete before touching disk.
    pub async fn reset(&self) -> Result<()> {
        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.take() {
            pool.close().await;
        }
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut file = self.path.as_os_str().to_owned();
            file.push(suffix);
            let file = PathBuf::from(file);
            match tokio::fs::remove_file(&file).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(file = %file.display(), "failed to remove store file: {err}");
                }
            }
        }
        let pool = Self::build_pool(&self.path, &self.cfg).await?;
        Self::apply_schema(&pool).await?;
        *guard = Some(pool);
        self.diag.malformed.store(false, Ordering::Relaxed);
        self.diag.locked.store(false, Ordering::Relaxed);
        info!("asset index reset");
        Ok(())
    }

    /// Reclaim space and refresh query-planner statistics.
    pub async fn optimize(&self) -> Result<()> {
        self.execute_script("VACUUM; ANALYZE;").await
    }

    /// Flush the WAL into the main database file.
    pub async fn checkpoint(&self) -> Result<()> {
        self.execute_script("PRAGMA wal_checkpoint(TRUNCATE);").await
    }

    /// Swap the store contents for the file at `source`: drain connections,
    /// replace the main file, drop WAL/SHM leftovers, reinitialize.
    pub async fn replace_with(&self, source: &Path) -> Result<()> {
        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.take() {
            pool.close().await;
        }
        for suffix in ["-wal", "-shm", "-journal"] {
            let mut file = self.path.as_os_str().to_owned();
            file.push(suffix);
            let _ = tokio::fs::remove_file(PathBuf::from(file)).await;
        }
        tokio::fs::copy(source, &self.path).await?;
        let pool = Self::build_pool(&self.path, &self.cfg).await?;
        Self::apply_schema(&pool).await?;
        *guard = Some(pool);
        info!(source = %source.display(), "asset index restored from backup");
        Ok(())
    }

    /// `PRAGMA quick_check` without raising; false means corruption.
    pub async fn integrity_ok(&self) -> bool {
        match self.query("PRAGMA quick_check(1)", &[]).await {
            Ok(rows) => rows
                .first()
                .and_then(|row| row.try_get::<String, _>(0).ok())
                .map(|v| v.eq_ignore_ascii_case("ok"))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn diagnostics(&self) -> DbDiagnostics {
        let active_conns = self
            .pool
            .read()
            .await
            .as_ref()
            .map(|pool| pool.size())
            .unwrap_or(0);
        let recovery_state = if self.diag.malformed.load(Ordering::Relaxed) {
            "corruption_detected"
        } else if self.diag.recovered.load(Ordering::Relaxed) {
            "recovered"
        } else {
            "ok"
        };
        DbDiagnostics {
            locked: self.diag.locked.load(Ordering::Relaxed),
            malformed: self.diag.malformed.load(Ordering::Relaxed),
            recovery_state: recovery_state.to_string(),
            active_conns,
            auto_reset_attempts: self.diag.auto_reset_attempts.load(Ordering::Relaxed),
            auto_reset_successes: self
                .diag
                .auto_reset_successes
                .load(Ordering::Relaxed),
            auto_reset_failures: self.diag.auto_reset_failures.load(Ordering::Relaxed),
        }
    }

    /// Idempotent teardown.
    pub async fn close(&self) {
        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.take() {
            pool.close().await;
        }
    }

    /// Storage files that belong to this database, existing or not.
    pub fn storage_files(&self) -> Vec<PathBuf> {
        ["", "-wal", "-shm", "-journal"]
            .iter()
            .map(|suffix| {
                let mut file = self.path.as_os_str().to_owned();
                file.push(suffix);
                PathBuf::from(file)
            })
            .collect()
    }
}

/// Run a parameterized statement on a transaction connection.
pub async fn exec_conn(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &[SqlValue],
) -> Result<u64> {
    let done = bind_params(sqlx::query(sql), params)
        .execute(&mut *conn)
        .await?;
    Ok(done.rows_affected())
}

/// Run a parameterized query on a transaction connection.
pub async fn fetch_all_conn(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &[SqlValue],
) -> Result<Vec<SqliteRow>> {
    let rows = bind_params(sqlx::query(sql), params)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

/// Chunked `IN (...)` query on a transaction connection.
pub async fn fetch_in_conn(
    conn: &mut SqliteConnection,
    sql: &str,
    prefix_params: &[SqlValue],
    values: &[SqlValue],
) -> Result<Vec<SqliteRow>> {
    let mut rows = Vec::new();
    let chunk_size = MAX_BIND_PARAMS.saturating_sub(prefix_params.len()).max(1);
    for chunk in values.chunks(chunk_size) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let chunk_sql = sql.replace("{IN}", &placeholders);
        let mut params = prefix_params.to_vec();
        params.extend_from_slice(chunk);
        rows.extend(fetch_all_conn(conn, &chunk_sql, &params).await?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::open(dir.path().join("assets.sqlite"), DbConfig::default())
            .await
            .expect("open db");
        (dir, db)
    }

    #[tokio::test]
    async fn schema_round_trip() {
        let (_dir, db) = open_temp().await;
        let affected = db
            .execute(
                "INSERT INTO assets (filepath, filename, subfolder, source, kind, ext, size_bytes, mtime) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                &params!["/out/a.png", "a.png", "", "output", "image", "png", 10, 100],
            )
            .await
            .expect("insert");
        assert_eq!(affected, 1);

        let rows = db
            .query("SELECT id, filename FROM assets WHERE filepath = ?", &params!["/out/a.png"])
            .await
            .expect("select");
        assert_eq!(rows.len(), 1);
        let name: String = rows[0].try_get("filename").expect("filename");
        assert_eq!(name, "a.png");
    }

    #[tokio::test]
    async fn fts_triggers_track_assets() {
        let (_dir, db) = open_temp().await;
        db.execute(
            "INSERT INTO assets (filepath, filename, subfolder, source, kind, ext, size_bytes, mtime) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            &params!["/out/sunset.png", "sunset.png", "renders", "output", "image", "png", 10, 100],
        )
        .await
        .expect("insert");

        let rows = db
            .query(
                "SELECT rowid FROM assets_fts WHERE assets_fts MATCH ?",
                &params!["sunset*"],
            )
            .await
            .expect("match");
        assert_eq!(rows.len(), 1);

        db.execute("DELETE FROM assets WHERE filepath = ?", &params!["/out/sunset.png"])
            .await
            .expect("delete");
        let rows = db
            .query(
                "SELECT rowid FROM assets_fts WHERE assets_fts MATCH ?",
                &params!["sunset*"],
            )
            .await
            .expect("match after delete");
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_error() {
        let (_dir, db) = open_temp().await;
        let result: Result<()> = db
            .transaction(TxMode::Immediate, |conn| {
                Box::pin(async move {
                    exec_conn(
                        conn,
                        "INSERT INTO assets (filepath, filename, subfolder, source, kind, ext, size_bytes, mtime) \
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                        &params!["/out/x.png", "x.png", "", "output", "image", "png", 1, 1],
                    )
                    .await?;
                    Err(AssetError::internal("boom"))
                })
            })
            .await;
        assert!(result.is_err());

        let rows = db
            .query("SELECT id FROM assets WHERE filepath = ?", &params!["/out/x.png"])
            .await
            .expect("select");
        assert!(rows.is_empty(), "insert should have rolled back");
    }

    #[tokio::test]
    async fn query_in_chunks_past_param_limit() {
        let (_dir, db) = open_temp().await;
        for i in 0..5 {
            db.execute(
                "INSERT INTO assets (filepath, filename, subfolder, source, kind, ext, size_bytes, mtime) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                &params![format!("/out/{i}.png"), format!("{i}.png"), "", "output", "image", "png", 1, i],
            )
            .await
            .expect("insert");
        }
        // More lookup values than the bind ceiling forces chunking.
        let values: Vec<SqlValue> = (0..2000)
            .map(|i| SqlValue::Text(format!("/out/{i}.png")))
            .collect();
        let rows = db
            .query_in(
                "SELECT filepath FROM assets WHERE filepath IN ({IN})",
                &[],
                &values,
            )
            .await
            .expect("query_in");
        assert_eq!(rows.len(), 5);
    }

    #[tokio::test]
    async fn reset_clears_rows_and_keeps_schema() {
        let (_dir, db) = open_temp().await;
        db.execute(
            "INSERT INTO assets (filepath, filename, subfolder, source, kind, ext, size_bytes, mtime) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            &params!["/out/a.png", "a.png", "", "output", "image", "png", 1, 1],
        )
        .await
        .expect("insert");

        db.reset().await.expect("reset");

        let rows = db
            .query("SELECT id FROM assets", &[])
            .await
            .expect("select after reset");
        assert!(rows.is_empty());
        assert!(db.integrity_ok().await);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_dir, db) = open_temp().await;
        db.close().await;
        db.close().await;
        assert!(db.query("SELECT 1", &[]).await.is_err());
    }
}
