//! Tuning configuration for the Majoor assets backend.
//!
//! All knobs are environment-driven (the deployment surface is a plugin-style
//! sidecar process, not a config-file daemon). Defaults are safe for typical
//! output directories of a few thousand files; raise the batch/queue limits
//! only if you understand the transaction-lock tradeoffs.

pub mod env;

use serde::{Deserialize, Serialize};

use crate::env::{env_bool, env_float, env_int, env_raw, env_string};

/// Database tuning: pool size and per-call timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Bounded connection pool size. One writer at a time regardless.
    pub max_connections: u32,
    /// Seconds to wait for a connection before giving up.
    pub acquire_timeout_s: f64,
    /// Soft per-query budget in seconds.
    pub query_timeout_s: f64,
    /// Hard ceiling for any single storage call.
    pub hard_timeout_s: f64,
    /// SQLite busy timeout in seconds.
    pub busy_timeout_s: f64,
    /// Attempt an automatic reset when corruption is detected.
    pub auto_reset: bool,
    /// Minimum seconds between automatic reset attempts.
    pub auto_reset_cooldown_s: f64,
    /// Upper bound on the raw metadata JSON blob per asset.
    pub max_metadata_json_bytes: i64,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            max_connections: 8,
            acquire_timeout_s: 30.0,
            query_timeout_s: 60.0,
            hard_timeout_s: 300.0,
            busy_timeout_s: 30.0,
            auto_reset: true,
            auto_reset_cooldown_s: 60.0,
            max_metadata_json_bytes: 2 * 1024 * 1024,
        }
    }
}

impl DbConfig {
    pub fn from_env() -> Self {
        let defaults = DbConfig::default();
        DbConfig {
            max_connections: env_int(
                defaults.max_connections as i64,
                &["MJR_AM_DB_MAX_CONNECTIONS", "MAJOOR_DB_MAX_CONNECTIONS"],
                Some(1),
                Some(64),
            ) as u32,
            acquire_timeout_s: env_float(
                defaults.acquire_timeout_s,
                &["MJR_AM_DB_TIMEOUT", "MAJOOR_DB_TIMEOUT"],
                Some(1.0),
                Some(300.0),
            ),
            query_timeout_s: env_float(
                defaults.query_timeout_s,
                &["MJR_AM_DB_QUERY_TIMEOUT", "MAJOOR_DB_QUERY_TIMEOUT"],
                Some(1.0),
                Some(600.0),
            ),
            hard_timeout_s: defaults.hard_timeout_s,
            busy_timeout_s: env_float(
                defaults.busy_timeout_s,
                &["MJR_AM_DB_BUSY_TIMEOUT", "MAJOOR_DB_BUSY_TIMEOUT"],
                Some(1.0),
                Some(300.0),
            ),
            auto_reset: env_bool(
                defaults.auto_reset,
                &["MAJOOR_DB_AUTO_RESET", "MJR_AM_DB_AUTO_RESET"],
            ),
            auto_reset_cooldown_s: defaults.auto_reset_cooldown_s,
            max_metadata_json_bytes: env_int(
                defaults.max_metadata_json_bytes,
                &[
                    "MJR_AM_MAX_METADATA_JSON_BYTES",
                    "MAJOOR_MAX_METADATA_JSON_BYTES",
                ],
                Some(64 * 1024),
                Some(32 * 1024 * 1024),
            ),
        }
    }
}

/// Scanner batching ladder. The thresholds pick a batch size from the file
/// count of the directory being scanned; larger batches mean fewer
/// transactions but longer write-lock windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub batch_small_threshold: usize,
    pub batch_med_threshold: usize,
    pub batch_large_threshold: usize,
    pub batch_small: usize,
    pub batch_med: usize,
    pub batch_large: usize,
    pub batch_xl: usize,
    /// How many walked files to buffer before committing a streaming batch.
    pub stream_initial: usize,
    pub stream_min: usize,
    /// Cap on enrichment work queued from a single scan.
    pub max_enrich_items: usize,
    /// Grace window during which background scans of a just-indexed
    /// directory are suppressed.
    pub bg_scan_grace_s: f64,
    /// Minimum interval between opportunistic background scans of the same
    /// directory.
    pub bg_scan_min_interval_s: f64,
    /// Bound on the background-scan task queue.
    pub pending_max: usize,
    /// Per-call budget for resolve-or-create indexing of a single file.
    pub resolve_timeout_s: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            batch_small_threshold: 100,
            batch_med_threshold: 1000,
            batch_large_threshold: 10_000,
            batch_small: 100,
            batch_med: 150,
            batch_large: 250,
            batch_xl: 400,
            stream_initial: 1000,
            stream_min: 100,
            max_enrich_items: 10_000,
            bg_scan_grace_s: 30.0,
            bg_scan_min_interval_s: 30.0,
            pending_max: 64,
            resolve_timeout_s: 30.0,
        }
    }
}

impl ScanConfig {
    pub fn from_env() -> Self {
        let d = ScanConfig::default();
        ScanConfig {
            batch_small_threshold: env_int(
                d.batch_small_threshold as i64,
                &[
                    "MJR_AM_SCAN_BATCH_SMALL_THRESHOLD",
                    "MAJOOR_SCAN_BATCH_SMALL_THRESHOLD",
                ],
                Some(1),
                Some(1_000_000),
            ) as usize,
            batch_med_threshold: env_int(
                d.batch_med_threshold as i64,
                &[
                    "MJR_AM_SCAN_BATCH_MED_THRESHOLD",
                    "MAJOOR_SCAN_BATCH_MED_THRESHOLD",
                ],
                Some(1),
                Some(1_000_000),
            ) as usize,
            batch_large_threshold: env_int(
                d.batch_large_threshold as i64,
                &[
                    "MJR_AM_SCAN_BATCH_LARGE_THRESHOLD",
                    "MAJOOR_SCAN_BATCH_LARGE_THRESHOLD",
                ],
                Some(1),
                Some(1_000_000),
            ) as usize,
            batch_small: env_int(
                d.batch_small as i64,
                &["MJR_AM_SCAN_BATCH_SMALL", "MAJOOR_SCAN_BATCH_SMALL"],
                Some(1),
                Some(10_000),
            ) as usize,
            batch_med: env_int(
                d.batch_med as i64,
                &["MJR_AM_SCAN_BATCH_MED", "MAJOOR_SCAN_BATCH_MED"],
                Some(1),
                Some(10_000),
            ) as usize,
            batch_large: env_int(
                d.batch_large as i64,
                &["MJR_AM_SCAN_BATCH_LARGE", "MAJOOR_SCAN_BATCH_LARGE"],
                Some(1),
                Some(10_000),
            ) as usize,
            batch_xl: env_int(
                d.batch_xl as i64,
                &["MJR_AM_SCAN_BATCH_XL", "MAJOOR_SCAN_BATCH_XL"],
                Some(1),
                Some(20_000),
            ) as usize,
            stream_initial: env_int(
                d.stream_initial as i64,
                &["MJR_AM_SCAN_BATCH_INITIAL", "MAJOOR_SCAN_BATCH_INITIAL"],
                Some(1),
                Some(100_000),
            ) as usize,
            stream_min: env_int(
                d.stream_min as i64,
                &["MJR_AM_SCAN_BATCH_MIN", "MAJOOR_SCAN_BATCH_MIN"],
                Some(1),
                Some(10_000),
            ) as usize,
            max_enrich_items: env_int(
                d.max_enrich_items as i64,
                &["MJR_AM_MAX_TO_ENRICH_ITEMS", "MAJOOR_MAX_TO_ENRICH_ITEMS"],
                Some(1),
                Some(1_000_000),
            ) as usize,
            bg_scan_grace_s: env_float(
                d.bg_scan_grace_s,
                &[
                    "MJR_AM_MANUAL_BG_SCAN_GRACE_SECONDS",
                    "MAJOOR_MANUAL_BG_SCAN_GRACE_SECONDS",
                ],
                Some(0.0),
                Some(3600.0),
            ),
            bg_scan_min_interval_s: env_float(
                d.bg_scan_min_interval_s,
                &[
                    "MJR_AM_BG_SCAN_MIN_INTERVAL_SECONDS",
                    "MAJOOR_BG_SCAN_MIN_INTERVAL_SECONDS",
                ],
                Some(0.0),
                Some(3600.0),
            ),
            pending_max: env_int(
                d.pending_max as i64,
                &["MJR_AM_SCAN_PENDING_MAX", "MAJOOR_SCAN_PENDING_MAX"],
                Some(1),
                Some(10_000),
            ) as usize,
            resolve_timeout_s: env_float(
                d.resolve_timeout_s,
                &["MJR_AM_TO_THREAD_TIMEOUT", "MAJOOR_TO_THREAD_TIMEOUT"],
                Some(1.0),
                Some(300.0),
            ),
        }
    }

    /// Pick the per-transaction batch size for a directory of `file_count`
    /// classified files.
    pub fn batch_size_for(&self, file_count: usize) -> usize {
        if file_count <= self.batch_small_threshold {
            self.batch_small
        } else if file_count <= self.batch_med_threshold {
            self.batch_med
        } else if file_count <= self.batch_large_threshold {
            self.batch_large
        } else {
            self.batch_xl
        }
    }
}

/// Filesystem watcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    pub enabled: bool,
    /// Quiet window before pending events flush.
    pub debounce_ms: u64,
    /// Identical events inside this window collapse to one.
    pub dedupe_ttl_ms: u64,
    /// Files smaller than this are ignored (partial writes, lockfiles).
    pub min_file_size_bytes: u64,
    /// Files larger than this are ignored.
    pub max_file_size_bytes: u64,
    /// Cap on files handed to the indexer per flush.
    pub flush_max_files: usize,
    /// Concurrent flushes in flight.
    pub max_flush_concurrency: usize,
    /// Pending-set size that forces an immediate flush; beyond it new events
    /// defer to the overflow map.
    pub pending_max: usize,
    /// Event-rate alerting: more than `stream_alert_threshold` events inside
    /// `stream_alert_window_s` emits an operator alert, at most once per
    /// `stream_alert_cooldown_s`.
    pub stream_alert_threshold: usize,
    pub stream_alert_window_s: f64,
    pub stream_alert_cooldown_s: f64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        WatcherConfig {
            enabled: true,
            debounce_ms: 3000,
            dedupe_ttl_ms: 3000,
            min_file_size_bytes: 100,
            max_file_size_bytes: 512 * 1024 * 1024,
            flush_max_files: 256,
            max_flush_concurrency: 2,
            pending_max: 500,
            stream_alert_threshold: 512,
            stream_alert_window_s: 60.0,
            stream_alert_cooldown_s: 300.0,
        }
    }
}

impl WatcherConfig {
    pub fn from_env() -> Self {
        let d = WatcherConfig::default();
        WatcherConfig {
            enabled: env_bool(
                d.enabled,
                &["MJR_AM_ENABLE_WATCHER", "MJR_ENABLE_WATCHER"],
            ),
            debounce_ms: env_int(
                d.debounce_ms as i64,
                &["MJR_AM_WATCHER_DEBOUNCE_MS", "MJR_WATCHER_DEBOUNCE_MS"],
                Some(0),
                Some(120_000),
            ) as u64,
            dedupe_ttl_ms: env_int(
                d.dedupe_ttl_ms as i64,
                &["MJR_AM_WATCHER_DEDUPE_TTL_MS", "MJR_WATCHER_DEDUPE_TTL_MS"],
                Some(0),
                Some(120_000),
            ) as u64,
            min_file_size_bytes: env_int(
                d.min_file_size_bytes as i64,
                &[
                    "MJR_AM_WATCHER_MIN_FILE_SIZE_BYTES",
                    "MJR_WATCHER_MIN_FILE_SIZE_BYTES",
                    "MAJOOR_WATCHER_MIN_FILE_SIZE",
                ],
                Some(0),
                Some(10_000_000),
            ) as u64,
            max_file_size_bytes: env_int(
                d.max_file_size_bytes as i64,
                &[
                    "MJR_AM_WATCHER_MAX_FILE_SIZE_BYTES",
                    "MJR_WATCHER_MAX_FILE_SIZE_BYTES",
                    "MAJOOR_WATCHER_MAX_FILE_SIZE",
                ],
                Some(1024),
                Some(32 * 1024 * 1024 * 1024),
            ) as u64,
            flush_max_files: env_int(
                d.flush_max_files as i64,
                &[
                    "MJR_AM_WATCHER_FLUSH_MAX_FILES",
                    "MJR_WATCHER_FLUSH_MAX_FILES",
                ],
                Some(1),
                Some(5000),
            ) as usize,
            max_flush_concurrency: env_int(
                d.max_flush_concurrency as i64,
                &[
                    "MJR_AM_WATCHER_MAX_FLUSH_CONCURRENCY",
                    "MJR_WATCHER_MAX_FLUSH_CONCURRENCY",
                ],
                Some(1),
                Some(32),
            )
            .max(1) as usize,
            pending_max: env_int(
                d.pending_max as i64,
                &[
                    "MJR_AM_WATCHER_PENDING_MAX",
                    "MJR_WATCHER_PENDING_MAX",
                    "MAJOOR_WATCHER_MAX_PENDING_FILES",
                ],
                Some(10),
                Some(50_000),
            ) as usize,
            stream_alert_threshold: env_int(
                d.stream_alert_threshold as i64,
                &[
                    "MJR_AM_WATCHER_STREAM_ALERT_THRESHOLD",
                    "MJR_WATCHER_STREAM_ALERT_THRESHOLD",
                ],
                Some(1),
                Some(100_000),
            ) as usize,
            stream_alert_window_s: env_float(
                d.stream_alert_window_s,
                &[
                    "MJR_AM_WATCHER_STREAM_ALERT_WINDOW_SECONDS",
                    "MJR_WATCHER_STREAM_ALERT_WINDOW_SECONDS",
                ],
                Some(1.0),
                Some(3600.0),
            ),
            stream_alert_cooldown_s: env_float(
                d.stream_alert_cooldown_s,
                &[
                    "MJR_AM_WATCHER_STREAM_ALERT_COOLDOWN_SECONDS",
                    "MJR_WATCHER_STREAM_ALERT_COOLDOWN_SECONDS",
                ],
                Some(1.0),
                Some(86_400.0),
            ),
        }
    }
}

/// Search/listing limits and the filesystem listing cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub max_limit: usize,
    pub max_offset: usize,
    pub max_query_length: usize,
    pub max_tokens: usize,
    pub max_token_length: usize,
    pub max_batch_ids: usize,
    pub max_filepath_lookup: usize,
    pub fs_cache_max: usize,
    pub fs_cache_ttl_s: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            max_limit: 5000,
            max_offset: 1_000_000,
            max_query_length: 512,
            max_tokens: 16,
            max_token_length: 64,
            max_batch_ids: 200,
            max_filepath_lookup: 5000,
            fs_cache_max: 32,
            fs_cache_ttl_s: 1.5,
        }
    }
}

impl SearchConfig {
    pub fn from_env() -> Self {
        let d = SearchConfig::default();
        SearchConfig {
            max_limit: env_int(
                d.max_limit as i64,
                &["MJR_AM_SEARCH_MAX_LIMIT", "MAJOOR_SEARCH_MAX_LIMIT"],
                Some(1),
                Some(100_000),
            ) as usize,
            max_offset: env_int(
                d.max_offset as i64,
                &["MJR_AM_SEARCH_MAX_OFFSET", "MAJOOR_SEARCH_MAX_OFFSET"],
                Some(0),
                Some(10_000_000),
            ) as usize,
            max_query_length: env_int(
                d.max_query_length as i64,
                &[
                    "MJR_AM_SEARCH_MAX_QUERY_LENGTH",
                    "MJR_SEARCH_MAX_QUERY_LENGTH",
                ],
                Some(16),
                Some(8192),
            ) as usize,
            max_tokens: env_int(
                d.max_tokens as i64,
                &["MJR_AM_SEARCH_MAX_TOKENS", "MJR_SEARCH_MAX_TOKENS"],
                Some(1),
                Some(128),
            ) as usize,
            max_token_length: env_int(
                d.max_token_length as i64,
                &[
                    "MJR_AM_SEARCH_MAX_TOKEN_LENGTH",
                    "MJR_SEARCH_MAX_TOKEN_LENGTH",
                ],
                Some(1),
                Some(512),
            ) as usize,
            max_batch_ids: env_int(
                d.max_batch_ids as i64,
                &["MJR_AM_SEARCH_MAX_BATCH_IDS", "MJR_SEARCH_MAX_BATCH_IDS"],
                Some(1),
                Some(5000),
            ) as usize,
            max_filepath_lookup: env_int(
                d.max_filepath_lookup as i64,
                &[
                    "MJR_AM_SEARCH_MAX_FILEPATH_LOOKUP",
                    "MJR_SEARCH_MAX_FILEPATH_LOOKUP",
                ],
                Some(1),
                Some(100_000),
            ) as usize,
            fs_cache_max: env_int(
                d.fs_cache_max as i64,
                &["MJR_AM_FS_LIST_CACHE_MAX", "MAJOOR_FS_LIST_CACHE_MAX"],
                Some(1),
                Some(10_000),
            ) as usize,
            fs_cache_ttl_s: env_float(
                d.fs_cache_ttl_s,
                &[
                    "MJR_AM_FS_LIST_CACHE_TTL_SECONDS",
                    "MAJOOR_FS_LIST_CACHE_TTL_SECONDS",
                ],
                Some(0.1),
                Some(3600.0),
            ),
        }
    }
}

/// Background enrichment and sidecar sync tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// Worker pool size draining the enrichment queue.
    pub concurrency: usize,
    /// Bound on the enrichment queue; further work defers to the caller.
    pub queue_max: usize,
    /// Bound on the sidecar sync queue; overflow drops the oldest entry
    /// with a warning.
    pub sidecar_queue_max: usize,
    /// How long a UI interaction pauses enrichment workers.
    pub interaction_pause_s: f64,
    /// Metadata cache retention.
    pub cache_max_entries: i64,
    pub cache_ttl_s: f64,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        EnrichConfig {
            concurrency: 1,
            queue_max: 10_000,
            sidecar_queue_max: 1000,
            interaction_pause_s: 1.5,
            cache_max_entries: 100_000,
            cache_ttl_s: 90.0 * 24.0 * 3600.0,
        }
    }
}

impl EnrichConfig {
    pub fn from_env() -> Self {
        let d = EnrichConfig::default();
        EnrichConfig {
            concurrency: env_int(
                d.concurrency as i64,
                &[
                    "MJR_AM_METADATA_EXTRACT_CONCURRENCY",
                    "MAJOOR_METADATA_EXTRACT_CONCURRENCY",
                ],
                Some(1),
                Some(16),
            ) as usize,
            queue_max: env_int(
                d.queue_max as i64,
                &["MJR_AM_ENRICH_QUEUE_MAX", "MAJOOR_ENRICH_QUEUE_MAX"],
                Some(100),
                Some(1_000_000),
            ) as usize,
            sidecar_queue_max: env_int(
                d.sidecar_queue_max as i64,
                &["MJR_AM_SIDECAR_QUEUE_MAX", "MAJOOR_SIDECAR_QUEUE_MAX"],
                Some(10),
                Some(100_000),
            ) as usize,
            interaction_pause_s: d.interaction_pause_s,
            cache_max_entries: env_int(
                d.cache_max_entries,
                &["MJR_AM_METADATA_CACHE_MAX", "MAJOOR_METADATA_CACHE_MAX"],
                Some(1000),
                Some(5_000_000),
            ),
            cache_ttl_s: env_float(
                d.cache_ttl_s,
                &[
                    "MJR_AM_METADATA_CACHE_TTL_SECONDS",
                    "MAJOOR_METADATA_CACHE_TTL_SECONDS",
                ],
                Some(60.0),
                Some(3650.0 * 24.0 * 3600.0),
            ),
        }
    }
}

/// Security policy knobs resolved from the environment. Settings-store
/// preferences override these at request time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub rate_limit_max_clients: usize,
    pub rate_limit_cleanup_interval: u64,
    pub rate_limit_min_window_s: u64,
    pub client_id_hash_hex_chars: usize,
    /// Comma-separated IPs/CIDRs allowed to assert X-Forwarded-For.
    pub trusted_proxies: String,
    pub allow_insecure_trusted_proxies: bool,
    pub max_json_body_bytes: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            rate_limit_max_clients: 1000,
            rate_limit_cleanup_interval: 100,
            rate_limit_min_window_s: 60,
            client_id_hash_hex_chars: 16,
            trusted_proxies: "127.0.0.1,::1".to_string(),
            allow_insecure_trusted_proxies: false,
            max_json_body_bytes: 1024 * 1024,
        }
    }
}

impl SecurityConfig {
    pub fn from_env() -> Self {
        let d = SecurityConfig::default();
        SecurityConfig {
            rate_limit_max_clients: env_int(
                d.rate_limit_max_clients as i64,
                &["MAJOOR_RATE_LIMIT_MAX_CLIENTS"],
                Some(10),
                Some(1_000_000),
            ) as usize,
            rate_limit_cleanup_interval: env_int(
                d.rate_limit_cleanup_interval as i64,
                &["MAJOOR_RATE_LIMIT_CLEANUP_INTERVAL"],
                Some(1),
                Some(100_000),
            ) as u64,
            rate_limit_min_window_s: env_int(
                d.rate_limit_min_window_s as i64,
                &["MAJOOR_RATE_LIMIT_MIN_WINDOW_SECONDS"],
                Some(1),
                Some(86_400),
            ) as u64,
            client_id_hash_hex_chars: env_int(
                d.client_id_hash_hex_chars as i64,
                &["MAJOOR_CLIENT_ID_HASH_CHARS"],
                Some(8),
                Some(64),
            ) as usize,
            trusted_proxies: env_string(
                &d.trusted_proxies,
                &["MAJOOR_TRUSTED_PROXIES"],
            ),
            allow_insecure_trusted_proxies: env_bool(
                d.allow_insecure_trusted_proxies,
                &["MAJOOR_ALLOW_INSECURE_TRUSTED_PROXIES"],
            ),
            max_json_body_bytes: env_int(
                d.max_json_body_bytes as i64,
                &["MJR_MAX_JSON_SIZE"],
                Some(4096),
                Some(64 * 1024 * 1024),
            ) as usize,
        }
    }
}

/// Everything the server needs, resolved once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub db: DbConfig,
    pub scan: ScanConfig,
    pub watcher: WatcherConfig,
    pub search: SearchConfig,
    pub enrich: EnrichConfig,
    pub security: SecurityConfig,
    /// Bind address for the HTTP listener.
    pub bind_host: String,
    pub bind_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            db: DbConfig::default(),
            scan: ScanConfig::default(),
            watcher: WatcherConfig::default(),
            search: SearchConfig::default(),
            enrich: EnrichConfig::default(),
            security: SecurityConfig::default(),
            bind_host: "127.0.0.1".to_string(),
            bind_port: 8710,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let d = AppConfig::default();
        AppConfig {
            db: DbConfig::from_env(),
            scan: ScanConfig::from_env(),
            watcher: WatcherConfig::from_env(),
            search: SearchConfig::from_env(),
            enrich: EnrichConfig::from_env(),
            security: SecurityConfig::from_env(),
            bind_host: env_string(&d.bind_host, &["MAJOOR_BIND_HOST"]),
            bind_port: env_int(
                d.bind_port as i64,
                &["MAJOOR_BIND_PORT"],
                Some(1),
                Some(65_535),
            ) as u16,
        }
    }

    /// Output-root override from the environment, when present.
    pub fn output_root_override() -> Option<String> {
        env_raw(&["MJR_AM_OUTPUT_DIRECTORY", "MAJOOR_OUTPUT_DIRECTORY"])
    }

    /// Input-root override from the environment, when present.
    pub fn input_root_override() -> Option<String> {
        env_raw(&["MJR_AM_INPUT_DIRECTORY", "MAJOOR_INPUT_DIRECTORY"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_ladder_selects_by_file_count() {
        let cfg = ScanConfig::default();
        assert_eq!(cfg.batch_size_for(50), cfg.batch_small);
        assert_eq!(cfg.batch_size_for(100), cfg.batch_small);
        assert_eq!(cfg.batch_size_for(500), cfg.batch_med);
        assert_eq!(cfg.batch_size_for(5000), cfg.batch_large);
        assert_eq!(cfg.batch_size_for(50_000), cfg.batch_xl);
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.db.max_connections, 8);
        assert!(cfg.db.auto_reset);
        assert_eq!(cfg.watcher.pending_max, 500);
        assert_eq!(cfg.search.fs_cache_ttl_s, 1.5);
    }
}
