//! Application settings persisted in the `settings` table.
//!
//! Every write bumps `__settings_version` (unix milliseconds, monotonic
//! enough across processes). Reads are cached for a short TTL and
//! invalidated whenever the observed version changes, so consumers never
//! deliver a value older than one they have already seen.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use majoor_config::env::{env_bool, parse_bool};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{AssetError, Result};
use crate::params;

const PROBE_BACKEND_KEY: &str = "media_probe_backend";
const OUTPUT_DIRECTORY_KEY: &str = "output_directory_override";
const METADATA_FALLBACK_IMAGE_KEY: &str = "metadata_fallback_image";
const METADATA_FALLBACK_MEDIA_KEY: &str = "metadata_fallback_media";
const SETTINGS_VERSION_KEY: &str = "__settings_version";
const API_TOKEN_HASH_KEY: &str = "security_api_token_hash";

const VALID_PROBE_MODES: &[&str] = &["auto", "exiftool", "ffprobe", "both"];

const SETTINGS_CACHE_TTL_S: f64 = 10.0;
const VERSION_CACHE_TTL_S: f64 = 1.0;

/// Boolean security preferences; stored values override env defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPrefs {
    pub safe_mode: bool,
    pub allow_write: bool,
    pub allow_remote_write: bool,
    pub allow_delete: bool,
    pub allow_rename: bool,
    pub allow_open_in_folder: bool,
    pub allow_reset_index: bool,
}

impl SecurityPrefs {
    /// Environment-derived defaults. Safe Mode defaults ON so that remote
    /// exposure starts locked down; destructive operations are opt-in.
    pub fn from_env() -> Self {
        SecurityPrefs {
            safe_mode: env_bool(true, &["MAJOOR_SAFE_MODE"]),
            allow_write: env_bool(false, &["MAJOOR_ALLOW_WRITE"]),
            allow_remote_write: env_bool(true, &["MAJOOR_ALLOW_REMOTE_WRITE"]),
            allow_delete: env_bool(false, &["MAJOOR_ALLOW_DELETE"]),
            allow_rename: env_bool(false, &["MAJOOR_ALLOW_RENAME"]),
            allow_open_in_folder: env_bool(false, &["MAJOOR_ALLOW_OPEN_IN_FOLDER"]),
            allow_reset_index: env_bool(false, &["MAJOOR_ALLOW_RESET_INDEX"]),
        }
    }
}

const PREF_KEYS: &[&str] = &[
    "safe_mode",
    "allow_write",
    "allow_remote_write",
    "allow_delete",
    "allow_rename",
    "allow_open_in_folder",
    "allow_reset_index",
];

/// Partial update payload for [`SecurityPrefs`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityPrefsUpdate {
    pub safe_mode: Option<bool>,
    pub allow_write: Option<bool>,
    pub allow_remote_write: Option<bool>,
    pub allow_delete: Option<bool>,
    pub allow_rename: Option<bool>,
    pub allow_open_in_folder: Option<bool>,
    pub allow_reset_index: Option<bool>,
    pub api_token: Option<String>,
}

impl SecurityPrefsUpdate {
    fn is_empty(&self) -> bool {
        self.safe_mode.is_none()
            && self.allow_write.is_none()
            && self.allow_remote_write.is_none()
            && self.allow_delete.is_none()
            && self.allow_rename.is_none()
            && self.allow_open_in_folder.is_none()
            && self.allow_reset_index.is_none()
            && self.api_token.is_none()
    }

    fn entries(&self) -> Vec<(&'static str, bool)> {
        let mut out = Vec::new();
        let pairs = [
            ("safe_mode", self.safe_mode),
            ("allow_write", self.allow_write),
            ("allow_remote_write", self.allow_remote_write),
            ("allow_delete", self.allow_delete),
            ("allow_rename", self.allow_rename),
            ("allow_open_in_folder", self.allow_open_in_folder),
            ("allow_reset_index", self.allow_reset_index),
        ];
        for (key, value) in pairs {
            if let Some(v) = value {
                out.push((key, v));
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Option<String>,
    at: Instant,
    version: i64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    version: i64,
    version_at: Option<Instant>,
}

/// Settings manager backed by the storage engine.
#[derive(Debug)]
pub struct SettingsStore {
    db: Arc<Database>,
    cache: Mutex<CacheState>,
}

fn generate_api_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn token_pepper() -> String {
    std::env::var("MAJOOR_API_TOKEN_PEPPER")
        .map(|raw| raw.trim().to_string())
        .unwrap_or_default()
}

/// Peppered token digest stored at rest; plaintext tokens never persist.
pub fn hash_api_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token_pepper().as_bytes());
    hasher.update(b"\0");
    hasher.update(token.trim().as_bytes());
    hex::encode(hasher.finalize())
}

impl SettingsStore {
    pub fn new(db: Arc<Database>) -> Self {
        SettingsStore {
            db,
            cache: Mutex::new(CacheState::default()),
        }
    }

    async fn read_raw(&self, key: &str) -> Result<Option<String>> {
        let row = self
            .db
            .query_one("SELECT value FROM settings WHERE key = ?", &params![key])
            .await?;
        Ok(row.and_then(|row| {
            row.try_get::<String, _>("value")
                .ok()
                .map(|v| v.trim().to_string())
        }))
    }

    async fn write_raw(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                &params![key, value],
            )
            .await?;
        Ok(())
    }

    async fn delete_raw(&self, key: &str) -> Result<()> {
        self.db
            .execute("DELETE FROM settings WHERE key = ?", &params![key])
            .await?;
        Ok(())
    }

    async fn read_version(&self) -> i64 {
        match self.read_raw(SETTINGS_VERSION_KEY).await {
            Ok(Some(raw)) => raw.parse::<i64>().unwrap_or(0).max(0),
            _ => 0,
        }
    }

    async fn current_version(&self, state: &mut CacheState) -> i64 {
        if let Some(at) = state.version_at {
            if at.elapsed().as_secs_f64() < VERSION_CACHE_TTL_S {
                return state.version;
            }
        }
        let version = self.read_version().await;
        state.version = version;
        state.version_at = Some(Instant::now());
        version
    }

    async fn bump_version(&self, state: &mut CacheState) {
        let version = chrono::Utc::now().timestamp_millis();
        if let Err(err) = self
            .write_raw(SETTINGS_VERSION_KEY, &version.to_string())
            .await
        {
            warn!("failed to bump settings version: {err}");
            return;
        }
        state.version = version;
        state.version_at = Some(Instant::now());
    }

    /// Observed settings version; strictly increases on every write.
    pub async fn version(&self) -> i64 {
        let mut state = self.cache.lock().await;
        self.current_version(&mut state).await
    }

    /// Cached read of one key, invalidated by TTL and version change.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.cache.lock().await;
        let version = self.current_version(&mut state).await;
        if let Some(entry) = state.entries.get(key) {
            if entry.version == version
                && entry.at.elapsed().as_secs_f64() < SETTINGS_CACHE_TTL_S
            {
                return Ok(entry.value.clone());
            }
        }
        let value = self.read_raw(key).await?;
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                at: Instant::now(),
                version,
            },
        );
        Ok(value)
    }

    /// Write one key and bump the version.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.cache.lock().await;
        self.write_raw(key, value).await?;
        self.bump_version(&mut state).await;
        let version = state.version;
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value: Some(value.to_string()),
                at: Instant::now(),
                version,
            },
        );
        Ok(())
    }

    /// Security preferences with env defaults for unset keys.
    pub async fn security_prefs(&self) -> SecurityPrefs {
        let defaults = SecurityPrefs::from_env();
        let mut prefs = defaults.clone();
        for key in PREF_KEYS {
            let stored = match self.get(key).await {
                Ok(value) => value,
                Err(_) => None,
            };
            let Some(raw) = stored else { continue };
            let fallback = match *key {
                "safe_mode" => defaults.safe_mode,
                "allow_write" => defaults.allow_write,
                "allow_remote_write" => defaults.allow_remote_write,
                "allow_delete" => defaults.allow_delete,
                "allow_rename" => defaults.allow_rename,
                "allow_open_in_folder" => defaults.allow_open_in_folder,
                _ => defaults.allow_reset_index,
            };
            let value = parse_bool(&raw, fallback);
            match *key {
                "safe_mode" => prefs.safe_mode = value,
                "allow_write" => prefs.allow_write = value,
                "allow_remote_write" => prefs.allow_remote_write = value,
                "allow_delete" => prefs.allow_delete = value,
                "allow_rename" => prefs.allow_rename = value,
                "allow_open_in_folder" => prefs.allow_open_in_folder = value,
                _ => prefs.allow_reset_index = value,
            }
        }
        prefs
    }

    /// Persist security preferences; returns the effective set.
    pub async fn set_security_prefs(
        &self,
        update: SecurityPrefsUpdate,
    ) -> Result<SecurityPrefs> {
        if update.is_empty() {
            return Err(AssetError::invalid("No security settings provided"));
        }
        for (key, value) in update.entries() {
            self.set(key, if value { "1" } else { "0" }).await?;
        }
        if let Some(token) = update.api_token {
            let token = if token.trim().is_empty() {
                generate_api_token()
            } else {
                token.trim().to_string()
            };
            self.set(API_TOKEN_HASH_KEY, &hash_api_token(&token)).await?;
        }
        Ok(self.security_prefs().await)
    }

    /// Stored token hash, migrating the env token into the store on first
    /// call so later requests verify against the hash only.
    pub async fn api_token_hash(&self) -> Result<Option<String>> {
        if let Some(hash) = self.get(API_TOKEN_HASH_KEY).await? {
            if !hash.is_empty() {
                return Ok(Some(hash.to_lowercase()));
            }
        }
        if let Ok(hash) = std::env::var("MAJOOR_API_TOKEN_HASH") {
            let hash = hash.trim().to_lowercase();
            if !hash.is_empty() {
                return Ok(Some(hash));
            }
        }
        Ok(None)
    }

    /// Ensure a write token exists at startup; persists only the hash.
    pub async fn ensure_security_bootstrap(&self) -> Result<()> {
        let env_token = std::env::var("MAJOOR_API_TOKEN")
            .or_else(|_| std::env::var("MJR_API_TOKEN"))
            .map(|raw| raw.trim().to_string())
            .unwrap_or_default();
        if !env_token.is_empty() {
            self.set(API_TOKEN_HASH_KEY, &hash_api_token(&env_token))
                .await?;
            return Ok(());
        }
        if self.api_token_hash().await?.is_some() {
            return Ok(());
        }
        let token = generate_api_token();
        self.set(API_TOKEN_HASH_KEY, &hash_api_token(&token)).await?;
        info!("generated write-access token (shown once): {token}");
        Ok(())
    }

    /// Replace the write token; returns the new plaintext exactly once.
    pub async fn rotate_api_token(&self) -> Result<String> {
        let token = generate_api_token();
        self.set(API_TOKEN_HASH_KEY, &hash_api_token(&token)).await?;
        Ok(token)
    }

    pub async fn probe_backend(&self) -> String {
        let stored = self
            .get(PROBE_BACKEND_KEY)
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if VALID_PROBE_MODES.contains(&stored.as_str()) {
            stored
        } else {
            "auto".to_string()
        }
    }

    pub async fn set_probe_backend(&self, mode: &str) -> Result<String> {
        let normalized = mode.trim().to_ascii_lowercase();
        let normalized = if normalized.is_empty() {
            "auto".to_string()
        } else {
            normalized
        };
        if !VALID_PROBE_MODES.contains(&normalized.as_str()) {
            return Err(AssetError::invalid(format!(
                "Invalid probe mode: {mode}"
            )));
        }
        self.set(PROBE_BACKEND_KEY, &normalized).await?;
        info!("media probe backend set to {normalized}");
        Ok(normalized)
    }

    pub async fn output_directory_override(&self) -> Result<Option<String>> {
        Ok(self
            .get(OUTPUT_DIRECTORY_KEY)
            .await?
            .filter(|v| !v.is_empty()))
    }

    pub async fn set_output_directory_override(
        &self,
        path: Option<&str>,
    ) -> Result<()> {
        match path.map(str::trim).filter(|p| !p.is_empty()) {
            Some(path) => self.set(OUTPUT_DIRECTORY_KEY, path).await,
            None => {
                self.delete_raw(OUTPUT_DIRECTORY_KEY).await?;
                let mut state = self.cache.lock().await;
                self.bump_version(&mut state).await;
                state.entries.remove(OUTPUT_DIRECTORY_KEY);
                Ok(())
            }
        }
    }

    /// Fallback-extractor toggles: (image, media).
    pub async fn metadata_fallback_prefs(&self) -> (bool, bool) {
        let image = self
            .get(METADATA_FALLBACK_IMAGE_KEY)
            .await
            .ok()
            .flatten()
            .map(|raw| parse_bool(&raw, true))
            .unwrap_or(true);
        let media = self
            .get(METADATA_FALLBACK_MEDIA_KEY)
            .await
            .ok()
            .flatten()
            .map(|raw| parse_bool(&raw, true))
            .unwrap_or(true);
        (image, media)
    }

    pub async fn set_metadata_fallback_prefs(
        &self,
        image: Option<bool>,
        media: Option<bool>,
    ) -> Result<(bool, bool)> {
        if image.is_none() && media.is_none() {
            return Err(AssetError::invalid(
                "No metadata fallback settings provided",
            ));
        }
        if let Some(value) = image {
            self.set(METADATA_FALLBACK_IMAGE_KEY, if value { "1" } else { "0" })
                .await?;
        }
        if let Some(value) = media {
            self.set(METADATA_FALLBACK_MEDIA_KEY, if value { "1" } else { "0" })
                .await?;
        }
        Ok(self.metadata_fallback_prefs().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use majoor_config::DbConfig;

    async fn store() -> (tempfile::TempDir, SettingsStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::open(dir.path().join("assets.sqlite"), DbConfig::default())
            .await
            .expect("open db");
        (dir, SettingsStore::new(Arc::new(db)))
    }

    #[tokio::test]
    async fn version_strictly_increases_on_writes() {
        let (_dir, store) = store().await;
        let v0 = store.version().await;
        store.set("k", "a").await.expect("set");
        let v1 = store.version().await;
        assert!(v1 > v0);
        // Millisecond stamps can collide inside a tight loop; sleep past it.
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.set("k", "b").await.expect("set");
        let v2 = store.version().await;
        assert!(v2 > v1);
    }

    #[tokio::test]
    async fn probe_backend_validates_modes() {
        let (_dir, store) = store().await;
        assert_eq!(store.probe_backend().await, "auto");
        store.set_probe_backend("ffprobe").await.expect("set");
        assert_eq!(store.probe_backend().await, "ffprobe");
        assert!(store.set_probe_backend("bogus").await.is_err());
    }

    #[tokio::test]
    async fn token_rotation_changes_hash() {
        let (_dir, store) = store().await;
        let t1 = store.rotate_api_token().await.expect("rotate");
        let h1 = store.api_token_hash().await.expect("hash").expect("some");
        assert_eq!(h1, hash_api_token(&t1));
        let t2 = store.rotate_api_token().await.expect("rotate");
        let h2 = store.api_token_hash().await.expect("hash").expect("some");
        assert_ne!(t1, t2);
        assert_ne!(h1, h2);
    }

    #[tokio::test]
    async fn security_prefs_round_trip() {
        let (_dir, store) = store().await;
        let updated = store
            .set_security_prefs(SecurityPrefsUpdate {
                allow_delete: Some(true),
                safe_mode: Some(false),
                ..Default::default()
            })
            .await
            .expect("update");
        assert!(updated.allow_delete);
        assert!(!updated.safe_mode);

        let empty = store
            .set_security_prefs(SecurityPrefsUpdate::default())
            .await;
        assert!(empty.is_err());
    }
}
