//! Persisted custom roots.
//!
//! Stored as one JSON document under the index directory so registrations
//! survive restarts. Writes are atomic (temp sibling then rename) and the
//! store is capped in size; a store that grew past the cap is ignored rather
//! than trusted.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use majoor_model::CustomRoot;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{AssetError, Result};
use crate::roots::{resolve_lenient, PathPolicy};

const DEFAULT_MAX_STORE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    roots: Vec<StoredRoot>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRoot {
    id: String,
    path: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug)]
pub struct CustomRootStore {
    store_path: PathBuf,
    policy: PathPolicy,
    max_store_bytes: u64,
    lock: Mutex<()>,
    allow_symlinks: bool,
}

fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

impl CustomRootStore {
    pub fn new(store_path: PathBuf, policy: PathPolicy) -> Self {
        let max_store_bytes = std::env::var("MJR_CUSTOM_ROOTS_MAX_BYTES")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_MAX_STORE_BYTES);
        let allow_symlinks = std::env::var("MJR_ALLOW_SYMLINKS")
            .map(|raw| {
                matches!(
                    raw.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
            .unwrap_or(false);
        CustomRootStore {
            store_path,
            policy,
            max_store_bytes,
            lock: Mutex::new(()),
            allow_symlinks,
        }
    }

    fn read_store(&self) -> StoreDocument {
        if !self.store_path.exists() {
            return StoreDocument::default();
        }
        match std::fs::metadata(&self.store_path) {
            Ok(meta) if meta.len() > self.max_store_bytes => {
                warn!(
                    path = %self.store_path.display(),
                    "custom roots store too large, ignoring"
                );
                return StoreDocument::default();
            }
            _ => {}
        }
        match std::fs::read_to_string(&self.store_path) {
            Ok(raw) if !raw.trim().is_empty() => {
                match serde_json::from_str::<StoreDocument>(&raw) {
                    Ok(doc) => doc,
                    Err(err) => {
                        warn!("failed to parse custom roots store: {err}");
                        StoreDocument::default()
                    }
                }
            }
            Ok(_) => StoreDocument::default(),
            Err(err) => {
                warn!("failed to read custom roots store: {err}");
                StoreDocument::default()
            }
        }
    }

    fn write_store(&self, doc: &StoreDocument) -> Result<()> {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.store_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let payload = serde_json::to_string_pretty(doc)
                .map_err(std::io::Error::other)?;
            let tmp = self.store_path.with_file_name(format!(
                "{}.tmp_{}",
                self.store_path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "custom_roots.json".to_string()),
                Uuid::new_v4().simple()
            ));
            std::fs::write(&tmp, payload)?;
            std::fs::rename(&tmp, &self.store_path)?;
            Ok(())
        };
        write().map_err(|err| {
            warn!("failed to persist custom roots store: {err}");
            AssetError::StoreWriteFailed(err.to_string())
        })
    }

    fn normalize_dir(&self, value: &str) -> Option<PathBuf> {
        if value.is_empty() || value.contains('\0') {
            return None;
        }
        let path = Path::new(value);
        if !self.allow_symlinks && is_symlink(path) {
            return None;
        }
        Some(resolve_lenient(path))
    }

    fn hydrate(&self, row: &StoredRoot) -> Option<CustomRoot> {
        if row.id.trim().is_empty() || row.path.trim().is_empty() {
            return None;
        }
        let Some(normalized) = self.normalize_dir(&row.path) else {
            return Some(CustomRoot {
                id: row.id.clone(),
                path: row.path.clone(),
                label: if row.label.trim().is_empty() {
                    row.path.clone()
                } else {
                    row.label.clone()
                },
                created_at: row.created_at.clone(),
                offline: true,
                invalid: true,
                already_exists: false,
            });
        };
        let offline = !normalized.is_dir();
        let label = if row.label.trim().is_empty() {
            normalized
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| normalized.to_string_lossy().into_owned())
        } else {
            row.label.clone()
        };
        Some(CustomRoot {
            id: row.id.clone(),
            path: normalized.to_string_lossy().into_owned(),
            label,
            created_at: row.created_at.clone(),
            offline,
            invalid: false,
            already_exists: false,
        })
    }

    /// List registered roots with offline/invalid computed at read time.
    pub fn list(&self) -> Vec<CustomRoot> {
        let _guard = self.lock.lock().expect("store lock");
        self.read_store()
            .roots
            .iter()
            .filter_map(|row| self.hydrate(row))
            .collect()
    }

    fn overlaps(&self, a: &Path, b: &Path) -> bool {
        let ka = self.policy.canonical_key(a);
        let kb = self.policy.canonical_key(b);
        let pa = format!("{ka}/");
        let pb = format!("{kb}/");
        ka == kb || ka.starts_with(&pb) || kb.starts_with(&pa)
    }

    /// Register a directory, or return the existing row when the canonical
    /// path is already present.
    pub fn add(
        &self,
        path: &str,
        label: Option<&str>,
        builtin_roots: &[PathBuf],
    ) -> Result<CustomRoot> {
        let normalized = self
            .normalize_dir(path)
            .ok_or_else(|| AssetError::invalid("Invalid path"))?;
        if !normalized.exists() {
            return Err(AssetError::DirNotFound(
                normalized.to_string_lossy().into_owned(),
            ));
        }
        if !normalized.is_dir() {
            return Err(AssetError::NotADirectory(
                normalized.to_string_lossy().into_owned(),
            ));
        }
        for builtin in builtin_roots {
            if self.overlaps(&normalized, builtin) {
                return Err(AssetError::Overlap(format!(
                    "root overlaps a built-in directory: {}",
                    builtin.display()
                )));
            }
        }

        let resolved = normalized.to_string_lossy().into_owned();
        let normalized_key = self.policy.canonical_key(&normalized);
        let safe_label = label
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                normalized
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| resolved.clone())
            });

        let _guard = self.lock.lock().expect("store lock");
        let mut doc = self.read_store();
        for row in &doc.roots {
            let existing = resolve_lenient(Path::new(&row.path));
            if self.policy.canonical_key(&existing) == normalized_key {
                return Ok(CustomRoot {
                    id: row.id.clone(),
                    path: resolved,
                    label: if row.label.trim().is_empty() {
                        safe_label
                    } else {
                        row.label.clone()
                    },
                    created_at: row.created_at.clone(),
                    offline: false,
                    invalid: false,
                    already_exists: true,
                });
            }
            if self.overlaps(&normalized, &existing) {
                return Err(AssetError::Overlap(format!(
                    "root overlaps an existing custom root: {}",
                    existing.display()
                )));
            }
        }

        let row = StoredRoot {
            id: Uuid::new_v4().to_string(),
            path: resolved.clone(),
            label: safe_label.clone(),
            created_at: Some(Utc::now().to_rfc3339()),
        };
        doc.roots.push(row.clone());
        self.write_store(&doc)?;

        Ok(CustomRoot {
            id: row.id,
            path: resolved,
            label: safe_label,
            created_at: row.created_at,
            offline: false,
            invalid: false,
            already_exists: false,
        })
    }

    pub fn remove(&self, root_id: &str) -> Result<()> {
        let rid = root_id.trim();
        if rid.is_empty() {
            return Err(AssetError::invalid("Missing root_id"));
        }
        let _guard = self.lock.lock().expect("store lock");
        let mut doc = self.read_store();
        let before = doc.roots.len();
        doc.roots.retain(|row| row.id != rid);
        if doc.roots.len() == before {
            return Err(AssetError::NotFound(format!(
                "custom root not found: {rid}"
            )));
        }
        self.write_store(&doc)
    }

    /// Resolve a root id to a validated, online directory.
    pub fn resolve(&self, root_id: &str) -> Result<PathBuf> {
        let rid = root_id.trim();
        if rid.is_empty() {
            return Err(AssetError::invalid("Missing root_id"));
        }
        for root in self.list() {
            if root.id == rid {
                if root.invalid {
                    return Err(AssetError::invalid("Invalid stored path"));
                }
                if root.offline {
                    return Err(AssetError::Offline(root.path));
                }
                return Ok(PathBuf::from(root.path));
            }
        }
        Err(AssetError::NotFound(format!("custom root not found: {rid}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> CustomRootStore {
        CustomRootStore::new(
            dir.join("custom_roots.json"),
            PathPolicy {
                case_insensitive: false,
            },
        )
    }

    #[test]
    fn add_list_remove_round_trip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let target = tmp.path().join("media");
        std::fs::create_dir_all(&target).expect("mkdir");
        let store = store_in(tmp.path());

        let added = store
            .add(target.to_str().unwrap(), Some("Media"), &[])
            .expect("add");
        assert!(!added.already_exists);
        assert_eq!(added.label, "Media");

        // Second add of the same canonical path returns the existing row.
        let again = store
            .add(target.to_str().unwrap(), None, &[])
            .expect("re-add");
        assert!(again.already_exists);
        assert_eq!(again.id, added.id);

        // Survives a fresh store instance (on-disk persistence).
        let reopened = store_in(tmp.path());
        let listed = reopened.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, added.id);

        reopened.remove(&added.id).expect("remove");
        assert!(reopened.list().is_empty());
        assert!(matches!(
            reopened.remove(&added.id),
            Err(AssetError::NotFound(_))
        ));
    }

    #[test]
    fn rejects_overlapping_roots() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let parent = tmp.path().join("outer");
        let child = parent.join("inner");
        std::fs::create_dir_all(&child).expect("mkdir");
        let store = store_in(tmp.path());

        store.add(parent.to_str().unwrap(), None, &[]).expect("add parent");
        let err = store.add(child.to_str().unwrap(), None, &[]).unwrap_err();
        assert!(matches!(err, AssetError::Overlap(_)));
    }

    #[test]
    fn rejects_builtin_overlap() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let output = tmp.path().join("output");
        std::fs::create_dir_all(&output).expect("mkdir");
        let store = store_in(tmp.path());
        let err = store
            .add(output.to_str().unwrap(), None, &[output.clone()])
            .unwrap_err();
        assert!(matches!(err, AssetError::Overlap(_)));
    }

    #[test]
    fn missing_directory_is_distinct_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store_in(tmp.path());
        let missing = tmp.path().join("nope");
        let err = store.add(missing.to_str().unwrap(), None, &[]).unwrap_err();
        assert!(matches!(err, AssetError::DirNotFound(_)));

        let file = tmp.path().join("file.txt");
        std::fs::write(&file, b"x").expect("write");
        let err = store.add(file.to_str().unwrap(), None, &[]).unwrap_err();
        assert!(matches!(err, AssetError::NotADirectory(_)));
    }
}
