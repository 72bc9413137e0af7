//! Base-directory resolution and path confinement.
//!
//! Every filesystem-serving code path resolves its target (following
//! symlinks) and then asserts descent from an allowed base. User-supplied
//! relative paths go through [`safe_rel_path`] first, which rejects absolute
//! paths, `..` segments, NUL bytes, and drive prefixes.

pub mod custom;

pub use custom::CustomRootStore;

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use majoor_model::AssetSource;
use tracing::warn;

use crate::error::{AssetError, Result};

/// Case-folding policy for filepath keys, decided once at startup.
#[derive(Debug, Clone, Copy)]
pub struct PathPolicy {
    pub case_insensitive: bool,
}

impl PathPolicy {
    pub fn detect() -> Self {
        let default = cfg!(windows) || cfg!(target_os = "macos");
        let case_insensitive = match std::env::var("MJR_AM_CASE_INSENSITIVE") {
            Ok(raw) => matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            Err(_) => default,
        };
        PathPolicy { case_insensitive }
    }

    /// Canonical string key for a filepath: forward slashes, folded case on
    /// case-insensitive hosts. This is the unique key in the index.
    pub fn canonical_key(&self, path: &Path) -> String {
        let raw = path.to_string_lossy().replace('\\', "/");
        if self.case_insensitive {
            raw.to_lowercase()
        } else {
            raw
        }
    }

    pub fn canonical_key_str(&self, path: &str) -> String {
        let raw = path.replace('\\', "/");
        if self.case_insensitive {
            raw.to_lowercase()
        } else {
            raw
        }
    }
}

/// Normalize a user-supplied path string. Rejects empty values and NUL
/// bytes; resolves symlinks for the portion of the path that exists.
pub fn normalize_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() || value.contains('\0') {
        return None;
    }
    Some(resolve_lenient(Path::new(value)))
}

/// Resolve a path, following symlinks through the deepest existing
/// ancestor; non-existing trailing components are appended verbatim.
pub fn resolve_lenient(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(resolved) => {
                let mut out = resolved;
                for part in tail.iter().rev() {
                    out.push(part);
                }
                return out;
            }
            Err(_) => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_os_string());
                    existing = parent.to_path_buf();
                }
                _ => {
                    // No existing ancestor at all; fall back to a lexical
                    // normalization relative to the current directory.
                    let base = std::env::current_dir()
                        .unwrap_or_else(|_| PathBuf::from("."));
                    return if path.is_absolute() {
                        path.to_path_buf()
                    } else {
                        base.join(path)
                    };
                }
            },
        }
    }
}

/// Parse a user-supplied relative path. Fails on absolute paths, any `..`
/// segment, NUL bytes, and drive prefixes.
pub fn safe_rel_path(value: &str) -> Result<PathBuf> {
    let raw = value.trim();
    if raw.is_empty() {
        return Ok(PathBuf::new());
    }
    if raw.contains('\0') {
        return Err(AssetError::invalid("path contains NUL byte"));
    }
    let rel = Path::new(raw);
    if rel.is_absolute() {
        return Err(AssetError::invalid("absolute paths are not allowed"));
    }
    let mut out = PathBuf::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(AssetError::invalid("parent traversal is not allowed"));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(AssetError::invalid("absolute paths are not allowed"));
            }
        }
    }
    Ok(out)
}

fn is_within(policy: &PathPolicy, candidate: &Path, root: &Path) -> bool {
    let cand = policy.canonical_key(candidate);
    let root = policy.canonical_key(root);
    if cand == root {
        return true;
    }
    let prefix = if root.ends_with('/') {
        root
    } else {
        format!("{root}/")
    };
    cand.starts_with(&prefix)
}

/// Resolves and caches the built-in output/input roots, plus source
/// classification against them and the custom-root store.
#[derive(Debug)]
pub struct RootRegistry {
    policy: PathPolicy,
    startup_output: PathBuf,
    /// Runtime override persisted via settings; takes priority over env.
    output_override: RwLock<Option<PathBuf>>,
    custom: Arc<CustomRootStore>,
    allowed_cache: Mutex<Option<((String, String), (PathBuf, PathBuf))>>,
}

impl RootRegistry {
    pub fn new(policy: PathPolicy, custom: Arc<CustomRootStore>) -> Self {
        let startup_output = Self::resolve_startup_output();
        RootRegistry {
            policy,
            startup_output,
            output_override: RwLock::new(None),
            custom,
            allowed_cache: Mutex::new(None),
        }
    }

    /// Resolve the startup output root and place the custom-root store in
    /// its index directory, the standard deployment layout.
    pub fn bootstrap(policy: PathPolicy) -> Arc<Self> {
        let startup_output = Self::resolve_startup_output();
        let store_path = startup_output.join("_mjr_index").join("custom_roots.json");
        let custom = Arc::new(CustomRootStore::new(store_path, policy));
        Arc::new(RootRegistry {
            policy,
            startup_output,
            output_override: RwLock::new(None),
            custom,
            allowed_cache: Mutex::new(None),
        })
    }

    /// Startup resolution: env override, then the executable-parent
    /// heuristic, then `<cwd>/output`.
    fn resolve_startup_output() -> PathBuf {
        if let Some(raw) = majoor_config::AppConfig::output_root_override() {
            return resolve_lenient(Path::new(&raw));
        }
        if let Ok(exe) = std::env::current_exe() {
            if let Some(parent) = exe.parent() {
                let candidate = parent.join("output");
                if candidate.is_dir() {
                    return resolve_lenient(&candidate);
                }
            }
        }
        let fallback = std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("output");
        if let Err(err) = std::fs::create_dir_all(&fallback) {
            warn!(
                "failed to create fallback output directory: {err}"
            );
        }
        resolve_lenient(&fallback)
    }

    pub fn policy(&self) -> PathPolicy {
        self.policy
    }

    pub fn custom_roots(&self) -> &Arc<CustomRootStore> {
        &self.custom
    }

    /// Set (or clear) the persisted output-directory override.
    pub fn set_output_override(&self, path: Option<PathBuf>) {
        let resolved = path.map(|p| resolve_lenient(&p));
        *self.output_override.write().expect("override lock") = resolved;
    }

    /// Current output root: request/settings override, then live env, then
    /// the startup-resolved path.
    pub fn output_root(&self) -> PathBuf {
        if let Some(path) = self
            .output_override
            .read()
            .expect("override lock")
            .clone()
        {
            return path;
        }
        if let Some(raw) = majoor_config::AppConfig::output_root_override() {
            return resolve_lenient(Path::new(&raw));
        }
        self.startup_output.clone()
    }

    /// Input root: env override, then the output root's `input` sibling.
    pub fn input_root(&self) -> PathBuf {
        if let Some(raw) = majoor_config::AppConfig::input_root_override() {
            return resolve_lenient(Path::new(&raw));
        }
        let output = self.output_root();
        let sibling = output
            .parent()
            .map(|parent| parent.join("input"))
            .unwrap_or_else(|| output.join("input"));
        resolve_lenient(&sibling)
    }

    /// The `{output, input}` pair, recomputed when either input changes.
    pub fn allowed_directories(&self) -> (PathBuf, PathBuf) {
        let output = self.output_root();
        let input = self.input_root();
        let key = (
            self.policy.canonical_key(&output),
            self.policy.canonical_key(&input),
        );
        let mut cache = self.allowed_cache.lock().expect("allowed cache lock");
        if let Some((cached_key, cached_value)) = cache.as_ref() {
            if *cached_key == key {
                return cached_value.clone();
            }
        }
        let value = (output, input);
        *cache = Some((key, value.clone()));
        value
    }

    /// Directory holding the index database, collections, and backups.
    pub fn index_dir(&self) -> PathBuf {
        self.output_root().join("_mjr_index")
    }

    /// True iff `candidate` resolves strictly under the output or input
    /// root (symlinks followed first).
    pub fn is_path_allowed(&self, candidate: &Path, must_exist: bool) -> bool {
        let resolved = if must_exist {
            match candidate.canonicalize() {
                Ok(path) => path,
                Err(_) => return false,
            }
        } else {
            resolve_lenient(candidate)
        };
        let (output, input) = self.allowed_directories();
        is_within(&self.policy, &resolved, &output)
            || is_within(&self.policy, &resolved, &input)
    }

    /// True iff `candidate` is under any registered custom root.
    pub fn is_path_allowed_custom(&self, candidate: &Path) -> bool {
        let resolved = resolve_lenient(candidate);
        for root in self.custom.list() {
            if root.invalid {
                continue;
            }
            let root_path = resolve_lenient(Path::new(&root.path));
            if is_within(&self.policy, &resolved, &root_path) {
                return true;
            }
        }
        false
    }

    /// Classify a path under output / input / custom by prefix match.
    pub fn classify_source(
        &self,
        candidate: &Path,
    ) -> Option<(AssetSource, Option<String>, PathBuf)> {
        let resolved = resolve_lenient(candidate);
        let (output, input) = self.allowed_directories();
        // Input first: the input root may live inside the output tree in
        // some layouts, and the more specific match must win.
        if is_within(&self.policy, &resolved, &input) {
            return Some((AssetSource::Input, None, input));
        }
        if is_within(&self.policy, &resolved, &output) {
            return Some((AssetSource::Output, None, output));
        }
        for root in self.custom.list() {
            if root.invalid {
                continue;
            }
            let root_path = resolve_lenient(Path::new(&root.path));
            if is_within(&self.policy, &resolved, &root_path) {
                return Some((
                    AssetSource::Custom,
                    Some(root.id.clone()),
                    root_path,
                ));
            }
        }
        None
    }

    /// Root-relative subfolder of `path`, forward-slash normalized; empty
    /// when the file sits directly in the root.
    pub fn subfolder_for(&self, path: &Path, root: &Path) -> String {
        let parent = match path.parent() {
            Some(parent) => parent,
            None => return String::new(),
        };
        let parent_key = self.policy.canonical_key(parent);
        let root_key = self.policy.canonical_key(root);
        if parent_key == root_key {
            return String::new();
        }
        let prefix = format!("{root_key}/");
        if let Some(stripped) = parent_key.strip_prefix(&prefix) {
            stripped.to_string()
        } else {
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PathPolicy {
        PathPolicy {
            case_insensitive: false,
        }
    }

    #[test]
    fn safe_rel_path_rejects_escapes() {
        assert!(safe_rel_path("a/b").is_ok());
        assert!(safe_rel_path("").unwrap().as_os_str().is_empty());
        assert!(safe_rel_path("../x").is_err());
        assert!(safe_rel_path("a/../../x").is_err());
        assert!(safe_rel_path("/etc/passwd").is_err());
        assert!(safe_rel_path("a\0b").is_err());
    }

    #[test]
    fn within_requires_segment_boundary() {
        let p = policy();
        assert!(is_within(&p, Path::new("/data/out/a.png"), Path::new("/data/out")));
        assert!(is_within(&p, Path::new("/data/out"), Path::new("/data/out")));
        assert!(!is_within(&p, Path::new("/data/output/a.png"), Path::new("/data/out")));
        assert!(!is_within(&p, Path::new("/data"), Path::new("/data/out")));
    }

    #[test]
    fn case_insensitive_keys_fold() {
        let p = PathPolicy {
            case_insensitive: true,
        };
        assert_eq!(
            p.canonical_key(Path::new("/Out/Img.PNG")),
            p.canonical_key(Path::new("/out/img.png"))
        );
        let cs = policy();
        assert_ne!(
            cs.canonical_key(Path::new("/Out/Img.PNG")),
            cs.canonical_key(Path::new("/out/img.png"))
        );
    }

    #[test]
    fn confinement_follows_symlinks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inside = dir.path().join("output");
        let outside = dir.path().join("elsewhere");
        std::fs::create_dir_all(&inside).expect("mkdir");
        std::fs::create_dir_all(&outside).expect("mkdir");
        std::fs::write(outside.join("secret.png"), b"x").expect("write");

        #[cfg(unix)]
        {
            let link = inside.join("link.png");
            std::os::unix::fs::symlink(outside.join("secret.png"), &link)
                .expect("symlink");
            let p = policy();
            let resolved = resolve_lenient(&link);
            // The symlink resolves outside the root and must be rejected.
            assert!(!is_within(&p, &resolved, &resolve_lenient(&inside)));
        }
    }
}
