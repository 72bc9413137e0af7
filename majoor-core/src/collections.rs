//! User-curated collections, one JSON file each under the index directory.
//!
//! Order is preserved as stored; asset ids are hydrated at read time by
//! the caller so a collection survives re-indexing.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use majoor_model::Collection;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AssetError, Result};

#[derive(Debug)]
pub struct CollectionStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl CollectionStore {
    pub fn new(dir: PathBuf) -> Self {
        CollectionStore {
            dir,
            lock: Mutex::new(()),
        }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty()
            || id.contains(['/', '\\', '.'])
            || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(AssetError::invalid("Invalid collection id"));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    pub fn list(&self) -> Vec<Collection> {
        let _guard = self.lock.lock().expect("collections lock");
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return out;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str::<Collection>(&raw) {
                    Ok(collection) => out.push(collection),
                    Err(err) => {
                        warn!(file = %path.display(), "skipping bad collection: {err}")
                    }
                },
                Err(err) => {
                    warn!(file = %path.display(), "failed to read collection: {err}")
                }
            }
        }
        out.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        out
    }

    pub fn get(&self, id: &str) -> Result<Collection> {
        let path = self.path_for(id)?;
        let _guard = self.lock.lock().expect("collections lock");
        let raw = std::fs::read_to_string(&path).map_err(|_| {
            AssetError::NotFound(format!("collection not found: {id}"))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn create(&self, name: &str, filepaths: Vec<String>) -> Result<Collection> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AssetError::invalid("Missing collection name"));
        }
        let collection = Collection {
            id: Uuid::new_v4().simple().to_string(),
            name: name.to_string(),
            filepaths,
            created_at: Some(Utc::now().to_rfc3339()),
        };
        self.write(&collection)?;
        Ok(collection)
    }

    pub fn update(&self, collection: &Collection) -> Result<()> {
        // Reject ids that never existed so update cannot create files.
        let path = self.path_for(&collection.id)?;
        if !path.is_file() {
            return Err(AssetError::NotFound(format!(
                "collection not found: {}",
                collection.id
            )));
        }
        self.write(collection)
    }

    fn write(&self, collection: &Collection) -> Result<()> {
        let path = self.path_for(&collection.id)?;
        let _guard = self.lock.lock().expect("collections lock");
        std::fs::create_dir_all(&self.dir)?;
        let payload = serde_json::to_string_pretty(collection)?;
        let tmp = path.with_extension(format!("tmp_{}", Uuid::new_v4().simple()));
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        let _guard = self.lock.lock().expect("collections lock");
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(
                AssetError::NotFound(format!("collection not found: {id}")),
            ),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_list_remove_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CollectionStore::new(dir.path().join("collections"));

        let created = store
            .create("Favorites", vec!["/out/a.png".to_string()])
            .expect("create");
        let listed = store.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Favorites");
        // Order preserved as stored.
        assert_eq!(listed[0].filepaths, vec!["/out/a.png".to_string()]);

        let fetched = store.get(&created.id).expect("get");
        assert_eq!(fetched.id, created.id);

        store.remove(&created.id).expect("remove");
        assert!(store.list().is_empty());
        assert!(matches!(
            store.remove(&created.id),
            Err(AssetError::NotFound(_))
        ));
    }

    #[test]
    fn ids_with_path_characters_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CollectionStore::new(dir.path().join("collections"));
        assert!(store.get("../../etc").is_err());
        assert!(store.get("a/b").is_err());
    }
}
