//! On-disk record store: one JSON document per catalog entity, laid out as
//! `<root>/<namespace>/projects/<slug>/index.json`, with an `_archived`
//! namespace for retired entities.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "recat-store";

/// Reserved directory for archived entities; never listed as a namespace.
pub const ARCHIVE_DIR: &str = "_archived";

const INDEX_FILE: &str = "index.json";
const ENTITIES_DIR: &str = "projects";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store root {0} does not exist")]
    MissingRoot(PathBuf),
    #[error("io on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed record document {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Handle on the record store root. All access is synchronous; callers
/// process one namespace at a time and the store does no locking.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
}

impl RecordStore {
    /// Opens the store, failing if the root is missing. This is the only
    /// fatal startup condition of the batch tools.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::MissingRoot(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace).join(ENTITIES_DIR)
    }

    pub fn entity_dir(&self, namespace: &str, slug: &str) -> PathBuf {
        self.namespace_dir(namespace).join(slug)
    }

    fn index_path(&self, namespace: &str, slug: &str) -> PathBuf {
        self.entity_dir(namespace, slug).join(INDEX_FILE)
    }

    /// Sorted entity slugs for a namespace. Directories with a reserved
    /// `_` prefix are skipped; a missing namespace yields an empty listing.
    pub fn list_entities(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.namespace_dir(namespace);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        let mut slugs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
            let is_dir = entry
                .file_type()
                .map(|kind| kind.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('_') {
                continue;
            }
            slugs.push(name);
        }
        slugs.sort();
        Ok(slugs)
    }

    /// Reads an entity's document. A missing `index.json` is not an error:
    /// the directory is simply not a record.
    pub fn read_record(
        &self,
        namespace: &str,
        slug: &str,
    ) -> Result<Option<Map<String, Value>>, StoreError> {
        let path = self.index_path(namespace, slug);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let record = serde_json::from_str(&text)
            .map_err(|source| StoreError::Malformed { path, source })?;
        Ok(Some(record))
    }

    /// Writes an entity's document atomically: pretty-printed (2-space
    /// indent, non-ASCII preserved) to a temp file, then renamed into place
    /// so the record is never observed half-written.
    pub fn write_record(
        &self,
        namespace: &str,
        slug: &str,
        record: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let dir = self.entity_dir(namespace, slug);
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(INDEX_FILE);
        let text = serde_json::to_string_pretty(record).map_err(|source| StoreError::Malformed {
            path: path.clone(),
            source,
        })?;

        let temp_path = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&temp_path, text).map_err(|source| StoreError::Io {
            path: temp_path.clone(),
            source,
        })?;
        match fs::rename(&temp_path, &path) {
            Ok(()) => Ok(()),
            Err(source) => {
                let _ = fs::remove_file(&temp_path);
                Err(StoreError::Io { path, source })
            }
        }
    }

    /// Moves an entity wholesale into the archive namespace, keeping its
    /// identifier. Recoverable: nothing is deleted.
    pub fn archive_entity(&self, namespace: &str, slug: &str) -> Result<(), StoreError> {
        let from = self.entity_dir(namespace, slug);
        let archive_ns = self.root.join(ARCHIVE_DIR).join(namespace);
        fs::create_dir_all(&archive_ns).map_err(|source| StoreError::Io {
            path: archive_ns.clone(),
            source,
        })?;
        let to = archive_ns.join(slug);
        fs::rename(&from, &to).map_err(|source| StoreError::Io { path: from, source })?;
        debug!(namespace, slug, "entity archived");
        Ok(())
    }

    /// Renames an entity directory within its namespace. Used when a
    /// deprecated identifier is promoted to its canonical one.
    pub fn promote_entity(
        &self,
        namespace: &str,
        from_slug: &str,
        to_slug: &str,
    ) -> Result<(), StoreError> {
        let from = self.entity_dir(namespace, from_slug);
        let to = self.entity_dir(namespace, to_slug);
        fs::rename(&from, &to).map_err(|source| StoreError::Io { path: from, source })?;
        debug!(namespace, from_slug, to_slug, "entity promoted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn opening_a_missing_root_is_fatal() {
        let err = RecordStore::open("/definitely/not/a/store").unwrap_err();
        assert!(matches!(err, StoreError::MissingRoot(_)));
    }

    #[test]
    fn roundtrip_preserves_non_ascii_text() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::open(dir.path()).expect("open");
        let doc = record(&[
            ("slug", json!("aura")),
            ("projectName", json!({"en": "Aura", "ar": "أورا"})),
        ]);
        store.write_record("sobha", "aura", &doc).expect("write");

        let raw = fs::read_to_string(dir.path().join("sobha/projects/aura/index.json"))
            .expect("read raw");
        assert!(raw.contains("أورا"), "arabic text must not be escaped");

        let loaded = store.read_record("sobha", "aura").expect("read").expect("some");
        assert_eq!(loaded, doc);
    }

    #[test]
    fn listing_skips_reserved_dirs_and_plain_files() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::open(dir.path()).expect("open");
        store
            .write_record("emaar", "valo", &record(&[("slug", json!("valo"))]))
            .expect("write");
        store
            .write_record("emaar", "silva", &record(&[("slug", json!("silva"))]))
            .expect("write");
        fs::create_dir_all(dir.path().join("emaar/projects/_tmp")).expect("mkdir");
        fs::write(dir.path().join("emaar/projects/notes.txt"), "x").expect("file");

        assert_eq!(store.list_entities("emaar").expect("list"), vec!["silva", "valo"]);
        assert!(store.list_entities("nowhere").expect("list").is_empty());
    }

    #[test]
    fn missing_index_reads_as_none() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::open(dir.path()).expect("open");
        fs::create_dir_all(dir.path().join("damac/projects/empty-dir")).expect("mkdir");
        assert!(store.read_record("damac", "empty-dir").expect("read").is_none());
    }

    #[test]
    fn malformed_index_is_a_typed_error() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::open(dir.path()).expect("open");
        let entity = dir.path().join("damac/projects/broken");
        fs::create_dir_all(&entity).expect("mkdir");
        fs::write(entity.join("index.json"), "{not json").expect("write");
        let err = store.read_record("damac", "broken").unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }

    #[test]
    fn archive_moves_the_whole_entity() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::open(dir.path()).expect("open");
        store
            .write_record("sobha", "golf-ridges", &record(&[("slug", json!("golf-ridges"))]))
            .expect("write");

        store.archive_entity("sobha", "golf-ridges").expect("archive");
        assert!(store.list_entities("sobha").expect("list").is_empty());
        assert!(dir
            .path()
            .join("_archived/sobha/golf-ridges/index.json")
            .is_file());
    }

    #[test]
    fn promote_renames_within_the_namespace() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::open(dir.path()).expect("open");
        store
            .write_record("emaar", "silva", &record(&[("slug", json!("silva"))]))
            .expect("write");

        store
            .promote_entity("emaar", "silva", "silva-dubai-creek-harbour")
            .expect("promote");
        assert_eq!(
            store.list_entities("emaar").expect("list"),
            vec!["silva-dubai-creek-harbour"]
        );
    }
}
