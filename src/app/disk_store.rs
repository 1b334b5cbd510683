//! # Disk key-value store
//!
//! Small JSON documents under a root directory, written with owner-only
//! permissions. All caches in the crate (SSO tokens, role credentials,
//! terminal sessions, account names) sit on top of this store.
//!
//! Writes go to a temporary file in the destination directory and are then
//! renamed over the target, so readers observe either the old or the new
//! document, never a partial one. There is no locking: concurrent writers to
//! the same key race and the last rename wins.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::app::error::{AwscError, Result};

#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Read and deserialize `key`. A missing file is `Ok(None)`.
    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AwscError::io(&path, e)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| AwscError::serialization(&path, e))
    }

    /// Serialize `value` and atomically replace `key` with it.
    pub fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.path_for(key);
        let data = serde_json::to_vec_pretty(value).map_err(|e| AwscError::serialization(&path, e))?;
        write_private_file(&path, &data)?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    /// Remove `key`. Returns whether a file was deleted.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AwscError::io(&path, e)),
        }
    }

    /// File names (not paths) directly under the root. A missing root is empty.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AwscError::io(&self.root, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AwscError::io(&self.root, e))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete every file whose name satisfies `predicate`. Returns the count removed.
    pub fn remove_matching(&self, predicate: impl Fn(&str) -> bool) -> Result<usize> {
        let mut removed = 0;
        for name in self.list_files()? {
            if predicate(&name) && self.remove(&name)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Create `dir` (and parents) restricted to the owner.
pub fn create_private_dir(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    // Existing directories such as ~/.aws keep their permissions
    builder.create(dir).map_err(|e| AwscError::io(dir, e))
}

/// Atomically replace `path` with `data`; the result is readable by the owner only.
pub fn write_private_file(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    create_private_dir(parent)?;

    // NamedTempFile is created 0600 on unix
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| AwscError::io(parent, e))?;
    tmp.write_all(data).map_err(|e| AwscError::io(path, e))?;
    tmp.as_file().sync_all().map_err(|e| AwscError::io(path, e))?;
    tmp.persist(path).map_err(|e| AwscError::io(path, e.error))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| AwscError::io(path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn missing_key_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("nested"));
        let doc: Option<Doc> = store.read_json("absent.json").unwrap();
        assert!(doc.is_none());
        assert!(store.list_files().unwrap().is_empty());
    }

    #[test]
    fn write_replaces_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("cache"));

        store
            .write_json("doc.json", &Doc { name: "first".into(), count: 1 })
            .unwrap();
        store
            .write_json("doc.json", &Doc { name: "second".into(), count: 2 })
            .unwrap();

        let doc: Doc = store.read_json("doc.json").unwrap().unwrap();
        assert_eq!(doc, Doc { name: "second".into(), count: 2 });
        assert_eq!(store.list_files().unwrap(), vec!["doc.json".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn files_and_directories_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("private");
        let store = DiskStore::new(&root);
        store
            .write_json("secret.json", &Doc { name: "x".into(), count: 0 })
            .unwrap();

        let dir_mode = fs::metadata(&root).unwrap().permissions().mode() & 0o777;
        let file_mode = fs::metadata(root.join("secret.json")).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }

    #[test]
    fn corrupt_document_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        fs::write(dir.path().join("bad.json"), b"{not json").unwrap();

        let err = store.read_json::<Doc>("bad.json").unwrap_err();
        assert!(matches!(err, AwscError::Serialization { .. }));
    }

    #[test]
    fn remove_matching_only_touches_selected_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        for key in ["creds-a.json", "creds-b.json", "token.json"] {
            store.write_json(key, &Doc { name: key.into(), count: 0 }).unwrap();
        }

        let removed = store.remove_matching(|name| name.starts_with("creds-")).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.list_files().unwrap(), vec!["token.json".to_string()]);
    }
}
