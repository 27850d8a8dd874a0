//! Key-addressed JSON blobs on local disk.
//!
//! Each key maps to `<root>/<key>.json`. Writes go through a sibling temp
//! file and a rename so a reader never sees a half-written blob.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub const JOURNAL_KEY: &str = "ground_me_journal";
pub const SETTINGS_KEY: &str = "ground_me_settings";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub fn default_data_dir() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("ground-me")
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// `Ok(None)` when nothing is stored under `key`.
    pub fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    pub fn write(&self, key: &str, contents: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;

        let path = self.path_for(key);
        let staging = self.root.join(format!("{key}.json.tmp"));
        fs::write(&staging, contents).map_err(|source| StoreError::Io {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(key, bytes = contents.len(), "stored blob");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_reads_as_none() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let store = LocalStore::new(dir.path());
        assert!(store.read("absent").expect("missing key should read").is_none());
    }

    #[test]
    fn unreadable_blob_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let store = LocalStore::new(dir.path());
        fs::write(store.path_for("blob"), [0xff, 0xfe, 0x00]).expect("raw bytes should write");

        assert!(matches!(store.read("blob"), Err(StoreError::Io { .. })));
    }

    #[test]
    fn write_creates_root_and_replaces_contents() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let store = LocalStore::new(dir.path().join("nested"));

        store.write("blob", "[1]").expect("first write should succeed");
        store.write("blob", "[2]").expect("second write should succeed");

        assert_eq!(
            store.read("blob").expect("blob should read").as_deref(),
            Some("[2]")
        );
        assert!(!dir.path().join("nested").join("blob.json.tmp").exists());
    }
}
