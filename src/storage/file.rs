//! Snapshot file store.
//!
//! The snapshot is serialized with bincode into a single file. Writes go to
//! a sibling temp file that is fsynced and renamed over the target, so the
//! visible file always holds a complete snapshot.
//!
//! Reads that do not ask for the latest state are served from an in-process
//! copy of the last file read or written.

use super::IndexStore;
use crate::core::error::{IndexError, IndexResult};
use crate::index::diff::KeyChanges;
use crate::index::key::NormalizedKey;
use crate::index::snapshot::{GroupIds, IndexSnapshot};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Current on-disk format version.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    snapshot: IndexSnapshot,
}

/// Snapshot store backed by one file.
pub struct FileStore {
    path: PathBuf,
    cached: RwLock<Option<Arc<IndexSnapshot>>>,
}

impl FileStore {
    /// Create a store at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: RwLock::new(None),
        }
    }

    /// Snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn load(&self) -> IndexResult<Arc<IndexSnapshot>> {
        if !self.path.exists() {
            return Ok(Arc::new(IndexSnapshot::new()));
        }
        let file = File::open(&self.path)?;
        let mut bytes = Vec::new();
        BufReader::new(file).read_to_end(&mut bytes)?;
        let decoded: SnapshotFile = bincode::deserialize(&bytes).map_err(|e| {
            IndexError::storage(format!(
                "failed to decode snapshot {}: {}",
                self.path.display(),
                e
            ))
        })?;
        if decoded.version != SNAPSHOT_FORMAT_VERSION {
            return Err(IndexError::storage(format!(
                "snapshot {} has format version {}, expected {}",
                self.path.display(),
                decoded.version,
                SNAPSHOT_FORMAT_VERSION
            )));
        }
        Ok(Arc::new(decoded.snapshot))
    }

    fn current(&self, read_latest: bool) -> IndexResult<Arc<IndexSnapshot>> {
        if !read_latest {
            if let Some(snapshot) = self.cached.read().as_ref() {
                return Ok(Arc::clone(snapshot));
            }
        }
        let snapshot = self.load()?;
        *self.cached.write() = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }
}

impl IndexStore for FileStore {
    fn read(&self, read_latest: bool) -> IndexResult<IndexSnapshot> {
        Ok(self.current(read_latest)?.as_ref().clone())
    }

    fn get(&self, key: &NormalizedKey) -> IndexResult<Option<GroupIds>> {
        Ok(self.current(false)?.get(key).cloned())
    }

    fn write(&self, snapshot: &IndexSnapshot, _changes: &KeyChanges) -> IndexResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let body = SnapshotFile {
            version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        };
        let bytes = bincode::serialize(&body)
            .map_err(|e| IndexError::storage(format!("failed to encode snapshot: {}", e)))?;

        let temp = self.temp_path();
        {
            let file = File::create(&temp)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&bytes)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        *self.cached.write() = Some(Arc::new(snapshot.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::key::GroupId;

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("index.bin"));
        assert!(store.read(true).unwrap().is_empty());
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let store = FileStore::new("/var/lib/msgindex/index.bin");
        assert_eq!(
            store.temp_path(),
            PathBuf::from("/var/lib/msgindex/index.bin.tmp")
        );
    }

    #[test]
    fn test_write_creates_parent_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.bin");
        let store = FileStore::new(&path);
        let mut snapshot = IndexSnapshot::new();
        snapshot.claim(NormalizedKey::new(8, "a"), &GroupId::from("g"));
        store.write(&snapshot, &KeyChanges::default()).unwrap();

        assert!(path.exists());
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        fs::write(&path, b"\x01\x00").unwrap();
        let store = FileStore::new(&path);
        assert!(matches!(
            store.read(true),
            Err(IndexError::Storage { .. })
        ));
    }
}
