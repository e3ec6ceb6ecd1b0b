//! Record store: where the campaign set is persisted, with a staged-write protocol.
//!
//! A save writes the staged artifact and then promotes it over the committed one with
//! an atomic replace, so readers only ever see the old or the new content.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub trait RecordStore: Send + Sync {
    /// Read the committed artifact.
    fn read(&self) -> Result<Vec<u8>, StoreError>;
    /// A staged artifact exists that was never promoted.
    fn has_staged(&self) -> Result<bool, StoreError>;
    fn read_staged(&self) -> Result<Vec<u8>, StoreError>;
    fn write_staged(&self, bytes: &[u8]) -> Result<(), StoreError>;
    /// Atomically replace the committed artifact with the staged one.
    fn promote_staged(&self) -> Result<(), StoreError>;
    fn discard_committed(&self) -> Result<(), StoreError>;
    fn discard_staged(&self) -> Result<(), StoreError>;
    /// For log lines.
    fn describe(&self) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record store {0} not found")]
    Missing(String),
    #[error("record store I/O: {0}")]
    Io(#[from] io::Error),
    #[error("record store is corrupt: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("could not encode campaigns: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("campaign {0:?} defined more than once")]
    DuplicateCampaign(String),
}

/// File-backed store. The staged artifact sits next to the committed one with `.new` appended.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    committed: PathBuf,
    staged: PathBuf,
}

impl FileRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let committed = path.into();
        let mut staged = committed.clone().into_os_string();
        staged.push(".new");
        Self {
            committed,
            staged: PathBuf::from(staged),
        }
    }

    pub fn committed_path(&self) -> &Path {
        &self.committed
    }

    pub fn staged_path(&self) -> &Path {
        &self.staged
    }

    fn read_path(path: &Path) -> Result<Vec<u8>, StoreError> {
        fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::Missing(path.display().to_string()),
            _ => StoreError::Io(e),
        })
    }

    fn remove_if_present(path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    // Makes the rename itself durable; not every filesystem supports it.
    fn sync_parent(&self) {
        if let Some(parent) = self.committed.parent() {
            let dir = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            if let Ok(d) = File::open(dir) {
                let _ = d.sync_all();
            }
        }
    }
}

impl RecordStore for FileRecordStore {
    fn read(&self) -> Result<Vec<u8>, StoreError> {
        Self::read_path(&self.committed)
    }

    fn has_staged(&self) -> Result<bool, StoreError> {
        Ok(self.staged.try_exists()?)
    }

    fn read_staged(&self) -> Result<Vec<u8>, StoreError> {
        Self::read_path(&self.staged)
    }

    fn write_staged(&self, bytes: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = self.staged.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.staged)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        Ok(())
    }

    fn promote_staged(&self) -> Result<(), StoreError> {
        fs::rename(&self.staged, &self.committed)?;
        self.sync_parent();
        Ok(())
    }

    fn discard_committed(&self) -> Result<(), StoreError> {
        Self::remove_if_present(&self.committed)
    }

    fn discard_staged(&self) -> Result<(), StoreError> {
        Self::remove_if_present(&self.staged)
    }

    fn describe(&self) -> String {
        self.committed.display().to_string()
    }
}

#[derive(Debug, Default)]
struct MemoryArtifacts {
    committed: Option<Vec<u8>>,
    staged: Option<Vec<u8>>,
    fail_writes: bool,
}

/// In-process store. Clones share the same artifacts.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<Mutex<MemoryArtifacts>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_committed(bytes: Vec<u8>) -> Self {
        let store = Self::new();
        store.lock().committed = Some(bytes);
        store
    }

    pub fn committed(&self) -> Option<Vec<u8>> {
        self.lock().committed.clone()
    }

    pub fn staged(&self) -> Option<Vec<u8>> {
        self.lock().staged.clone()
    }

    /// Leave a staged artifact behind, as if a save was interrupted before promotion.
    pub fn set_staged(&self, bytes: Vec<u8>) {
        self.lock().staged = Some(bytes);
    }

    /// Make every subsequent staged write fail with an I/O error.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn lock(&self) -> MutexGuard<'_, MemoryArtifacts> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RecordStore for MemoryRecordStore {
    fn read(&self) -> Result<Vec<u8>, StoreError> {
        self.lock()
            .committed
            .clone()
            .ok_or_else(|| StoreError::Missing(self.describe()))
    }

    fn has_staged(&self) -> Result<bool, StoreError> {
        Ok(self.lock().staged.is_some())
    }

    fn read_staged(&self) -> Result<Vec<u8>, StoreError> {
        self.lock()
            .staged
            .clone()
            .ok_or_else(|| StoreError::Missing(format!("{} (staged)", self.describe())))
    }

    fn write_staged(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let mut a = self.lock();
        if a.fail_writes {
            return Err(StoreError::Io(io::Error::other("write refused")));
        }
        a.staged = Some(bytes.to_vec());
        Ok(())
    }

    fn promote_staged(&self) -> Result<(), StoreError> {
        let mut a = self.lock();
        match a.staged.take() {
            Some(bytes) => {
                a.committed = Some(bytes);
                Ok(())
            }
            None => Err(StoreError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "nothing staged",
            ))),
        }
    }

    fn discard_committed(&self) -> Result<(), StoreError> {
        self.lock().committed = None;
        Ok(())
    }

    fn discard_staged(&self) -> Result<(), StoreError> {
        self.lock().staged = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_path_appends_suffix() {
        let store = FileRecordStore::new("/var/lib/bluepoint/campaigns.json");
        assert_eq!(
            store.staged_path(),
            Path::new("/var/lib/bluepoint/campaigns.json.new")
        );
    }

    #[test]
    fn missing_committed_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRecordStore::new(dir.path().join("campaigns.json"));
        assert!(matches!(store.read(), Err(StoreError::Missing(_))));
        assert!(!store.has_staged().unwrap());
    }

    #[test]
    fn staged_write_then_promote_replaces_committed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campaigns.json");
        std::fs::write(&path, b"old").unwrap();
        let store = FileRecordStore::new(&path);

        store.write_staged(b"new").unwrap();
        assert!(store.has_staged().unwrap());
        assert_eq!(store.read().unwrap(), b"old");

        store.promote_staged().unwrap();
        assert!(!store.has_staged().unwrap());
        assert_eq!(store.read().unwrap(), b"new");
    }

    #[test]
    fn write_staged_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRecordStore::new(dir.path().join("state/campaigns.json"));
        store.write_staged(b"x").unwrap();
        store.promote_staged().unwrap();
        assert_eq!(store.read().unwrap(), b"x");
    }

    #[test]
    fn discard_is_noop_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRecordStore::new(dir.path().join("campaigns.json"));
        store.discard_committed().unwrap();
        store.discard_staged().unwrap();
    }

    #[test]
    fn memory_store_failed_write_keeps_committed() {
        let store = MemoryRecordStore::with_committed(b"old".to_vec());
        store.fail_writes(true);
        assert!(matches!(store.write_staged(b"new"), Err(StoreError::Io(_))));
        assert_eq!(store.read().unwrap(), b"old");
        assert!(store.staged().is_none());
    }

    #[test]
    fn memory_store_clones_share_state() {
        let store = MemoryRecordStore::new();
        let view = store.clone();
        store.write_staged(b"abc").unwrap();
        store.promote_staged().unwrap();
        assert_eq!(view.committed().unwrap(), b"abc");
    }
}
