use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result as AnyResult};

/// Well-known keys of the backing contract. One key holds the serialized
/// database, one the resumable identity, one the theme preference.
pub const DB_BLOB_KEY: &str = "expense_db";
pub const SESSION_KEY: &str = "session_user";
pub const THEME_KEY: &str = "theme";

const PARTIAL_SUFFIX: &str = ".partial";

/// Key → byte-blob contract the Persistence Adapter writes through.
///
/// Implementations must make `put` atomic: a reader never observes a
/// half-written value for a key.
pub trait BackingStore: Send + Sync {
    fn get(&self, key: &str) -> AnyResult<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> AnyResult<()>;
    fn remove(&self, key: &str) -> AnyResult<()>;

    /// Directory backing this store, when there is one. The save preflight
    /// uses it to check free space before snapshotting.
    fn dir(&self) -> Option<&Path> {
        None
    }
}

impl<T: BackingStore + ?Sized> BackingStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> AnyResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> AnyResult<()> {
        (**self).put(key, value)
    }

    fn remove(&self, key: &str) -> AnyResult<()> {
        (**self).remove(key)
    }

    fn dir(&self) -> Option<&Path> {
        (**self).dir()
    }
}

/// One file per key under a base directory, staged via a `.partial` sibling
/// and renamed into place.
pub struct FileBackingStore {
    base: PathBuf,
}

impl FileBackingStore {
    pub fn open(base: impl Into<PathBuf>) -> AnyResult<Self> {
        let base = base.into();
        fs::create_dir_all(&base)
            .with_context(|| format!("create backing dir {}", base.display()))?;
        Ok(Self { base })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base.join(key)
    }
}

impl BackingStore for FileBackingStore {
    fn get(&self, key: &str) -> AnyResult<Option<Vec<u8>>> {
        let path = self.key_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read key {}", path.display())),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> AnyResult<()> {
        let path = self.key_path(key);
        let staged = self.base.join(format!("{key}{PARTIAL_SUFFIX}"));
        fs::write(&staged, value)
            .with_context(|| format!("stage key {}", staged.display()))?;
        fs::rename(&staged, &path)
            .with_context(|| format!("publish key {}", path.display()))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> AnyResult<()> {
        let path = self.key_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove key {}", path.display())),
        }
    }

    fn dir(&self) -> Option<&Path> {
        Some(&self.base)
    }
}

/// Heap-backed store for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryBackingStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackingStore for MemoryBackingStore {
    fn get(&self, key: &str) -> AnyResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().expect("backing map").get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> AnyResult<()> {
        self.entries
            .lock()
            .expect("backing map")
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> AnyResult<()> {
        self.entries.lock().expect("backing map").remove(key);
        Ok(())
    }
}
