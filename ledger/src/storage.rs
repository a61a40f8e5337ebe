//! Durable key/value storage for player snapshots.

use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::PathBuf,
    sync::{Mutex, PoisonError},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("storage unavailable")]
    Unavailable,
}

/// Byte-level store addressed by `/`-separated keys.
///
/// `write` must be atomic per key: a reader sees either the old or the new
/// value, never a mix.
pub trait Storage: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn write(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// One file per key under a root directory.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StorageError::Io {
            key: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    fn path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.root.clone();
        let mut segments = key.split('/').peekable();
        while let Some(segment) = segments.next() {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\')
            {
                return Err(StorageError::InvalidKey(key.to_string()));
            }
            if segments.peek().is_some() {
                path.push(segment);
            } else {
                path.push(format!("{segment}.json"));
            }
        }
        Ok(path)
    }
}

impl Storage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.path(key)?;
        let io = |source| StorageError::Io {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }

        // Write to a sibling and rename over the target
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).map_err(io)?;
        file.write_all(value).map_err(io)?;
        file.sync_all().map_err(io)?;
        fs::rename(&tmp, &path).map_err(io)?;
        debug!(key, bytes = value.len(), "wrote");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("bonkarena-storage-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_file_storage_roundtrip() {
        let root = temp_root();
        let storage = FileStorage::open(&root).unwrap();

        assert_eq!(storage.read("player/abc").unwrap(), None);
        storage.write("player/abc", b"{\"a\":1}").unwrap();
        assert_eq!(
            storage.read("player/abc").unwrap(),
            Some(b"{\"a\":1}".to_vec())
        );
        assert!(root.join("player").join("abc.json").exists());
        assert!(!root.join("player").join("abc.json.tmp").exists());

        storage.write("player/abc", b"{}").unwrap();
        assert_eq!(storage.read("player/abc").unwrap(), Some(b"{}".to_vec()));

        storage.remove("player/abc").unwrap();
        storage.remove("player/abc").unwrap();
        assert_eq!(storage.read("player/abc").unwrap(), None);

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_file_storage_rejects_escaping_keys() {
        let root = temp_root();
        let storage = FileStorage::open(&root).unwrap();
        for key in ["../x", "a//b", "", "a/./b", "a\\b"] {
            assert!(matches!(
                storage.write(key, b"1"),
                Err(StorageError::InvalidKey(_))
            ));
        }
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage.write("k", b"v").unwrap();
        assert_eq!(storage.read("k").unwrap(), Some(b"v".to_vec()));
        storage.remove("k").unwrap();
        assert_eq!(storage.read("k").unwrap(), None);
    }
}
