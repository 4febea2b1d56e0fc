//! Synchronous key-value persistence / 同步键值存储
//!
//! Used for the search cache blob only. Callers treat every error here as
//! "nothing stored". / 仅用于缓存持久化，出错时调用方视为空

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid kv key: {0:?}")]
    InvalidKey(String),
}

/// Byte-string key-value store / 键值存储接口
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError>;
    fn remove(&self, key: &str) -> Result<(), KvError>;
}

/// Process-local store / 内存实现
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// One file per key inside a directory / 每个键一个文件
#[derive(Debug, Clone)]
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    /// Create the store, making sure the directory exists / 创建存储目录
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, KvError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, KvError> {
        let valid = !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(KvError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.kv", key)))
    }
}

impl KeyValueStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        let path = self.path_for(key)?;
        // 先写临时文件再重命名，避免写到一半的内容
        let tmp = path.with_extension("kv.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_kv() {
        let kv = MemoryKvStore::new();
        assert!(kv.get("a").unwrap().is_none());
        kv.set("a", b"1").unwrap();
        assert_eq!(kv.get("a").unwrap(), Some(b"1".to_vec()));
        kv.remove("a").unwrap();
        assert!(kv.get("a").unwrap().is_none());
    }

    #[test]
    fn test_file_kv_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FileKvStore::new(dir.path()).unwrap();
        kv.set("search_cache", b"{\"entries\":[]}").unwrap();

        let reopened = FileKvStore::new(dir.path()).unwrap();
        assert_eq!(reopened.get("search_cache").unwrap(), Some(b"{\"entries\":[]}".to_vec()));

        reopened.remove("search_cache").unwrap();
        reopened.remove("search_cache").unwrap();
        assert!(kv.get("search_cache").unwrap().is_none());
    }

    #[test]
    fn test_file_kv_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FileKvStore::new(dir.path()).unwrap();
        assert!(matches!(kv.get("../etc"), Err(KvError::InvalidKey(_))));
        assert!(matches!(kv.set("", b""), Err(KvError::InvalidKey(_))));
    }
}
