//! Key-value byte storage the task store writes through.
//!
//! Two backends: [`FileStore`] keeps one file per key inside a data
//! directory, [`MemoryStore`] keeps everything in process memory. Both can
//! enforce a byte ceiling and report a full store as
//! [`KvError::CapacityExceeded`], distinct from every other failure.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;

use thiserror::Error;

const TMP_SUFFIX: &str = ".tmp";

/// Errors raised by a key-value backend.
#[derive(Error, Debug)]
pub enum KvError {
    #[error("storage capacity exceeded: {needed} bytes needed, {available} available")]
    CapacityExceeded { needed: usize, available: usize },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("invalid storage key `{0}`")]
    InvalidKey(String),

    #[error("storage i/o failed: {0}")]
    Io(#[from] io::Error),
}

impl KvError {
    pub fn is_capacity(&self) -> bool {
        matches!(self, KvError::CapacityExceeded { .. })
    }
}

/// Durable byte storage addressed by string keys.
///
/// A `set` either stores the whole value or leaves the previous value in
/// place; readers never observe a partially written value.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;
    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), KvError>;
    fn remove(&mut self, key: &str) -> Result<(), KvError>;
    fn keys(&self) -> Result<Vec<String>, KvError>;
}

/// Sum of key and value lengths, the way browser storage quotas count.
fn entry_size(key: &str, value_len: usize) -> usize {
    key.len() + value_len
}

fn check_capacity(
    capacity: Option<usize>,
    used_elsewhere: usize,
    needed: usize,
) -> Result<(), KvError> {
    match capacity {
        Some(capacity) if used_elsewhere + needed > capacity => Err(KvError::CapacityExceeded {
            needed,
            available: capacity.saturating_sub(used_elsewhere),
        }),
        _ => Ok(()),
    }
}

/// In-process store. Used when no durable storage is reachable, and by tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, Vec<u8>>,
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity: Some(capacity),
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|(k, v)| entry_size(k, v.len()))
            .sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), KvError> {
        let current = self
            .entries
            .get(key)
            .map(|v| entry_size(key, v.len()))
            .unwrap_or(0);
        check_capacity(
            self.capacity,
            self.used_bytes() - current,
            entry_size(key, value.len()),
        )?;
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), KvError> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        Ok(self.entries.keys().cloned().collect())
    }
}

/// One file per key inside `dir`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    capacity: Option<usize>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>, capacity: Option<usize>) -> Result<Self, KvError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| {
            KvError::Unavailable(format!("cannot create {}: {err}", dir.display()))
        })?;
        Ok(Self { dir, capacity })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, KvError> {
        let valid = !key.is_empty()
            && !key.ends_with(TMP_SUFFIX)
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(KvError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }

    fn used_bytes_except(&self, except: &str) -> Result<usize, KvError> {
        let mut used = 0;
        for key in self.keys()? {
            if key == except {
                continue;
            }
            let len = fs::metadata(self.dir.join(&key))?.len() as usize;
            used += entry_size(&key, len);
        }
        Ok(used)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), KvError> {
        let path = self.path_for(key)?;
        check_capacity(
            self.capacity,
            self.used_bytes_except(key)?,
            entry_size(key, value.len()),
        )?;

        let tmp = self.dir.join(format!("{key}{TMP_SUFFIX}"));
        let written = File::create(&tmp).and_then(|mut f| {
            f.write_all(value)?;
            f.sync_all()
        });
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), KvError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(TMP_SUFFIX) && !name.starts_with('.') {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_store_basic_operations() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);
        store.set("a", b"one").unwrap();
        store.set("b", b"two").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some(&b"one"[..]));
        assert_eq!(store.keys().unwrap(), ["a", "b"]);
        store.remove("a").unwrap();
        store.remove("a").unwrap();
        assert_eq!(store.keys().unwrap(), ["b"]);
    }

    #[test]
    fn memory_store_enforces_capacity_without_partial_writes() {
        let mut store = MemoryStore::with_capacity(10);
        store.set("k", b"12345").unwrap();
        // Overwrites only count the new size.
        store.set("k", b"123456789").unwrap();
        let err = store.set("k", b"1234567890").unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(store.get("k").unwrap().as_deref(), Some(&b"123456789"[..]));
        assert!(store.set("z", b"").unwrap_err().is_capacity());
    }

    #[test]
    fn file_store_round_trips_bytes() {
        let dir = tempdir().unwrap();
        let mut store = FileStore::open(dir.path().join("data"), None).unwrap();
        assert_eq!(store.get("tasks").unwrap(), None);
        store.set("tasks", b"[1,2,3]").unwrap();
        assert_eq!(store.get("tasks").unwrap().as_deref(), Some(&b"[1,2,3]"[..]));
        store.set("tasks", b"[]").unwrap();
        assert_eq!(store.get("tasks").unwrap().as_deref(), Some(&b"[]"[..]));
        assert_eq!(store.keys().unwrap(), ["tasks"]);
        store.remove("tasks").unwrap();
        store.remove("tasks").unwrap();
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn file_store_ignores_leftover_temp_files() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), None).unwrap();
        fs::write(dir.path().join("tasks.tmp"), b"half").unwrap();
        fs::create_dir(dir.path().join("logs")).unwrap();
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let dir = tempdir().unwrap();
        let mut store = FileStore::open(dir.path(), None).unwrap();
        for key in ["", "../escape", "a/b", ".hidden", "x.tmp"] {
            assert!(
                matches!(store.set(key, b"x"), Err(KvError::InvalidKey(_))),
                "key {key:?} should be rejected"
            );
        }
    }

    #[test]
    fn file_store_capacity_keeps_previous_value() {
        let dir = tempdir().unwrap();
        let mut store = FileStore::open(dir.path(), Some(20)).unwrap();
        store.set("a", b"0123456789").unwrap();
        let err = store.set("b", b"0123456789").unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(store.get("b").unwrap(), None);
        store.set("a", b"0123456789abcdefg").unwrap();
        assert!(store.set("a", b"0123456789abcdefghijk").unwrap_err().is_capacity());
        assert_eq!(
            store.get("a").unwrap().as_deref(),
            Some(&b"0123456789abcdefg"[..])
        );
    }
}
