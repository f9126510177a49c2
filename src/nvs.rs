//! Raw persistent key-value partition
//!
//! Models the device's non-volatile storage: named namespaces holding small
//! typed entries. A handle is opened per request, buffers writes, and makes
//! them visible with a single `commit()`.
//!
//! On-disk format of [`FilePartition`]:
//! ```json
//! { "system_settings": { "version": { "type": "i16", "value": 1 } } }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest key the partition accepts
pub const MAX_KEY_LEN: usize = 15;

/// Partition error types
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("namespace not found: {0}")]
    NotFound(String),

    #[error("handle for {0} is read-only")]
    ReadOnly(String),

    #[error("key too long: {0}")]
    KeyTooLong(String),

    #[error("type mismatch for key: {0}")]
    TypeMismatch(String),

    #[error("partition I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("partition data corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("commit rejected for namespace: {0}")]
    CommitFailed(String),

    #[error("partition lock poisoned")]
    Poisoned,
}

/// A single typed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    U8(u8),
    I16(i16),
    U16(u16),
}

/// Types that can be stored in the partition
pub trait Stored: Copy {
    fn into_value(self) -> Value;
    fn from_value(value: Value) -> Option<Self>;
}

impl Stored for u8 {
    fn into_value(self) -> Value {
        Value::U8(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::U8(v) => Some(v),
            _ => None,
        }
    }
}

impl Stored for i16 {
    fn into_value(self) -> Value {
        Value::I16(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::I16(v) => Some(v),
            _ => None,
        }
    }
}

impl Stored for u16 {
    fn into_value(self) -> Value {
        Value::U16(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::U16(v) => Some(v),
            _ => None,
        }
    }
}

/// Entries of one namespace
pub type Namespace = BTreeMap<String, Value>;

/// Backing storage for namespaces
///
/// `write` must replace the namespace as a whole: readers observe either the
/// previous contents or the new ones.
pub trait Partition: Send + Sync {
    /// Load a namespace, `None` if it was never written
    fn read(&self, namespace: &str) -> Result<Option<Namespace>, StoreError>;

    /// Replace a namespace with `entries`
    fn write(&self, namespace: &str, entries: &Namespace) -> Result<(), StoreError>;
}

/// Handle access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Open handle on a namespace
///
/// Writes stay local to the handle until [`Handle::commit`]. Dropping a handle
/// without committing discards them.
pub struct Handle<'a> {
    partition: &'a dyn Partition,
    namespace: String,
    mode: OpenMode,
    entries: Namespace,
    dirty: bool,
}

/// Open a namespace
///
/// Read-only opens of a namespace that does not exist fail with
/// [`StoreError::NotFound`]; read-write opens start from an empty namespace.
pub fn open<'a>(
    partition: &'a dyn Partition,
    namespace: &str,
    mode: OpenMode,
) -> Result<Handle<'a>, StoreError> {
    let entries = match (partition.read(namespace)?, mode) {
        (Some(entries), _) => entries,
        (None, OpenMode::ReadWrite) => Namespace::new(),
        (None, OpenMode::ReadOnly) => return Err(StoreError::NotFound(namespace.to_string())),
    };

    Ok(Handle {
        partition,
        namespace: namespace.to_string(),
        mode,
        entries,
        dirty: false,
    })
}

impl Handle<'_> {
    /// Read a key; `Ok(None)` when absent
    pub fn get<T: Stored>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.entries.get(key) {
            Some(value) => T::from_value(*value)
                .map(Some)
                .ok_or_else(|| StoreError::TypeMismatch(key.to_string())),
            None => Ok(None),
        }
    }

    /// Stage a write
    pub fn set<T: Stored>(&mut self, key: &str, value: T) -> Result<(), StoreError> {
        if self.mode == OpenMode::ReadOnly {
            return Err(StoreError::ReadOnly(self.namespace.clone()));
        }
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(StoreError::KeyTooLong(key.to_string()));
        }

        self.entries.insert(key.to_string(), value.into_value());
        self.dirty = true;
        Ok(())
    }

    /// Persist every staged write in one step
    pub fn commit(&mut self) -> Result<(), StoreError> {
        if self.mode == OpenMode::ReadOnly {
            return Err(StoreError::ReadOnly(self.namespace.clone()));
        }
        if !self.dirty {
            return Ok(());
        }

        self.partition.write(&self.namespace, &self.entries)?;
        self.dirty = false;
        Ok(())
    }
}

/// Partition persisted as a JSON file
///
/// Commits rewrite a temporary sibling file and rename it over the original.
pub struct FilePartition {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FilePartition {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load_all(&self) -> Result<HashMap<String, Namespace>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Partition for FilePartition {
    fn read(&self, namespace: &str) -> Result<Option<Namespace>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(self.load_all()?.remove(namespace))
    }

    fn write(&self, namespace: &str, entries: &Namespace) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;

        let mut all = self.load_all()?;
        all.insert(namespace.to_string(), entries.clone());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&all)?)?;
        fs::rename(&tmp, &self.path)?;

        tracing::debug!("Committed {} entries to {}", entries.len(), namespace);
        Ok(())
    }
}

/// Volatile partition for tests and tooling
#[derive(Default)]
pub struct MemoryPartition {
    namespaces: Mutex<HashMap<String, Namespace>>,
    reject_commits: Mutex<bool>,
}

impl MemoryPartition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent commit fail
    pub fn reject_commits(&self, reject: bool) {
        if let Ok(mut flag) = self.reject_commits.lock() {
            *flag = reject;
        }
    }
}

impl Partition for MemoryPartition {
    fn read(&self, namespace: &str) -> Result<Option<Namespace>, StoreError> {
        let namespaces = self.namespaces.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(namespaces.get(namespace).cloned())
    }

    fn write(&self, namespace: &str, entries: &Namespace) -> Result<(), StoreError> {
        if *self.reject_commits.lock().map_err(|_| StoreError::Poisoned)? {
            return Err(StoreError::CommitFailed(namespace.to_string()));
        }

        let mut namespaces = self.namespaces.lock().map_err(|_| StoreError::Poisoned)?;
        namespaces.insert(namespace.to_string(), entries.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_open_of_missing_namespace() {
        let partition = MemoryPartition::new();
        assert!(matches!(
            open(&partition, "system_settings", OpenMode::ReadOnly),
            Err(StoreError::NotFound(_))
        ));
        assert!(open(&partition, "system_settings", OpenMode::ReadWrite).is_ok());
    }

    #[test]
    fn test_writes_invisible_until_commit() {
        let partition = MemoryPartition::new();

        let mut handle = open(&partition, "ns", OpenMode::ReadWrite).unwrap();
        handle.set("padding-top", 12i16).unwrap();
        drop(handle);
        assert!(partition.read("ns").unwrap().is_none());

        let mut handle = open(&partition, "ns", OpenMode::ReadWrite).unwrap();
        handle.set("padding-top", 12i16).unwrap();
        handle.commit().unwrap();

        let handle = open(&partition, "ns", OpenMode::ReadOnly).unwrap();
        assert_eq!(handle.get::<i16>("padding-top").unwrap(), Some(12));
        assert_eq!(handle.get::<i16>("padding-left").unwrap(), None);
    }

    #[test]
    fn test_type_mismatch() {
        let partition = MemoryPartition::new();
        let mut handle = open(&partition, "ns", OpenMode::ReadWrite).unwrap();
        handle.set("refresh", 30u16).unwrap();
        assert!(matches!(handle.get::<u8>("refresh"), Err(StoreError::TypeMismatch(_))));
    }

    #[test]
    fn test_key_and_mode_checks() {
        let partition = MemoryPartition::new();
        let mut handle = open(&partition, "ns", OpenMode::ReadWrite).unwrap();
        assert!(matches!(
            handle.set("a-key-that-is-far-too-long", 1u8),
            Err(StoreError::KeyTooLong(_))
        ));
        handle.set("shuffle", 1u8).unwrap();
        handle.commit().unwrap();

        let mut handle = open(&partition, "ns", OpenMode::ReadOnly).unwrap();
        assert!(matches!(handle.set("shuffle", 0u8), Err(StoreError::ReadOnly(_))));
    }

    #[test]
    fn test_rejected_commit_keeps_previous_contents() {
        let partition = MemoryPartition::new();
        let mut handle = open(&partition, "ns", OpenMode::ReadWrite).unwrap();
        handle.set("inverted", 0u8).unwrap();
        handle.commit().unwrap();

        partition.reject_commits(true);
        let mut handle = open(&partition, "ns", OpenMode::ReadWrite).unwrap();
        handle.set("inverted", 1u8).unwrap();
        assert!(matches!(handle.commit(), Err(StoreError::CommitFailed(_))));

        let handle = open(&partition, "ns", OpenMode::ReadOnly).unwrap();
        assert_eq!(handle.get::<u8>("inverted").unwrap(), Some(0));
    }

    #[test]
    fn test_file_partition_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvs.json");

        {
            let partition = FilePartition::new(&path);
            let mut handle = open(&partition, "system_settings", OpenMode::ReadWrite).unwrap();
            handle.set("version", 1i16).unwrap();
            handle.set("refresh", 45u16).unwrap();
            handle.commit().unwrap();

            let mut other = open(&partition, "other", OpenMode::ReadWrite).unwrap();
            other.set("flag", 1u8).unwrap();
            other.commit().unwrap();
        }

        let partition = FilePartition::new(&path);
        let handle = open(&partition, "system_settings", OpenMode::ReadOnly).unwrap();
        assert_eq!(handle.get::<i16>("version").unwrap(), Some(1));
        assert_eq!(handle.get::<u16>("refresh").unwrap(), Some(45));
        assert!(partition.read("other").unwrap().is_some());
        assert!(!path.with_extension("tmp").exists());
    }
}
