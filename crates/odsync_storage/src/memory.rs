//! In-memory keyed store for testing.

use crate::backend::KeyValueStore;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory keyed store.
///
/// This store keeps all values in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral engines that don't need persistence
///
/// It can be switched into an unavailable state to exercise storage
/// failure paths.
///
/// # Example
///
/// ```rust
/// use odsync_storage::{InMemoryStore, KeyValueStore};
///
/// let store = InMemoryStore::new();
/// store.put("a", b"1").unwrap();
/// assert_eq!(store.len().unwrap(), 1);
///
/// store.set_unavailable(true);
/// assert!(store.get("a").is_err());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with the given entries.
    #[must_use]
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<u8>)>,
        K: Into<String>,
    {
        let data = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            data: RwLock::new(data),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent call fail with [`StorageError::Unavailable`]
    /// until reset with `false`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Removes every value.
    pub fn clear(&self) {
        self.data.write().clear();
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::unavailable("in-memory store switched off"))
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.check_available()?;
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.check_available()?;
        self.data.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        self.check_available()?;
        Ok(self.data.write().remove(key).is_some())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.check_available()?;
        Ok(self.data.read().keys().cloned().collect())
    }

    fn values(&self) -> StorageResult<Vec<Vec<u8>>> {
        self.check_available()?;
        Ok(self.data.read().values().cloned().collect())
    }

    fn len(&self) -> StorageResult<usize> {
        self.check_available()?;
        Ok(self.data.read().len())
    }

    fn flush(&self) -> StorageResult<()> {
        // Nothing is buffered
        self.check_available()
    }
}
