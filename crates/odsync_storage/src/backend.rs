//! Keyed store trait definition.

use crate::error::StorageResult;

/// A durable keyed store.
///
/// Stores are **opaque byte maps**. They provide simple operations for
/// reading, writing and enumerating values by string key. Callers own
/// all value encoding - stores never look inside a value.
///
/// # Invariants
///
/// - `get` after a successful `put` returns exactly the bytes written
/// - `delete` returns whether a value was present
/// - Concurrent writers never lose an update (writes are serialized)
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or an I/O error occurs.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the write fails.
    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes the value stored under `key`.
    ///
    /// Returns `true` if a value was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the write fails.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Returns all keys in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Returns all values, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    fn values(&self) -> StorageResult<Vec<Vec<u8>>>;

    /// Returns the number of stored values.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    fn len(&self) -> StorageResult<usize> {
        Ok(self.keys()?.len())
    }

    /// Returns true if the store holds no values.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Flushes pending writes to durable storage.
    ///
    /// After this returns successfully, all previous writes are
    /// guaranteed to survive process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&self) -> StorageResult<()>;
}
