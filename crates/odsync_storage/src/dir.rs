//! Store directory management.
//!
//! An engine keeps its state in four boxes laid out as:
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ queue.log         # Pending mutations
//! ├─ conflicts.log     # Unresolved sync conflicts
//! ├─ items.log         # Domain entities (item store)
//! └─ meta.log          # Engine metadata (last sync time, ...)
//! ```
//!
//! The LOCK file ensures only one process writes to the directory at a time.

use crate::backend::KeyValueStore;
use crate::error::{StorageError, StorageResult};
use crate::file::FileStore;
use crate::memory::InMemoryStore;
use fs2::FileExt;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOCK_FILE: &str = "LOCK";

/// The named boxes an engine persists into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoxName {
    /// Queue items.
    Queue,
    /// Unresolved sync conflicts.
    Conflicts,
    /// Domain entities being synced.
    Items,
    /// Engine metadata.
    Meta,
}

impl BoxName {
    /// Every box, in layout order.
    pub const ALL: [BoxName; 4] = [
        BoxName::Queue,
        BoxName::Conflicts,
        BoxName::Items,
        BoxName::Meta,
    ];

    /// Returns the box name as used on disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            BoxName::Queue => "queue",
            BoxName::Conflicts => "conflicts",
            BoxName::Items => "items",
            BoxName::Meta => "meta",
        }
    }

    fn file_name(&self) -> String {
        format!("{}.log", self.as_str())
    }
}

impl fmt::Display for BoxName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holds an exclusive lock on a data directory.
///
/// Only one `StoreDir` instance can exist per directory at a time,
/// across processes.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens (creating if needed) and locks a data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path exists but is not a directory
    /// - Another process holds the lock (returns `Locked`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(StorageError::corrupted(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.display().to_string()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the log path of a box.
    #[must_use]
    pub fn box_path(&self, name: BoxName) -> PathBuf {
        self.path.join(name.file_name())
    }
}

/// The four stores backing one engine instance.
///
/// # Example
///
/// ```rust
/// use odsync_storage::{BoxName, Boxes, KeyValueStore};
///
/// let boxes = Boxes::in_memory();
/// assert_eq!(boxes.box_count(), 4);
/// boxes.get(BoxName::Items).put("req-1", b"{}").unwrap();
/// ```
#[derive(Clone)]
pub struct Boxes {
    queue: Arc<dyn KeyValueStore>,
    conflicts: Arc<dyn KeyValueStore>,
    items: Arc<dyn KeyValueStore>,
    meta: Arc<dyn KeyValueStore>,
    dir: Option<Arc<StoreDir>>,
}

impl Boxes {
    /// Creates four independent in-memory boxes.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            queue: Arc::new(InMemoryStore::new()),
            conflicts: Arc::new(InMemoryStore::new()),
            items: Arc::new(InMemoryStore::new()),
            meta: Arc::new(InMemoryStore::new()),
            dir: None,
        }
    }

    /// Builds boxes from caller-provided stores.
    pub fn from_stores(
        queue: Arc<dyn KeyValueStore>,
        conflicts: Arc<dyn KeyValueStore>,
        items: Arc<dyn KeyValueStore>,
        meta: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            queue,
            conflicts,
            items,
            meta,
            dir: None,
        }
    }

    /// Opens file-backed boxes inside a locked data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be locked or any box
    /// log cannot be opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let dir = StoreDir::open(path)?;
        let open = |name: BoxName| -> StorageResult<Arc<dyn KeyValueStore>> {
            Ok(Arc::new(FileStore::open(&dir.box_path(name))?))
        };

        Ok(Self {
            queue: open(BoxName::Queue)?,
            conflicts: open(BoxName::Conflicts)?,
            items: open(BoxName::Items)?,
            meta: open(BoxName::Meta)?,
            dir: Some(Arc::new(dir)),
        })
    }

    /// Returns the store for a box.
    #[must_use]
    pub fn get(&self, name: BoxName) -> Arc<dyn KeyValueStore> {
        match name {
            BoxName::Queue => Arc::clone(&self.queue),
            BoxName::Conflicts => Arc::clone(&self.conflicts),
            BoxName::Items => Arc::clone(&self.items),
            BoxName::Meta => Arc::clone(&self.meta),
        }
    }

    /// Returns the number of open boxes.
    #[must_use]
    pub fn box_count(&self) -> usize {
        BoxName::ALL.len()
    }

    /// Returns true if every box answers a trivial read.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        BoxName::ALL.iter().all(|name| self.get(*name).len().is_ok())
    }

    /// Returns the data directory for file-backed boxes.
    #[must_use]
    pub fn data_dir(&self) -> Option<&Path> {
        self.dir.as_deref().map(StoreDir::path)
    }

    /// Flushes every box.
    ///
    /// # Errors
    ///
    /// Returns the first flush error encountered.
    pub fn flush_all(&self) -> StorageResult<()> {
        for name in BoxName::ALL {
            self.get(name).flush()?;
        }
        Ok(())
    }
}

impl fmt::Debug for Boxes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Boxes")
            .field("data_dir", &self.data_dir())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn box_names() {
        assert_eq!(BoxName::Queue.as_str(), "queue");
        assert_eq!(BoxName::Meta.to_string(), "meta");
        assert_eq!(BoxName::ALL.len(), 4);
    }

    #[test]
    fn in_memory_boxes_are_independent() {
        let boxes = Boxes::in_memory();
        boxes.get(BoxName::Queue).put("k", b"queue").unwrap();

        assert_eq!(boxes.get(BoxName::Items).get("k").unwrap(), None);
        assert_eq!(boxes.box_count(), 4);
        assert!(boxes.is_reachable());
        assert!(boxes.data_dir().is_none());
    }

    #[test]
    fn unreachable_box_is_reported() {
        let queue = Arc::new(InMemoryStore::new());
        let boxes = Boxes::from_stores(
            queue.clone(),
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryStore::new()),
        );
        assert!(boxes.is_reachable());

        queue.set_unavailable(true);
        assert!(!boxes.is_reachable());
    }

    #[test]
    fn open_creates_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");

        let boxes = Boxes::open(&path).unwrap();
        assert_eq!(boxes.data_dir(), Some(path.as_path()));
        assert!(path.join("LOCK").exists());
        for name in BoxName::ALL {
            assert!(path.join(format!("{name}.log")).exists());
        }
    }

    #[test]
    fn open_persists_across_reopen() {
        let dir = tempdir().unwrap();

        {
            let boxes = Boxes::open(dir.path()).unwrap();
            boxes.get(BoxName::Meta).put("last_sync", b"now").unwrap();
            boxes.flush_all().unwrap();
        }

        let boxes = Boxes::open(dir.path()).unwrap();
        assert_eq!(
            boxes.get(BoxName::Meta).get("last_sync").unwrap(),
            Some(b"now".to_vec())
        );
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();

        let _first = StoreDir::open(dir.path()).unwrap();
        let second = StoreDir::open(dir.path());
        assert!(matches!(second, Err(StorageError::Locked(_))));
    }

    #[test]
    fn file_path_is_not_a_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"x").unwrap();

        assert!(StoreDir::open(&file).is_err());
    }
}
