//! File-backed keyed store for persistent storage.
//!
//! The file is an append-only log of framed records:
//!
//! ```text
//! ┌───────┬──────┬─────────┬─────┬───────────┬───────┐
//! │ ODKV  │ kind │ key_len │ key │ value_len │ value │
//! │ 4B    │ 1B   │ u32 LE  │     │ u32 LE    │       │
//! └───────┴──────┴─────────┴─────┴───────────┴───────┘
//! ```
//!
//! Opening the file replays every record into an in-memory index. A
//! record cut short by a crash is dropped and the file truncated back to
//! the last complete record.

use crate::backend::KeyValueStore;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const RECORD_MAGIC: &[u8; 4] = b"ODKV";
const KIND_PUT: u8 = 1;
const KIND_DELETE: u8 = 2;
/// magic + kind + key_len
const FIXED_HEADER: usize = 4 + 1 + 4;

/// Superseded records tolerated before an automatic compaction.
const COMPACT_MIN_GARBAGE: usize = 1024;

#[derive(Debug)]
struct LogState {
    file: File,
    size: u64,
    index: BTreeMap<String, Vec<u8>>,
    /// Records in the log that no longer contribute to the index.
    garbage: usize,
}

/// A file-backed keyed store.
///
/// Every write is appended to the log; reads are served from the
/// in-memory index. Data survives process restarts.
///
/// # Durability
///
/// - With `sync_on_write` (the default) each write calls `File::sync_data()`
/// - `flush()` always syncs data and metadata to disk
///
/// # Thread Safety
///
/// Writers are serialized by an internal lock, so concurrent `put`
/// calls never interleave their records.
///
/// # Example
///
/// ```no_run
/// use odsync_storage::{FileStore, KeyValueStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("queue.log")).unwrap();
/// store.put("item-1", b"payload").unwrap();
/// store.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: RwLock<LogState>,
    sync_on_write: bool,
}

impl FileStore {
    /// Opens or creates a file store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, read, or contains
    /// a record with an invalid header.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let replay = replay_log(&bytes)?;
        if replay.valid_len < bytes.len() as u64 {
            warn!(
                path = %path.display(),
                valid = replay.valid_len,
                actual = bytes.len(),
                "truncating torn record at end of store log"
            );
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }

        debug!(
            path = %path.display(),
            entries = replay.index.len(),
            garbage = replay.garbage,
            "opened file store"
        );

        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(LogState {
                file,
                size: replay.valid_len,
                index: replay.index,
                garbage: replay.garbage,
            }),
            sync_on_write: true,
        })
    }

    /// Opens or creates a file store, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Controls whether each write is synced to disk before returning.
    #[must_use]
    pub fn with_sync_on_write(mut self, sync_on_write: bool) -> Self {
        self.sync_on_write = sync_on_write;
        self
    }

    /// Returns the path to the underlying log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current size of the log file in bytes.
    #[must_use]
    pub fn log_size(&self) -> u64 {
        self.state.read().size
    }

    /// Rewrites the log so it holds exactly one record per live key.
    ///
    /// Uses write-then-rename for crash safety: the new log is written to
    /// a temporary file, synced, and renamed over the old one.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be written or renamed.
    pub fn compact(&self) -> StorageResult<()> {
        let mut state = self.state.write();
        self.compact_locked(&mut state)
    }

    fn compact_locked(&self, state: &mut LogState) -> StorageResult<()> {
        let temp_path = self.path.with_extension("compact");

        let mut buffer = Vec::new();
        for (key, value) in &state.index {
            encode_record(&mut buffer, KIND_PUT, key, value);
        }

        let mut temp = File::create(&temp_path)?;
        temp.write_all(&buffer)?;
        temp.sync_all()?;
        drop(temp);

        fs::rename(&temp_path, &self.path)?;
        sync_parent_dir(&self.path)?;

        state.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        state.size = buffer.len() as u64;
        let reclaimed = state.garbage;
        state.garbage = 0;

        debug!(path = %self.path.display(), reclaimed, "compacted store log");
        Ok(())
    }

    fn append_locked(&self, state: &mut LogState, kind: u8, key: &str, value: &[u8]) -> StorageResult<()> {
        let mut record = Vec::with_capacity(FIXED_HEADER + 4 + key.len() + value.len());
        encode_record(&mut record, kind, key, value);

        state.file.seek(SeekFrom::End(0))?;
        state.file.write_all(&record)?;
        if self.sync_on_write {
            state.file.sync_data()?;
        }
        state.size += record.len() as u64;
        Ok(())
    }

    fn maybe_compact(&self, state: &mut LogState) -> StorageResult<()> {
        if state.garbage >= COMPACT_MIN_GARBAGE && state.garbage > state.index.len() {
            self.compact_locked(state)?;
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.state.read().index.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let mut state = self.state.write();
        self.append_locked(&mut state, KIND_PUT, key, value)?;
        if state.index.insert(key.to_string(), value.to_vec()).is_some() {
            state.garbage += 1;
        }
        self.maybe_compact(&mut state)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut state = self.state.write();
        if !state.index.contains_key(key) {
            return Ok(false);
        }
        self.append_locked(&mut state, KIND_DELETE, key, &[])?;
        state.index.remove(key);
        // The delete record and the put it shadows are both dead weight
        state.garbage += 2;
        self.maybe_compact(&mut state)?;
        Ok(true)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.state.read().index.keys().cloned().collect())
    }

    fn values(&self) -> StorageResult<Vec<Vec<u8>>> {
        Ok(self.state.read().index.values().cloned().collect())
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.state.read().index.len())
    }

    fn flush(&self) -> StorageResult<()> {
        let mut state = self.state.write();
        state.file.flush()?;
        state.file.sync_all()?;
        Ok(())
    }
}

struct Replay {
    index: BTreeMap<String, Vec<u8>>,
    valid_len: u64,
    garbage: usize,
}

fn encode_record(out: &mut Vec<u8>, kind: u8, key: &str, value: &[u8]) {
    out.extend_from_slice(RECORD_MAGIC);
    out.push(kind);
    out.extend_from_slice(&(key.len() as u32).to_le_bytes());
    out.extend_from_slice(key.as_bytes());
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value);
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn replay_log(bytes: &[u8]) -> StorageResult<Replay> {
    let mut index = BTreeMap::new();
    let mut garbage = 0usize;
    let mut offset = 0usize;

    while offset < bytes.len() {
        if bytes.len() - offset < FIXED_HEADER {
            break;
        }
        if &bytes[offset..offset + 4] != RECORD_MAGIC {
            return Err(StorageError::corrupted(format!(
                "bad record magic at offset {offset}"
            )));
        }
        let kind = bytes[offset + 4];
        let Some(key_len) = read_u32(bytes, offset + 5) else {
            break;
        };
        let key_start = offset + FIXED_HEADER;
        let key_end = key_start + key_len as usize;
        let Some(value_len) = read_u32(bytes, key_end) else {
            break;
        };
        let value_start = key_end + 4;
        let value_end = value_start + value_len as usize;
        if value_end > bytes.len() {
            break;
        }

        let key = std::str::from_utf8(&bytes[key_start..key_end])
            .map_err(|_| StorageError::corrupted(format!("non UTF-8 key at offset {offset}")))?
            .to_string();

        match kind {
            KIND_PUT => {
                if index
                    .insert(key, bytes[value_start..value_end].to_vec())
                    .is_some()
                {
                    garbage += 1;
                }
            }
            KIND_DELETE => {
                index.remove(&key);
                garbage += 2;
            }
            other => {
                return Err(StorageError::corrupted(format!(
                    "unknown record kind {other} at offset {offset}"
                )));
            }
        }

        offset = value_end;
    }

    Ok(Replay {
        index,
        valid_len: offset as u64,
        garbage,
    })
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            File::open(parent)?.sync_all()?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> StorageResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 0);
        assert_eq!(store.log_size(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_put_and_get() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("queue.log")).unwrap();

        store.put("a", b"hello").unwrap();
        store.put("b", b"world").unwrap();

        assert_eq!(store.get("a").unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.get("b").unwrap(), Some(b"world".to_vec()));
        assert_eq!(store.keys().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");

        {
            let store = FileStore::open(&path).unwrap();
            store.put("a", b"persistent").unwrap();
            store.put("b", b"gone soon").unwrap();
            store.delete("b").unwrap();
            store.flush().unwrap();
        }

        {
            let store = FileStore::open(&path).unwrap();
            assert_eq!(store.get("a").unwrap(), Some(b"persistent".to_vec()));
            assert_eq!(store.get("b").unwrap(), None);
            assert_eq!(store.len().unwrap(), 1);
        }
    }

    #[test]
    fn file_overwrite_keeps_latest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");

        {
            let store = FileStore::open(&path).unwrap();
            store.put("a", b"v1").unwrap();
            store.put("a", b"v2").unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn file_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");

        let good_len = {
            let store = FileStore::open(&path).unwrap();
            store.put("a", b"complete").unwrap();
            store.log_size()
        };

        // Simulate a crash halfway through the next record
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"ODKV\x01\x05\x00").unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"complete".to_vec()));
        assert_eq!(store.log_size(), good_len);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn file_bad_magic_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");
        fs::write(&path, b"JUNKJUNKJUNKJUNK").unwrap();

        let result = FileStore::open(&path);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn file_compact_drops_dead_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");
        let store = FileStore::open(&path).unwrap();

        for i in 0..10 {
            store.put("a", format!("v{i}").as_bytes()).unwrap();
        }
        store.put("b", b"keep").unwrap();
        store.delete("b").unwrap();
        let before = store.log_size();

        store.compact().unwrap();
        assert!(store.log_size() < before);
        assert_eq!(store.get("a").unwrap(), Some(b"v9".to_vec()));

        // Writes after compaction land in the new file
        store.put("c", b"after").unwrap();
        drop(store);

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a", "c"]);
    }

    #[test]
    fn file_delete_missing_is_noop() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("queue.log")).unwrap();

        assert!(!store.delete("missing").unwrap());
        assert_eq!(store.log_size(), 0);
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("path").join("queue.log");

        let store = FileStore::open_with_create_dirs(&path).unwrap();
        assert_eq!(store.len().unwrap(), 0);
        assert_eq!(store.path(), path);
    }
}
