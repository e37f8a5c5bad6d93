//! Authoritative record storage.

use crate::error::ServerResult;
use chrono::{DateTime, Utc};
use odsync_protocol::{ItemType, Payload, ServerSnapshot};
use odsync_storage::KeyValueStore;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The server's version of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Entity kind.
    pub item_type: ItemType,
    /// Entity identifier.
    pub item_id: String,
    /// Current field values.
    pub data: Payload,
    /// Server time of the last accepted write.
    pub updated_at: DateTime<Utc>,
}

impl ServerRecord {
    /// Creates a record.
    pub fn new(
        item_type: ItemType,
        item_id: impl Into<String>,
        data: Payload,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            item_type,
            item_id: item_id.into(),
            data,
            updated_at,
        }
    }

    /// Returns the snapshot sent back with a conflict.
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot::new(self.data.clone(), self.updated_at)
    }
}

type RecordKey = (ItemType, String);

/// In-memory record index with optional write-through persistence.
///
/// The index is authoritative while the server runs. A backing store,
/// when present, is written before the index so a failed write leaves
/// both unchanged.
pub struct RecordStore {
    records: RwLock<HashMap<RecordKey, ServerRecord>>,
    backing: Option<Arc<dyn KeyValueStore>>,
}

impl RecordStore {
    /// Creates an empty, memory-only store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            backing: None,
        }
    }

    /// Opens a store backed by `backing`, loading every persisted record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read or holds a
    /// record that does not decode.
    pub fn with_backing(backing: Arc<dyn KeyValueStore>) -> ServerResult<Self> {
        let mut records = HashMap::new();
        for bytes in backing.values()? {
            let record: ServerRecord = odsync_protocol::decode(&bytes)?;
            records.insert((record.item_type, record.item_id.clone()), record);
        }
        debug!(records = records.len(), "Loaded server records");

        Ok(Self {
            records: RwLock::new(records),
            backing: Some(backing),
        })
    }

    /// Returns the record for an entity.
    pub fn get(&self, item_type: ItemType, item_id: &str) -> Option<ServerRecord> {
        self.records
            .read()
            .get(&(item_type, item_id.to_string()))
            .cloned()
    }

    /// Stores a record, replacing any previous version.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store rejects the write.
    pub fn put(&self, record: ServerRecord) -> ServerResult<()> {
        if let Some(backing) = &self.backing {
            let bytes = odsync_protocol::encode(&record)?;
            backing.put(&storage_key(record.item_type, &record.item_id), &bytes)?;
        }
        self.records
            .write()
            .insert((record.item_type, record.item_id.clone()), record);
        Ok(())
    }

    /// Removes a record. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store rejects the delete.
    pub fn remove(&self, item_type: ItemType, item_id: &str) -> ServerResult<bool> {
        if let Some(backing) = &self.backing {
            backing.delete(&storage_key(item_type, item_id))?;
        }
        Ok(self
            .records
            .write()
            .remove(&(item_type, item_id.to_string()))
            .is_some())
    }

    /// Returns every record of one kind, ordered by id.
    pub fn records(&self, item_type: ItemType) -> Vec<ServerRecord> {
        let mut records: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|r| r.item_type == item_type)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        records
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Flushes the backing store, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&self) -> ServerResult<()> {
        if let Some(backing) = &self.backing {
            backing.flush()?;
        }
        Ok(())
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("records", &self.len())
            .field("persistent", &self.backing.is_some())
            .finish()
    }
}

fn storage_key(item_type: ItemType, item_id: &str) -> String {
    format!("{item_type}/{item_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use odsync_storage::InMemoryStore;
    use serde_json::json;

    fn record(item_id: &str, reason: &str) -> ServerRecord {
        let mut data = Payload::new();
        data.insert("reason".into(), json!(reason));
        ServerRecord::new(ItemType::Request, item_id, data, Utc::now())
    }

    #[test]
    fn put_get_remove() {
        let store = RecordStore::new();
        assert!(store.is_empty());

        store.put(record("req-1", "symposium")).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get(ItemType::Request, "req-1").is_some());
        assert!(store.get(ItemType::Profile, "req-1").is_none());

        assert!(store.remove(ItemType::Request, "req-1").unwrap());
        assert!(!store.remove(ItemType::Request, "req-1").unwrap());
    }

    #[test]
    fn records_survive_reopen() {
        let backing: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let store = RecordStore::with_backing(backing.clone()).unwrap();
        store.put(record("req-2", "hackathon")).unwrap();
        store.put(record("req-1", "symposium")).unwrap();
        store.remove(ItemType::Request, "req-2").unwrap();

        let reopened = RecordStore::with_backing(backing).unwrap();
        let records = reopened.records(ItemType::Request);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].item_id, "req-1");
        assert_eq!(records[0].data["reason"], json!("symposium"));
    }

    #[test]
    fn failed_persist_leaves_index_unchanged() {
        let backing = Arc::new(InMemoryStore::new());
        let store = RecordStore::with_backing(backing.clone()).unwrap();
        backing.set_unavailable(true);

        assert!(store.put(record("req-1", "symposium")).is_err());
        assert!(store.is_empty());
    }
}
