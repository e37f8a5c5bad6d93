//! Durable storage for unresolved conflicts.

use crate::error::{EngineResult, SyncError};
use odsync_protocol::{ConflictId, SyncConflict};
use odsync_storage::KeyValueStore;
use std::sync::Arc;

/// Holds conflicts from detection until resolution.
pub struct ConflictStore {
    store: Arc<dyn KeyValueStore>,
}

impl ConflictStore {
    /// Creates a conflict store over a key-value store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Persists a conflict, replacing any conflict with the same id.
    pub fn save(&self, conflict: &SyncConflict) -> EngineResult<()> {
        self.store.put(conflict.id.as_str(), &conflict.encode()?)?;
        Ok(())
    }

    /// Gets a conflict by id.
    pub fn get(&self, id: &ConflictId) -> EngineResult<Option<SyncConflict>> {
        match self.store.get(id.as_str())? {
            Some(bytes) => Ok(Some(SyncConflict::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Lists all conflicts, oldest detection first.
    pub fn list(&self) -> EngineResult<Vec<SyncConflict>> {
        let mut conflicts = self
            .store
            .values()?
            .iter()
            .map(|bytes| SyncConflict::decode(bytes).map_err(SyncError::from))
            .collect::<EngineResult<Vec<_>>>()?;
        conflicts.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then_with(|| a.id.cmp(&b.id)));
        Ok(conflicts)
    }

    /// Removes a conflict. Returns true if it was present.
    pub fn remove(&self, id: &ConflictId) -> EngineResult<bool> {
        Ok(self.store.delete(id.as_str())?)
    }

    /// Number of stored conflicts.
    pub fn count(&self) -> EngineResult<usize> {
        Ok(self.store.len()?)
    }
}

impl std::fmt::Debug for ConflictStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use odsync_protocol::{ItemType, Payload};
    use odsync_storage::InMemoryStore;

    fn make_conflict(item_id: &str) -> SyncConflict {
        let now = Utc::now();
        SyncConflict::new(
            item_id,
            ItemType::Request,
            Payload::new(),
            Payload::new(),
            now,
            now + Duration::hours(1),
        )
    }

    #[test]
    fn save_get_remove() {
        let store = ConflictStore::new(Arc::new(InMemoryStore::new()));
        let conflict = make_conflict("req-1");

        store.save(&conflict).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get(&conflict.id).unwrap(), Some(conflict.clone()));

        assert!(store.remove(&conflict.id).unwrap());
        assert!(!store.remove(&conflict.id).unwrap());
        assert!(store.get(&conflict.id).unwrap().is_none());
    }

    #[test]
    fn list_is_ordered_by_detection() {
        let store = ConflictStore::new(Arc::new(InMemoryStore::new()));
        let mut first = make_conflict("req-1");
        let mut second = make_conflict("req-2");
        first.detected_at = Utc::now() - Duration::minutes(5);
        second.detected_at = Utc::now();

        store.save(&second).unwrap();
        store.save(&first).unwrap();

        let listed: Vec<_> = store.list().unwrap().into_iter().map(|c| c.item_id).collect();
        assert_eq!(listed, vec!["req-1".to_string(), "req-2".to_string()]);
    }
}
