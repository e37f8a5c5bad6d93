//! Property tests: a reopened file store matches a model map.

use odsync_storage::{FileStore, InMemoryStore, KeyValueStore};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Op {
    Put(String, Vec<u8>),
    Delete(String),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let key = "[a-d]{1,2}";
    prop_oneof![
        (key, proptest::collection::vec(any::<u8>(), 0..16)).prop_map(|(k, v)| Op::Put(k, v)),
        key.prop_map(Op::Delete),
    ]
}

fn apply(store: &dyn KeyValueStore, model: &mut BTreeMap<String, Vec<u8>>, op: &Op) {
    match op {
        Op::Put(k, v) => {
            store.put(k, v).unwrap();
            model.insert(k.clone(), v.clone());
        }
        Op::Delete(k) => {
            let removed = store.delete(k).unwrap();
            assert_eq!(removed, model.remove(k).is_some());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn reopened_file_store_matches_model(ops in proptest::collection::vec(op_strategy(), 0..40)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("box.log");
        let mut model = BTreeMap::new();

        {
            let store = FileStore::open(&path).unwrap().with_sync_on_write(false);
            for op in &ops {
                apply(&store, &mut model, op);
            }
            store.flush().unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        prop_assert_eq!(store.keys().unwrap(), model.keys().cloned().collect::<Vec<_>>());
        prop_assert_eq!(store.values().unwrap(), model.values().cloned().collect::<Vec<_>>());
    }

    #[test]
    fn memory_store_matches_model(ops in proptest::collection::vec(op_strategy(), 0..40)) {
        let store = InMemoryStore::new();
        let mut model = BTreeMap::new();
        for op in &ops {
            apply(&store, &mut model, op);
        }
        prop_assert_eq!(store.len().unwrap(), model.len());
    }
}
