//! Property tests for conflict resolution and dispatch ordering.

use chrono::{Duration, TimeZone, Utc};
use odsync_protocol::{
    resolve, ItemType, Operation, Payload, QueueItem, Resolution, SyncConflict,
};
use proptest::prelude::*;
use serde_json::json;

/// Strategy for small string-to-integer payloads.
fn payload_strategy() -> impl Strategy<Value = Payload> {
    prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..6)
        .prop_map(|map| map.into_iter().map(|(k, v)| (k, json!(v))).collect())
}

/// Strategy for a conflict with independent local/server timestamps.
fn conflict_strategy() -> impl Strategy<Value = SyncConflict> {
    (
        payload_strategy(),
        payload_strategy(),
        0i64..1_000_000,
        0i64..1_000_000,
    )
        .prop_map(|(local, server, local_secs, server_secs)| {
            let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
            SyncConflict::new(
                "req-1",
                ItemType::Request,
                local,
                server,
                base + Duration::seconds(local_secs),
                base + Duration::seconds(server_secs),
            )
        })
}

proptest! {
    #[test]
    fn resolution_is_idempotent(conflict in conflict_strategy()) {
        prop_assert_eq!(resolve(&conflict), resolve(&conflict));
    }

    #[test]
    fn newer_timestamp_wins(conflict in conflict_strategy()) {
        let resolution = resolve(&conflict);
        if conflict.server_timestamp > conflict.local_timestamp {
            prop_assert_eq!(resolution.resolution, Resolution::UseServer);
            prop_assert_eq!(&resolution.merged_data, &conflict.server_data);
        } else {
            prop_assert_eq!(resolution.resolution, Resolution::UseLocal);
            prop_assert_eq!(&resolution.merged_data, &conflict.local_data);
        }
        prop_assert_ne!(resolution.resolution, Resolution::Merge);
    }

    #[test]
    fn dispatch_order_is_priority_then_age(
        entries in prop::collection::vec((-5i32..10, 0i64..10_000), 1..40)
    ) {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut items: Vec<QueueItem> = entries
            .iter()
            .map(|(priority, offset)| {
                let mut item = QueueItem::new(
                    "req",
                    ItemType::Request,
                    Operation::Update,
                    Payload::new(),
                    *priority,
                );
                item.queued_at = base + Duration::seconds(*offset);
                item
            })
            .collect();

        items.sort_by(QueueItem::dispatch_order);

        for pair in items.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(a.priority >= b.priority);
            if a.priority == b.priority {
                prop_assert!(a.queued_at <= b.queued_at);
            }
        }
    }
}
