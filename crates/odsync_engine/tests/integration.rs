//! Integration tests: engine against the reference remote server.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use odsync_engine::{
    EngineResult, ManualConnectivity, RemoteEndpoint, SyncConfig, SyncEngine, SyncError,
};
use odsync_protocol::{
    ItemType, OdRequest, Operation, Payload, QueueItem, QueueState, RemoteResponse, Resolution,
};
use odsync_server::{RemoteServer, ServerConfig, ServerError, ServerRecord};
use odsync_storage::{Boxes, InMemoryStore, KeyValueStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Remote endpoint that calls the server in-process.
struct InMemoryRemote {
    server: Arc<RemoteServer>,
}

fn to_sync_error(err: ServerError) -> SyncError {
    if err.is_client_error() {
        SyncError::remote_fatal(err.to_string())
    } else {
        SyncError::remote_retryable(err.to_string())
    }
}

#[async_trait]
impl RemoteEndpoint for InMemoryRemote {
    async fn create_remote(&self, item: &QueueItem) -> EngineResult<RemoteResponse> {
        self.server
            .handle_create(item.item_type, &item.item_id, &item.payload, item.queued_at)
            .await
            .map_err(to_sync_error)
    }

    async fn update_remote(&self, item: &QueueItem) -> EngineResult<RemoteResponse> {
        self.server
            .handle_update(item.item_type, &item.item_id, &item.payload, item.queued_at)
            .await
            .map_err(to_sync_error)
    }

    async fn delete_remote(&self, item_type: ItemType, item_id: &str) -> EngineResult<()> {
        self.server
            .handle_delete(item_type, item_id)
            .await
            .map_err(to_sync_error)
    }
}

struct Setup {
    engine: SyncEngine,
    server: Arc<RemoteServer>,
    connectivity: Arc<ManualConnectivity>,
}

fn setup_with(config: SyncConfig, server: RemoteServer, boxes: Boxes) -> Setup {
    let server = Arc::new(server);
    let connectivity = Arc::new(ManualConnectivity::connected());
    let engine = SyncEngine::new(
        config,
        boxes,
        Arc::new(InMemoryRemote {
            server: server.clone(),
        }),
        connectivity.clone(),
    )
    .unwrap();
    Setup {
        engine,
        server,
        connectivity,
    }
}

fn setup() -> Setup {
    setup_with(
        SyncConfig::default(),
        RemoteServer::new(ServerConfig::default()),
        Boxes::in_memory(),
    )
}

fn make_request(id: &str) -> OdRequest {
    OdRequest::new(
        id,
        "student-7",
        "21CS042",
        "Asha R",
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
        vec![1, 2, 3],
        "Inter-college symposium",
    )
}

#[tokio::test]
async fn client_server_full_sync() {
    let s = setup();
    let tracker = s.engine.tracker();

    // Offline submissions never touch the server
    tracker.queue_create(&make_request("req-1")).unwrap();
    tracker.queue_create(&make_request("req-2")).unwrap();
    assert_eq!(s.server.request_count(), 0);

    let result = s.engine.orchestrator().sync_all().await.unwrap();
    assert!(result.success);
    assert_eq!(result.items_synced, 2);
    assert_eq!(s.server.records(ItemType::Request).len(), 2);

    // Staff approves both in one operation
    let op = tracker
        .bulk_approve(
            vec!["req-1".into(), "req-2".into()],
            "staff-3",
            "Verified with HOD",
        )
        .unwrap();
    let result = s.engine.orchestrator().sync_all().await.unwrap();
    assert_eq!(result.items_synced, 2);
    assert!(tracker.operation(&op).is_none());
    assert_eq!(tracker.statistics().completed_count, 3);

    for record in s.server.records(ItemType::Request) {
        assert_eq!(record.data["status"], json!("approved"));
        assert_eq!(record.data["approved_by_id"], json!("staff-3"));
        assert!(record.data.contains_key("approved_at"));
        assert_eq!(record.data["reason"], json!("Inter-college symposium"));
    }

    let health = s.engine.queue().health().unwrap();
    assert_eq!(health.completed, 4);
    assert_eq!(health.pending, 0);
}

#[tokio::test]
async fn decision_queued_after_create_keeps_entity_order() {
    let s = setup();
    let tracker = s.engine.tracker();
    tracker.queue_create(&make_request("req-1")).unwrap();
    tracker
        .bulk_approve(vec!["req-1".into()], "staff-3", "Verified with HOD")
        .unwrap();

    let result = s.engine.orchestrator().sync_all().await.unwrap();
    assert!(result.success);
    assert_eq!(result.items_synced, 2);

    let items = s.engine.queue().items(None).unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.state == QueueState::Completed));
    assert!(s.engine.orchestrator().pending_conflicts().unwrap().is_empty());

    let record = s.server.record(ItemType::Request, "req-1").unwrap();
    assert_eq!(record.data["status"], json!("approved"));
    assert_eq!(record.data["reason"], json!("Inter-college symposium"));
}

#[tokio::test]
async fn edit_queued_before_decision_reaches_server() {
    let s = setup();
    let tracker = s.engine.tracker();
    tracker.queue_create(&make_request("req-1")).unwrap();
    s.engine.orchestrator().sync_all().await.unwrap();

    let mut edited = make_request("req-1");
    edited.periods = vec![6, 7];
    tracker.queue_update(&edited).unwrap();
    tracker
        .bulk_approve(vec!["req-1".into()], "staff-3", "Verified with HOD")
        .unwrap();

    s.engine.orchestrator().sync_all().await.unwrap();
    assert!(s.engine.orchestrator().pending_conflicts().unwrap().is_empty());

    let record = s.server.record(ItemType::Request, "req-1").unwrap();
    assert_eq!(record.data["periods"], json!([6, 7]));
    assert_eq!(record.data["status"], json!("approved"));
}

#[tokio::test]
async fn empty_sync() {
    let s = setup();

    let result = s.engine.orchestrator().sync_all().await.unwrap();
    assert!(result.success);
    assert_eq!(result.items_synced, 0);
    assert_eq!(result.items_failed, 0);
    assert!(result.errors.is_empty());
    assert_eq!(s.server.request_count(), 0);
}

#[tokio::test]
async fn offline_sync_leaves_queue_untouched() {
    let s = setup();
    s.engine
        .tracker()
        .queue_create(&make_request("req-1"))
        .unwrap();
    s.connectivity.go_offline();
    let before = s.engine.queue().items(None).unwrap();

    let err = s.engine.orchestrator().sync_all().await.unwrap_err();
    assert!(matches!(err, SyncError::NoConnection));
    assert!(!err.is_retryable());

    assert_eq!(s.engine.queue().items(None).unwrap(), before);
    assert_eq!(s.server.request_count(), 0);
}

#[tokio::test]
async fn conflict_then_resolve() {
    let s = setup();
    let tracker = s.engine.tracker();
    tracker.queue_create(&make_request("req-1")).unwrap();
    s.engine.orchestrator().sync_all().await.unwrap();

    // Another device edits the record an hour ahead of us
    let server_time = Utc::now() + ChronoDuration::hours(1);
    let mut server_data = s.server.record(ItemType::Request, "req-1").unwrap().data;
    server_data.insert("reason".into(), json!("State-level hackathon"));
    s.server
        .insert_record(ServerRecord::new(
            ItemType::Request,
            "req-1",
            server_data.clone(),
            server_time,
        ))
        .unwrap();

    let mut edited = make_request("req-1");
    edited.periods = vec![4, 5];
    let update = tracker.queue_update(&edited).unwrap();

    let result = s.engine.orchestrator().sync_all().await.unwrap();
    assert!(result.success);
    assert_eq!(result.items_failed, 0);
    assert!(tracker.operation(&update).is_none());

    let conflicts = s.engine.orchestrator().pending_conflicts().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].server_timestamp, server_time);
    assert_eq!(conflicts[0].server_data, server_data);
    assert_eq!(
        s.engine.queue().items(Some(QueueState::Conflicted)).unwrap().len(),
        1
    );

    let resolutions = s.engine.orchestrator().resolve_conflicts(&conflicts);
    assert_eq!(resolutions.len(), 1);
    assert_eq!(resolutions[0].resolution, Resolution::UseServer);
    assert_eq!(resolutions[0].merged_data, server_data);
    assert_eq!(s.engine.conflicts().count().unwrap(), 0);

    let pending = s.engine.queue().items(Some(QueueState::Pending)).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].priority, 8);
    assert_eq!(pending[0].operation, Operation::Update);
    assert_eq!(pending[0].payload, server_data);

    // Pushing the server's own data back is accepted and changes nothing
    let result = s.engine.orchestrator().sync_all().await.unwrap();
    assert_eq!(result.items_synced, 1);
    let record = s.server.record(ItemType::Request, "req-1").unwrap();
    assert_eq!(record.updated_at, server_time);
    assert_eq!(record.data["reason"], json!("State-level hackathon"));
}

#[tokio::test]
async fn force_sync_retries_failed_items() {
    let backing = Arc::new(InMemoryStore::new());
    let server =
        RemoteServer::open(ServerConfig::default(), backing.clone() as Arc<dyn KeyValueStore>)
            .unwrap();
    let s = setup_with(SyncConfig::default(), server, Boxes::in_memory());
    s.engine
        .tracker()
        .queue_create(&make_request("req-1"))
        .unwrap();
    s.engine
        .tracker()
        .queue_create(&make_request("req-2"))
        .unwrap();

    // Server storage outage
    backing.set_unavailable(true);
    let result = s.engine.orchestrator().sync_all().await.unwrap();
    assert!(!result.success);
    assert_eq!(result.items_failed, 2);
    assert_eq!(result.errors.len(), 2);
    assert_eq!(s.engine.tracker().failed_operations().len(), 2);

    // A plain sync does not pick up failed items
    backing.set_unavailable(false);
    let result = s.engine.orchestrator().sync_all().await.unwrap();
    assert_eq!(result.items_synced, 0);

    let result = s.engine.orchestrator().force_sync().await.unwrap();
    assert!(result.success);
    assert_eq!(result.items_failed, 0);
    assert_eq!(result.items_synced, 2);
    assert!(s.engine.tracker().failed_operations().is_empty());
    assert_eq!(s.server.records(ItemType::Request).len(), 2);
}

#[tokio::test]
async fn rejected_item_does_not_abort_batch() {
    let s = setup();
    let queue = s.engine.queue();
    let mut bad = Payload::new();
    bad.insert("status".into(), json!("escalated"));
    let bad_id = queue
        .enqueue("req-bad", ItemType::Request, Operation::Update, bad, 9)
        .unwrap();
    s.engine
        .tracker()
        .queue_create(&make_request("req-1"))
        .unwrap();

    let result = s.engine.orchestrator().sync_all().await.unwrap();
    assert_eq!(result.items_synced, 1);
    assert_eq!(result.items_failed, 1);
    assert!(result.errors[0].contains("escalated"));

    let failed = queue.get(&bad_id).unwrap().unwrap();
    assert_eq!(failed.state, QueueState::Failed);
    assert!(s.server.record(ItemType::Request, "req-1").is_some());
}

#[tokio::test]
async fn delete_removes_server_record() {
    let s = setup();
    s.engine
        .tracker()
        .queue_create(&make_request("req-1"))
        .unwrap();
    s.engine.orchestrator().sync_all().await.unwrap();

    s.engine.tracker().queue_delete("req-1").unwrap();
    let result = s.engine.orchestrator().sync_all().await.unwrap();
    assert_eq!(result.items_synced, 1);
    assert!(s.server.record(ItemType::Request, "req-1").is_none());
}

#[tokio::test(start_paused = true)]
async fn second_sync_rejected_while_running() {
    let s = setup_with(
        SyncConfig::default(),
        RemoteServer::new(ServerConfig::default().with_latency(Duration::from_secs(1))),
        Boxes::in_memory(),
    );
    s.engine
        .tracker()
        .queue_create(&make_request("req-1"))
        .unwrap();
    let orchestrator = s.engine.orchestrator().clone();

    let run = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.sync_all().await }
    });
    while !orchestrator.run_state().is_active() {
        tokio::task::yield_now().await;
    }

    let before = s.engine.queue().items(None).unwrap();
    assert!(matches!(
        orchestrator.sync_all().await,
        Err(SyncError::SyncInProgress)
    ));
    assert!(matches!(
        orchestrator.force_sync().await,
        Err(SyncError::SyncInProgress)
    ));
    assert_eq!(s.engine.queue().items(None).unwrap(), before);

    let result = run.await.unwrap().unwrap();
    assert_eq!(result.items_synced, 1);
    assert_eq!(s.server.request_count(), 1);
}

#[tokio::test]
async fn queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let server = Arc::new(RemoteServer::new(ServerConfig::default()));
    let connectivity = Arc::new(ManualConnectivity::disconnected());
    let remote = Arc::new(InMemoryRemote {
        server: server.clone(),
    });

    {
        let engine = SyncEngine::new(
            SyncConfig::default(),
            Boxes::open(dir.path()).unwrap(),
            remote.clone(),
            connectivity.clone(),
        )
        .unwrap();
        engine.tracker().queue_create(&make_request("req-1")).unwrap();
        engine
            .tracker()
            .bulk_reject(vec!["req-9".into()], "staff-3", "Attendance shortage")
            .unwrap();
        engine.shutdown().await.unwrap();
    }

    let engine = SyncEngine::new(
        SyncConfig::default(),
        Boxes::open(dir.path()).unwrap(),
        remote,
        connectivity.clone(),
    )
    .unwrap();
    assert_eq!(engine.queue().health().unwrap().pending, 2);
    assert!(engine.is_healthy());

    connectivity.go_online();
    let result = engine.orchestrator().sync_all().await.unwrap();
    assert_eq!(result.items_synced, 2);

    let rejected = server.record(ItemType::Request, "req-9").unwrap();
    assert_eq!(rejected.data["status"], json!("rejected"));
    assert_eq!(rejected.data["rejection_reason"], json!("Attendance shortage"));
    assert!(engine.orchestrator().last_sync_time().is_some());
}
