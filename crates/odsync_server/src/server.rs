//! The reference remote server.

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::RequestHandler;
use crate::records::{RecordStore, ServerRecord};
use chrono::{DateTime, Utc};
use odsync_protocol::{ItemType, Payload, RemoteResponse};
use odsync_storage::KeyValueStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The reference remote server.
///
/// Holds the authoritative copy of every record and answers client
/// writes with accept or conflict. Each call waits out the configured
/// latency first, so callers see it as a slow remote.
///
/// # Example
///
/// ```
/// use odsync_server::{RemoteServer, ServerConfig};
///
/// let server = RemoteServer::new(ServerConfig::default());
/// assert_eq!(server.record_count(), 0);
///
/// // In an application, an engine remote adapter calls
/// // server.handle_create(), handle_update() and handle_delete()
/// ```
pub struct RemoteServer {
    config: ServerConfig,
    handler: RequestHandler,
    requests: AtomicU64,
}

impl RemoteServer {
    /// Creates a memory-only server.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_records(config, Arc::new(RecordStore::new()))
    }

    /// Opens a server whose records persist in `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted records cannot be loaded.
    pub fn open(config: ServerConfig, store: Arc<dyn KeyValueStore>) -> ServerResult<Self> {
        Ok(Self::with_records(
            config,
            Arc::new(RecordStore::with_backing(store)?),
        ))
    }

    /// Creates a server over an existing record store.
    pub fn with_records(config: ServerConfig, records: Arc<RecordStore>) -> Self {
        let handler = RequestHandler::new(config.clone(), records);
        Self {
            config,
            handler,
            requests: AtomicU64::new(0),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handles a create.
    pub async fn handle_create(
        &self,
        item_type: ItemType,
        item_id: &str,
        payload: &Payload,
        local_timestamp: DateTime<Utc>,
    ) -> ServerResult<RemoteResponse> {
        self.enter().await;
        self.handler
            .handle_create(item_type, item_id, payload, local_timestamp)
    }

    /// Handles a partial update.
    pub async fn handle_update(
        &self,
        item_type: ItemType,
        item_id: &str,
        payload: &Payload,
        local_timestamp: DateTime<Utc>,
    ) -> ServerResult<RemoteResponse> {
        self.enter().await;
        self.handler
            .handle_update(item_type, item_id, payload, local_timestamp)
    }

    /// Handles a delete. Deleting an unknown record succeeds.
    pub async fn handle_delete(&self, item_type: ItemType, item_id: &str) -> ServerResult<()> {
        self.enter().await;
        self.handler.handle_delete(item_type, item_id)?;
        Ok(())
    }

    /// Writes a record directly, as another client would have.
    ///
    /// Skips version checks. Used to seed state and to simulate
    /// concurrent edits.
    pub fn insert_record(&self, record: ServerRecord) -> ServerResult<()> {
        self.handler.records().put(record)
    }

    /// Returns the current record for an entity.
    pub fn record(&self, item_type: ItemType, item_id: &str) -> Option<ServerRecord> {
        self.handler.records().get(item_type, item_id)
    }

    /// Returns every record of one kind, ordered by id.
    pub fn records(&self, item_type: ItemType) -> Vec<ServerRecord> {
        self.handler.records().records(item_type)
    }

    /// Returns the number of records held.
    pub fn record_count(&self) -> usize {
        self.handler.records().len()
    }

    /// Returns the number of requests handled.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Flushes persisted records.
    pub fn flush(&self) -> ServerResult<()> {
        self.handler.records().flush()
    }

    async fn enter(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
    }
}

impl std::fmt::Debug for RemoteServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteServer")
            .field("config", &self.config)
            .field("records", &self.record_count())
            .field("requests", &self.request_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odsync_storage::InMemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn request_payload(reason: &str) -> Payload {
        let mut payload = Payload::new();
        payload.insert("reason".into(), json!(reason));
        payload
    }

    #[test]
    fn server_lifecycle() {
        let server = RemoteServer::new(ServerConfig::default());
        assert_eq!(server.record_count(), 0);
        assert_eq!(server.request_count(), 0);
    }

    #[tokio::test]
    async fn full_write_flow() {
        let server = RemoteServer::new(ServerConfig::default());
        let t0 = Utc::now();

        // 1. Create
        let response = server
            .handle_create(ItemType::Request, "req-1", &request_payload("symposium"), t0)
            .await
            .unwrap();
        assert!(response.is_accepted());

        // 2. Someone else edits later
        let later = t0 + chrono::Duration::minutes(30);
        server
            .insert_record(ServerRecord::new(
                ItemType::Request,
                "req-1",
                request_payload("workshop"),
                later,
            ))
            .unwrap();

        // 3. Our older edit now conflicts
        let response = server
            .handle_update(ItemType::Request, "req-1", &request_payload("seminar"), t0)
            .await
            .unwrap();
        assert!(!response.is_accepted());

        // 4. Delete
        server.handle_delete(ItemType::Request, "req-1").await.unwrap();
        server.handle_delete(ItemType::Request, "req-1").await.unwrap();
        assert!(server.record(ItemType::Request, "req-1").is_none());
        assert_eq!(server.request_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_requests() {
        let server = RemoteServer::new(
            ServerConfig::default().with_latency(Duration::from_millis(500)),
        );
        let start = tokio::time::Instant::now();
        server
            .handle_update(ItemType::Profile, "user-1", &request_payload("x"), Utc::now())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn persisted_records_reload() {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let server = RemoteServer::open(ServerConfig::default(), store.clone()).unwrap();
        server
            .handle_create(ItemType::Request, "req-1", &request_payload("symposium"), Utc::now())
            .await
            .unwrap();
        drop(server);

        let reopened = RemoteServer::open(ServerConfig::default(), store).unwrap();
        let records = reopened.records(ItemType::Request);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data["status"], json!("pending"));
    }
}
