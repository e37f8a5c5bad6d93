//! Opens the engine and its loopback remote over a data directory.
//!
//! Layout:
//!
//! ```text
//! DIR/
//!   LOCK, queue.log, conflicts.log, items.log, meta.log   client boxes
//!   remote/records.log                                    loopback server
//! ```

use async_trait::async_trait;
use odsync_engine::{
    EngineResult, ManualConnectivity, RemoteEndpoint, SyncConfig, SyncEngine, SyncError,
};
use odsync_protocol::{ItemType, QueueItem, RemoteResponse};
use odsync_server::{RemoteServer, ServerConfig, ServerError};
use odsync_storage::{Boxes, FileStore};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const REMOTE_LOG: &str = "remote/records.log";

/// Remote endpoint that calls a [`RemoteServer`] in-process.
pub struct LoopbackRemote {
    server: Arc<RemoteServer>,
}

impl LoopbackRemote {
    /// Wraps a server.
    pub fn new(server: Arc<RemoteServer>) -> Self {
        Self { server }
    }
}

fn to_sync_error(err: ServerError) -> SyncError {
    if err.is_client_error() {
        SyncError::remote_fatal(err.to_string())
    } else {
        SyncError::remote_retryable(err.to_string())
    }
}

#[async_trait]
impl RemoteEndpoint for LoopbackRemote {
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

/// An open data directory.
pub struct Workspace {
    /// The sync engine.
    pub engine: SyncEngine,
    /// The loopback server.
    pub server: Arc<RemoteServer>,
    /// Connectivity as chosen on the command line.
    pub connectivity: Arc<ManualConnectivity>,
}

impl Workspace {
    /// Opens (or creates) the data directory.
    ///
    /// `online` sets the initial connectivity the engine sees.
    pub fn open(path: &Path, online: bool) -> Result<Self, Box<dyn Error>> {
        let boxes = Boxes::open(path)?;
        let records = FileStore::open_with_create_dirs(&path.join(REMOTE_LOG))?;
        let server = Arc::new(RemoteServer::open(
            ServerConfig::default(),
            Arc::new(records),
        )?);
        let connectivity = Arc::new(if online {
            ManualConnectivity::connected()
        } else {
            ManualConnectivity::disconnected()
        });

        let engine = SyncEngine::new(
            SyncConfig::default(),
            boxes,
            Arc::new(LoopbackRemote::new(server.clone())),
            connectivity.clone(),
        )?;
        debug!(path = %path.display(), online, "Opened workspace");

        Ok(Self {
            engine,
            server,
            connectivity,
        })
    }

    /// Flushes the engine's boxes and the server's records.
    pub async fn close(self) -> Result<(), Box<dyn Error>> {
        self.engine.shutdown().await?;
        self.server.flush()?;
        Ok(())
    }
}
