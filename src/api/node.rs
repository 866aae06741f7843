use crate::actor::CoordinatorClient;
use crate::api::event_bus::NodeEventListener;
use crate::clock::StopGuard;
use crate::oplog::{OpType, OplogEntry, OplogReadError};
use crate::replica::{
    AwaitReplicationError, AwaitReplicationInput, FinishRollbackInput, InitiateError, InitiateInput,
    MemberStateError, PrepareWriteError, WriteConcernOptions,
};
use crate::rollback::{InMemoryRollbackSource, Rollback, RollbackError, RollbackSource};
use crate::server::{GrpcConnectionPool, RemoteRollbackSource};
use crate::storage::{write_conflict_retry, Record, RecoveryUnit, StorageCatalog, StorageError};
use crate::sync::{self, BackgroundSync, SyncError, SyncPass};
use crate::types::{Document, ErrorCode, HostAndPort, OpTime, OperationContext, Value};
use rand::Rng;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Duration;

/// ReplSetNode is one member of a replica set: its storage, its coordinator and, when served
/// over gRPC, its RPC server and connection pool.
pub struct ReplSetNode {
    pub(super) logger: slog::Logger,
    pub(super) coordinator: CoordinatorClient,
    pub(super) catalog: Arc<StorageCatalog>,
    pub(super) rollback: Rollback,
    pub(super) rollback_source: InMemoryRollbackSource,
    pub(super) pool: Option<GrpcConnectionPool>,
    pub(super) rpc_timeout: Duration,
    pub(super) write_concern_majority_journal_default: bool,
    pub(super) sync: Arc<BackgroundSync>,
    /// Dropping it stops the RPC server and the sync loop.
    pub(super) background_stop: Mutex<Option<StopGuard>>,
    /// Held from timestamp reservation until the oplog insert commits, so entries land in the
    /// oplog in the order their timestamps were handed out. Oplog apply takes it too.
    pub(super) new_op_lock: Arc<AsyncMutex<()>>,
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Prepare(#[from] PrepareWriteError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    WriteConcern(#[from] AwaitReplicationError),
}

impl WriteError {
    pub fn code(&self) -> ErrorCode {
        match self {
            WriteError::Prepare(e) => e.code(),
            WriteError::Storage(e) => e.code(),
            WriteError::WriteConcern(e) => e.code(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeRollbackError {
    /// The node couldn't enter or leave ROLLBACK.
    #[error(transparent)]
    MemberState(#[from] MemberStateError),
    #[error(transparent)]
    Rollback(#[from] RollbackError),
    #[error("no connection pool; this node isn't served over gRPC")]
    NoNetwork,
}

impl NodeRollbackError {
    pub fn code(&self) -> ErrorCode {
        match self {
            NodeRollbackError::MemberState(e) => e.code(),
            NodeRollbackError::Rollback(e) => e.code(),
            NodeRollbackError::NoNetwork => ErrorCode::IllegalOperation,
        }
    }

    /// The node has to be resynced from scratch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NodeRollbackError::Rollback(e) if e.is_fatal())
    }
}

impl ReplSetNode {
    pub fn coordinator(&self) -> &CoordinatorClient {
        &self.coordinator
    }

    pub fn catalog(&self) -> &Arc<StorageCatalog> {
        &self.catalog
    }

    /// What this node serves to peers rolling back against it.
    pub fn rollback_source(&self) -> &InMemoryRollbackSource {
        &self.rollback_source
    }

    pub async fn event_listener(&self) -> NodeEventListener {
        NodeEventListener::new(self.coordinator.state_listener().await)
    }

    /// Installs the first config of the set. A config without `writeConcernMajorityJournalDefault`
    /// gets this node's default.
    pub async fn initiate(&self, mut config: Document) -> Result<(), InitiateError> {
        if !config.contains_key("writeConcernMajorityJournalDefault") {
            config.insert(
                "writeConcernMajorityJournalDefault",
                self.write_concern_majority_journal_default,
            );
        }
        self.coordinator.initiate(InitiateInput { config }).await
    }

    /// Inserts `doc` into `ns` along with its oplog entry, then waits for `write_concern`.
    pub async fn insert(
        &self,
        ctx: &OperationContext,
        ns: &str,
        doc: Document,
        write_concern: Option<WriteConcernOptions>,
    ) -> Result<OpTime, WriteError> {
        let collection = self.catalog.get_or_create_collection(ns)?;
        self.write(ctx, OpType::Insert, ns, doc.clone(), write_concern, move |ru| {
            collection.insert_document(ru, &doc).map(|_| ())
        })
        .await
    }

    /// Deletes the document with `_id == id`. Returns None when there was nothing to delete.
    pub async fn remove(
        &self,
        ctx: &OperationContext,
        ns: &str,
        id: Value,
        write_concern: Option<WriteConcernOptions>,
    ) -> Result<Option<OpTime>, WriteError> {
        let collection = match self.catalog.get_collection(ns) {
            Some(collection) => collection,
            None => return Ok(None),
        };
        if collection.record_id_of(&id).is_none() {
            return Ok(None);
        }
        let o = Document::new().with("_id", id.clone());
        let op_time = self
            .write(ctx, OpType::Delete, ns, o, write_concern, move |ru| {
                collection.delete_by_id(ru, &id).map(|_| ())
            })
            .await?;
        Ok(Some(op_time))
    }

    pub fn find_one(&self, ns: &str, id: &Value) -> Result<Option<Document>, StorageError> {
        match self.catalog.get_collection(ns) {
            Some(collection) => collection.find_by_id(id),
            None => Ok(None),
        }
    }

    async fn write<F>(
        &self,
        ctx: &OperationContext,
        op: OpType,
        ns: &str,
        o: Document,
        write_concern: Option<WriteConcernOptions>,
        mut apply: F,
    ) -> Result<OpTime, WriteError>
    where
        F: FnMut(&mut RecoveryUnit) -> Result<(), StorageError>,
    {
        ctx.check_for_interrupt().map_err(StorageError::from)?;
        let new_op_guard = self.new_op_lock.lock().await;
        let snapshot_name = self.coordinator.reserve_snapshot_name().await;
        let op_time = self.coordinator.prepare_write().await?;
        let h: i64 = rand::thread_rng().gen();
        let entry = OplogEntry::new(op_time.timestamp(), op_time.term(), h, op, ns, o);

        write_conflict_retry(&self.logger, ctx, op.as_str(), || {
            let mut ru = RecoveryUnit::new();
            apply(&mut ru)?;
            self.catalog
                .oplog()
                .insert_records(&mut ru, &mut [Record::new(entry.encode()?)])?;
            ru.commit();
            Ok(())
        })?;

        // The in-memory engine is durable as soon as the write commits.
        self.coordinator.set_my_last_applied_forward(op_time).await;
        self.coordinator.set_my_last_durable_forward(op_time).await;
        self.coordinator.create_snapshot(op_time, snapshot_name).await;
        drop(new_op_guard);

        if let Some(write_concern) = write_concern {
            self.coordinator
                .await_replication(
                    ctx,
                    AwaitReplicationInput {
                        op_time,
                        write_concern,
                        min_snapshot: Some(snapshot_name),
                    },
                )
                .await?;
        }
        Ok(op_time)
    }

    /// Picks the freshest healthy member that is no further than the maximum sync source lag
    /// behind the newest optime this node knows of.
    pub async fn choose_sync_source(&self) -> Option<HostAndPort> {
        let status = self.coordinator.status().await;
        sync::choose_sync_source(&status, self.sync.max_sync_source_lag())
    }

    /// Runs one fetch and apply pass against the chosen sync source. The background loop does
    /// this on its own unless it was disabled.
    pub async fn sync_once(&self, ctx: &OperationContext) -> Result<SyncPass, SyncError> {
        self.sync.sync_once(ctx).await
    }

    /// Rolls this node back against `source`. The node is in ROLLBACK for the duration and
    /// leaves it whether or not the rollback succeeds.
    pub async fn rollback(&self, ctx: &OperationContext, source: &dyn RollbackSource) -> Result<OpTime, NodeRollbackError> {
        self.coordinator.begin_rollback().await?;

        let result = self.rollback.run(ctx, source, None).await;
        let last_applied = match &result {
            Ok(op_time) => *op_time,
            Err(e) => {
                slog::error!(self.logger, "Rollback failed: {}", e);
                self.last_oplog_op_time().unwrap_or_else(|read_error| {
                    slog::error!(self.logger, "Failed to read the oplog after rollback: {}", read_error);
                    OpTime::null()
                })
            }
        };

        self.coordinator
            .finish_rollback(FinishRollbackInput {
                succeeded: result.is_ok(),
                last_applied,
            })
            .await?;
        Ok(result?)
    }

    /// Rolls back against `host` over gRPC.
    pub async fn rollback_from(&self, ctx: &OperationContext, host: &HostAndPort) -> Result<OpTime, NodeRollbackError> {
        let pool = self.pool.clone().ok_or(NodeRollbackError::NoNetwork)?;
        let source = RemoteRollbackSource::new(pool, host.clone(), self.rpc_timeout);
        self.rollback(ctx, &source).await
    }

    fn last_oplog_op_time(&self) -> Result<OpTime, OplogReadError> {
        Ok(self
            .catalog
            .local_oplog()
            .last_entry()?
            .map_or_else(OpTime::null, |entry| entry.op_time()))
    }

    /// Stops the RPC server, the sync loop, the connection pool and the coordinator.
    pub async fn shutdown(&self) {
        slog::info!(self.logger, "Shutting down");
        let guard = self
            .background_stop
            .lock()
            .expect("ReplSetNode mutex guard poison")
            .take();
        if let Some(guard) = guard {
            guard.stop();
        }
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
        self.coordinator.shutdown().await;
    }
}
