use crate::oplog::{OpType, OplogReadError};
use crate::replica::NetworkError;
use crate::rollback::RollbackSourceError;
use crate::storage::StorageError;
use crate::types::{ErrorCode, OpTime};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The source no longer has our newest entry. Only a full resync can help.
    #[error("sync source's oplog starts after our last entry {0:?}")]
    OplogStartMissing(OpTime),
    /// Our newest entry isn't in the source's history. The node has to roll back.
    #[error("oplog diverged from the sync source: our last entry is {ours:?}, theirs before it is {theirs:?}")]
    Diverged { ours: OpTime, theirs: OpTime },
    #[error("cannot apply {op} on '{ns}': {reason}")]
    Apply { op: OpType, ns: String, reason: String },
    #[error("failed to read the local oplog: {0}")]
    LocalOplog(#[from] OplogReadError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Source(#[from] RollbackSourceError),
    #[error("cannot reach the sync source: {0}")]
    Network(#[from] NetworkError),
    #[error("shutting down")]
    ShutdownInProgress,
}

impl SyncError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::OplogStartMissing(_) => ErrorCode::OplogStartMissing,
            SyncError::Diverged { .. } => ErrorCode::OperationFailed,
            SyncError::Apply { .. } => ErrorCode::BadValue,
            SyncError::LocalOplog(_) => ErrorCode::InternalError,
            SyncError::Storage(e) => e.code(),
            SyncError::Source(_) | SyncError::Network(_) => ErrorCode::HostUnreachable,
            SyncError::ShutdownInProgress => ErrorCode::ShutdownInProgress,
        }
    }

    /// Fetching can resume once the node has rolled back against its source.
    pub fn needs_rollback(&self) -> bool {
        matches!(self, SyncError::Diverged { .. })
    }
}
