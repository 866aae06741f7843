use crate::oplog::OplogReadError;
use crate::replica::LocalStateError;
use crate::storage::StorageError;
use crate::types::ErrorCode;
use std::io;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RollbackSourceError {
    #[error("namespace '{0}' not found on sync source")]
    NamespaceNotFound(String),
    #[error("sync source unreachable: {0}")]
    Network(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    OplogRead(#[from] OplogReadError),
    #[error(transparent)]
    LocalState(#[from] LocalStateError),
    #[error("sync source returned a bad response: {0}")]
    BadResponse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    /// Our oplog ended before a common point was found. Only a full resync can help.
    #[error("oplog start missing: {0}")]
    OplogStartMissing(String),
    #[error("unrecoverable rollback error: {0}")]
    UnrecoverableRollbackError(String),
    /// Something rollback cannot undo. Leaves the node needing a full resync.
    #[error("rollback fatal: {0}")]
    Fatal(String),
    #[error("rollback failed to read local oplog: {0}")]
    LocalOplog(OplogReadError),
    #[error("rollback storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("rollback sync source error: {0}")]
    Source(#[from] RollbackSourceError),
    #[error("rollback local state error: {0}")]
    LocalState(#[from] LocalStateError),
    #[error("rollback failed to write save file: {0}")]
    SaveFile(#[from] io::Error),
}

impl RollbackError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RollbackError::OplogStartMissing(_) => ErrorCode::OplogStartMissing,
            RollbackError::UnrecoverableRollbackError(_) | RollbackError::Fatal(_) => {
                ErrorCode::UnrecoverableRollbackError
            }
            RollbackError::Storage(e) => e.code(),
            RollbackError::Source(_) => ErrorCode::HostUnreachable,
            RollbackError::LocalOplog(_) | RollbackError::LocalState(_) | RollbackError::SaveFile(_) => {
                ErrorCode::InternalError
            }
        }
    }

    /// The process must exit and the operator must resync the node.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RollbackError::OplogStartMissing(_)
                | RollbackError::UnrecoverableRollbackError(_)
                | RollbackError::Fatal(_)
        )
    }
}
