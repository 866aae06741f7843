use crate::oplog::CodecError;
use crate::types::{ErrorCode, InterruptError, OperationContext, RecordId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("write conflict")]
    WriteConflict,
    #[error("illegal operation: {0}")]
    IllegalOperation(String),
    #[error("capped position lost: record {0} was deleted")]
    CappedPositionLost(RecordId),
    #[error("record {id} cannot change length from {old} to {new}")]
    InvalidLength { id: RecordId, old: usize, new: usize },
    #[error("namespace '{0}' not found")]
    NamespaceNotFound(String),
    #[error("index '{index}' not found on '{ns}'")]
    IndexNotFound { ns: String, index: String },
    #[error("record {0} not found")]
    RecordNotFound(RecordId),
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("bad oplog entry: {0}")]
    BadOplogEntry(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("operation was interrupted")]
    Interrupted,
    #[error("operation exceeded time limit")]
    ExceededTimeLimit,
    #[error("storage is shutting down")]
    ShutdownInProgress,
}

impl StorageError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StorageError::WriteConflict => ErrorCode::WriteConflict,
            StorageError::IllegalOperation(_) => ErrorCode::IllegalOperation,
            StorageError::CappedPositionLost(_) => ErrorCode::CappedPositionLost,
            StorageError::InvalidLength { .. } => ErrorCode::InvalidLength,
            StorageError::NamespaceNotFound(_) => ErrorCode::NamespaceNotFound,
            StorageError::IndexNotFound { .. } => ErrorCode::IndexNotFound,
            StorageError::RecordNotFound(_) => ErrorCode::OperationFailed,
            StorageError::DuplicateKey(_) => ErrorCode::OperationFailed,
            StorageError::BadOplogEntry(_) => ErrorCode::BadValue,
            StorageError::Codec(_) => ErrorCode::FailedToParse,
            StorageError::Interrupted => ErrorCode::Interrupted,
            StorageError::ExceededTimeLimit => ErrorCode::ExceededTimeLimit,
            StorageError::ShutdownInProgress => ErrorCode::ShutdownInProgress,
        }
    }
}

impl From<InterruptError> for StorageError {
    fn from(e: InterruptError) -> Self {
        match e {
            InterruptError::Interrupted => StorageError::Interrupted,
            InterruptError::ExceededTimeLimit => StorageError::ExceededTimeLimit,
        }
    }
}

/// Runs `f` until it stops failing with `WriteConflict`. The operation context is checked between
/// attempts so a killed operation leaves the loop.
pub fn write_conflict_retry<T, F>(
    logger: &slog::Logger,
    ctx: &OperationContext,
    op_name: &str,
    mut f: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Result<T, StorageError>,
{
    let mut attempts: u64 = 0;
    loop {
        match f() {
            Err(StorageError::WriteConflict) => {
                attempts += 1;
                ctx.check_for_interrupt()?;
                if attempts % 100 == 0 {
                    slog::debug!(logger, "Caught WriteConflict during {}, attempt {}", op_name, attempts);
                    // Let the conflicting writer make progress.
                    std::thread::yield_now();
                }
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn retries_until_success() {
        let ctx = OperationContext::new();
        let mut calls = 0;

        let result = write_conflict_retry(&logger(), &ctx, "insert", || {
            calls += 1;
            if calls < 3 {
                Err(StorageError::WriteConflict)
            } else {
                Ok(calls)
            }
        });

        assert_eq!(result, Ok(3));
    }

    #[test]
    fn other_errors_are_not_retried() {
        let ctx = OperationContext::new();
        let mut calls = 0;

        let result: Result<(), _> = write_conflict_retry(&logger(), &ctx, "delete", || {
            calls += 1;
            Err(StorageError::IllegalOperation("capped".into()))
        });

        assert_eq!(calls, 1);
        assert_eq!(result, Err(StorageError::IllegalOperation("capped".into())));
    }

    #[test]
    fn interrupt_breaks_the_loop() {
        let ctx = OperationContext::new();
        ctx.interrupt();

        let result: Result<(), _> = write_conflict_retry(&logger(), &ctx, "update", || Err(StorageError::WriteConflict));

        assert_eq!(result, Err(StorageError::Interrupted));
    }
}
