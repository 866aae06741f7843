use crate::types::ErrorCode;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PoolError {
    #[error("timed out waiting for a connection")]
    ExceededTimeLimit,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("pooled connections dropped")]
    PooledConnectionsDropped,
    #[error("connection pool is shutting down")]
    ShutdownInProgress,
    #[error("host unreachable: {0}")]
    HostUnreachable(String),
}

impl PoolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PoolError::ExceededTimeLimit => ErrorCode::ExceededTimeLimit,
            PoolError::NetworkError(_) => ErrorCode::NetworkError,
            PoolError::PooledConnectionsDropped => ErrorCode::PooledConnectionsDropped,
            PoolError::ShutdownInProgress => ErrorCode::ShutdownInProgress,
            PoolError::HostUnreachable(_) => ErrorCode::HostUnreachable,
        }
    }
}
