/// ErrorCode is the stable numeric identity of an error as it crosses the wire. Each operation's
/// error enum maps itself onto one of these via `code()`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorCode {
    InternalError,
    BadValue,
    FailedToParse,
    HostUnreachable,
    IllegalOperation,
    NamespaceNotFound,
    IndexNotFound,
    ExceededTimeLimit,
    WriteConcernFailed,
    NodeNotFound,
    UnknownReplWriteConcern,
    ShutdownInProgress,
    InvalidReplicaSetConfig,
    NotYetInitialized,
    NotSecondary,
    OperationFailed,
    CannotSatisfyWriteConcern,
    WriteConflict,
    OplogStartMissing,
    UnrecoverableRollbackError,
    CappedPositionLost,
    PooledConnectionsDropped,
    InvalidLength,
    StaleTerm,
    NotMaster,
    Interrupted,
    NotMasterOrSecondary,
    NetworkError,
}

impl ErrorCode {
    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::InternalError => 1,
            ErrorCode::BadValue => 2,
            ErrorCode::FailedToParse => 9,
            ErrorCode::HostUnreachable => 6,
            ErrorCode::IllegalOperation => 20,
            ErrorCode::NamespaceNotFound => 26,
            ErrorCode::IndexNotFound => 27,
            ErrorCode::ExceededTimeLimit => 50,
            ErrorCode::WriteConcernFailed => 64,
            ErrorCode::NodeNotFound => 74,
            ErrorCode::UnknownReplWriteConcern => 79,
            ErrorCode::ShutdownInProgress => 91,
            ErrorCode::InvalidReplicaSetConfig => 93,
            ErrorCode::NotYetInitialized => 94,
            ErrorCode::NotSecondary => 95,
            ErrorCode::OperationFailed => 96,
            ErrorCode::CannotSatisfyWriteConcern => 100,
            ErrorCode::WriteConflict => 112,
            ErrorCode::OplogStartMissing => 120,
            ErrorCode::UnrecoverableRollbackError => 127,
            ErrorCode::CappedPositionLost => 136,
            ErrorCode::PooledConnectionsDropped => 137,
            ErrorCode::InvalidLength => 142,
            ErrorCode::StaleTerm => 145,
            ErrorCode::NotMaster => 10107,
            ErrorCode::Interrupted => 11601,
            ErrorCode::NotMasterOrSecondary => 13436,
            ErrorCode::NetworkError => 9001,
        }
    }

    /// Unknown codes map to `InternalError`.
    pub fn from_code(code: i32) -> Self {
        match code {
            2 => ErrorCode::BadValue,
            9 => ErrorCode::FailedToParse,
            6 => ErrorCode::HostUnreachable,
            20 => ErrorCode::IllegalOperation,
            26 => ErrorCode::NamespaceNotFound,
            27 => ErrorCode::IndexNotFound,
            50 => ErrorCode::ExceededTimeLimit,
            64 => ErrorCode::WriteConcernFailed,
            74 => ErrorCode::NodeNotFound,
            79 => ErrorCode::UnknownReplWriteConcern,
            91 => ErrorCode::ShutdownInProgress,
            93 => ErrorCode::InvalidReplicaSetConfig,
            94 => ErrorCode::NotYetInitialized,
            95 => ErrorCode::NotSecondary,
            96 => ErrorCode::OperationFailed,
            100 => ErrorCode::CannotSatisfyWriteConcern,
            112 => ErrorCode::WriteConflict,
            120 => ErrorCode::OplogStartMissing,
            127 => ErrorCode::UnrecoverableRollbackError,
            136 => ErrorCode::CappedPositionLost,
            137 => ErrorCode::PooledConnectionsDropped,
            142 => ErrorCode::InvalidLength,
            145 => ErrorCode::StaleTerm,
            10107 => ErrorCode::NotMaster,
            11601 => ErrorCode::Interrupted,
            13436 => ErrorCode::NotMasterOrSecondary,
            9001 => ErrorCode::NetworkError,
            _ => ErrorCode::InternalError,
        }
    }
}
