use crate::replica::config::ConfigError;
use crate::replica::local_state::LocalStateError;
use crate::replica::member_state::IllegalTransition;
use crate::replica::metadata::ReplSetMetadata;
use crate::replica::progress::MemberProgress;
use crate::replica::snapshots::SnapshotName;
use crate::replica::write_concern::WriteConcernOptions;
use crate::replica::MemberState;
use crate::types::{
    Document, ErrorCode, FieldError, HostAndPort, InterruptError, OpTime, OpTimeParseError, Term, Timestamp, Value,
};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NetworkError {
    #[error("host unreachable: {0}")]
    Unreachable(String),
    #[error("request timed out")]
    Timeout,
    #[error("remote error {code:?}: {message}")]
    Remote { code: ErrorCode, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitiateInput {
    pub config: Document,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InitiateError {
    #[error("already initialized")]
    AlreadyInitialized,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("this node ({0}) is not a member of the config")]
    NodeNotFound(HostAndPort),
    #[error("config names set '{theirs}' but this node was started for '{ours}'")]
    SetNameMismatch { ours: String, theirs: String },
    #[error("failed to persist config: {0}")]
    LocalState(#[from] LocalStateError),
    #[error("shutting down")]
    ShutdownInProgress,
}

impl InitiateError {
    pub fn code(&self) -> ErrorCode {
        match self {
            InitiateError::AlreadyInitialized => ErrorCode::IllegalOperation,
            InitiateError::Config(e) => e.code(),
            InitiateError::NodeNotFound(_) => ErrorCode::NodeNotFound,
            InitiateError::SetNameMismatch { .. } => ErrorCode::InvalidReplicaSetConfig,
            InitiateError::LocalState(_) => ErrorCode::InternalError,
            InitiateError::ShutdownInProgress => ErrorCode::ShutdownInProgress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MemberStateError {
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
    #[error("{0} is not a follower state")]
    BadValue(MemberState),
    #[error("no replica set config has been loaded")]
    NotYetInitialized,
    #[error("shutting down")]
    ShutdownInProgress,
}

impl MemberStateError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MemberStateError::IllegalTransition(_) => ErrorCode::IllegalOperation,
            MemberStateError::BadValue(_) => ErrorCode::BadValue,
            MemberStateError::NotYetInitialized => ErrorCode::NotYetInitialized,
            MemberStateError::ShutdownInProgress => ErrorCode::ShutdownInProgress,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorStatus {
    pub set_name: Option<String>,
    pub self_id: Option<i64>,
    pub state: MemberState,
    pub is_draining: bool,
    pub election_in_progress: bool,
    pub maintenance_count: u32,
    pub term: Term,
    pub config_version: i64,
    pub primary_id: Option<i64>,
    pub commit_point: OpTime,
    pub my_last_applied: OpTime,
    pub my_last_durable: OpTime,
    pub committed_snapshot_op_time: OpTime,
    pub step_down_until: Option<Instant>,
    pub members: Vec<MemberProgress>,
}

// -- heartbeat --

#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatInput {
    pub set_name: String,
    pub config_version: i64,
    pub term: Term,
    pub sender_host: HostAndPort,
    /// -1 if the sender isn't in a config yet.
    pub sender_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatOutput {
    pub set_name: String,
    pub state: MemberState,
    pub term: Term,
    pub config_version: i64,
    pub applied_op_time: OpTime,
    pub durable_op_time: OpTime,
    pub electable: bool,
    /// Present when the responder's config is newer than the requester's.
    pub config: Option<Document>,
    pub metadata: ReplSetMetadata,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HeartbeatError {
    #[error("replica set names differ: ours '{ours}', theirs '{theirs}'")]
    InconsistentReplicaSetNames { ours: String, theirs: String },
    #[error("not yet initialized")]
    NotYetInitialized,
    #[error("shutting down")]
    ShutdownInProgress,
}

impl HeartbeatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HeartbeatError::InconsistentReplicaSetNames { .. } => ErrorCode::InvalidReplicaSetConfig,
            HeartbeatError::NotYetInitialized => ErrorCode::NotYetInitialized,
            HeartbeatError::ShutdownInProgress => ErrorCode::ShutdownInProgress,
        }
    }
}

/// HeartbeatTick is one firing of the heartbeat timer for a member.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatTick {
    pub member_id: i64,
}

#[derive(Debug)]
pub struct HeartbeatResponseFromPeer {
    pub target: HostAndPort,
    pub member_id: Option<i64>,
    pub result: Result<HeartbeatOutput, NetworkError>,
}

// -- elections --

#[derive(Debug, Clone, PartialEq)]
pub struct RequestVotesInput {
    pub set_name: String,
    pub term: Term,
    pub candidate_index: i64,
    pub config_version: i64,
    pub dry_run: bool,
    pub last_committed_op: OpTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestVotesOutput {
    pub term: Term,
    pub vote_granted: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestVotesError {
    #[error("not yet initialized")]
    NotYetInitialized,
    #[error("failed to persist vote: {0}")]
    LocalState(#[from] LocalStateError),
    #[error("shutting down")]
    ShutdownInProgress,
}

impl RequestVotesError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RequestVotesError::NotYetInitialized => ErrorCode::NotYetInitialized,
            RequestVotesError::LocalState(_) => ErrorCode::InternalError,
            RequestVotesError::ShutdownInProgress => ErrorCode::ShutdownInProgress,
        }
    }
}

#[derive(Debug)]
pub struct VoteResponseFromPeer {
    pub election_id: u64,
    pub member_id: i64,
    pub dry_run: bool,
    pub result: Result<RequestVotesOutput, NetworkError>,
}

// -- terms and stepdown --

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpdateTermError {
    #[error("replication term of this node was stale; retry")]
    StaleTerm,
    #[error("term {0:?} is invalid")]
    BadValue(Term),
    #[error("shutting down")]
    ShutdownInProgress,
}

impl UpdateTermError {
    pub fn code(&self) -> ErrorCode {
        match self {
            UpdateTermError::StaleTerm => ErrorCode::StaleTerm,
            UpdateTermError::BadValue(_) => ErrorCode::BadValue,
            UpdateTermError::ShutdownInProgress => ErrorCode::ShutdownInProgress,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepDownInput {
    /// Step down at the end of `wait_time` even if no secondary caught up.
    pub force: bool,
    pub wait_time: Duration,
    /// How long the node stays ineligible for election afterwards.
    pub step_down_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepDownError {
    #[error("not primary")]
    NotMaster,
    #[error("no electable secondary caught up within the wait time")]
    ExceededTimeLimit,
    #[error("step down period must be longer than the wait time")]
    BadValue,
    #[error("shutting down")]
    ShutdownInProgress,
}

impl StepDownError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StepDownError::NotMaster => ErrorCode::NotMaster,
            StepDownError::ExceededTimeLimit => ErrorCode::ExceededTimeLimit,
            StepDownError::BadValue => ErrorCode::BadValue,
            StepDownError::ShutdownInProgress => ErrorCode::ShutdownInProgress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FreezeError {
    #[error("cannot freeze a primary")]
    NotSecondary,
    #[error("shutting down")]
    ShutdownInProgress,
}

impl FreezeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            FreezeError::NotSecondary => ErrorCode::NotSecondary,
            FreezeError::ShutdownInProgress => ErrorCode::ShutdownInProgress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MaintenanceModeError {
    #[error("primaries can't modify maintenance mode")]
    NotSecondary,
    #[error("an election is in progress")]
    ElectionInProgress,
    #[error("already out of maintenance mode")]
    OperationFailed,
    #[error("no replica set config has been loaded")]
    NotYetInitialized,
    #[error("shutting down")]
    ShutdownInProgress,
}

impl MaintenanceModeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MaintenanceModeError::NotSecondary | MaintenanceModeError::ElectionInProgress => ErrorCode::NotSecondary,
            MaintenanceModeError::OperationFailed => ErrorCode::OperationFailed,
            MaintenanceModeError::NotYetInitialized => ErrorCode::NotYetInitialized,
            MaintenanceModeError::ShutdownInProgress => ErrorCode::ShutdownInProgress,
        }
    }
}

// -- progress --

#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePositionEntry {
    pub member_id: i64,
    pub config_version: i64,
    pub applied_op_time: OpTime,
    pub durable_op_time: OpTime,
}

/// The pre-term form reports one timestamp for both applied and durable progress.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyUpdatePositionEntry {
    pub member_id: i64,
    pub config_version: i64,
    pub op_time: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdatePositionInput {
    Modern(Vec<UpdatePositionEntry>),
    Legacy(Vec<LegacyUpdatePositionEntry>),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpdatePositionParseError {
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    OpTime(#[from] OpTimeParseError),
    #[error("entries mix the optime and appliedOpTime forms")]
    MixedForms,
}

impl UpdatePositionInput {
    /// Parses `{replSetUpdatePosition: 1, optimes: [...]}`.
    pub fn parse(doc: &Document) -> Result<Self, UpdatePositionParseError> {
        let mut modern = Vec::new();
        let mut legacy = Vec::new();
        for value in doc.require_array("optimes")? {
            let entry = value.as_document().ok_or_else(|| FieldError::TypeMismatch {
                field: "optimes".into(),
                expected: "object",
                found: value.type_name(),
            })?;
            let member_id = entry.require_i64("memberId")?;
            let config_version = entry.require_i64("cfgver")?;
            if entry.contains_key("optime") {
                legacy.push(LegacyUpdatePositionEntry {
                    member_id,
                    config_version,
                    op_time: entry.require_timestamp("optime")?,
                });
            } else {
                modern.push(UpdatePositionEntry {
                    member_id,
                    config_version,
                    applied_op_time: OpTime::parse_field(entry, "appliedOpTime")?,
                    durable_op_time: OpTime::parse_field(entry, "durableOpTime")?,
                });
            }
        }

        match (modern.is_empty(), legacy.is_empty()) {
            (false, false) => Err(UpdatePositionParseError::MixedForms),
            (true, false) => Ok(UpdatePositionInput::Legacy(legacy)),
            _ => Ok(UpdatePositionInput::Modern(modern)),
        }
    }

    pub fn to_document(&self) -> Document {
        let entries: Vec<Value> = match self {
            UpdatePositionInput::Modern(entries) => entries
                .iter()
                .map(|e| {
                    Value::Document(
                        Document::new()
                            .with("memberId", e.member_id)
                            .with("cfgver", e.config_version)
                            .with("appliedOpTime", e.applied_op_time.to_document())
                            .with("durableOpTime", e.durable_op_time.to_document()),
                    )
                })
                .collect(),
            UpdatePositionInput::Legacy(entries) => entries
                .iter()
                .map(|e| {
                    Value::Document(
                        Document::new()
                            .with("memberId", e.member_id)
                            .with("cfgver", e.config_version)
                            .with("optime", e.op_time),
                    )
                })
                .collect(),
        };

        Document::new().with("replSetUpdatePosition", 1).with("optimes", entries)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpdatePositionError {
    #[error("config version {theirs} does not match ours ({ours})")]
    InvalidReplicaSetConfig { ours: i64, theirs: i64 },
    #[error("member {0} is not in the config")]
    NodeNotFound(i64),
    #[error("not primary or secondary")]
    NotMasterOrSecondary,
    #[error("shutting down")]
    ShutdownInProgress,
}

impl UpdatePositionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            UpdatePositionError::InvalidReplicaSetConfig { .. } => ErrorCode::InvalidReplicaSetConfig,
            UpdatePositionError::NodeNotFound(_) => ErrorCode::NodeNotFound,
            UpdatePositionError::NotMasterOrSecondary => ErrorCode::NotMasterOrSecondary,
            UpdatePositionError::ShutdownInProgress => ErrorCode::ShutdownInProgress,
        }
    }
}

// -- writes and waits --

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PrepareWriteError {
    #[error("not primary")]
    NotMaster,
    #[error("shutting down")]
    ShutdownInProgress,
}

impl PrepareWriteError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PrepareWriteError::NotMaster => ErrorCode::NotMaster,
            PrepareWriteError::ShutdownInProgress => ErrorCode::ShutdownInProgress,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AwaitReplicationInput {
    pub op_time: OpTime,
    pub write_concern: WriteConcernOptions,
    /// The snapshot name reserved before the write, for majority waits.
    pub min_snapshot: Option<SnapshotName>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AwaitReplicationError {
    #[error("not master anymore while waiting for replication")]
    NotMaster,
    #[error("shutting down")]
    ShutdownInProgress,
    #[error("operation was interrupted")]
    Interrupted,
    #[error("operation exceeded time limit")]
    ExceededTimeLimit,
    #[error("waiting for replication timed out")]
    WriteConcernFailed,
    #[error("unrecognized write concern mode '{0}'")]
    UnknownReplWriteConcern(String),
    #[error("not enough data-bearing members to satisfy the write concern")]
    CannotSatisfyWriteConcern,
}

impl AwaitReplicationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AwaitReplicationError::NotMaster => ErrorCode::NotMaster,
            AwaitReplicationError::ShutdownInProgress => ErrorCode::ShutdownInProgress,
            AwaitReplicationError::Interrupted => ErrorCode::Interrupted,
            AwaitReplicationError::ExceededTimeLimit => ErrorCode::ExceededTimeLimit,
            AwaitReplicationError::WriteConcernFailed => ErrorCode::WriteConcernFailed,
            AwaitReplicationError::UnknownReplWriteConcern(_) => ErrorCode::UnknownReplWriteConcern,
            AwaitReplicationError::CannotSatisfyWriteConcern => ErrorCode::CannotSatisfyWriteConcern,
        }
    }
}

impl From<InterruptError> for AwaitReplicationError {
    fn from(e: InterruptError) -> Self {
        match e {
            InterruptError::Interrupted => AwaitReplicationError::Interrupted,
            InterruptError::ExceededTimeLimit => AwaitReplicationError::ExceededTimeLimit,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReadConcernLevel {
    Local,
    Majority,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaitUntilOpTimeInput {
    pub op_time: OpTime,
    pub level: ReadConcernLevel,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReadConcernError {
    #[error("no replica set config has been loaded")]
    NotYetInitialized,
    #[error("shutting down")]
    ShutdownInProgress,
    #[error("operation was interrupted")]
    Interrupted,
    #[error("operation exceeded time limit")]
    ExceededTimeLimit,
}

impl ReadConcernError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ReadConcernError::NotYetInitialized => ErrorCode::NotYetInitialized,
            ReadConcernError::ShutdownInProgress => ErrorCode::ShutdownInProgress,
            ReadConcernError::Interrupted => ErrorCode::Interrupted,
            ReadConcernError::ExceededTimeLimit => ErrorCode::ExceededTimeLimit,
        }
    }
}

impl From<InterruptError> for ReadConcernError {
    fn from(e: InterruptError) -> Self {
        match e {
            InterruptError::Interrupted => ReadConcernError::Interrupted,
            InterruptError::ExceededTimeLimit => ReadConcernError::ExceededTimeLimit,
        }
    }
}

// -- rollback --

#[derive(Debug, Clone, PartialEq)]
pub struct FinishRollbackInput {
    pub succeeded: bool,
    /// The last entry of the truncated oplog.
    pub last_applied: OpTime,
}
