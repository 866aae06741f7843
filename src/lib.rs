mod actor;
mod api;
mod clock;
mod oplog;
mod pool;
mod replica;
mod rollback;
mod server;
mod storage;
mod sync;
mod types;
mod grpc {
    include!("../generated/replset.rs");
}

pub use actor::ActorExited;
pub use actor::CoordinatorClient;
pub use actor::WeakCoordinatorClient;
pub use api::try_create_node;
pub use api::MemberStateEvent;
pub use api::NodeEvent;
pub use api::NodeEventListener;
pub use api::NodeRollbackError;
pub use api::NodeTransport;
pub use api::ReplSetNode;
pub use api::ReplSetNodeConfig;
pub use api::ReplSetNodeCreationError;
pub use api::ReplicationOptions;
pub use api::WriteError;
pub use clock::Clock;
pub use clock::RealClock;
pub use oplog::LocalOplog;
pub use oplog::OpType;
pub use oplog::OplogEntry;
pub use oplog::OplogIterator;
pub use oplog::OplogReadError;
pub use oplog::OPLOG_NAMESPACE;
pub use pool::ConnectionFactory;
pub use pool::ConnectionHandle;
pub use pool::ConnectionPool;
pub use pool::ConnectionPoolOptions;
pub use pool::ConnectionPoolOptionsValidated;
pub use pool::HostPoolState;
pub use pool::HostStats;
pub use pool::PoolError;
pub use pool::PoolStats;
pub use pool::PooledConnection;
pub use replica::AwaitReplicationError;
pub use replica::AwaitReplicationInput;
pub use replica::CatalogLocalState;
pub use replica::CoordinatorStatus;
pub use replica::InitiateError;
pub use replica::LoopbackNetwork;
pub use replica::MemberState;
pub use replica::PersistentLocalState;
pub use replica::ReplicaSetConfig;
pub use replica::StepDownError;
pub use replica::StepDownInput;
pub use replica::SyncMode;
pub use replica::UpdatePositionEntry;
pub use replica::UpdatePositionInput;
pub use replica::UpdateTermError;
pub use replica::VolatileLocalState;
pub use replica::WriteConcernOptions;
pub use replica::WriteMode;
pub use rollback::InMemoryRollbackSource;
pub use rollback::Rollback;
pub use rollback::RollbackError;
pub use rollback::RollbackSource;
pub use server::GrpcConnectionFactory;
pub use server::GrpcNetwork;
pub use server::RemoteRollbackSource;
pub use server::RpcServer;
pub use storage::write_conflict_retry;
pub use storage::Collection;
pub use storage::CollectionOptions;
pub use storage::CursorDirection;
pub use storage::NoopJournal;
pub use storage::OplogStones;
pub use storage::Record;
pub use storage::RecordStore;
pub use storage::RecordStoreOptions;
pub use storage::RecoveryUnit;
pub use storage::StorageCatalog;
pub use storage::StorageError;
pub use sync::fetch_batch;
pub use sync::OplogApplier;
pub use sync::SyncError;
pub use sync::SyncPass;
pub use types::Document;
pub use types::ErrorCode;
pub use types::HostAndPort;
pub use types::OpTime;
pub use types::OperationContext;
pub use types::RecordId;
pub use types::Term;
pub use types::Timestamp;
pub use types::Value;

// `crate::{root_mod}` has no code, only `mod` and `pub use` statements. No `mod` is `pub`; every
// export goes through an individual use statement so each root mod can be organized freely.
