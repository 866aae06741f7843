mod config;
mod coordinator;
mod local_state;
mod member_state;
mod metadata;
mod network;
mod progress;
mod replica_api;
mod snapshots;
mod state_change_listener;
mod timers;
mod write_concern;

pub use config::ConfigError;
pub use config::MemberConfig;
pub use config::ReplicaSetConfig;
pub use config::TagPattern;
pub(crate) use coordinator::Coordinator;
pub(crate) use coordinator::CoordinatorConfig;
pub use local_state::CatalogLocalState;
pub use local_state::LastVote;
pub use local_state::LocalStateError;
pub use local_state::MinValid;
pub use local_state::PersistentLocalState;
pub use local_state::VolatileLocalState;
pub use local_state::ROLLBACK_ID_NAMESPACE;
pub use member_state::IllegalTransition;
pub use member_state::MemberState;
pub use member_state::StateEvent;
pub use metadata::ReplSetMetadata;
pub use network::LoopbackEndpoint;
pub use network::LoopbackNetwork;
pub use network::ReplicationNetwork;
pub use progress::MemberProgress;
pub use replica_api::AwaitReplicationError;
pub use replica_api::AwaitReplicationInput;
pub use replica_api::CoordinatorStatus;
pub use replica_api::FinishRollbackInput;
pub use replica_api::FreezeError;
pub use replica_api::HeartbeatError;
pub use replica_api::HeartbeatInput;
pub use replica_api::HeartbeatOutput;
pub use replica_api::HeartbeatResponseFromPeer;
pub use replica_api::HeartbeatTick;
pub use replica_api::InitiateError;
pub use replica_api::InitiateInput;
pub use replica_api::LegacyUpdatePositionEntry;
pub use replica_api::MaintenanceModeError;
pub use replica_api::MemberStateError;
pub use replica_api::NetworkError;
pub use replica_api::PrepareWriteError;
pub use replica_api::ReadConcernError;
pub use replica_api::ReadConcernLevel;
pub use replica_api::RequestVotesError;
pub use replica_api::RequestVotesInput;
pub use replica_api::RequestVotesOutput;
pub use replica_api::StepDownError;
pub use replica_api::StepDownInput;
pub use replica_api::UpdatePositionEntry;
pub use replica_api::UpdatePositionError;
pub use replica_api::UpdatePositionInput;
pub use replica_api::UpdatePositionParseError;
pub use replica_api::UpdateTermError;
pub use replica_api::VoteResponseFromPeer;
pub use replica_api::WaitUntilOpTimeInput;
pub use snapshots::SnapshotName;
pub use state_change_listener::StateChangeListener;
pub use state_change_listener::StateSnapshot;
pub use write_concern::SyncMode;
pub use write_concern::WriteConcernOptions;
pub use write_concern::WriteMode;
