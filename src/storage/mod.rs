mod capped;
mod catalog;
mod error;
mod oplog_stones;
mod options;
mod record_store;
mod recovery_unit;
mod visibility;

pub use capped::CappedCallback;
pub use catalog::collection_name;
pub use catalog::database_name;
pub use catalog::Collection;
pub use catalog::CollectionOptions;
pub use catalog::StorageCatalog;
pub use error::write_conflict_retry;
pub use error::StorageError;
pub use oplog_stones::OplogStones;
pub use oplog_stones::Stone;
pub use options::RecordStoreOptions;
pub use options::RecordStoreOptionsValidated;
pub use record_store::CursorDirection;
pub use record_store::RandomCursor;
pub use record_store::Record;
pub use record_store::RecordCursor;
pub use record_store::RecordStore;
pub use recovery_unit::Change;
pub use recovery_unit::RecoveryUnit;
pub use visibility::Journal;
pub use visibility::NoopJournal;
