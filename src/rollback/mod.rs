mod common_point;
mod error;
mod fix_up_info;
mod remove_saver;
mod rollback_source;
mod sync_rollback;

pub use common_point::find_common_point;
pub use error::RollbackError;
pub use error::RollbackSourceError;
pub use fix_up_info::DocId;
pub use fix_up_info::FixUpInfo;
pub use fix_up_info::MAX_APPLY_OPS_DEPTH;
pub use remove_saver::read_saved;
pub use remove_saver::RemoveSaver;
pub use rollback_source::CollectionCopy;
pub use rollback_source::InMemoryRollbackSource;
pub use rollback_source::RollbackSource;
pub use sync_rollback::Rollback;
