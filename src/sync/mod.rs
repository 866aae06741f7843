//! This mod pulls a secondary's oplog forward from its sync source.
mod applier;
mod background_sync;
mod error;
mod fetcher;
mod sync_source;

pub use applier::OplogApplier;
pub(crate) use background_sync::BackgroundSync;
pub use background_sync::SyncPass;
pub use error::SyncError;
pub use fetcher::fetch_batch;
pub(crate) use sync_source::choose_sync_source;
pub(crate) use sync_source::SyncSourceConnector;
