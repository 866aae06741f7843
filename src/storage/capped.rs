use crate::storage::{RecoveryUnit, StorageError};
use crate::types::RecordId;
use bytes::Bytes;

/// Invoked for every record a capped store deletes on its own, so owners of the store can keep
/// secondary structures (e.g. the `_id` index) in sync.
pub trait CappedCallback: Send + Sync {
    fn about_to_delete_capped(&self, ru: &mut RecoveryUnit, id: RecordId, data: &Bytes) -> Result<(), StorageError>;
}
