use crate::oplog::{OplogEntry, OplogEntryParseError};
use crate::storage::{CursorDirection, RecordCursor, RecordStore, StorageError};
use crate::types::RecordId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OplogReadError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Parse(#[from] OplogEntryParseError),
    #[error("remote oplog read failed: {0}")]
    Remote(String),
}

/// OplogIterator walks an oplog from its newest entry to its oldest.
#[async_trait::async_trait]
pub trait OplogIterator: Send {
    async fn next(&mut self) -> Result<Option<(OplogEntry, RecordId)>, OplogReadError>;
}

/// LocalOplog reads the oplog record store of this node.
#[derive(Clone)]
pub struct LocalOplog {
    store: RecordStore,
}

impl LocalOplog {
    pub fn new(store: RecordStore) -> Self {
        LocalOplog { store }
    }

    pub fn reverse_iterator(&self) -> LocalOplogIterator {
        LocalOplogIterator {
            cursor: self.store.cursor(CursorDirection::Backward),
        }
    }

    pub fn last_entry(&self) -> Result<Option<OplogEntry>, OplogReadError> {
        let mut cursor = self.store.cursor(CursorDirection::Backward);
        match cursor.next() {
            Some(record) => Ok(Some(OplogEntry::decode(&record.data)?)),
            None => Ok(None),
        }
    }
}

pub struct LocalOplogIterator {
    cursor: RecordCursor,
}

#[async_trait::async_trait]
impl OplogIterator for LocalOplogIterator {
    async fn next(&mut self) -> Result<Option<(OplogEntry, RecordId)>, OplogReadError> {
        match self.cursor.next() {
            Some(record) => {
                let entry = OplogEntry::decode(&record.data)?;
                Ok(Some((entry, record.id)))
            }
            None => Ok(None),
        }
    }
}
