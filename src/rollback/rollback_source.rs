use crate::oplog::{OplogEntry, OplogIterator};
use crate::replica::PersistentLocalState;
use crate::rollback::RollbackSourceError;
use crate::storage::{CollectionOptions, StorageCatalog};
use crate::types::{Document, RecordId, Value};
use async_trait::async_trait;
use std::sync::Arc;

/// Everything needed to recreate a collection locally.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionCopy {
    pub options: CollectionOptions,
    pub documents: Vec<Document>,
}

/// RollbackSource is the sync source as rollback sees it: its oplog, its rollback id and point
/// reads of its data.
#[async_trait]
pub trait RollbackSource: Send + Sync {
    async fn get_rollback_id(&self) -> Result<i32, RollbackSourceError>;

    async fn get_last_operation(&self) -> Result<Option<OplogEntry>, RollbackSourceError>;

    /// Iterates the source's oplog newest entry first.
    async fn oplog(&self) -> Result<Box<dyn OplogIterator>, RollbackSourceError>;

    async fn find_one(&self, ns: &str, id: &Value) -> Result<Option<Document>, RollbackSourceError>;

    /// None when the source doesn't have the collection.
    async fn get_collection_info(&self, ns: &str) -> Result<Option<CollectionOptions>, RollbackSourceError>;

    async fn copy_collection(&self, ns: &str) -> Result<CollectionCopy, RollbackSourceError>;
}

/// InMemoryRollbackSource serves rollback reads out of a catalog in this process. The RPC server
/// uses it to answer rollback calls from peers, and tests use it as a sync source directly.
#[derive(Clone)]
pub struct InMemoryRollbackSource {
    catalog: Arc<StorageCatalog>,
    local_state: Arc<dyn PersistentLocalState>,
}

impl InMemoryRollbackSource {
    pub fn new(catalog: Arc<StorageCatalog>, local_state: Arc<dyn PersistentLocalState>) -> Self {
        InMemoryRollbackSource { catalog, local_state }
    }

    /// Returns up to `limit` entries stored before record `before`, newest first. `None` starts
    /// at the top of the oplog.
    pub async fn scan_oplog(
        &self,
        before: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<(OplogEntry, RecordId)>, RollbackSourceError> {
        let mut iter = self.catalog.local_oplog().reverse_iterator();
        let mut page = Vec::new();
        while page.len() < limit {
            let (entry, id) = match iter.next().await? {
                Some(next) => next,
                None => break,
            };
            if before.map_or(true, |before| id < before) {
                page.push((entry, id));
            }
        }
        Ok(page)
    }
}

#[async_trait]
impl RollbackSource for InMemoryRollbackSource {
    async fn get_rollback_id(&self) -> Result<i32, RollbackSourceError> {
        Ok(self.local_state.rollback_id()?)
    }

    async fn get_last_operation(&self) -> Result<Option<OplogEntry>, RollbackSourceError> {
        Ok(self.catalog.local_oplog().last_entry()?)
    }

    async fn oplog(&self) -> Result<Box<dyn OplogIterator>, RollbackSourceError> {
        Ok(Box::new(self.catalog.local_oplog().reverse_iterator()))
    }

    async fn find_one(&self, ns: &str, id: &Value) -> Result<Option<Document>, RollbackSourceError> {
        match self.catalog.get_collection(ns) {
            Some(collection) => Ok(collection.find_by_id(id)?),
            None => Ok(None),
        }
    }

    async fn get_collection_info(&self, ns: &str) -> Result<Option<CollectionOptions>, RollbackSourceError> {
        Ok(self.catalog.get_collection(ns).map(|c| c.options()))
    }

    async fn copy_collection(&self, ns: &str) -> Result<CollectionCopy, RollbackSourceError> {
        let collection = self
            .catalog
            .get_collection(ns)
            .ok_or_else(|| RollbackSourceError::NamespaceNotFound(ns.to_string()))?;
        Ok(CollectionCopy {
            options: collection.options(),
            documents: collection.documents()?,
        })
    }
}
