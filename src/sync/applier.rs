use crate::oplog::{OpType, OplogEntry};
use crate::storage::{database_name, write_conflict_retry, CollectionOptions, Record, RecoveryUnit, StorageCatalog, StorageError};
use crate::sync::SyncError;
use crate::types::{Document, OpTime, OperationContext, Value};
use std::sync::Arc;

/// OplogApplier replays fetched entries against the local catalog. Each entry's data change and
/// its copy in the local oplog commit in one recovery unit.
pub struct OplogApplier {
    logger: slog::Logger,
    catalog: Arc<StorageCatalog>,
}

impl OplogApplier {
    pub fn new(logger: slog::Logger, catalog: Arc<StorageCatalog>) -> Self {
        OplogApplier { logger, catalog }
    }

    /// Applies `batch` in order and returns the optime of the last entry applied. Stops at the
    /// first entry that fails; everything before it stays applied.
    pub fn apply_batch(&self, ctx: &OperationContext, batch: &[OplogEntry]) -> Result<OpTime, SyncError> {
        let mut last_applied = OpTime::null();
        for entry in batch {
            ctx.check_for_interrupt().map_err(StorageError::from)?;
            self.apply_one(ctx, entry)?;
            last_applied = entry.op_time();
        }
        Ok(last_applied)
    }

    fn apply_one(&self, ctx: &OperationContext, entry: &OplogEntry) -> Result<(), SyncError> {
        if entry.op == OpType::Command {
            self.apply_command(entry)?;
        }
        let encoded = entry.encode().map_err(StorageError::from)?;

        let result = write_conflict_retry(&self.logger, ctx, "oplog apply", || {
            let mut ru = RecoveryUnit::new();
            match entry.op {
                OpType::Insert => {
                    let collection = self.catalog.get_or_create_collection(&entry.ns)?;
                    collection.upsert_document(&mut ru, &entry.o)?;
                }
                OpType::Delete => {
                    if let (Some(collection), Some(id)) = (self.catalog.get_collection(&entry.ns), entry.o.get("_id")) {
                        collection.delete_by_id(&mut ru, id)?;
                    }
                }
                OpType::Update => {
                    let collection = self.catalog.get_or_create_collection(&entry.ns)?;
                    let updated = updated_document(entry, collection.find_by_id(update_target(entry)?)?)?;
                    collection.upsert_document(&mut ru, &updated)?;
                }
                OpType::Noop | OpType::Command => {}
            }
            self.catalog
                .oplog()
                .insert_records(&mut ru, &mut [Record::new(encoded.clone())])?;
            ru.commit();
            Ok(())
        });

        result.map_err(|e| match e {
            StorageError::BadOplogEntry(reason) => SyncError::Apply {
                op: entry.op,
                ns: entry.ns.clone(),
                reason,
            },
            e => SyncError::Storage(e),
        })
    }

    fn apply_command(&self, entry: &OplogEntry) -> Result<(), SyncError> {
        let unsupported = |reason: String| SyncError::Apply {
            op: entry.op,
            ns: entry.ns.clone(),
            reason,
        };
        let name = entry
            .o
            .first_key()
            .ok_or_else(|| unsupported("empty command".to_string()))?;
        let target = match entry.o.get(name) {
            Some(Value::String(coll)) => format!("{}.{}", database_name(&entry.ns), coll),
            _ => return Err(unsupported(format!("command '{}' names no collection", name))),
        };

        match name {
            "create" => {
                let options = CollectionOptions::parse(&entry.o).map_err(|e| unsupported(e.to_string()))?;
                self.catalog.create_collection(&target, options)?;
            }
            "drop" => match self.catalog.drop_collection(&target) {
                Ok(()) | Err(StorageError::NamespaceNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            },
            "createIndexes" => {
                let index = entry.o.get_str("name").ok_or_else(|| unsupported("index has no name".to_string()))?;
                let key = entry.o.get_document("key").cloned().unwrap_or_default();
                self.catalog.get_or_create_collection(&target)?.create_index(index, key);
            }
            "dropIndexes" | "deleteIndexes" => {
                let index = entry.o.get_str("index").ok_or_else(|| unsupported("no index to drop".to_string()))?;
                if let Some(collection) = self.catalog.get_collection(&target) {
                    match collection.drop_index(index) {
                        Ok(()) | Err(StorageError::IndexNotFound { .. }) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            other => return Err(unsupported(format!("command '{}' can't be applied", other))),
        }
        slog::debug!(self.logger, "Applied {} on {}", name, target);
        Ok(())
    }
}

fn update_target(entry: &OplogEntry) -> Result<&Value, StorageError> {
    entry
        .o2
        .as_ref()
        .and_then(|o2| o2.get("_id"))
        .ok_or_else(|| StorageError::BadOplogEntry("update without o2._id".to_string()))
}

/// A replacement document as is, or `current` with each `$set` field overwritten.
fn updated_document(entry: &OplogEntry, current: Option<Document>) -> Result<Document, StorageError> {
    let id = update_target(entry)?.clone();
    if !entry.o.keys().any(|k| k.starts_with('$')) {
        let mut replacement = entry.o.clone();
        replacement.insert("_id", id);
        return Ok(replacement);
    }

    let mut doc = current.unwrap_or_else(|| Document::new().with("_id", id));
    for (op, fields) in entry.o.iter() {
        match (op, fields) {
            ("$set", Value::Document(fields)) => {
                for (k, v) in fields.iter() {
                    doc.insert(k, v.clone());
                }
            }
            ("$unset", Value::Document(fields)) => {
                for k in fields.keys() {
                    doc.remove(k);
                }
            }
            (other, _) => return Err(StorageError::BadOplogEntry(format!("unsupported update operator {}", other))),
        }
    }
    Ok(doc)
}
