use crate::oplog;
use crate::replica::PersistentLocalState;
use crate::rollback::common_point::find_common_point;
use crate::rollback::fix_up_info::{DocId, FixUpInfo};
use crate::rollback::remove_saver::RemoveSaver;
use crate::rollback::{CollectionCopy, RollbackError, RollbackSource, RollbackSourceError};
use crate::storage::{write_conflict_retry, RecoveryUnit, StorageCatalog, StorageError};
use crate::types::{Document, OpTime, OperationContext};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Upper bound on the documents refetched from the sync source in one rollback.
const MAX_REFETCH_BYTES: usize = 300 * 1024 * 1024;

/// Rollback undoes the local oplog entries a sync source never saw, then resets this node's data
/// to what the source has for every touched document or collection.
pub struct Rollback {
    logger: slog::Logger,
    catalog: Arc<StorageCatalog>,
    local_state: Arc<dyn PersistentLocalState>,
    save_dir: PathBuf,
}

impl Rollback {
    pub fn new(
        logger: slog::Logger,
        catalog: Arc<StorageCatalog>,
        local_state: Arc<dyn PersistentLocalState>,
        save_dir: PathBuf,
    ) -> Self {
        Rollback {
            logger,
            catalog,
            local_state,
            save_dir,
        }
    }

    /// Rolls back against `source` and returns the optime of the newest entry left in the local
    /// oplog.
    ///
    /// `required_rbid` is the source's rollback id as seen when it was chosen; if the source has
    /// rolled back since, nothing is touched. The local rollback id is incremented whatever the
    /// outcome.
    pub async fn run(
        &self,
        ctx: &OperationContext,
        source: &dyn RollbackSource,
        required_rbid: Option<i32>,
    ) -> Result<OpTime, RollbackError> {
        slog::info!(self.logger, "Starting rollback");
        let result = self.sync_rollback(ctx, source, required_rbid).await;

        match self.local_state.increment_rollback_id() {
            Ok(rbid) => slog::info!(self.logger, "Incremented rollback id to {}", rbid),
            Err(e) => {
                slog::error!(self.logger, "Failed to increment rollback id: {}", e);
                if result.is_ok() {
                    return Err(e.into());
                }
            }
        }

        match &result {
            Ok(last_applied) => slog::info!(self.logger, "Rollback finished. Last applied optime is {:?}", last_applied),
            Err(e) if e.is_fatal() => slog::error!(self.logger, "Rollback cannot complete, full resync required: {}", e),
            Err(e) => slog::error!(self.logger, "Rollback failed: {}", e),
        }
        result
    }

    async fn sync_rollback(
        &self,
        ctx: &OperationContext,
        source: &dyn RollbackSource,
        required_rbid: Option<i32>,
    ) -> Result<OpTime, RollbackError> {
        let mut fix_up = FixUpInfo::new();
        fix_up.rbid = source.get_rollback_id().await?;
        if let Some(required) = required_rbid {
            if required != fix_up.rbid {
                return Err(RollbackError::UnrecoverableRollbackError(format!(
                    "sync source rollback id changed from {} to {} before rollback started",
                    required, fix_up.rbid
                )));
            }
        }

        let mut local = self.catalog.local_oplog().reverse_iterator();
        let mut remote = source.oplog().await?;
        let (common_point, common_point_loc) = find_common_point(&mut local, remote.as_mut(), |entry| {
            fix_up.update_from_local_oplog_entry(&entry.to_document())
        })
        .await?;
        fix_up.common_point = common_point;
        fix_up.common_point_loc = common_point_loc;
        slog::info!(
            self.logger,
            "Rollback common point is {:?} at record {}",
            common_point,
            common_point_loc
        );

        fix_up.remove_redundant_operations();
        check_for_interrupt(ctx)?;
        self.sync_fix_up(ctx, &fix_up, source).await
    }

    async fn sync_fix_up(
        &self,
        ctx: &OperationContext,
        fix_up: &FixUpInfo,
        source: &dyn RollbackSource,
    ) -> Result<OpTime, RollbackError> {
        slog::info!(
            self.logger,
            "Rollback fix-up: {} documents to refetch, {} collections to drop, {} to resync, {} to resync metadata, {} with indexes to drop",
            fix_up.docs_to_refetch.len(),
            fix_up.collections_to_drop.len(),
            fix_up.collections_to_resync_data.len(),
            fix_up.collections_to_resync_metadata.len(),
            fix_up.indexes_to_drop.len()
        );

        let refetched = self.refetch_documents(ctx, fix_up, source).await?;
        self.check_rbid_and_update_min_valid(fix_up, source).await?;

        if !fix_up.collections_to_resync_data.is_empty() {
            for ns in fix_up.collections_to_resync_data.iter() {
                check_for_interrupt(ctx)?;
                self.resync_collection(ctx, ns, source).await?;
            }
            // The copies must come from the same history the refetches did.
            self.check_rbid_and_update_min_valid(fix_up, source).await?;
        }

        for ns in fix_up.collections_to_resync_metadata.iter() {
            self.resync_metadata(ns, source).await?;
        }

        for ns in fix_up.collections_to_drop.iter() {
            check_for_interrupt(ctx)?;
            self.drop_collection(ns)?;
        }

        for (ns, indexes) in fix_up.indexes_to_drop.iter() {
            self.drop_indexes(ns, indexes.iter())?;
        }

        self.apply_refetched(ctx, refetched)?;

        let mut ru = RecoveryUnit::new();
        self.catalog
            .oplog()
            .capped_truncate_after(&mut ru, fix_up.common_point_loc, false)?;
        ru.commit();
        slog::info!(self.logger, "Truncated oplog after {:?}", fix_up.common_point);

        let last_entry = self.catalog.local_oplog().last_entry().map_err(RollbackError::LocalOplog)?;
        Ok(last_entry.map_or(fix_up.common_point, |entry| entry.op_time()))
    }

    async fn refetch_documents(
        &self,
        ctx: &OperationContext,
        fix_up: &FixUpInfo,
        source: &dyn RollbackSource,
    ) -> Result<Vec<(DocId, Option<Document>)>, RollbackError> {
        let mut total_bytes = 0;
        let mut refetched = Vec::with_capacity(fix_up.docs_to_refetch.len());
        for doc_id in fix_up.docs_to_refetch.iter() {
            check_for_interrupt(ctx)?;
            let doc = source.find_one(&doc_id.ns, &doc_id.id.0).await?;
            if let Some(doc) = &doc {
                total_bytes += oplog::encoded_len(doc);
                if total_bytes > MAX_REFETCH_BYTES {
                    return Err(RollbackError::Fatal(format!(
                        "rollback too large: more than {} bytes of documents to refetch",
                        MAX_REFETCH_BYTES
                    )));
                }
            }
            refetched.push((doc_id.clone(), doc));
        }
        Ok(refetched)
    }

    async fn check_rbid_and_update_min_valid(
        &self,
        fix_up: &FixUpInfo,
        source: &dyn RollbackSource,
    ) -> Result<(), RollbackError> {
        let last_op = source.get_last_operation().await?.ok_or_else(|| {
            RollbackError::UnrecoverableRollbackError("sync source has an empty oplog".to_string())
        })?;
        let rbid = source.get_rollback_id().await?;
        if rbid != fix_up.rbid {
            return Err(RollbackError::UnrecoverableRollbackError(format!(
                "sync source rolled back during our rollback (rollback id {} is now {})",
                fix_up.rbid, rbid
            )));
        }

        let mut min_valid = self.local_state.load_min_valid()?;
        min_valid.op_time = last_op.op_time();
        self.local_state.store_min_valid(min_valid)?;
        slog::info!(self.logger, "Set minValid to {:?}", min_valid.op_time);
        Ok(())
    }

    async fn resync_collection(
        &self,
        ctx: &OperationContext,
        ns: &str,
        source: &dyn RollbackSource,
    ) -> Result<(), RollbackError> {
        slog::info!(self.logger, "Resyncing collection {}", ns);
        match self.catalog.drop_collection(ns) {
            Ok(()) | Err(StorageError::NamespaceNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let copy = match source.copy_collection(ns).await {
            Ok(copy) => copy,
            Err(RollbackSourceError::NamespaceNotFound(_)) => {
                slog::info!(self.logger, "Collection {} no longer exists on the sync source", ns);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let CollectionCopy { options, documents } = copy;
        let collection = self.catalog.create_collection(ns, options)?;
        write_conflict_retry(&self.logger, ctx, "rollback resync collection", || {
            let mut ru = RecoveryUnit::new();
            for doc in documents.iter() {
                collection.insert_document(&mut ru, doc)?;
            }
            ru.commit();
            Ok(())
        })?;
        Ok(())
    }

    async fn resync_metadata(&self, ns: &str, source: &dyn RollbackSource) -> Result<(), RollbackError> {
        let options = match source.get_collection_info(ns).await? {
            Some(options) => options,
            None => {
                slog::info!(self.logger, "Collection {} was dropped on the sync source, skipping metadata resync", ns);
                return Ok(());
            }
        };
        let collection = match self.catalog.get_collection(ns) {
            Some(collection) => collection,
            None => {
                slog::warn!(self.logger, "Collection {} is missing locally, skipping metadata resync", ns);
                return Ok(());
            }
        };

        let mut current = collection.options();
        current.flags = options.flags;
        current.validator = options.validator;
        current.validation_action = options.validation_action;
        current.validation_level = options.validation_level;
        collection.set_options(current);
        slog::info!(self.logger, "Resynced metadata of {}", ns);
        Ok(())
    }

    fn drop_collection(&self, ns: &str) -> Result<(), RollbackError> {
        let collection = match self.catalog.get_collection(ns) {
            Some(collection) => collection,
            None => return Ok(()),
        };

        let mut saver = RemoveSaver::new(&self.save_dir, ns);
        for doc in collection.documents()? {
            saver.save(&doc)?;
        }
        saver.flush()?;
        self.catalog.drop_collection(ns)?;
        slog::info!(self.logger, "Dropped collection {} created after the common point", ns);
        Ok(())
    }

    fn drop_indexes<'a, I>(&self, ns: &str, indexes: I) -> Result<(), RollbackError>
    where
        I: Iterator<Item = &'a String>,
    {
        let collection = match self.catalog.get_collection(ns) {
            Some(collection) => collection,
            None => {
                slog::warn!(self.logger, "Cannot drop indexes of missing collection {}", ns);
                return Ok(());
            }
        };
        for index in indexes {
            match collection.drop_index(index) {
                Ok(()) => slog::info!(self.logger, "Dropped index {} on {}", index, ns),
                Err(StorageError::IndexNotFound { .. }) => {
                    slog::warn!(self.logger, "Index {} on {} not found, nothing to drop", index, ns)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn apply_refetched(
        &self,
        ctx: &OperationContext,
        refetched: Vec<(DocId, Option<Document>)>,
    ) -> Result<(), RollbackError> {
        let mut savers: BTreeMap<String, RemoveSaver> = BTreeMap::new();

        for (doc_id, authoritative) in refetched {
            check_for_interrupt(ctx)?;
            let collection = match (self.catalog.get_collection(&doc_id.ns), &authoritative) {
                (Some(collection), _) => collection,
                (None, Some(_)) => self.catalog.get_or_create_collection(&doc_id.ns)?,
                (None, None) => continue,
            };
            let id = &doc_id.id.0;

            if let Some(local) = collection.find_by_id(id)? {
                let save_dir = &self.save_dir;
                savers
                    .entry(doc_id.ns.clone())
                    .or_insert_with(|| RemoveSaver::new(save_dir, &doc_id.ns))
                    .save(&local)?;
            }

            match authoritative {
                Some(doc) => {
                    write_conflict_retry(&self.logger, ctx, "rollback upsert", || {
                        let mut ru = RecoveryUnit::new();
                        collection.upsert_document(&mut ru, &doc)?;
                        ru.commit();
                        Ok(())
                    })?;
                }
                None if collection.is_capped() => {
                    let loc = match collection.record_id_of(id) {
                        Some(loc) => loc,
                        None => continue,
                    };
                    slog::warn!(
                        self.logger,
                        "Rolling back a document in capped collection {} truncates everything from {} onwards",
                        doc_id.ns,
                        loc
                    );
                    let mut ru = RecoveryUnit::new();
                    match collection.capped_truncate_after(&mut ru, loc, true) {
                        Ok(()) => ru.commit(),
                        Err(e) => {
                            ru.abort();
                            slog::warn!(
                                self.logger,
                                "Capped truncate of {} failed ({}), truncating the whole collection",
                                doc_id.ns,
                                e
                            );
                            let mut ru = RecoveryUnit::new();
                            collection.truncate(&mut ru)?;
                            ru.commit();
                        }
                    }
                }
                None => {
                    write_conflict_retry(&self.logger, ctx, "rollback delete", || {
                        let mut ru = RecoveryUnit::new();
                        collection.delete_by_id(&mut ru, id)?;
                        ru.commit();
                        Ok(())
                    })?;
                }
            }
        }

        for saver in savers.values_mut() {
            saver.flush()?;
        }
        Ok(())
    }
}

fn check_for_interrupt(ctx: &OperationContext) -> Result<(), RollbackError> {
    ctx.check_for_interrupt().map_err(StorageError::from)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::oplog::{OpType, OplogEntry};
    use crate::replica::VolatileLocalState;
    use crate::rollback::remove_saver::read_saved;
    use crate::rollback::InMemoryRollbackSource;
    use crate::storage::{CollectionOptions, NoopJournal, Record};
    use crate::types::{Term, Timestamp, Value};

    pub(crate) fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    pub(crate) fn catalog() -> Arc<StorageCatalog> {
        Arc::new(StorageCatalog::new(logger(), 1 << 20, Arc::new(NoopJournal)).unwrap())
    }

    pub(crate) fn append(catalog: &StorageCatalog, entries: &[OplogEntry]) {
        let mut ru = RecoveryUnit::new();
        let mut records: Vec<Record> = entries.iter().map(|e| Record::new(e.encode().unwrap())).collect();
        catalog.oplog().insert_records(&mut ru, &mut records).unwrap();
        ru.commit();
    }

    pub(crate) fn insert(catalog: &StorageCatalog, ns: &str, doc: Document) {
        let collection = catalog.get_or_create_collection(ns).unwrap();
        let mut ru = RecoveryUnit::new();
        collection.insert_document(&mut ru, &doc).unwrap();
        ru.commit();
    }

    pub(crate) fn op(secs: u32, h: i64, op: OpType, ns: &str, o: Document) -> OplogEntry {
        OplogEntry::new(Timestamp::new(secs, 1), Term::new(1), h, op, ns, o)
    }

    fn noop(secs: u32, h: i64) -> OplogEntry {
        OplogEntry::noop(Timestamp::new(secs, 1), Term::new(1), h)
    }

    fn save_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("replset-rollback-{}-{}", name, std::process::id()))
    }

    struct Fixture {
        local: Arc<StorageCatalog>,
        local_state: Arc<VolatileLocalState>,
        remote: Arc<StorageCatalog>,
        source: InMemoryRollbackSource,
        rollback: Rollback,
    }

    fn fixture(name: &str) -> Fixture {
        let local = catalog();
        let local_state = Arc::new(VolatileLocalState::new());
        let remote = catalog();
        let source = InMemoryRollbackSource::new(remote.clone(), Arc::new(VolatileLocalState::new()));
        let rollback = Rollback::new(logger(), local.clone(), local_state.clone(), save_dir(name));
        Fixture {
            local,
            local_state,
            remote,
            source,
            rollback,
        }
    }

    fn oplog_timestamps(catalog: &StorageCatalog) -> Vec<u32> {
        let mut cursor = catalog.oplog().cursor(crate::storage::CursorDirection::Forward);
        let mut seen = Vec::new();
        while let Some(record) = cursor.next() {
            seen.push(OplogEntry::decode(&record.data).unwrap().ts.secs());
        }
        seen
    }

    #[tokio::test]
    async fn rolls_back_a_delete() {
        // -- setup --
        let f = fixture("delete");
        append(&f.local, &[noop(1, 1), op(2, 1, OpType::Delete, "t.c", Document::new().with("_id", 0))]);
        f.local.get_or_create_collection("t.c").unwrap();
        append(&f.remote, &[noop(1, 1)]);
        insert(&f.remote, "t.c", Document::new().with("_id", 0).with("a", 1));
        let rbid_before = f.local_state.rollback_id().unwrap();

        // -- execute --
        let last_applied = f.rollback.run(&OperationContext::new(), &f.source, None).await.unwrap();

        // -- verify --
        assert_eq!(last_applied, OpTime::new(Timestamp::new(1, 1), Term::new(1)));
        assert_eq!(oplog_timestamps(&f.local), vec![1]);
        let collection = f.local.get_collection("t.c").unwrap();
        assert_eq!(collection.num_records(), 1);
        assert_eq!(
            collection.find_by_id(&Value::from(0)).unwrap(),
            Some(Document::new().with("_id", 0).with("a", 1))
        );
        assert_eq!(f.local_state.rollback_id().unwrap(), rbid_before + 1);
        assert_eq!(
            f.local_state.load_min_valid().unwrap().op_time,
            OpTime::new(Timestamp::new(1, 1), Term::new(1))
        );
    }

    #[tokio::test]
    async fn rolls_back_inserts_and_collection_creation() {
        // -- setup --
        let f = fixture("insert");
        append(
            &f.local,
            &[
                noop(1, 1),
                op(2, 2, OpType::Insert, "t.c", Document::new().with("_id", 7)),
                op(3, 3, OpType::Command, "t.$cmd", Document::new().with("create", "fresh")),
                op(4, 4, OpType::Insert, "t.fresh", Document::new().with("_id", 1)),
            ],
        );
        insert(&f.local, "t.c", Document::new().with("_id", 6));
        insert(&f.local, "t.c", Document::new().with("_id", 7).with("local", true));
        insert(&f.local, "t.fresh", Document::new().with("_id", 1));
        append(&f.remote, &[noop(1, 1)]);
        insert(&f.remote, "t.c", Document::new().with("_id", 6));

        // -- execute --
        f.rollback.run(&OperationContext::new(), &f.source, None).await.unwrap();

        // -- verify --
        let collection = f.local.get_collection("t.c").unwrap();
        assert_eq!(collection.num_records(), 1);
        assert_eq!(collection.find_by_id(&Value::from(7)).unwrap(), None);
        assert!(f.local.get_collection("t.fresh").is_none());

        // Both the overwritten document and the dropped collection were archived.
        let saved: Vec<PathBuf> = std::fs::read_dir(save_dir("insert").join("rollback"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        let named = |prefix: &str| {
            saved
                .iter()
                .find(|path| path.file_name().unwrap().to_string_lossy().starts_with(prefix))
                .cloned()
        };
        let overwritten = named("t.c.").expect("t.c save file");
        assert_eq!(
            read_saved(&overwritten).unwrap(),
            vec![Document::new().with("_id", 7).with("local", true)]
        );
        assert!(named("t.fresh.").is_some(), "{:?}", saved);
        std::fs::remove_dir_all(save_dir("insert")).unwrap();
    }

    #[tokio::test]
    async fn resyncs_dropped_collection_and_metadata() {
        // -- setup --
        let f = fixture("resync");
        append(
            &f.local,
            &[
                noop(1, 1),
                op(2, 2, OpType::Command, "t.$cmd", Document::new().with("drop", "gone")),
                op(
                    3,
                    3,
                    OpType::Command,
                    "t.$cmd",
                    Document::new().with("collMod", "mod").with("validationLevel", "off"),
                ),
                op(
                    4,
                    4,
                    OpType::Insert,
                    "t.system.indexes",
                    Document::new().with("ns", "t.mod").with("name", "a_1"),
                ),
            ],
        );
        let local_mod = f.local.get_or_create_collection("t.mod").unwrap();
        local_mod.set_options(CollectionOptions {
            validation_level: Some("off".to_string()),
            ..Default::default()
        });
        local_mod.create_index("a_1", Document::new().with("a", 1));

        append(&f.remote, &[noop(1, 1)]);
        insert(&f.remote, "t.gone", Document::new().with("_id", 1));
        insert(&f.remote, "t.gone", Document::new().with("_id", 2));
        f.remote.create_collection(
            "t.mod",
            CollectionOptions {
                validation_level: Some("strict".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        // -- execute --
        f.rollback.run(&OperationContext::new(), &f.source, None).await.unwrap();

        // -- verify --
        assert_eq!(f.local.get_collection("t.gone").unwrap().num_records(), 2);
        let local_mod = f.local.get_collection("t.mod").unwrap();
        assert_eq!(local_mod.options().validation_level.as_deref(), Some("strict"));
        assert!(!local_mod.index_names().contains(&"a_1".to_string()));
    }

    #[tokio::test]
    async fn capped_delete_truncates_from_the_document() {
        // -- setup --
        let f = fixture("capped");
        let capped = f.local.create_collection("t.capped", CollectionOptions::capped(1 << 16, None)).unwrap();
        for id in 0..3 {
            insert(&f.local, "t.capped", Document::new().with("_id", id));
        }
        append(
            &f.local,
            &[noop(1, 1), op(2, 2, OpType::Insert, "t.capped", Document::new().with("_id", 1))],
        );
        append(&f.remote, &[noop(1, 1)]);

        // -- execute --
        f.rollback.run(&OperationContext::new(), &f.source, None).await.unwrap();

        // -- verify --
        assert_eq!(capped.num_records(), 1);
        assert!(capped.find_by_id(&Value::from(0)).unwrap().is_some());
        std::fs::remove_dir_all(save_dir("capped")).ok();
    }

    #[tokio::test]
    async fn changed_source_rbid_aborts_but_still_increments_ours() {
        // -- setup --
        let f = fixture("rbid");
        append(&f.local, &[noop(1, 1), noop(2, 2)]);
        append(&f.remote, &[noop(1, 1)]);
        let source_rbid = f.source.get_rollback_id().await.unwrap();

        // -- execute --
        let result = f.rollback.run(&OperationContext::new(), &f.source, Some(source_rbid + 1)).await;

        // -- verify --
        assert!(matches!(result, Err(RollbackError::UnrecoverableRollbackError(_))));
        assert_eq!(oplog_timestamps(&f.local), vec![1, 2]);
        assert_eq!(f.local_state.rollback_id().unwrap(), 2);
    }

    #[tokio::test]
    async fn unsupported_ops_leave_data_untouched() {
        // -- setup --
        let f = fixture("fatal");
        append(
            &f.local,
            &[noop(1, 1), op(2, 2, OpType::Command, "t.$cmd", Document::new().with("dropDatabase", 1))],
        );
        append(&f.remote, &[noop(1, 1)]);

        // -- execute --
        let result = f.rollback.run(&OperationContext::new(), &f.source, None).await;

        // -- verify --
        let error = result.unwrap_err();
        assert!(error.is_fatal());
        assert_eq!(oplog_timestamps(&f.local), vec![1, 2]);
    }

    #[tokio::test]
    async fn missing_common_point_needs_resync() {
        let f = fixture("no-common-point");
        append(&f.local, &[noop(5, 5), noop(6, 6)]);
        append(&f.remote, &[noop(1, 1), noop(2, 2)]);

        let result = f.rollback.run(&OperationContext::new(), &f.source, None).await;

        assert!(matches!(result, Err(RollbackError::OplogStartMissing(_))));
    }
}
