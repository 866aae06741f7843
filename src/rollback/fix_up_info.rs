use crate::oplog;
use crate::rollback::RollbackError;
use crate::storage::{collection_name, database_name};
use crate::types::{Document, IdKey, OpTime, RecordId, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Entries bigger than this can't have come from a healthy primary.
const MAX_ENTRY_SIZE: usize = 512 * 1024 * 1024;

/// applyOps may nest. Deeper nesting than this is treated as a corrupt oplog.
pub const MAX_APPLY_OPS_DEPTH: usize = 16;

const COLL_MOD_METADATA_FIELDS: &[&str] = &[
    "validator",
    "validationAction",
    "validationLevel",
    "usePowerOf2Sizes",
    "noPadding",
];

/// DocId names one document that must be refetched from the sync source.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct DocId {
    pub ns: String,
    pub id: IdKey,
}

/// FixUpInfo collects what has to be undone for every local oplog entry past the common point.
#[derive(Debug, Default)]
pub struct FixUpInfo {
    pub docs_to_refetch: BTreeSet<DocId>,
    /// namespace -> index names
    pub indexes_to_drop: BTreeMap<String, BTreeSet<String>>,
    pub collections_to_drop: BTreeSet<String>,
    pub collections_to_resync_data: BTreeSet<String>,
    pub collections_to_resync_metadata: BTreeSet<String>,
    pub rbid: i32,
    pub common_point: OpTime,
    pub common_point_loc: RecordId,
}

fn fatal<T>(message: String) -> Result<T, RollbackError> {
    Err(RollbackError::Fatal(message))
}

impl FixUpInfo {
    pub fn new() -> Self {
        FixUpInfo::default()
    }

    /// Records the undo work for one local oplog entry, given in document form.
    pub fn update_from_local_oplog_entry(&mut self, entry: &Document) -> Result<(), RollbackError> {
        self.update_from_entry(entry, 0)
    }

    fn update_from_entry(&mut self, entry: &Document, depth: usize) -> Result<(), RollbackError> {
        let op = entry.get_str("op").unwrap_or("");
        if op == "n" {
            return Ok(());
        }
        if oplog::encoded_len(entry) > MAX_ENTRY_SIZE {
            return fatal("rollback too large".to_string());
        }

        let ns = match entry.get_str("ns") {
            Some(ns) if !ns.is_empty() => ns,
            _ => return fatal(format!("local op on rollback has no ns: {}", entry)),
        };
        let obj_field = if op == "u" { "o2" } else { "o" };
        let obj = match entry.get_document(obj_field) {
            Some(obj) if !obj.is_empty() => obj,
            _ => return fatal(format!("local op on rollback has no object field: {}", entry)),
        };

        if op == "c" {
            return self.update_from_command(ns, obj, depth);
        }

        if collection_name(ns) == "system.indexes" {
            if op != "i" {
                return fatal(format!("unexpected op '{}' on system.indexes: {}", op, entry));
            }
            let target_ns = match obj.get_str("ns") {
                Some(target) if target.contains('.') => target,
                _ => return fatal(format!("bad collection namespace in system.indexes op: {}", entry)),
            };
            let index_name = match obj.get_str("name") {
                Some(name) => name,
                None => return fatal(format!("missing index name in system.indexes op: {}", entry)),
            };
            self.indexes_to_drop
                .entry(target_ns.to_string())
                .or_default()
                .insert(index_name.to_string());
            return Ok(());
        }

        match obj.get("_id") {
            Some(id) => {
                self.docs_to_refetch.insert(DocId {
                    ns: ns.to_string(),
                    id: IdKey(id.clone()),
                });
                Ok(())
            }
            None => fatal(format!("cannot rollback op with no _id. ns: {}, document: {}", ns, entry)),
        }
    }

    fn update_from_command(&mut self, ns: &str, obj: &Document, depth: usize) -> Result<(), RollbackError> {
        let db = database_name(ns);
        let name = obj.first_key().unwrap_or("");
        let target = |field: &str| obj.get_str(field).map(|c| format!("{}.{}", db, c));

        match name {
            "create" => match target("create") {
                Some(ns) => {
                    self.collections_to_drop.insert(ns);
                    Ok(())
                }
                None => fatal(format!("create without a collection name: {}", obj)),
            },
            "drop" | "dropIndexes" | "deleteIndexes" => match target(name) {
                Some(ns) => {
                    self.collections_to_resync_data.insert(ns);
                    Ok(())
                }
                None => fatal(format!("{} without a collection name: {}", name, obj)),
            },
            "renameCollection" => match (obj.get_str("renameCollection"), obj.get_str("to")) {
                (Some(from), Some(to)) => {
                    self.collections_to_resync_data.insert(from.to_string());
                    self.collections_to_resync_data.insert(to.to_string());
                    Ok(())
                }
                _ => fatal(format!("renameCollection without from and to: {}", obj)),
            },
            "dropDatabase" => fatal(format!(
                "can't rollback drop database, full resync will be required: {}",
                obj
            )),
            "collMod" => {
                let coll_ns = match target("collMod") {
                    Some(ns) => ns,
                    None => return fatal(format!("collMod without a collection name: {}", obj)),
                };
                for (field, _) in obj.iter().skip(1) {
                    if !COLL_MOD_METADATA_FIELDS.contains(&field) {
                        return fatal(format!("cannot rollback a collMod command: {}", obj));
                    }
                    self.collections_to_resync_metadata.insert(coll_ns.clone());
                }
                Ok(())
            }
            "applyOps" => {
                if depth >= MAX_APPLY_OPS_DEPTH {
                    return Err(RollbackError::UnrecoverableRollbackError(format!(
                        "applyOps nested deeper than {} levels",
                        MAX_APPLY_OPS_DEPTH
                    )));
                }
                let ops = match obj.get("applyOps") {
                    Some(Value::Array(ops)) => ops,
                    other => {
                        return Err(RollbackError::UnrecoverableRollbackError(format!(
                            "expected applyOps argument to be an array; found {}",
                            other.map_or("nothing", Value::type_name)
                        )))
                    }
                };
                for sub_op in ops {
                    match sub_op {
                        Value::Document(sub_op) => self.update_from_entry(sub_op, depth + 1)?,
                        other => {
                            return Err(RollbackError::UnrecoverableRollbackError(format!(
                                "expected applyOps operations to be objects, found {}",
                                other
                            )))
                        }
                    }
                }
                Ok(())
            }
            other => fatal(format!("can't rollback this command yet: {} ({})", other, obj)),
        }
    }

    /// Drops work made pointless by a collection-level action on the same namespace.
    pub fn remove_redundant_operations(&mut self) {
        for ns in self.collections_to_drop.clone() {
            self.remove_collection_work(&ns);
        }
        for ns in self.collections_to_resync_data.clone() {
            self.remove_collection_work(&ns);
            self.collections_to_drop.remove(&ns);
        }
    }

    fn remove_collection_work(&mut self, ns: &str) {
        self.docs_to_refetch.retain(|doc| doc.ns != ns);
        self.indexes_to_drop.remove(ns);
        self.collections_to_resync_metadata.remove(ns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::{OpType, OplogEntry};
    use crate::types::{Term, Timestamp};

    fn entry(op: OpType, ns: &str, o: Document) -> Document {
        OplogEntry::new(Timestamp::new(2, 1), Term::new(1), 7, op, ns, o).to_document()
    }

    fn command(o: Document) -> Document {
        entry(OpType::Command, "t.$cmd", o)
    }

    fn assert_fatal(result: Result<(), RollbackError>) {
        assert!(matches!(result, Err(RollbackError::Fatal(_))), "{:?}", result);
    }

    #[test]
    fn crud_ops_refetch_documents() {
        // -- setup --
        let mut fix_up = FixUpInfo::new();
        let update = OplogEntry::new(
            Timestamp::new(3, 1),
            Term::new(1),
            8,
            OpType::Update,
            "t.c",
            Document::new().with("$set", Document::new().with("a", 2)),
        )
        .with_o2(Document::new().with("_id", 1))
        .to_document();

        // -- execute --
        fix_up
            .update_from_local_oplog_entry(&entry(OpType::Insert, "t.c", Document::new().with("_id", 0)))
            .unwrap();
        fix_up.update_from_local_oplog_entry(&update).unwrap();
        fix_up
            .update_from_local_oplog_entry(&entry(OpType::Delete, "t.c", Document::new().with("_id", 0)))
            .unwrap();
        fix_up
            .update_from_local_oplog_entry(&OplogEntry::noop(Timestamp::new(4, 1), Term::new(1), 9).to_document())
            .unwrap();

        // -- verify --
        let ids: Vec<&Value> = fix_up.docs_to_refetch.iter().map(|d| &d.id.0).collect();
        assert_eq!(ids, vec![&Value::from(0), &Value::from(1)]);
    }

    #[test]
    fn malformed_crud_ops_are_fatal() {
        let mut fix_up = FixUpInfo::new();

        assert_fatal(fix_up.update_from_local_oplog_entry(&entry(OpType::Insert, "", Document::new().with("_id", 0))));
        assert_fatal(fix_up.update_from_local_oplog_entry(&entry(OpType::Insert, "t.c", Document::new())));
        assert_fatal(fix_up.update_from_local_oplog_entry(&entry(OpType::Insert, "t.c", Document::new().with("a", 1))));
        // An update without o2.
        assert_fatal(fix_up.update_from_local_oplog_entry(&entry(OpType::Update, "t.c", Document::new().with("_id", 1))));
    }

    #[test]
    fn index_builds_are_dropped_once() {
        let mut fix_up = FixUpInfo::new();
        let index = Document::new().with("ns", "t.c").with("name", "a_1").with("key", Document::new().with("a", 1));

        fix_up
            .update_from_local_oplog_entry(&entry(OpType::Insert, "t.system.indexes", index.clone()))
            .unwrap();
        fix_up
            .update_from_local_oplog_entry(&entry(OpType::Insert, "t.system.indexes", index))
            .unwrap();

        assert_eq!(fix_up.indexes_to_drop["t.c"].len(), 1);
        assert!(fix_up.docs_to_refetch.is_empty());
    }

    #[test]
    fn commands() {
        // -- setup --
        let mut fix_up = FixUpInfo::new();

        // -- execute --
        for o in vec![
            Document::new().with("create", "made"),
            Document::new().with("drop", "dropped"),
            Document::new().with("dropIndexes", "reindexed").with("index", "*"),
            Document::new().with("renameCollection", "t.from").with("to", "t.to"),
            Document::new().with("collMod", "modded").with("validationLevel", "off"),
        ] {
            fix_up.update_from_local_oplog_entry(&command(o)).unwrap();
        }

        // -- verify --
        assert!(fix_up.collections_to_drop.contains("t.made"));
        let resync: Vec<&str> = fix_up.collections_to_resync_data.iter().map(String::as_str).collect();
        assert_eq!(resync, vec!["t.dropped", "t.from", "t.reindexed", "t.to"]);
        assert!(fix_up.collections_to_resync_metadata.contains("t.modded"));
    }

    #[test]
    fn unsupported_commands_are_fatal() {
        let mut fix_up = FixUpInfo::new();

        assert_fatal(fix_up.update_from_local_oplog_entry(&command(Document::new().with("dropDatabase", 1))));
        assert_fatal(fix_up.update_from_local_oplog_entry(&command(
            Document::new().with("collMod", "c").with("expireAfterSeconds", 5),
        )));
        assert_fatal(fix_up.update_from_local_oplog_entry(&command(Document::new().with("emptycapped", "c"))));
    }

    #[test]
    fn apply_ops_recurses_with_a_depth_limit() {
        // -- setup --
        let insert = entry(OpType::Insert, "t.c", Document::new().with("_id", 5));
        let apply_ops = |ops: Vec<Document>| {
            command(Document::new().with("applyOps", ops.into_iter().map(Value::Document).collect::<Vec<_>>()))
        };

        let mut nested = insert.clone();
        for _ in 0..MAX_APPLY_OPS_DEPTH {
            nested = apply_ops(vec![nested]);
        }
        let too_deep = apply_ops(vec![nested.clone()]);

        // -- execute & verify --
        let mut fix_up = FixUpInfo::new();
        fix_up.update_from_local_oplog_entry(&nested).unwrap();
        assert_eq!(fix_up.docs_to_refetch.len(), 1);

        assert!(matches!(
            FixUpInfo::new().update_from_local_oplog_entry(&too_deep),
            Err(RollbackError::UnrecoverableRollbackError(_))
        ));
        assert!(matches!(
            FixUpInfo::new().update_from_local_oplog_entry(&command(Document::new().with("applyOps", 1))),
            Err(RollbackError::UnrecoverableRollbackError(_))
        ));
    }

    #[test]
    fn collection_work_subsumes_document_work() {
        // -- setup --
        let mut fix_up = FixUpInfo::new();
        for ns in &["t.a", "t.b", "t.keep"] {
            fix_up.docs_to_refetch.insert(DocId {
                ns: ns.to_string(),
                id: IdKey(Value::from(1)),
            });
            fix_up.collections_to_resync_metadata.insert(ns.to_string());
            fix_up
                .indexes_to_drop
                .entry(ns.to_string())
                .or_default()
                .insert("x_1".to_string());
        }
        fix_up.collections_to_drop.insert("t.a".to_string());
        fix_up.collections_to_drop.insert("t.b".to_string());
        fix_up.collections_to_resync_data.insert("t.b".to_string());

        // -- execute --
        fix_up.remove_redundant_operations();

        // -- verify --
        let refetch: Vec<&str> = fix_up.docs_to_refetch.iter().map(|d| d.ns.as_str()).collect();
        assert_eq!(refetch, vec!["t.keep"]);
        assert_eq!(fix_up.indexes_to_drop.keys().collect::<Vec<_>>(), vec!["t.keep"]);
        assert_eq!(fix_up.collections_to_resync_metadata.len(), 1);
        assert_eq!(fix_up.collections_to_drop.iter().collect::<Vec<_>>(), vec!["t.a"]);
    }

    mod reduction {
        use super::*;
        use proptest::prelude::*;

        const NAMESPACES: &[&str] = &["t.a", "t.b", "t.c", "t.d", "t.e"];

        fn ns_set() -> impl Strategy<Value = BTreeSet<String>> {
            proptest::sample::subsequence(NAMESPACES, 0..=NAMESPACES.len())
                .prop_map(|names| names.into_iter().map(str::to_string).collect())
        }

        fn fix_up() -> impl Strategy<Value = FixUpInfo> {
            (
                proptest::collection::vec((proptest::sample::select(NAMESPACES), 0i64..4), 0..12),
                ns_set(),
                ns_set(),
                ns_set(),
                ns_set(),
            )
                .prop_map(|(docs, indexed, dropped, resynced, metadata)| {
                    let mut fix_up = FixUpInfo::new();
                    for (ns, id) in docs {
                        fix_up.docs_to_refetch.insert(DocId {
                            ns: ns.to_string(),
                            id: IdKey(Value::from(id)),
                        });
                    }
                    for ns in indexed {
                        fix_up.indexes_to_drop.entry(ns).or_default().insert("x_1".to_string());
                    }
                    fix_up.collections_to_drop = dropped;
                    fix_up.collections_to_resync_data = resynced;
                    fix_up.collections_to_resync_metadata = metadata;
                    fix_up
                })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(256))]

            #[test]
            fn collection_work_leaves_nothing_finer_grained(mut fix_up in fix_up()) {
                let dropped_before = fix_up.collections_to_drop.clone();
                let resynced = fix_up.collections_to_resync_data.clone();
                let covered: BTreeSet<String> = dropped_before.union(&resynced).cloned().collect();
                let untouched_docs: BTreeSet<DocId> = fix_up
                    .docs_to_refetch
                    .iter()
                    .filter(|d| !covered.contains(&d.ns))
                    .cloned()
                    .collect();

                fix_up.remove_redundant_operations();

                prop_assert!(fix_up.docs_to_refetch.iter().all(|d| !covered.contains(&d.ns)));
                prop_assert!(fix_up.indexes_to_drop.keys().all(|ns| !covered.contains(ns)));
                prop_assert!(fix_up.collections_to_resync_metadata.iter().all(|ns| !covered.contains(ns)));
                prop_assert!(fix_up.collections_to_drop.is_disjoint(&fix_up.collections_to_resync_data));
                prop_assert_eq!(&fix_up.docs_to_refetch, &untouched_docs);
                prop_assert_eq!(&fix_up.collections_to_resync_data, &resynced);
                let expected_drops: BTreeSet<String> = dropped_before.difference(&resynced).cloned().collect();
                prop_assert_eq!(&fix_up.collections_to_drop, &expected_drops);
            }

            #[test]
            fn reduction_is_idempotent(mut fix_up in fix_up()) {
                fix_up.remove_redundant_operations();
                let once = format!("{:?}", fix_up);

                fix_up.remove_redundant_operations();

                prop_assert_eq!(format!("{:?}", fix_up), once);
            }
        }
    }
}
