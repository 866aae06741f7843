use crate::oplog::{self, LocalOplog, OPLOG_NAMESPACE};
use crate::storage::{
    CappedCallback, CursorDirection, Journal, Record, RecordStore, RecordStoreOptions, RecordStoreOptionsValidated,
    RecoveryUnit, StorageError,
};
use crate::types::{Document, FieldError, IdKey, RecordId, Value};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::sync::{Arc, Mutex, MutexGuard};

/// Returns the database part of a namespace (`"db.coll"` -> `"db"`).
pub fn database_name(ns: &str) -> &str {
    match ns.find('.') {
        Some(pos) => &ns[..pos],
        None => ns,
    }
}

/// Returns the collection part of a namespace (`"db.coll"` -> `"coll"`).
pub fn collection_name(ns: &str) -> &str {
    match ns.find('.') {
        Some(pos) => &ns[pos + 1..],
        None => "",
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollectionOptions {
    pub capped: bool,
    pub size: Option<i64>,
    pub max: Option<i64>,
    pub flags: Option<i64>,
    pub validator: Option<Document>,
    pub validation_action: Option<String>,
    pub validation_level: Option<String>,
}

impl CollectionOptions {
    pub fn capped(size: i64, max: Option<i64>) -> Self {
        CollectionOptions {
            capped: true,
            size: Some(size),
            max,
            ..Default::default()
        }
    }

    pub fn parse(doc: &Document) -> Result<Self, FieldError> {
        let validator = match doc.get("validator") {
            Some(Value::Document(v)) => Some(v.clone()),
            Some(other) => {
                return Err(FieldError::TypeMismatch {
                    field: "validator".to_string(),
                    expected: "object",
                    found: other.type_name(),
                })
            }
            None => None,
        };

        Ok(CollectionOptions {
            capped: doc.get_bool("capped").unwrap_or(false),
            size: doc.get_i64("size"),
            max: doc.get_i64("max"),
            flags: doc.get_i64("flags"),
            validator,
            validation_action: doc.get_str("validationAction").map(str::to_string),
            validation_level: doc.get_str("validationLevel").map(str::to_string),
        })
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        if self.capped {
            doc.insert("capped", true);
        }
        if let Some(size) = self.size {
            doc.insert("size", size);
        }
        if let Some(max) = self.max {
            doc.insert("max", max);
        }
        if let Some(flags) = self.flags {
            doc.insert("flags", flags);
        }
        if let Some(validator) = &self.validator {
            doc.insert("validator", validator.clone());
        }
        if let Some(action) = &self.validation_action {
            doc.insert("validationAction", action.as_str());
        }
        if let Some(level) = &self.validation_level {
            doc.insert("validationLevel", level.as_str());
        }
        doc
    }

    fn record_store_options(&self) -> Result<RecordStoreOptionsValidated, StorageError> {
        let options = if self.capped {
            RecordStoreOptions::capped(self.size.unwrap_or(0), self.max.filter(|max| *max > 0))
        } else {
            RecordStoreOptions::default()
        };
        RecordStoreOptionsValidated::try_from(options).map_err(|e| StorageError::IllegalOperation(e.to_string()))
    }
}

/// Point lookups by `_id`, shared between a collection and its store's capped callback.
#[derive(Clone, Default)]
struct IdIndex {
    entries: Arc<Mutex<BTreeMap<IdKey, RecordId>>>,
}

impl IdIndex {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<IdKey, RecordId>> {
        self.entries.lock().expect("IdIndex mutex guard poison")
    }

    fn insert(&self, ru: &mut RecoveryUnit, key: IdKey, id: RecordId) {
        self.lock().insert(key.clone(), id);
        let index = self.clone();
        ru.on_rollback(move || {
            index.lock().remove(&key);
        });
    }

    fn remove(&self, ru: &mut RecoveryUnit, key: &IdKey) {
        if let Some(id) = self.lock().remove(key) {
            let index = self.clone();
            let key = key.clone();
            ru.on_rollback(move || {
                index.lock().insert(key, id);
            });
        }
    }

    fn get(&self, key: &IdKey) -> Option<RecordId> {
        self.lock().get(key).copied()
    }
}

impl CappedCallback for IdIndex {
    fn about_to_delete_capped(&self, ru: &mut RecoveryUnit, _id: RecordId, data: &Bytes) -> Result<(), StorageError> {
        let doc = oplog::decode_document(data)?;
        if let Some(key) = doc.get("_id") {
            self.remove(ru, &IdKey(key.clone()));
        }
        Ok(())
    }
}

/// Collection is a record store of documents with an `_id` index and an index catalog.
pub struct Collection {
    ns: String,
    store: RecordStore,
    id_index: IdIndex,
    indexes: Mutex<BTreeMap<String, Document>>,
    options: Mutex<CollectionOptions>,
}

impl Collection {
    fn new(ns: &str, store: RecordStore, options: CollectionOptions) -> Self {
        let id_index = IdIndex::default();
        if store.is_capped() {
            store.set_capped_callback(Arc::new(id_index.clone()));
        }
        let mut indexes = BTreeMap::new();
        indexes.insert("_id_".to_string(), Document::new().with("_id", 1i32));

        Collection {
            ns: ns.to_string(),
            store,
            id_index,
            indexes: Mutex::new(indexes),
            options: Mutex::new(options),
        }
    }

    pub fn ns(&self) -> &str {
        &self.ns
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn is_capped(&self) -> bool {
        self.store.is_capped()
    }

    pub fn num_records(&self) -> i64 {
        self.store.num_records()
    }

    pub fn options(&self) -> CollectionOptions {
        self.options.lock().expect("Collection options mutex guard poison").clone()
    }

    pub fn set_options(&self, options: CollectionOptions) {
        *self.options.lock().expect("Collection options mutex guard poison") = options;
    }

    fn indexes(&self) -> MutexGuard<'_, BTreeMap<String, Document>> {
        self.indexes.lock().expect("Collection indexes mutex guard poison")
    }

    pub fn create_index(&self, name: &str, key: Document) {
        self.indexes().insert(name.to_string(), key);
    }

    pub fn drop_index(&self, name: &str) -> Result<(), StorageError> {
        match self.indexes().remove(name) {
            Some(_) => Ok(()),
            None => Err(StorageError::IndexNotFound {
                ns: self.ns.clone(),
                index: name.to_string(),
            }),
        }
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes().keys().cloned().collect()
    }

    fn id_of(doc: &Document) -> Result<IdKey, StorageError> {
        doc.get("_id")
            .map(|v| IdKey(v.clone()))
            .ok_or_else(|| StorageError::IllegalOperation("document is missing _id".to_string()))
    }

    pub fn insert_document(&self, ru: &mut RecoveryUnit, doc: &Document) -> Result<RecordId, StorageError> {
        let key = Self::id_of(doc)?;
        if self.id_index.get(&key).is_some() {
            return Err(StorageError::DuplicateKey(format!("{} _id {:?}", self.ns, key.0)));
        }
        let mut records = vec![Record::new(oplog::encode_document(doc)?)];
        self.store.insert_records(ru, &mut records)?;
        let id = records[0].id;
        self.id_index.insert(ru, key, id);
        Ok(id)
    }

    /// Replaces the document with the same `_id`, inserting it when absent.
    pub fn upsert_document(&self, ru: &mut RecoveryUnit, doc: &Document) -> Result<RecordId, StorageError> {
        let key = Self::id_of(doc)?;
        match self.id_index.get(&key) {
            Some(id) => {
                self.store.update_record(ru, id, oplog::encode_document(doc)?)?;
                Ok(id)
            }
            None => self.insert_document(ru, doc),
        }
    }

    /// Fails with `IllegalOperation` on a capped collection.
    pub fn delete_by_id(&self, ru: &mut RecoveryUnit, id: &Value) -> Result<bool, StorageError> {
        let key = IdKey(id.clone());
        let loc = match self.id_index.get(&key) {
            Some(loc) => loc,
            None => return Ok(false),
        };
        self.store.delete_record(ru, loc)?;
        self.id_index.remove(ru, &key);
        Ok(true)
    }

    pub fn record_id_of(&self, id: &Value) -> Option<RecordId> {
        self.id_index.get(&IdKey(id.clone()))
    }

    pub fn find_by_id(&self, id: &Value) -> Result<Option<Document>, StorageError> {
        match self.record_id_of(id).and_then(|loc| self.store.find_record(loc)) {
            Some(data) => Ok(Some(oplog::decode_document(&data)?)),
            None => Ok(None),
        }
    }

    pub fn documents(&self) -> Result<Vec<Document>, StorageError> {
        let mut cursor = self.store.cursor(CursorDirection::Forward);
        let mut docs = Vec::new();
        while let Some(record) = cursor.next() {
            docs.push(oplog::decode_document(&record.data)?);
        }
        Ok(docs)
    }

    pub fn truncate(&self, ru: &mut RecoveryUnit) -> Result<(), StorageError> {
        self.store.truncate(ru)?;
        let old = std::mem::take(&mut *self.id_index.lock());
        let index = self.id_index.clone();
        ru.on_rollback(move || index.lock().extend(old));
        Ok(())
    }

    /// Removes the records from `loc` onward. The `_id` index follows through the capped callback.
    pub fn capped_truncate_after(&self, ru: &mut RecoveryUnit, loc: RecordId, inclusive: bool) -> Result<(), StorageError> {
        self.store.capped_truncate_after(ru, loc, inclusive)
    }
}

/// StorageCatalog owns the collections of a node and its oplog.
pub struct StorageCatalog {
    logger: slog::Logger,
    journal: Arc<dyn Journal>,
    oplog: RecordStore,
    collections: Mutex<BTreeMap<String, Arc<Collection>>>,
}

impl StorageCatalog {
    /// Creates the catalog with an empty oplog of `oplog_size` bytes. Must run inside a tokio
    /// runtime.
    pub fn new(logger: slog::Logger, oplog_size: i64, journal: Arc<dyn Journal>) -> Result<Self, StorageError> {
        Self::with_oplog_options(logger, RecordStoreOptions::oplog(oplog_size), journal)
    }

    pub fn with_oplog_options(
        logger: slog::Logger,
        options: RecordStoreOptions,
        journal: Arc<dyn Journal>,
    ) -> Result<Self, StorageError> {
        let options =
            RecordStoreOptionsValidated::try_from(options).map_err(|e| StorageError::IllegalOperation(e.to_string()))?;
        let oplog = RecordStore::new(logger.clone(), OPLOG_NAMESPACE, options, journal.clone());
        slog::info!(logger, "Created oplog {}", OPLOG_NAMESPACE);

        Ok(StorageCatalog {
            logger,
            journal,
            oplog,
            collections: Mutex::new(BTreeMap::new()),
        })
    }

    fn collections(&self) -> MutexGuard<'_, BTreeMap<String, Arc<Collection>>> {
        self.collections.lock().expect("StorageCatalog mutex guard poison")
    }

    pub fn oplog(&self) -> &RecordStore {
        &self.oplog
    }

    pub fn local_oplog(&self) -> LocalOplog {
        LocalOplog::new(self.oplog.clone())
    }

    pub fn create_collection(&self, ns: &str, options: CollectionOptions) -> Result<Arc<Collection>, StorageError> {
        let mut collections = self.collections();
        if collections.contains_key(ns) || ns == OPLOG_NAMESPACE {
            return Err(StorageError::IllegalOperation(format!("collection {} already exists", ns)));
        }
        let store = RecordStore::new(
            self.logger.clone(),
            ns,
            options.record_store_options()?,
            self.journal.clone(),
        );
        let collection = Arc::new(Collection::new(ns, store, options));
        collections.insert(ns.to_string(), collection.clone());
        slog::info!(self.logger, "Created collection {}", ns);
        Ok(collection)
    }

    pub fn get_collection(&self, ns: &str) -> Option<Arc<Collection>> {
        self.collections().get(ns).cloned()
    }

    pub fn get_or_create_collection(&self, ns: &str) -> Result<Arc<Collection>, StorageError> {
        if let Some(collection) = self.get_collection(ns) {
            return Ok(collection);
        }
        self.create_collection(ns, CollectionOptions::default())
    }

    pub fn drop_collection(&self, ns: &str) -> Result<(), StorageError> {
        match self.collections().remove(ns) {
            Some(_) => {
                slog::info!(self.logger, "Dropped collection {}", ns);
                Ok(())
            }
            None => Err(StorageError::NamespaceNotFound(ns.to_string())),
        }
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections().keys().cloned().collect()
    }
}
