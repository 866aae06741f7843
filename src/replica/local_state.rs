use crate::storage::{write_conflict_retry, Collection, RecoveryUnit, StorageCatalog, StorageError};
use crate::types::{Document, FieldError, OpTime, OpTimeParseError, OperationContext, Term, Value};
use std::sync::{Arc, Mutex, MutexGuard};

pub const CONFIG_NAMESPACE: &str = "local.system.replset";
pub const LAST_VOTE_NAMESPACE: &str = "local.replset.election";
pub const MIN_VALID_NAMESPACE: &str = "local.replset.minvalid";
pub const ROLLBACK_ID_NAMESPACE: &str = "local.system.rollback.id";

const SINGLETON_ID: &str = "singleton";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LocalStateError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("corrupt local state document: {0}")]
    Corrupt(String),
}

impl From<FieldError> for LocalStateError {
    fn from(e: FieldError) -> Self {
        LocalStateError::Corrupt(e.to_string())
    }
}

impl From<OpTimeParseError> for LocalStateError {
    fn from(e: OpTimeParseError) -> Self {
        LocalStateError::Corrupt(e.to_string())
    }
}

/// The vote this node cast most recently, persisted so a restart cannot vote twice in a term.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct LastVote {
    pub term: Term,
    pub candidate_index: i64,
}

impl LastVote {
    pub fn new(term: Term, candidate_index: i64) -> Self {
        LastVote { term, candidate_index }
    }
}

/// The point this node must apply through before its data is consistent again.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct MinValid {
    pub op_time: OpTime,
    pub initial_sync_flag: bool,
    pub begin: Option<OpTime>,
}

/// PersistentLocalState holds every piece of replication state that must survive a restart:
/// the last vote, minValid, the rollback id and the replica set config.
///
/// Implementations synchronize internally, so one instance can be shared by the coordinator, the
/// rollback engine and the RPC server.
pub trait PersistentLocalState: Send + Sync + 'static {
    fn load_last_vote(&self) -> Result<LastVote, LocalStateError>;

    fn store_last_vote(&self, vote: LastVote) -> Result<(), LocalStateError>;

    fn load_min_valid(&self) -> Result<MinValid, LocalStateError>;

    fn store_min_valid(&self, min_valid: MinValid) -> Result<(), LocalStateError>;

    fn rollback_id(&self) -> Result<i32, LocalStateError>;

    /// Returns the new id.
    fn increment_rollback_id(&self) -> Result<i32, LocalStateError>;

    fn load_config(&self) -> Result<Option<Document>, LocalStateError>;

    fn store_config(&self, config: &Document) -> Result<(), LocalStateError>;
}

#[derive(Default)]
struct VolatileState {
    last_vote: LastVote,
    min_valid: MinValid,
    rollback_id: i32,
    config: Option<Document>,
}

/// VolatileLocalState keeps everything in memory. Used by tests and by nodes that don't mind
/// forgetting their vote on restart.
#[derive(Clone)]
pub struct VolatileLocalState {
    state: Arc<Mutex<VolatileState>>,
}

impl VolatileLocalState {
    pub fn new() -> Self {
        VolatileLocalState {
            state: Arc::new(Mutex::new(VolatileState {
                rollback_id: 1,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, VolatileState> {
        self.state.lock().expect("VolatileLocalState mutex guard poison")
    }
}

impl Default for VolatileLocalState {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentLocalState for VolatileLocalState {
    fn load_last_vote(&self) -> Result<LastVote, LocalStateError> {
        Ok(self.state().last_vote)
    }

    fn store_last_vote(&self, vote: LastVote) -> Result<(), LocalStateError> {
        self.state().last_vote = vote;
        Ok(())
    }

    fn load_min_valid(&self) -> Result<MinValid, LocalStateError> {
        Ok(self.state().min_valid)
    }

    fn store_min_valid(&self, min_valid: MinValid) -> Result<(), LocalStateError> {
        self.state().min_valid = min_valid;
        Ok(())
    }

    fn rollback_id(&self) -> Result<i32, LocalStateError> {
        Ok(self.state().rollback_id)
    }

    fn increment_rollback_id(&self) -> Result<i32, LocalStateError> {
        let mut state = self.state();
        state.rollback_id += 1;
        Ok(state.rollback_id)
    }

    fn load_config(&self) -> Result<Option<Document>, LocalStateError> {
        Ok(self.state().config.clone())
    }

    fn store_config(&self, config: &Document) -> Result<(), LocalStateError> {
        self.state().config = Some(config.clone());
        Ok(())
    }
}

/// CatalogLocalState keeps each piece of state as a single document in its own `local.*`
/// collection of the node's catalog.
pub struct CatalogLocalState {
    logger: slog::Logger,
    catalog: Arc<StorageCatalog>,
    // Serializes read-modify-write of the rollback id.
    rbid_lock: Mutex<()>,
}

impl CatalogLocalState {
    pub fn new(logger: slog::Logger, catalog: Arc<StorageCatalog>) -> Self {
        CatalogLocalState {
            logger,
            catalog,
            rbid_lock: Mutex::new(()),
        }
    }

    fn collection(&self, ns: &str) -> Result<Arc<Collection>, LocalStateError> {
        Ok(self.catalog.get_or_create_collection(ns)?)
    }

    fn read(&self, ns: &str) -> Result<Option<Document>, LocalStateError> {
        let collection = self.collection(ns)?;
        Ok(collection.find_by_id(&Value::from(SINGLETON_ID))?)
    }

    fn write(&self, ns: &str, mut doc: Document) -> Result<(), LocalStateError> {
        let collection = self.collection(ns)?;
        doc.insert("_id", SINGLETON_ID);
        let ctx = OperationContext::new();
        write_conflict_retry(&self.logger, &ctx, ns, || {
            let mut ru = RecoveryUnit::new();
            collection.upsert_document(&mut ru, &doc)?;
            ru.commit();
            Ok(())
        })?;
        Ok(())
    }
}

impl PersistentLocalState for CatalogLocalState {
    fn load_last_vote(&self) -> Result<LastVote, LocalStateError> {
        match self.read(LAST_VOTE_NAMESPACE)? {
            Some(doc) => Ok(LastVote {
                term: Term::new(doc.require_i64("term")?),
                candidate_index: doc.require_i64("candidateIndex")?,
            }),
            None => Ok(LastVote::default()),
        }
    }

    fn store_last_vote(&self, vote: LastVote) -> Result<(), LocalStateError> {
        let doc = Document::new()
            .with("term", vote.term.as_i64())
            .with("candidateIndex", vote.candidate_index);
        self.write(LAST_VOTE_NAMESPACE, doc)
    }

    fn load_min_valid(&self) -> Result<MinValid, LocalStateError> {
        match self.read(MIN_VALID_NAMESPACE)? {
            Some(doc) => {
                let begin = match doc.get_document("begin") {
                    Some(begin) => Some(OpTime::parse(begin, 1)?),
                    None => None,
                };
                Ok(MinValid {
                    op_time: OpTime::parse(&doc, 1)?,
                    initial_sync_flag: doc.get_bool("initialSyncFlag").unwrap_or(false),
                    begin,
                })
            }
            None => Ok(MinValid::default()),
        }
    }

    fn store_min_valid(&self, min_valid: MinValid) -> Result<(), LocalStateError> {
        let mut doc = min_valid.op_time.to_document();
        if min_valid.initial_sync_flag {
            doc.insert("initialSyncFlag", true);
        }
        if let Some(begin) = min_valid.begin {
            doc.insert("begin", begin.to_document());
        }
        self.write(MIN_VALID_NAMESPACE, doc)
    }

    fn rollback_id(&self) -> Result<i32, LocalStateError> {
        match self.read(ROLLBACK_ID_NAMESPACE)? {
            Some(doc) => Ok(doc.require_i64("rollbackId")? as i32),
            None => Ok(1),
        }
    }

    fn increment_rollback_id(&self) -> Result<i32, LocalStateError> {
        let _guard = self.rbid_lock.lock().expect("CatalogLocalState rbid mutex guard poison");
        let next = self.rollback_id()? + 1;
        self.write(ROLLBACK_ID_NAMESPACE, Document::new().with("rollbackId", next))?;
        slog::info!(self.logger, "Rollback id is now {}", next);
        Ok(next)
    }

    fn load_config(&self) -> Result<Option<Document>, LocalStateError> {
        match self.read(CONFIG_NAMESPACE)? {
            Some(mut doc) => match doc.remove("config") {
                Some(Value::Document(config)) => Ok(Some(config)),
                _ => Err(LocalStateError::Corrupt(format!("{} has no config field", CONFIG_NAMESPACE))),
            },
            None => Ok(None),
        }
    }

    fn store_config(&self, config: &Document) -> Result<(), LocalStateError> {
        self.write(CONFIG_NAMESPACE, Document::new().with("config", config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NoopJournal;
    use crate::types::Timestamp;

    fn exercise(state: &dyn PersistentLocalState) {
        // -- setup --
        let vote = LastVote::new(Term::new(3), 2);
        let min_valid = MinValid {
            op_time: OpTime::new(Timestamp::new(9, 1), Term::new(3)),
            initial_sync_flag: false,
            begin: Some(OpTime::new(Timestamp::new(5, 0), Term::new(2))),
        };
        let config = Document::new().with("_id", "s").with("version", 2);

        // -- execute --
        let initial_rbid = state.rollback_id().unwrap();
        state.store_last_vote(vote).unwrap();
        state.store_min_valid(min_valid).unwrap();
        state.store_config(&config).unwrap();
        let bumped = state.increment_rollback_id().unwrap();

        // -- verify --
        assert_eq!(state.load_last_vote().unwrap(), vote);
        assert_eq!(state.load_min_valid().unwrap(), min_valid);
        assert_eq!(state.load_config().unwrap(), Some(config));
        assert_eq!(bumped, initial_rbid + 1);
        assert_eq!(state.rollback_id().unwrap(), bumped);
    }

    #[test]
    fn volatile_state() {
        let state = VolatileLocalState::new();
        assert_eq!(state.load_last_vote().unwrap(), LastVote::default());
        assert_eq!(state.load_config().unwrap(), None);

        exercise(&state);
    }

    #[tokio::test]
    async fn catalog_state() {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let catalog = Arc::new(StorageCatalog::new(logger.clone(), 1 << 20, Arc::new(NoopJournal)).unwrap());
        let state = CatalogLocalState::new(logger.clone(), catalog.clone());
        assert_eq!(state.load_min_valid().unwrap(), MinValid::default());

        exercise(&state);

        // A second view over the same catalog sees the same state.
        let reopened = CatalogLocalState::new(logger, catalog);
        assert_eq!(reopened.load_last_vote().unwrap(), LastVote::new(Term::new(3), 2));
    }
}
