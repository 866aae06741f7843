use crate::oplog;
use crate::storage::capped::CappedCallback;
use crate::storage::oplog_stones::{OplogStones, StonesInitSource};
use crate::storage::visibility::{self, Journal, ReadBound, Visibility};
use crate::storage::{RecordStoreOptionsValidated, RecoveryUnit, StorageError};
use crate::types::{OperationContext, RecordId};
use bytes::Bytes;
use rand::Rng;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::time::Duration;

const CAPPED_MAX_SIZE_SLACK_LIMIT: i64 = 16 * 1024 * 1024;
const CAPPED_DELETE_LOCK_TIMEOUT: Duration = Duration::from_millis(200);
const MAX_CAPPED_DELETES_PER_PASS: i64 = 20_000;
const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub data: Bytes,
}

impl Record {
    /// A record whose id is assigned on insert.
    pub fn new(data: Bytes) -> Self {
        Record {
            id: RecordId::null(),
            data,
        }
    }

    pub fn with_id(id: RecordId, data: Bytes) -> Self {
        Record { id, data }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CursorDirection {
    Forward,
    Backward,
}

/// RecordStore is an ordered map from RecordId to record bytes, optionally capped. When it is the
/// oplog, record ids come from the entry timestamps and forward readers are held behind the
/// lowest id that is not yet durable.
#[derive(Clone)]
pub struct RecordStore {
    inner: Arc<Inner>,
}

struct Inner {
    logger: slog::Logger,
    ns: String,
    options: RecordStoreOptionsValidated,
    records: Mutex<BTreeMap<RecordId, Bytes>>,
    next_id: AtomicI64,
    num_records: AtomicI64,
    data_size: AtomicI64,
    visibility: Arc<Visibility>,
    stones: Option<Arc<OplogStones>>,
    capped_deleter: parking_lot::Mutex<()>,
    capped_first_record: Mutex<RecordId>,
    capped_callback: Mutex<Option<Arc<dyn CappedCallback>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.visibility.shutdown();
        if let Some(stones) = &self.stones {
            stones.kill();
        }
    }
}

impl RecordStore {
    /// Must be called within a tokio runtime when `options.is_oplog` is set, because the oplog
    /// spawns its journal and reclaim workers.
    pub fn new(
        logger: slog::Logger,
        ns: &str,
        options: RecordStoreOptionsValidated,
        journal: Arc<dyn Journal>,
    ) -> Self {
        Self::open_with_records(logger, ns, options, journal, Vec::new())
    }

    /// Opens a store that already holds `existing`, as happens when a node restarts. Oplog stones
    /// are rebuilt from these records.
    pub fn open_with_records(
        logger: slog::Logger,
        ns: &str,
        options: RecordStoreOptionsValidated,
        journal: Arc<dyn Journal>,
        existing: Vec<Record>,
    ) -> Self {
        let logger = logger.new(slog::o!("Namespace" => ns.to_string()));

        let mut records = BTreeMap::new();
        let mut next_id = 1;
        let mut data_size = 0;
        for record in existing {
            let id = if record.id.is_null() {
                RecordId::new(next_id)
            } else {
                record.id
            };
            next_id = next_id.max(id.repr() + 1);
            data_size += record.data.len() as i64;
            records.insert(id, record.data);
        }
        let highest = records.keys().next_back().copied().unwrap_or_else(RecordId::null);
        let num_records = records.len() as i64;

        let stones = if options.is_oplog {
            let stones = OplogStones::new(
                logger.clone(),
                options.capped_max_size,
                options.min_bytes_per_stone,
                options.num_stones_to_keep,
            );
            stones.initialize(&InitView { records: &records });
            Some(Arc::new(stones))
        } else {
            None
        };

        let inner = Arc::new(Inner {
            logger: logger.clone(),
            ns: ns.to_string(),
            options,
            records: Mutex::new(records),
            next_id: AtomicI64::new(next_id),
            num_records: AtomicI64::new(num_records),
            data_size: AtomicI64::new(data_size),
            visibility: Arc::new(Visibility::new(highest)),
            stones,
            capped_deleter: parking_lot::Mutex::new(()),
            capped_first_record: Mutex::new(RecordId::null()),
            capped_callback: Mutex::new(None),
        });

        if inner.options.is_oplog {
            visibility::spawn_journal_worker(logger.clone(), inner.visibility.clone(), journal);
            if let Some(stones) = &inner.stones {
                spawn_reclaim_worker(logger, Arc::downgrade(&inner), stones.clone());
            }
        }

        RecordStore { inner }
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<RecordId, Bytes>> {
        self.inner.records.lock().expect("RecordStore mutex guard poison")
    }

    pub fn ns(&self) -> &str {
        &self.inner.ns
    }

    pub fn is_capped(&self) -> bool {
        self.inner.options.capped
    }

    pub fn is_oplog(&self) -> bool {
        self.inner.options.is_oplog
    }

    pub fn capped_max_size(&self) -> i64 {
        self.inner.options.capped_max_size
    }

    pub fn capped_max_docs(&self) -> i64 {
        self.inner.options.capped_max_docs
    }

    pub fn num_records(&self) -> i64 {
        self.inner.num_records.load(Ordering::Acquire)
    }

    pub fn data_size(&self) -> i64 {
        self.inner.data_size.load(Ordering::Acquire)
    }

    /// The in-memory engine has no overhead beyond the record bytes.
    pub fn storage_size(&self) -> i64 {
        self.data_size()
    }

    pub fn oplog_stones(&self) -> Option<Arc<OplogStones>> {
        self.inner.stones.clone()
    }

    pub fn set_capped_callback(&self, callback: Arc<dyn CappedCallback>) {
        self.inner
            .capped_callback
            .lock()
            .expect("RecordStore capped callback mutex guard poison")
            .replace(callback);
    }

    fn capped_callback(&self) -> Option<Arc<dyn CappedCallback>> {
        self.inner
            .capped_callback
            .lock()
            .expect("RecordStore capped callback mutex guard poison")
            .clone()
    }

    /// Number of reserved ids that readers cannot see yet.
    pub fn uncommitted_count(&self) -> usize {
        self.inner.visibility.uncommitted_count()
    }

    fn change_stats(&self, records: i64, bytes: i64) {
        self.inner.num_records.fetch_add(records, Ordering::AcqRel);
        self.inner.data_size.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Inserts `records`, filling in their ids.
    pub fn insert_records(&self, ru: &mut RecoveryUnit, records: &mut [Record]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        for record in records.iter_mut() {
            record.id = if self.is_oplog() {
                oplog::extract_key(&record.data).map_err(|e| StorageError::BadOplogEntry(e.to_string()))?
            } else {
                RecordId::new(self.inner.next_id.fetch_add(1, Ordering::AcqRel))
            };
        }

        {
            let map = self.records();
            if let Some(dup) = records.iter().find(|r| map.contains_key(&r.id)) {
                return Err(StorageError::DuplicateKey(format!("record id {}", dup.id)));
            }
        }

        if self.is_capped() {
            for record in records.iter() {
                self.inner.visibility.add_uncommitted(record.id, self.is_oplog())?;
                let visibility = self.inner.visibility.clone();
                let id = record.id;
                ru.on_rollback(move || visibility.remove_uncommitted(id));
            }
        }

        let mut bytes = 0;
        {
            let mut map = self.records();
            for record in records.iter() {
                bytes += record.data.len() as i64;
                map.insert(record.id, record.data.clone());
            }
        }
        let count = records.len() as i64;
        self.change_stats(count, bytes);

        let ids: Vec<RecordId> = records.iter().map(|r| r.id).collect();
        let highest = ids.iter().copied().max().unwrap_or_else(RecordId::null);
        let store = self.clone();
        let rollback_ids = ids.clone();
        ru.on_rollback(move || {
            let mut removed_bytes = 0;
            {
                let mut map = store.records();
                for id in rollback_ids.iter() {
                    if let Some(data) = map.remove(id) {
                        removed_bytes += data.len() as i64;
                    }
                }
            }
            store.change_stats(-(rollback_ids.len() as i64), -removed_bytes);
        });

        if self.is_capped() {
            let visibility = self.inner.visibility.clone();
            let is_oplog = self.is_oplog();
            ru.on_commit(move || {
                for id in ids {
                    if is_oplog {
                        visibility.committed_waiting_for_journal(id);
                    } else {
                        visibility.remove_uncommitted(id);
                    }
                }
            });
        }

        if let Some(stones) = self.oplog_stones() {
            ru.on_commit(move || stones.update_current_stone_after_insert(count, bytes, highest));
        }

        if self.is_capped() && !self.is_oplog() {
            self.capped_delete_as_needed(highest);
        }

        Ok(())
    }

    pub fn delete_record(&self, ru: &mut RecoveryUnit, id: RecordId) -> Result<(), StorageError> {
        if self.is_capped() {
            return Err(StorageError::IllegalOperation(format!(
                "cannot remove from the capped collection {}",
                self.ns()
            )));
        }

        let data = self.records().remove(&id).ok_or(StorageError::RecordNotFound(id))?;
        let len = data.len() as i64;
        self.change_stats(-1, -len);

        let store = self.clone();
        ru.on_rollback(move || {
            store.records().insert(id, data);
            store.change_stats(1, len);
        });

        Ok(())
    }

    pub fn update_record(&self, ru: &mut RecoveryUnit, id: RecordId, data: Bytes) -> Result<(), StorageError> {
        let old = {
            let mut map = self.records();
            let old = map.get(&id).cloned().ok_or(StorageError::RecordNotFound(id))?;
            if self.is_oplog() && old.len() != data.len() {
                return Err(StorageError::InvalidLength {
                    id,
                    old: old.len(),
                    new: data.len(),
                });
            }
            map.insert(id, data.clone());
            old
        };
        let delta = data.len() as i64 - old.len() as i64;
        self.change_stats(0, delta);

        let store = self.clone();
        ru.on_rollback(move || {
            store.records().insert(id, old);
            store.change_stats(0, -delta);
        });

        if self.is_capped() && !self.is_oplog() {
            self.capped_delete_as_needed(id);
        }

        Ok(())
    }

    pub fn find_record(&self, id: RecordId) -> Option<Bytes> {
        self.records().get(&id).cloned()
    }

    pub fn cursor(&self, direction: CursorDirection) -> RecordCursor {
        let mut cursor = RecordCursor {
            store: self.clone(),
            direction,
            position: None,
            bound: None,
            eof: false,
        };
        cursor.refresh_bound();
        cursor
    }

    pub fn random_cursor(&self) -> RandomCursor {
        RandomCursor { store: self.clone() }
    }

    fn random_record(&self) -> Option<Record> {
        let map = self.records();
        let first = map.keys().next()?.repr();
        let last = map.keys().next_back()?.repr();
        let pick = rand::thread_rng().gen_range(first..=last);
        map.range(RecordId::new(pick)..)
            .next()
            .map(|(id, data)| Record::with_id(*id, data.clone()))
    }

    /// Removes every record. Stones are cleared when the unit commits.
    pub fn truncate(&self, ru: &mut RecoveryUnit) -> Result<(), StorageError> {
        let old = std::mem::take(&mut *self.records());
        let old_records = old.len() as i64;
        let old_bytes: i64 = old.values().map(|d| d.len() as i64).sum();
        self.change_stats(-old_records, -old_bytes);
        *self.capped_first_record() = RecordId::null();

        if let Some(stones) = self.oplog_stones() {
            ru.on_commit(move || stones.clear_stones_on_commit());
        }
        let store = self.clone();
        ru.on_rollback(move || {
            store.records().extend(old);
            store.change_stats(old_records, old_bytes);
        });

        slog::info!(self.inner.logger, "Truncated {} records", old_records);
        Ok(())
    }

    /// Removes the suffix starting at `end` (inclusive) or just after it.
    pub fn capped_truncate_after(
        &self,
        ru: &mut RecoveryUnit,
        end: RecordId,
        inclusive: bool,
    ) -> Result<(), StorageError> {
        let (removed, last_kept) = {
            let mut map = self.records();
            if !map.contains_key(&end) {
                return Err(StorageError::RecordNotFound(end));
            }
            let start = if inclusive {
                Bound::Included(end)
            } else {
                Bound::Excluded(end)
            };
            let removed: Vec<(RecordId, Bytes)> = map
                .range((start, Bound::Unbounded))
                .map(|(id, data)| (*id, data.clone()))
                .collect();
            for (id, _) in removed.iter() {
                map.remove(id);
            }
            (removed, map.keys().next_back().copied().unwrap_or_else(RecordId::null))
        };

        let first_removed = match removed.first() {
            Some((id, _)) => *id,
            None => return Ok(()),
        };
        let records_removed = removed.len() as i64;
        let bytes_removed: i64 = removed.iter().map(|(_, d)| d.len() as i64).sum();
        self.change_stats(-records_removed, -bytes_removed);

        let previous_highest = self.inner.visibility.highest_seen();
        if self.is_oplog() {
            // Later oplog inserts must be allowed to fill the truncated range again.
            self.inner.visibility.reset_highest_seen(last_kept);
        }
        {
            let mut first = self.capped_first_record();
            if *first > last_kept {
                *first = RecordId::null();
            }
        }

        let store = self.clone();
        let restore = removed.clone();
        ru.on_rollback(move || {
            store.records().extend(restore);
            store.change_stats(records_removed, bytes_removed);
            if store.is_oplog() {
                store.inner.visibility.reset_highest_seen(previous_highest);
            }
        });

        if let Some(callback) = self.capped_callback() {
            for (id, data) in removed.iter() {
                callback.about_to_delete_capped(ru, *id, data)?;
            }
        }

        if let Some(stones) = self.oplog_stones() {
            ru.on_commit(move || {
                stones.update_stones_after_capped_truncate_after(records_removed, bytes_removed, first_removed)
            });
        }

        slog::info!(
            self.inner.logger,
            "Truncated {} records from {} onwards",
            records_removed,
            first_removed
        );
        Ok(())
    }

    /// Waits until every oplog write reserved before the call is visible to forward readers.
    pub async fn wait_for_all_earlier_oplog_writes_to_be_visible(
        &self,
        ctx: &OperationContext,
    ) -> Result<(), StorageError> {
        if !self.is_oplog() {
            return Ok(());
        }
        self.inner
            .visibility
            .wait_for_all_earlier_writes(ctx, INTERRUPT_POLL_INTERVAL)
            .await
    }

    fn capped_first_record(&self) -> MutexGuard<'_, RecordId> {
        self.inner
            .capped_first_record
            .lock()
            .expect("RecordStore capped first record mutex guard poison")
    }

    fn capped_and_need_delete(&self) -> bool {
        if !self.is_capped() || self.is_oplog() {
            return false;
        }
        if self.data_size() >= self.capped_max_size() {
            return true;
        }
        self.capped_max_docs() != -1 && self.num_records() > self.capped_max_docs()
    }

    fn capped_max_size_slack(&self) -> i64 {
        (self.capped_max_size() / 10).min(CAPPED_MAX_SIZE_SLACK_LIMIT)
    }

    /// Deletes the oldest records of a capped store until it is back within its limits. Returns
    /// the number of records deleted.
    fn capped_delete_as_needed(&self, just_inserted: RecordId) -> i64 {
        if !self.capped_and_need_delete() {
            return 0;
        }

        let _guard = if self.capped_max_docs() != -1 {
            // A document limit has to be exact, so always wait our turn.
            self.inner.capped_deleter.lock()
        } else {
            match self.inner.capped_deleter.try_lock() {
                Some(guard) => guard,
                None => {
                    // Someone else is deleting. Only wait if they are falling too far behind.
                    if self.data_size() - self.capped_max_size() < self.capped_max_size_slack() {
                        return 0;
                    }
                    match self.inner.capped_deleter.try_lock_for(CAPPED_DELETE_LOCK_TIMEOUT) {
                        Some(guard) => guard,
                        None => return 0,
                    }
                }
            }
        };

        self.capped_delete_as_needed_inlock(just_inserted)
    }

    fn capped_delete_as_needed_inlock(&self, just_inserted: RecordId) -> i64 {
        let size_over_cap = (self.data_size() - self.capped_max_size()).max(0);
        let docs_over_cap = if self.capped_max_docs() != -1 {
            (self.num_records() - self.capped_max_docs()).max(0)
        } else {
            0
        };

        let start = *self.capped_first_record();
        let to_delete: Vec<(RecordId, Bytes)> = {
            let map = self.records();
            let mut size_saved = 0;
            let mut docs_removed = 0;
            let mut to_delete = Vec::new();
            for (id, data) in map.range(start..) {
                if !((size_saved < size_over_cap || docs_removed < docs_over_cap)
                    && docs_removed < MAX_CAPPED_DELETES_PER_PASS)
                {
                    break;
                }
                if *id >= just_inserted {
                    break;
                }
                size_saved += data.len() as i64;
                docs_removed += 1;
                to_delete.push((*id, data.clone()));
            }
            to_delete
        };
        if to_delete.is_empty() {
            return 0;
        }

        // Deletions happen in a side unit of work that commits on its own.
        let mut side_ru = RecoveryUnit::new();
        if let Some(callback) = self.capped_callback() {
            for (id, data) in to_delete.iter() {
                if let Err(e) = callback.about_to_delete_capped(&mut side_ru, *id, data) {
                    slog::warn!(self.inner.logger, "Capped delete aborted: {}", e);
                    side_ru.abort();
                    return 0;
                }
            }
        }

        let docs_removed = to_delete.len() as i64;
        let (removed_bytes, first_remaining) = {
            let mut map = self.records();
            let mut removed_bytes = 0;
            for (id, _) in to_delete.iter() {
                if let Some(data) = map.remove(id) {
                    removed_bytes += data.len() as i64;
                }
            }
            self.change_stats(-docs_removed, -removed_bytes);
            let last_deleted = to_delete[to_delete.len() - 1].0;
            let first_remaining = map
                .range((Bound::Excluded(last_deleted), Bound::Unbounded))
                .next()
                .map(|(id, _)| *id)
                .unwrap_or_else(RecordId::null);
            (removed_bytes, first_remaining)
        };
        *self.capped_first_record() = first_remaining;
        side_ru.commit();

        slog::debug!(
            self.inner.logger,
            "Capped delete removed {} records, {} bytes",
            docs_removed,
            removed_bytes
        );
        docs_removed
    }

    /// Truncates every excess oplog stone, oldest first. Each stone goes in its own unit of work,
    /// and the stone is only popped once its records are gone.
    pub fn reclaim_oplog(&self) {
        let stones = match self.oplog_stones() {
            Some(stones) => stones,
            None => return,
        };

        while let Some(stone) = stones.peek_oldest_stone_if_needed() {
            let mut ru = RecoveryUnit::new();
            let (records, bytes) = self.remove_range(&mut ru, stones.first_record(), stone.last_record);
            let popped = stones.clone();
            ru.on_commit(move || popped.pop_oldest_stone());
            ru.commit();

            slog::info!(
                self.inner.logger,
                "Reclaimed oplog stone ending at {}: {} records, {} bytes",
                stone.last_record,
                records,
                bytes
            );
        }
    }

    /// Removes `[from, to]` and adjusts the counters under the same lock. Rolling `ru` back puts
    /// the records back.
    fn remove_range(&self, ru: &mut RecoveryUnit, from: RecordId, to: RecordId) -> (i64, i64) {
        let removed: Vec<(RecordId, Bytes)> = {
            let mut map = self.records();
            let ids: Vec<RecordId> = map.range(from..=to).map(|(id, _)| *id).collect();
            let removed: Vec<(RecordId, Bytes)> = ids
                .into_iter()
                .filter_map(|id| map.remove(&id).map(|data| (id, data)))
                .collect();
            let bytes: i64 = removed.iter().map(|(_, data)| data.len() as i64).sum();
            self.change_stats(-(removed.len() as i64), -bytes);
            removed
        };
        let records = removed.len() as i64;
        let bytes: i64 = removed.iter().map(|(_, data)| data.len() as i64).sum();

        let store = self.clone();
        ru.on_rollback(move || {
            let mut map = store.records();
            store.change_stats(records, bytes);
            map.extend(removed);
        });
        (records, bytes)
    }
}

fn spawn_reclaim_worker(logger: slog::Logger, store: Weak<Inner>, stones: Arc<OplogStones>) {
    tokio::task::spawn(async move {
        loop {
            if stones.await_has_excess_stones_or_dead().await {
                slog::debug!(logger, "Oplog reclaim worker exited");
                return;
            }
            match store.upgrade() {
                Some(inner) => RecordStore { inner }.reclaim_oplog(),
                None => return,
            }
        }
    });
}

struct InitView<'a> {
    records: &'a BTreeMap<RecordId, Bytes>,
}

impl StonesInitSource for InitView<'_> {
    fn num_records(&self) -> i64 {
        self.records.len() as i64
    }

    fn data_size(&self) -> i64 {
        self.records.values().map(|d| d.len() as i64).sum()
    }

    fn scan(&self) -> Vec<(RecordId, i64)> {
        self.records.iter().map(|(id, d)| (*id, d.len() as i64)).collect()
    }

    fn random_record_id(&self) -> Option<RecordId> {
        let first = self.records.keys().next()?.repr();
        let last = self.records.keys().next_back()?.repr();
        let pick = rand::thread_rng().gen_range(first..=last);
        self.records.range(RecordId::new(pick)..).next().map(|(id, _)| *id)
    }
}

/// RecordCursor iterates a store in id order. Forward cursors on capped stores stop at the
/// visibility bound captured when they were opened or last restored.
pub struct RecordCursor {
    store: RecordStore,
    direction: CursorDirection,
    position: Option<RecordId>,
    bound: Option<ReadBound>,
    eof: bool,
}

impl RecordCursor {
    fn refresh_bound(&mut self) {
        self.bound = if self.store.is_capped() && self.direction == CursorDirection::Forward {
            Some(self.store.inner.visibility.read_bound())
        } else {
            None
        };
    }

    fn is_visible(&self, id: RecordId) -> bool {
        match self.bound {
            Some(bound) => bound.allows(id),
            None => true,
        }
    }

    pub fn next(&mut self) -> Option<Record> {
        if self.eof {
            return None;
        }

        let candidate = {
            let map = self.store.records();
            let entry = match (self.direction, self.position) {
                (CursorDirection::Forward, None) => map.iter().next(),
                (CursorDirection::Forward, Some(p)) => map.range((Bound::Excluded(p), Bound::Unbounded)).next(),
                (CursorDirection::Backward, None) => map.iter().next_back(),
                (CursorDirection::Backward, Some(p)) => map.range(..p).next_back(),
            };
            entry.map(|(id, data)| Record::with_id(*id, data.clone()))
        };

        match candidate {
            Some(record) if self.is_visible(record.id) => {
                self.position = Some(record.id);
                Some(record)
            }
            _ => {
                self.eof = true;
                None
            }
        }
    }

    /// Positions the cursor on `id`, honouring the visibility bound.
    pub fn seek_exact(&mut self, id: RecordId) -> Option<Record> {
        if !self.is_visible(id) {
            return None;
        }
        let data = self.store.find_record(id)?;
        self.position = Some(id);
        self.eof = false;
        Some(Record::with_id(id, data))
    }

    pub fn save(&mut self) {}

    /// Re-validates the saved position and refreshes the visibility bound. A capped store whose
    /// saved record was deleted in the meantime reports `CappedPositionLost`.
    pub fn restore(&mut self) -> Result<(), StorageError> {
        if let Some(position) = self.position {
            if self.store.is_capped() && self.store.find_record(position).is_none() {
                return Err(StorageError::CappedPositionLost(position));
            }
        }
        self.eof = false;
        self.refresh_bound();
        Ok(())
    }
}

/// RandomCursor returns records picked at random. It may return the same record twice.
pub struct RandomCursor {
    store: RecordStore,
}

impl RandomCursor {
    pub fn next(&mut self) -> Option<Record> {
        self.store.random_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::{OpType, OplogEntry};
    use crate::storage::{NoopJournal, RecordStoreOptions};
    use crate::types::{Document, Term, Timestamp};
    use std::convert::TryFrom;
    use tokio::sync::Semaphore;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn store(options: RecordStoreOptions) -> RecordStore {
        store_with_journal(options, Arc::new(NoopJournal))
    }

    fn store_with_journal(options: RecordStoreOptions, journal: Arc<dyn Journal>) -> RecordStore {
        let options = RecordStoreOptionsValidated::try_from(options).unwrap();
        RecordStore::new(logger(), "test.store", options, journal)
    }

    fn oplog_record(secs: u32, pad: usize) -> Record {
        let entry = OplogEntry::new(
            Timestamp::new(secs, 0),
            Term::new(1),
            secs as i64,
            OpType::Noop,
            "",
            Document::new().with("pad", Bytes::from(vec![0u8; pad])),
        );
        Record::new(entry.encode().unwrap())
    }

    fn insert_one(store: &RecordStore, record: Record) -> RecordId {
        let mut ru = RecoveryUnit::new();
        let mut records = vec![record];
        store.insert_records(&mut ru, &mut records).unwrap();
        ru.commit();
        records[0].id
    }

    fn scan_ids(store: &RecordStore) -> Vec<RecordId> {
        let mut cursor = store.cursor(CursorDirection::Forward);
        let mut ids = Vec::new();
        while let Some(record) = cursor.next() {
            ids.push(record.id);
        }
        ids
    }

    /// Journal whose durability is granted one batch at a time by the test.
    struct GatedJournal {
        permits: Semaphore,
    }

    #[async_trait::async_trait]
    impl Journal for GatedJournal {
        async fn wait_until_durable(&self, _force_checkpoint: bool) {
            self.permits.acquire().await.unwrap().forget();
        }
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition never became true");
    }

    #[tokio::test]
    async fn plain_store_assigns_increasing_ids() {
        let store = store(RecordStoreOptions::default());

        let a = insert_one(&store, Record::new(Bytes::from_static(b"a")));
        let b = insert_one(&store, Record::new(Bytes::from_static(b"bb")));

        assert!(a < b);
        assert_eq!(scan_ids(&store), vec![a, b]);
        assert_eq!(store.num_records(), 2);
        assert_eq!(store.data_size(), 3);
        assert_eq!(store.storage_size(), 3);
    }

    #[tokio::test]
    async fn aborted_insert_leaves_no_trace() {
        let store = store(RecordStoreOptions::default());
        {
            let mut ru = RecoveryUnit::new();
            let mut records = vec![Record::new(Bytes::from_static(b"gone"))];
            store.insert_records(&mut ru, &mut records).unwrap();
            ru.abort();
        }

        assert_eq!(store.num_records(), 0);
        assert_eq!(store.data_size(), 0);
        assert!(scan_ids(&store).is_empty());
    }

    #[tokio::test]
    async fn capped_store_rejects_delete() {
        let store = store(RecordStoreOptions::capped(1 << 20, None));
        let id = insert_one(&store, Record::new(Bytes::from_static(b"x")));
        let mut ru = RecoveryUnit::new();

        assert!(matches!(
            store.delete_record(&mut ru, id),
            Err(StorageError::IllegalOperation(_))
        ));
    }

    #[tokio::test]
    async fn oplog_update_must_keep_length() {
        let store = store(RecordStoreOptions::oplog(1 << 20));
        let id = insert_one(&store, oplog_record(1, 4));
        let mut ru = RecoveryUnit::new();

        let result = store.update_record(&mut ru, id, Bytes::from_static(b"short"));

        assert!(matches!(result, Err(StorageError::InvalidLength { .. })));
    }

    #[tokio::test]
    async fn oplog_forward_scan_returns_inserts_in_order() {
        let store = store(RecordStoreOptions::oplog(1 << 20));
        let mut expected = Vec::new();
        for secs in 1..=20 {
            expected.push(insert_one(&store, oplog_record(secs, 8)));
        }
        let ctx = OperationContext::new();

        store.wait_for_all_earlier_oplog_writes_to_be_visible(&ctx).await.unwrap();

        assert_eq!(scan_ids(&store), expected);
    }

    #[tokio::test]
    async fn oplog_hides_records_behind_an_uncommitted_hole() {
        // -- setup --
        let store = store(RecordStoreOptions::oplog(1 << 20));
        let first = insert_one(&store, oplog_record(1, 0));
        let ctx = OperationContext::new();
        store.wait_for_all_earlier_oplog_writes_to_be_visible(&ctx).await.unwrap();

        // -- execute --
        // Reserve 2 without committing, then commit 3.
        let mut hole = RecoveryUnit::new();
        let mut records = vec![oplog_record(2, 0)];
        store.insert_records(&mut hole, &mut records).unwrap();
        let third = insert_one(&store, oplog_record(3, 0));

        // -- verify --
        assert_eq!(scan_ids(&store), vec![first]);

        let second = records[0].id;
        hole.commit();
        store.wait_for_all_earlier_oplog_writes_to_be_visible(&ctx).await.unwrap();
        assert_eq!(scan_ids(&store), vec![first, second, third]);
    }

    #[tokio::test]
    async fn oplog_records_wait_for_the_journal() {
        // -- setup --
        let journal = Arc::new(GatedJournal {
            permits: Semaphore::new(0),
        });
        let store = store_with_journal(RecordStoreOptions::oplog(1 << 20), journal.clone());

        // -- execute --
        let id = insert_one(&store, oplog_record(1, 0));

        // -- verify --
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(scan_ids(&store).is_empty());
        assert_eq!(store.uncommitted_count(), 1);

        journal.permits.add_permits(1);
        store
            .wait_for_all_earlier_oplog_writes_to_be_visible(&OperationContext::new())
            .await
            .unwrap();
        assert_eq!(scan_ids(&store), vec![id]);
    }

    #[tokio::test]
    async fn out_of_order_oplog_insert_is_rejected() {
        let store = store(RecordStoreOptions::oplog(1 << 20));
        insert_one(&store, oplog_record(5, 0));
        let mut ru = RecoveryUnit::new();
        let mut records = vec![oplog_record(4, 0)];

        assert!(matches!(
            store.insert_records(&mut ru, &mut records),
            Err(StorageError::BadOplogEntry(_))
        ));
    }

    #[tokio::test]
    async fn capped_store_stays_within_limits() {
        let store = store(RecordStoreOptions::capped(1000, Some(5)));

        for _ in 0..50 {
            insert_one(&store, Record::new(Bytes::from(vec![1u8; 100])));
            assert!(store.num_records() <= 5);
            assert!(store.data_size() <= 1000);
        }

        // The newest records always survive.
        let ids = scan_ids(&store);
        assert_eq!(ids.len(), 5);
        assert_eq!(ids.last().copied(), Some(RecordId::new(50)));
    }

    #[tokio::test]
    async fn capped_size_limit_without_doc_limit() {
        let store = store(RecordStoreOptions::capped(1000, None));

        for _ in 0..30 {
            insert_one(&store, Record::new(Bytes::from(vec![1u8; 100])));
        }

        assert_eq!(store.data_size(), 1000);
        assert_eq!(store.num_records(), 10);
    }

    #[tokio::test]
    async fn restore_reports_lost_capped_position() {
        // -- setup --
        let store = store(RecordStoreOptions::oplog(1 << 20));
        for secs in 1..=3 {
            insert_one(&store, oplog_record(secs, 0));
        }
        let ctx = OperationContext::new();
        store.wait_for_all_earlier_oplog_writes_to_be_visible(&ctx).await.unwrap();
        let mut cursor = store.cursor(CursorDirection::Forward);
        cursor.next();
        let second = cursor.next().unwrap().id;
        cursor.save();

        // -- execute --
        let mut ru = RecoveryUnit::new();
        store.capped_truncate_after(&mut ru, second, true).unwrap();
        ru.commit();

        // -- verify --
        assert_eq!(cursor.restore(), Err(StorageError::CappedPositionLost(second)));
        assert_eq!(store.num_records(), 1);
    }

    #[tokio::test]
    async fn capped_truncate_after_allows_refilling() {
        let store = store(RecordStoreOptions::oplog(1 << 20));
        let first = insert_one(&store, oplog_record(1, 0));
        insert_one(&store, oplog_record(2, 0));
        insert_one(&store, oplog_record(3, 0));

        let mut ru = RecoveryUnit::new();
        store.capped_truncate_after(&mut ru, first, false).unwrap();
        ru.commit();
        let refilled = insert_one(&store, oplog_record(2, 0));

        store
            .wait_for_all_earlier_oplog_writes_to_be_visible(&OperationContext::new())
            .await
            .unwrap();
        assert_eq!(scan_ids(&store), vec![first, refilled]);
    }

    #[tokio::test]
    async fn truncate_rollback_restores_records() {
        let store = store(RecordStoreOptions::default());
        insert_one(&store, Record::new(Bytes::from_static(b"a")));
        insert_one(&store, Record::new(Bytes::from_static(b"b")));

        {
            let mut ru = RecoveryUnit::new();
            store.truncate(&mut ru).unwrap();
            assert_eq!(store.num_records(), 0);
        }

        assert_eq!(store.num_records(), 2);
        assert_eq!(scan_ids(&store).len(), 2);
    }

    #[tokio::test]
    async fn stone_bytes_match_live_bytes() {
        let mut options = RecordStoreOptions::oplog(1 << 20);
        options.min_bytes_per_stone = Some(500);
        options.num_stones_to_keep = Some(100);
        let store = store(options);

        for secs in 1..=40 {
            insert_one(&store, oplog_record(secs, 37));
        }
        let mut ru = RecoveryUnit::new();
        store
            .capped_truncate_after(&mut ru, RecordId::new(Timestamp::new(25, 0).as_u64() as i64), true)
            .unwrap();
        ru.commit();

        let stones = store.oplog_stones().unwrap();
        let stone_bytes: i64 = stones.stones().iter().map(|s| s.bytes).sum();
        assert_eq!(stone_bytes + stones.current_bytes(), store.data_size());
        let stone_records: i64 = stones.stones().iter().map(|s| s.records).sum();
        assert_eq!(stone_records + stones.current_records(), store.num_records());
    }

    #[tokio::test]
    async fn reopened_oplog_rebuilds_stones() {
        let mut records = Vec::new();
        for secs in 1..=30 {
            let mut record = oplog_record(secs, 90);
            record.id = oplog::extract_key(&record.data).unwrap();
            records.push(record);
        }
        let record_len = records[0].data.len() as i64;
        let mut options = RecordStoreOptions::oplog(1 << 20);
        options.min_bytes_per_stone = Some(record_len * 10);
        options.num_stones_to_keep = Some(10);
        let options = RecordStoreOptionsValidated::try_from(options).unwrap();

        let store = RecordStore::open_with_records(logger(), "local.oplog.rs", options, Arc::new(NoopJournal), records);

        let stones = store.oplog_stones().unwrap();
        assert_eq!(stones.num_stones(), 3);
        assert_eq!(store.num_records(), 30);
    }

    #[tokio::test]
    async fn reclaim_worker_truncates_excess_stones() {
        // -- setup --
        let mut options = RecordStoreOptions::oplog(1 << 20);
        options.min_bytes_per_stone = Some(1);
        options.num_stones_to_keep = Some(2);
        let store = store(options);

        // -- execute --
        for secs in 1..=3 {
            insert_one(&store, oplog_record(secs, 0));
        }

        // -- verify --
        let stones = store.oplog_stones().unwrap();
        wait_until(|| stones.num_stones() == 2).await;
        assert_eq!(store.num_records(), 2);
        assert_eq!(stones.first_record(), RecordId::new(Timestamp::new(1, 0).as_u64() as i64));
    }

    #[tokio::test]
    async fn reclaim_keeps_counters_in_step_with_records() {
        // -- setup --
        let mut options = RecordStoreOptions::oplog(1 << 20);
        options.min_bytes_per_stone = Some(200);
        options.num_stones_to_keep = Some(2);
        let store = store(options);
        for secs in 1..=30 {
            insert_one(&store, oplog_record(secs, secs as usize));
        }

        // -- execute --
        store.reclaim_oplog();

        // -- verify --
        let stones = store.oplog_stones().unwrap();
        assert!(stones.num_stones() <= 2);
        let (live_records, live_bytes) = {
            let map = store.records();
            (map.len() as i64, map.values().map(|data| data.len() as i64).sum::<i64>())
        };
        assert_eq!(store.num_records(), live_records);
        assert_eq!(store.data_size(), live_bytes);
        let stone_bytes: i64 = stones.stones().iter().map(|s| s.bytes).sum();
        assert_eq!(stone_bytes + stones.current_bytes(), live_bytes);
    }

    #[tokio::test]
    async fn rolled_back_range_removal_restores_records() {
        let store = store(RecordStoreOptions::oplog(1 << 20));
        let first = insert_one(&store, oplog_record(1, 3));
        let last = insert_one(&store, oplog_record(2, 3));
        let bytes = store.data_size();

        {
            let mut ru = RecoveryUnit::new();
            assert_eq!(store.remove_range(&mut ru, first, last).0, 2);
            assert_eq!(store.num_records(), 0);
            ru.abort();
        }

        assert_eq!(store.num_records(), 2);
        assert_eq!(store.data_size(), bytes);
        assert!(store.find_record(first).is_some());
    }

    #[tokio::test]
    async fn size_capped_insert_skips_delete_while_another_deleter_runs() {
        // -- setup --
        let store = store(RecordStoreOptions::capped(1000, None));
        for _ in 0..10 {
            insert_one(&store, Record::new(Bytes::from(vec![1u8; 100])));
        }
        let busy = store.inner.capped_deleter.lock();

        // -- execute --
        // Slightly over the cap, inside the slack: the insert must not wait for the lock.
        let started = std::time::Instant::now();
        insert_one(&store, Record::new(Bytes::from(vec![1u8; 10])));

        // -- verify --
        assert!(started.elapsed() < CAPPED_DELETE_LOCK_TIMEOUT);
        assert_eq!(store.num_records(), 11);

        drop(busy);
        insert_one(&store, Record::new(Bytes::from(vec![1u8; 10])));
        assert!(store.data_size() <= 1000);
    }

    #[tokio::test]
    async fn size_capped_insert_far_over_the_cap_gives_up_after_the_lock_timeout() {
        let store = store(RecordStoreOptions::capped(1000, None));
        let busy = store.inner.capped_deleter.lock();

        let started = std::time::Instant::now();
        insert_one(&store, Record::new(Bytes::from(vec![1u8; 1500])));

        assert!(started.elapsed() >= CAPPED_DELETE_LOCK_TIMEOUT);
        assert_eq!(store.num_records(), 1);
        drop(busy);
    }

    #[tokio::test]
    async fn random_cursor_returns_existing_records() {
        let store = store(RecordStoreOptions::default());
        let mut ids = Vec::new();
        for i in 0..10u8 {
            ids.push(insert_one(&store, Record::new(Bytes::from(vec![i]))));
        }

        let mut cursor = store.random_cursor();
        for _ in 0..20 {
            let record = cursor.next().unwrap();
            assert!(ids.contains(&record.id));
        }
    }

    mod visibility_properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeSet;

        #[derive(Debug, Clone)]
        enum Step {
            Begin,
            End { which: proptest::sample::Index, commit: bool },
        }

        fn steps() -> impl Strategy<Value = Vec<Step>> {
            proptest::collection::vec(
                prop_oneof![
                    Just(Step::Begin),
                    (any::<proptest::sample::Index>(), any::<bool>()).prop_map(|(which, commit)| Step::End { which, commit }),
                ],
                1..60,
            )
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn readers_never_see_past_an_open_write(steps in steps()) {
                let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
                runtime.block_on(async move {
                    let store = store(RecordStoreOptions::oplog(1 << 20));
                    let mut open: Vec<(RecoveryUnit, RecordId)> = Vec::new();
                    let mut committed = BTreeSet::new();
                    let mut secs = 0;

                    for step in steps {
                        match step {
                            Step::Begin => {
                                secs += 1;
                                let mut ru = RecoveryUnit::new();
                                let mut records = vec![oplog_record(secs, 8)];
                                store.insert_records(&mut ru, &mut records).unwrap();
                                open.push((ru, records[0].id));
                            }
                            Step::End { which, commit } => {
                                if open.is_empty() {
                                    continue;
                                }
                                let (ru, id) = open.remove(which.index(open.len()));
                                if commit {
                                    ru.commit();
                                    committed.insert(id);
                                } else {
                                    ru.abort();
                                }
                            }
                        }
                        // Lets the journal worker publish what was committed.
                        for _ in 0..4 {
                            tokio::task::yield_now().await;
                        }

                        let visible = scan_ids(&store);
                        prop_assert!(visible.windows(2).all(|w| w[0] < w[1]));
                        prop_assert!(visible.iter().all(|id| committed.contains(id)));
                        if let Some(lowest_open) = open.iter().map(|(_, id)| *id).min() {
                            prop_assert!(visible.iter().all(|id| *id < lowest_open));
                        }
                    }

                    for (ru, id) in open.drain(..) {
                        ru.commit();
                        committed.insert(id);
                    }
                    store
                        .wait_for_all_earlier_oplog_writes_to_be_visible(&OperationContext::new())
                        .await
                        .unwrap();
                    prop_assert_eq!(scan_ids(&store), committed.into_iter().collect::<Vec<_>>());
                    Ok(())
                })?;
            }
        }
    }
}
