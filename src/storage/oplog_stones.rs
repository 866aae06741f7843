use crate::storage::StorageError;
use crate::types::RecordId;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use tokio::sync::Notify;

const MIN_STONES_TO_KEEP: i64 = 10;
const MAX_STONES_TO_KEEP: i64 = 100;
const STONE_SIZE_DIVISOR: i64 = 128 * 1024 * 1024;
pub(super) const RANDOM_SAMPLES_PER_STONE: i64 = 10;
/// Sampling is only used when it would inspect less than 1/20th of the records.
const MIN_SAMPLE_RATIO_FOR_RAND_CURSOR: i64 = 20;

/// Stone marks the end of a contiguous range of oplog records that can be reclaimed as a unit.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Stone {
    pub records: i64,
    pub bytes: i64,
    pub last_record: RecordId,
}

/// Read access to an oplog record store used to rebuild stones when it is opened.
pub(super) trait StonesInitSource {
    fn num_records(&self) -> i64;
    fn data_size(&self) -> i64;
    /// Every record in id order with its size.
    fn scan(&self) -> Vec<(RecordId, i64)>;
    fn random_record_id(&self) -> Option<RecordId>;
}

/// OplogStones divides the oplog into stones and decides when the oldest of them can go.
pub struct OplogStones {
    logger: slog::Logger,
    stones: Mutex<StonesState>,
    current_records: AtomicI64,
    current_bytes: AtomicI64,
    min_bytes_per_stone: AtomicI64,
    num_stones_to_keep: AtomicUsize,
    is_dead: AtomicBool,
    reclaim_wakeup: Notify,
}

struct StonesState {
    stones: VecDeque<Stone>,
    first_record: RecordId,
}

impl OplogStones {
    pub(super) fn new(
        logger: slog::Logger,
        capped_max_size: i64,
        min_bytes_override: Option<i64>,
        stones_to_keep_override: Option<usize>,
    ) -> Self {
        let num_stones = (capped_max_size / STONE_SIZE_DIVISOR).max(MIN_STONES_TO_KEEP).min(MAX_STONES_TO_KEEP);
        let num_stones_to_keep = stones_to_keep_override.unwrap_or(num_stones as usize);
        let min_bytes_per_stone = min_bytes_override.unwrap_or(capped_max_size / num_stones);

        slog::info!(
            logger,
            "The oplog will keep {} stones of at least {} bytes each",
            num_stones_to_keep,
            min_bytes_per_stone
        );

        OplogStones {
            logger,
            stones: Mutex::new(StonesState {
                stones: VecDeque::new(),
                first_record: RecordId::null(),
            }),
            current_records: AtomicI64::new(0),
            current_bytes: AtomicI64::new(0),
            min_bytes_per_stone: AtomicI64::new(min_bytes_per_stone),
            num_stones_to_keep: AtomicUsize::new(num_stones_to_keep),
            is_dead: AtomicBool::new(false),
            reclaim_wakeup: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StonesState> {
        self.stones.lock().expect("OplogStones mutex guard poison")
    }

    /// Rebuilds stones from the records already in the store, by scanning small oplogs and by
    /// sampling large ones.
    pub(super) fn initialize<S: StonesInitSource>(&self, source: &S) {
        let num_records = source.num_records();
        let data_size = source.data_size();
        if num_records <= 0 || data_size <= 0 {
            return;
        }

        let sample_threshold =
            MIN_SAMPLE_RATIO_FOR_RAND_CURSOR * RANDOM_SAMPLES_PER_STONE * self.num_stones_to_keep() as i64;
        if num_records < sample_threshold {
            self.calculate_stones_by_scanning(source);
        } else {
            self.calculate_stones_by_sampling(source, num_records, data_size);
        }
    }

    fn calculate_stones_by_scanning<S: StonesInitSource>(&self, source: &S) {
        slog::info!(self.logger, "Scanning the oplog to determine where to place markers for truncation");
        let min_bytes = self.min_bytes_per_stone();
        let mut state = self.lock();
        let mut records = 0;
        let mut bytes = 0;
        for (id, size) in source.scan() {
            records += 1;
            bytes += size;
            if bytes >= min_bytes {
                state.stones.push_back(Stone {
                    records,
                    bytes,
                    last_record: id,
                });
                records = 0;
                bytes = 0;
            }
        }
        self.current_records.store(records, Ordering::Release);
        self.current_bytes.store(bytes, Ordering::Release);
    }

    fn calculate_stones_by_sampling<S: StonesInitSource>(&self, source: &S, num_records: i64, data_size: i64) {
        slog::info!(self.logger, "Sampling the oplog to determine where to place markers for truncation");
        let min_bytes = self.min_bytes_per_stone();
        let avg_record_size = (data_size / num_records).max(1);
        let est_records_per_stone = (min_bytes + avg_record_size - 1) / avg_record_size;
        let est_bytes_per_stone = est_records_per_stone * avg_record_size;
        let whole_stones = num_records / est_records_per_stone;
        let num_samples = RANDOM_SAMPLES_PER_STONE * num_records / est_records_per_stone;

        let mut samples = Vec::with_capacity(num_samples as usize);
        for _ in 0..num_samples {
            match source.random_record_id() {
                Some(id) => samples.push(id),
                None => {
                    slog::warn!(self.logger, "Random cursor ran out of records, falling back to a scan");
                    self.calculate_stones_by_scanning(source);
                    return;
                }
            }
        }
        samples.sort();

        let mut state = self.lock();
        for i in 1..=whole_stones {
            let sample_index = (RANDOM_SAMPLES_PER_STONE * i - 1) as usize;
            let last_record = match samples.get(sample_index) {
                Some(id) => *id,
                None => break,
            };
            state.stones.push_back(Stone {
                records: est_records_per_stone,
                bytes: est_bytes_per_stone,
                last_record,
            });
        }
        let placed = state.stones.len() as i64;
        self.current_records
            .store(num_records - placed * est_records_per_stone, Ordering::Release);
        self.current_bytes
            .store(data_size - placed * est_bytes_per_stone, Ordering::Release);
    }

    pub fn num_stones(&self) -> usize {
        self.lock().stones.len()
    }

    pub fn stones(&self) -> Vec<Stone> {
        self.lock().stones.iter().copied().collect()
    }

    pub fn current_records(&self) -> i64 {
        self.current_records.load(Ordering::Acquire)
    }

    pub fn current_bytes(&self) -> i64 {
        self.current_bytes.load(Ordering::Acquire)
    }

    pub fn first_record(&self) -> RecordId {
        self.lock().first_record
    }

    pub fn min_bytes_per_stone(&self) -> i64 {
        self.min_bytes_per_stone.load(Ordering::Acquire)
    }

    pub fn num_stones_to_keep(&self) -> usize {
        self.num_stones_to_keep.load(Ordering::Acquire)
    }

    fn is_empty(&self, state: &StonesState) -> bool {
        state.stones.is_empty() && self.current_records() == 0
    }

    pub fn set_min_bytes_per_stone(&self, min_bytes: i64) -> Result<(), StorageError> {
        let state = self.lock();
        if !self.is_empty(&state) || min_bytes <= 0 {
            return Err(StorageError::IllegalOperation(
                "stone size can only be changed while the oplog is empty".into(),
            ));
        }
        self.min_bytes_per_stone.store(min_bytes, Ordering::Release);
        Ok(())
    }

    pub fn set_num_stones_to_keep(&self, num_stones: usize) -> Result<(), StorageError> {
        let state = self.lock();
        if !self.is_empty(&state) || num_stones == 0 {
            return Err(StorageError::IllegalOperation(
                "number of stones can only be changed while the oplog is empty".into(),
            ));
        }
        self.num_stones_to_keep.store(num_stones, Ordering::Release);
        Ok(())
    }

    pub fn has_excess_stones(&self) -> bool {
        self.lock().stones.len() > self.num_stones_to_keep()
    }

    /// Post-commit accounting for newly inserted records.
    pub(super) fn update_current_stone_after_insert(&self, records: i64, bytes: i64, highest_inserted: RecordId) {
        self.current_records.fetch_add(records, Ordering::AcqRel);
        let current_bytes = self.current_bytes.fetch_add(bytes, Ordering::AcqRel) + bytes;
        if current_bytes >= self.min_bytes_per_stone() {
            self.create_new_stone_if_needed(highest_inserted);
        }
    }

    fn create_new_stone_if_needed(&self, last_record: RecordId) {
        let mut state = match self.stones.try_lock() {
            Ok(guard) => guard,
            // Another thread is already creating a stone.
            Err(TryLockError::WouldBlock) => return,
            Err(TryLockError::Poisoned(_)) => panic!("OplogStones mutex guard poison"),
        };

        if self.current_bytes() < self.min_bytes_per_stone() {
            // Lost the race to create this stone.
            return;
        }
        if let Some(back) = state.stones.back() {
            if last_record <= back.last_record {
                // Racing with another stone creation for the same region.
                return;
            }
        }

        let stone = Stone {
            records: self.current_records.swap(0, Ordering::AcqRel),
            bytes: self.current_bytes.swap(0, Ordering::AcqRel),
            last_record,
        };
        slog::info!(
            self.logger,
            "Created oplog stone {} ending at {}: {} records, {} bytes",
            state.stones.len() + 1,
            stone.last_record,
            stone.records,
            stone.bytes
        );
        state.stones.push_back(stone);
        let excess = state.stones.len() > self.num_stones_to_keep();
        drop(state);

        if excess {
            self.reclaim_wakeup.notify_one();
        }
    }

    pub(super) fn clear_stones_on_commit(&self) {
        let mut state = self.lock();
        state.stones.clear();
        self.current_records.store(0, Ordering::Release);
        self.current_bytes.store(0, Ordering::Release);
    }

    /// Post-commit accounting for `capped_truncate_after`. Stones that overlap the removed suffix
    /// are dissolved back into the partial stone so the byte totals keep matching the store.
    pub(super) fn update_stones_after_capped_truncate_after(
        &self,
        records_removed: i64,
        bytes_removed: i64,
        first_removed: RecordId,
    ) {
        let mut state = self.lock();
        let mut num_to_remove = 0;
        let mut records_in_removed_stones = 0;
        let mut bytes_in_removed_stones = 0;
        for stone in state.stones.iter().rev() {
            if stone.last_record < first_removed {
                break;
            }
            num_to_remove += 1;
            records_in_removed_stones += stone.records;
            bytes_in_removed_stones += stone.bytes;
        }
        let keep = state.stones.len() - num_to_remove;
        state.stones.truncate(keep);

        self.current_records
            .fetch_add(records_in_removed_stones - records_removed, Ordering::AcqRel);
        self.current_bytes
            .fetch_add(bytes_in_removed_stones - bytes_removed, Ordering::AcqRel);
    }

    pub(super) fn peek_oldest_stone_if_needed(&self) -> Option<Stone> {
        let state = self.lock();
        if state.stones.len() > self.num_stones_to_keep() {
            state.stones.front().copied()
        } else {
            None
        }
    }

    pub(super) fn pop_oldest_stone(&self) {
        let mut state = self.lock();
        if let Some(stone) = state.stones.pop_front() {
            state.first_record = stone.last_record;
        }
    }

    /// Returns true when the stones are dead, false when there is an excess stone to reclaim.
    pub(super) async fn await_has_excess_stones_or_dead(&self) -> bool {
        loop {
            if self.is_dead.load(Ordering::Acquire) {
                return true;
            }
            if self.has_excess_stones() {
                return false;
            }
            self.reclaim_wakeup.notified().await;
        }
    }

    pub(super) fn kill(&self) {
        self.is_dead.store(true, Ordering::Release);
        self.reclaim_wakeup.notify_one();
    }
}
