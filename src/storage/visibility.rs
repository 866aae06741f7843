use crate::storage::StorageError;
use crate::types::{OperationContext, RecordId};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Notify};
use tokio::time::Duration;

/// Journal flushes committed writes to durable storage.
#[async_trait::async_trait]
pub trait Journal: Send + Sync {
    async fn wait_until_durable(&self, force_checkpoint: bool);
}

/// NoopJournal treats every committed write as already durable.
pub struct NoopJournal;

#[async_trait::async_trait]
impl Journal for NoopJournal {
    async fn wait_until_durable(&self, _force_checkpoint: bool) {}
}

/// Bound a forward cursor on a capped store may not read past.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(super) enum ReadBound {
    /// Nothing uncommitted: every id up to and including this one is visible.
    Through(RecordId),
    /// Ids strictly below the smallest uncommitted id are visible.
    Before(RecordId),
}

impl ReadBound {
    pub(super) fn allows(&self, id: RecordId) -> bool {
        match self {
            ReadBound::Through(highest) => id <= *highest,
            ReadBound::Before(lowest_uncommitted) => id < *lowest_uncommitted,
        }
    }
}

pub(super) struct VisibilityState {
    uncommitted: BTreeSet<RecordId>,
    highest_seen: RecordId,
    waiting_for_journal: Vec<RecordId>,
    shutting_down: bool,
}

/// Visibility tracks which record ids of a capped store are reserved but not yet visible.
pub(super) struct Visibility {
    state: Mutex<VisibilityState>,
    changed_notifier: watch::Sender<()>,
    changed_listener: watch::Receiver<()>,
    journal_wakeup: Notify,
}

impl Visibility {
    pub(super) fn new(highest_seen: RecordId) -> Self {
        let (changed_notifier, changed_listener) = watch::channel(());
        Visibility {
            state: Mutex::new(VisibilityState {
                uncommitted: BTreeSet::new(),
                highest_seen,
                waiting_for_journal: Vec::new(),
                shutting_down: false,
            }),
            changed_notifier,
            changed_listener,
            journal_wakeup: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VisibilityState> {
        self.state.lock().expect("Visibility mutex guard poison")
    }

    /// Reserves `id`. Oplog ids must arrive in increasing order.
    pub(super) fn add_uncommitted(&self, id: RecordId, require_increasing: bool) -> Result<(), StorageError> {
        let mut state = self.lock();
        if require_increasing && id <= state.highest_seen {
            return Err(StorageError::BadOplogEntry(format!(
                "oplog insert of {} is not after the highest seen id {}",
                id, state.highest_seen
            )));
        }
        state.uncommitted.insert(id);
        if id > state.highest_seen {
            state.highest_seen = id;
        }

        Ok(())
    }

    pub(super) fn remove_uncommitted(&self, id: RecordId) {
        self.lock().uncommitted.remove(&id);
        self.notify_changed();
    }

    /// Committed oplog ids stay hidden until the journal reports them durable.
    pub(super) fn committed_waiting_for_journal(&self, id: RecordId) {
        self.lock().waiting_for_journal.push(id);
        self.journal_wakeup.notify_one();
    }

    pub(super) fn read_bound(&self) -> ReadBound {
        let state = self.lock();
        match state.uncommitted.iter().next() {
            Some(lowest) => ReadBound::Before(*lowest),
            None => ReadBound::Through(state.highest_seen),
        }
    }

    pub(super) fn highest_seen(&self) -> RecordId {
        self.lock().highest_seen
    }

    pub(super) fn reset_highest_seen(&self, id: RecordId) {
        self.lock().highest_seen = id;
        self.notify_changed();
    }

    pub(super) fn uncommitted_count(&self) -> usize {
        self.lock().uncommitted.len()
    }

    pub(super) fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.journal_wakeup.notify_one();
        self.notify_changed();
    }

    fn notify_changed(&self) {
        let _ = self.changed_notifier.send(());
    }

    /// Waits until every id reserved before the call has left the uncommitted set.
    pub(super) async fn wait_for_all_earlier_writes(
        &self,
        ctx: &OperationContext,
        poll_interval: Duration,
    ) -> Result<(), StorageError> {
        // Subscribe before reading state so a change between the check and the wait is not lost.
        let mut listener = self.changed_listener.clone();
        let target = self.highest_seen();
        loop {
            {
                let state = self.lock();
                if state.shutting_down {
                    return Err(StorageError::ShutdownInProgress);
                }
                if state.uncommitted.range(..=target).next().is_none() {
                    return Ok(());
                }
            }
            ctx.check_for_interrupt()?;

            tokio::select! {
                _ = listener.changed() => {}
                _ = ctx.killed() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    async fn next_journal_batch(&self) -> Option<Vec<RecordId>> {
        loop {
            {
                let mut state = self.lock();
                if !state.waiting_for_journal.is_empty() {
                    return Some(std::mem::take(&mut state.waiting_for_journal));
                }
                if state.shutting_down {
                    return None;
                }
            }
            self.journal_wakeup.notified().await;
        }
    }

    fn journal_batch_durable(&self, batch: Vec<RecordId>) {
        {
            let mut state = self.lock();
            for id in batch {
                state.uncommitted.remove(&id);
            }
        }
        self.notify_changed();
    }
}

pub(super) fn spawn_journal_worker(logger: slog::Logger, visibility: Arc<Visibility>, journal: Arc<dyn Journal>) {
    tokio::task::spawn(async move {
        slog::debug!(logger, "Journal worker started");
        while let Some(batch) = visibility.next_journal_batch().await {
            journal.wait_until_durable(false).await;
            visibility.journal_batch_durable(batch);
        }
        slog::debug!(logger, "Journal worker exited");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_bound_follows_lowest_uncommitted() {
        let vis = Visibility::new(RecordId::null());
        assert_eq!(vis.read_bound(), ReadBound::Through(RecordId::null()));

        vis.add_uncommitted(RecordId::new(5), true).unwrap();
        vis.add_uncommitted(RecordId::new(6), true).unwrap();
        assert_eq!(vis.read_bound(), ReadBound::Before(RecordId::new(5)));

        vis.remove_uncommitted(RecordId::new(6));
        assert_eq!(vis.read_bound(), ReadBound::Before(RecordId::new(5)));

        vis.remove_uncommitted(RecordId::new(5));
        assert_eq!(vis.read_bound(), ReadBound::Through(RecordId::new(6)));
        assert!(ReadBound::Through(RecordId::new(6)).allows(RecordId::new(6)));
        assert!(!ReadBound::Before(RecordId::new(6)).allows(RecordId::new(6)));
    }

    #[test]
    fn oplog_ids_must_increase() {
        let vis = Visibility::new(RecordId::new(10));

        assert!(vis.add_uncommitted(RecordId::new(10), true).is_err());
        assert!(vis.add_uncommitted(RecordId::new(3), false).is_ok());
    }

    #[tokio::test]
    async fn wait_returns_once_earlier_ids_drain() {
        // -- setup --
        let vis = Arc::new(Visibility::new(RecordId::null()));
        vis.add_uncommitted(RecordId::new(1), true).unwrap();
        let ctx = OperationContext::new();

        let waiter_vis = vis.clone();
        let waiter_ctx = ctx.clone();
        let waiter = tokio::spawn(async move {
            waiter_vis
                .wait_for_all_earlier_writes(&waiter_ctx, Duration::from_secs(10))
                .await
        });

        // -- execute --
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Reserved after the wait began, so it must not hold the waiter back.
        vis.add_uncommitted(RecordId::new(2), true).unwrap();
        vis.remove_uncommitted(RecordId::new(1));

        // -- verify --
        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn wait_honours_interrupt() {
        let vis = Arc::new(Visibility::new(RecordId::null()));
        vis.add_uncommitted(RecordId::new(1), true).unwrap();
        let ctx = OperationContext::new();

        let waiter_vis = vis.clone();
        let waiter_ctx = ctx.clone();
        let waiter = tokio::spawn(async move {
            waiter_vis
                .wait_for_all_earlier_writes(&waiter_ctx, Duration::from_secs(10))
                .await
        });
        ctx.interrupt();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(result, Err(StorageError::Interrupted));
    }
}
