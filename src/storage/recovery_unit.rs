/// Change is a deferred action attached to a unit of work. Exactly one of `commit` or `rollback`
/// runs, after the unit resolves.
pub trait Change: Send {
    fn commit(self: Box<Self>);
    fn rollback(self: Box<Self>);
}

struct OnCommit<F: FnOnce() + Send>(F);

impl<F: FnOnce() + Send> Change for OnCommit<F> {
    fn commit(self: Box<Self>) {
        (self.0)()
    }

    fn rollback(self: Box<Self>) {}
}

struct OnRollback<F: FnOnce() + Send>(F);

impl<F: FnOnce() + Send> Change for OnRollback<F> {
    fn commit(self: Box<Self>) {}

    fn rollback(self: Box<Self>) {
        (self.0)()
    }
}

/// RecoveryUnit is the transaction handle passed to every storage write.
///
/// Writes are applied to the in-memory engine as they happen; each write registers a Change that
/// either finalizes its side effects (visibility, stone accounting) on commit or undoes the write
/// on rollback. Commit runs changes in registration order, rollback in reverse order. A unit that
/// is dropped without committing rolls back.
pub struct RecoveryUnit {
    changes: Vec<Box<dyn Change>>,
}

impl RecoveryUnit {
    pub fn new() -> Self {
        RecoveryUnit { changes: Vec::new() }
    }

    pub fn register_change(&mut self, change: Box<dyn Change>) {
        self.changes.push(change);
    }

    pub fn on_commit<F: FnOnce() + Send + 'static>(&mut self, f: F) {
        self.register_change(Box::new(OnCommit(f)));
    }

    pub fn on_rollback<F: FnOnce() + Send + 'static>(&mut self, f: F) {
        self.register_change(Box::new(OnRollback(f)));
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn commit(mut self) {
        for change in self.changes.drain(..) {
            change.commit();
        }
    }

    pub fn abort(mut self) {
        self.rollback_changes();
    }

    fn rollback_changes(&mut self) {
        while let Some(change) = self.changes.pop() {
            change.rollback();
        }
    }
}

impl Default for RecoveryUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RecoveryUnit {
    fn drop(&mut self) {
        self.rollback_changes();
    }
}
