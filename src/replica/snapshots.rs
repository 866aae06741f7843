use crate::types::OpTime;
use std::collections::BTreeMap;

/// Names order snapshots by creation. A writer reserves a name before writing so any snapshot
/// created afterwards is known to contain the write.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SnapshotName(u64);

impl SnapshotName {
    pub fn new(name: u64) -> Self {
        SnapshotName(name)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Snapshot {
    pub op_time: OpTime,
    pub name: SnapshotName,
}

/// SnapshotManager keeps the uncommitted snapshots in name order and the newest one a commit
/// point has covered.
#[derive(Debug, Default)]
pub struct SnapshotManager {
    next_name: u64,
    uncommitted: BTreeMap<SnapshotName, OpTime>,
    committed: Option<Snapshot>,
}

impl SnapshotManager {
    pub fn new() -> Self {
        SnapshotManager {
            next_name: 1,
            ..Default::default()
        }
    }

    pub fn reserve_snapshot_name(&mut self) -> SnapshotName {
        let name = SnapshotName(self.next_name);
        self.next_name += 1;
        name
    }

    /// Snapshots that arrive out of name order, or older than the committed one, are dropped.
    pub fn create_snapshot(&mut self, op_time: OpTime, name: SnapshotName, commit_point: OpTime) {
        if let Some(committed) = &self.committed {
            if name <= committed.name {
                return;
            }
        }
        if let Some((last_name, last_op_time)) = self.uncommitted.iter().next_back() {
            if name <= *last_name || op_time < *last_op_time {
                return;
            }
        }
        self.uncommitted.insert(name, op_time);
        self.update_committed_snapshot(commit_point);
    }

    /// Promotes the newest snapshot at or below `commit_point`. Returns true if the committed
    /// snapshot moved.
    pub fn update_committed_snapshot(&mut self, commit_point: OpTime) -> bool {
        let newest = self
            .uncommitted
            .iter()
            .take_while(|(_, op_time)| **op_time <= commit_point)
            .last()
            .map(|(name, op_time)| Snapshot {
                op_time: *op_time,
                name: *name,
            });
        match newest {
            Some(snapshot) => {
                self.uncommitted = self.uncommitted.split_off(&SnapshotName(snapshot.name.0 + 1));
                self.committed = Some(snapshot);
                true
            }
            None => false,
        }
    }

    pub fn current_committed_snapshot(&self) -> Option<Snapshot> {
        self.committed
    }

    pub fn current_committed_snapshot_op_time(&self) -> OpTime {
        self.committed.map(|s| s.op_time).unwrap_or_default()
    }

    pub fn drop_all_snapshots(&mut self) {
        self.uncommitted.clear();
        self.committed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Term, Timestamp};

    fn op(secs: u32) -> OpTime {
        OpTime::new(Timestamp::new(secs, 0), Term::new(1))
    }

    #[test]
    fn committed_snapshot_trails_commit_point() {
        let mut manager = SnapshotManager::new();
        let a = manager.reserve_snapshot_name();
        let b = manager.reserve_snapshot_name();
        let c = manager.reserve_snapshot_name();
        assert!(a < b && b < c);

        manager.create_snapshot(op(1), a, OpTime::null());
        manager.create_snapshot(op(2), b, OpTime::null());
        manager.create_snapshot(op(3), c, OpTime::null());
        assert_eq!(manager.current_committed_snapshot(), None);

        assert!(manager.update_committed_snapshot(op(2)));
        assert_eq!(manager.current_committed_snapshot(), Some(Snapshot { op_time: op(2), name: b }));
        assert_eq!(manager.current_committed_snapshot_op_time(), op(2));

        // Same commit point again changes nothing.
        assert!(!manager.update_committed_snapshot(op(2)));

        manager.create_snapshot(op(4), SnapshotName::new(4), op(5));
        assert_eq!(manager.current_committed_snapshot_op_time(), op(4));
    }

    #[test]
    fn drop_all_resets() {
        let mut manager = SnapshotManager::new();
        let name = manager.reserve_snapshot_name();
        manager.create_snapshot(op(1), name, op(1));
        assert_eq!(manager.current_committed_snapshot_op_time(), op(1));

        manager.drop_all_snapshots();
        assert_eq!(manager.current_committed_snapshot(), None);
        assert_eq!(manager.current_committed_snapshot_op_time(), OpTime::null());
    }
}
