use crate::replica::config::{ReplicaSetConfig, TagPattern};
use crate::replica::MemberState;
use crate::types::{HostAndPort, OpTime};
use std::collections::{BTreeMap, HashSet};
use tokio::time::Instant;

/// What this node knows about one member's replication.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberProgress {
    pub member_id: i64,
    pub host: HostAndPort,
    pub last_applied: OpTime,
    pub last_durable: OpTime,
    pub up: bool,
    pub state: MemberState,
    pub last_heartbeat: Option<Instant>,
}

impl MemberProgress {
    pub(crate) fn new(member_id: i64, host: HostAndPort) -> Self {
        MemberProgress {
            member_id,
            host,
            last_applied: OpTime::null(),
            last_durable: OpTime::null(),
            up: false,
            state: MemberState::Unknown,
            last_heartbeat: None,
        }
    }

    /// Members rolling back or still in initial sync cannot acknowledge writes, whatever
    /// position they last reported.
    fn can_acknowledge(&self) -> bool {
        !matches!(self.state, MemberState::Rollback | MemberState::Startup2)
    }

    fn op_time(&self, durable: bool) -> OpTime {
        if durable {
            self.last_durable
        } else {
            self.last_applied
        }
    }
}

/// ProgressMap tracks every member of the current config, including this node. It is only ever
/// touched from the coordinator's event loop.
#[derive(Debug, Default)]
pub struct ProgressMap {
    members: BTreeMap<i64, MemberProgress>,
}

impl ProgressMap {
    pub fn new() -> Self {
        ProgressMap::default()
    }

    /// Re-keys the map to `config`'s members, keeping what is known about members that survive.
    pub fn reset_for_config(&mut self, config: &ReplicaSetConfig, self_id: Option<i64>) {
        let mut members = BTreeMap::new();
        for member in config.members() {
            let mut progress = self
                .members
                .remove(&member.id)
                .unwrap_or_else(|| MemberProgress::new(member.id, member.host.clone()));
            progress.host = member.host.clone();
            if Some(member.id) == self_id {
                progress.up = true;
            }
            members.insert(member.id, progress);
        }
        self.members = members;
    }

    pub fn get(&self, member_id: i64) -> Option<&MemberProgress> {
        self.members.get(&member_id)
    }

    pub fn get_mut(&mut self, member_id: i64) -> Option<&mut MemberProgress> {
        self.members.get_mut(&member_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemberProgress> {
        self.members.values()
    }

    /// Moves `last_applied` forward only. Returns true if it changed.
    pub fn advance_applied(&mut self, member_id: i64, op_time: OpTime) -> bool {
        match self.members.get_mut(&member_id) {
            Some(p) if op_time > p.last_applied => {
                p.last_applied = op_time;
                true
            }
            _ => false,
        }
    }

    /// Moves `last_durable` forward only. Returns true if it changed.
    pub fn advance_durable(&mut self, member_id: i64, op_time: OpTime) -> bool {
        match self.members.get_mut(&member_id) {
            Some(p) if op_time > p.last_durable => {
                p.last_durable = op_time;
                true
            }
            _ => false,
        }
    }

    /// Overwrites this node's own entry, which may move backwards after a rollback.
    pub fn set_self(&mut self, member_id: i64, applied: OpTime, durable: OpTime) {
        if let Some(p) = self.members.get_mut(&member_id) {
            p.last_applied = applied;
            p.last_durable = durable;
        }
    }

    /// Number of data-bearing members that have reached `op_time`.
    pub fn num_reached(&self, config: &ReplicaSetConfig, op_time: OpTime, durable: bool) -> usize {
        self.members
            .values()
            .filter(|p| p.can_acknowledge() && p.op_time(durable) >= op_time)
            .filter(|p| config.member_by_id(p.member_id).map_or(false, |m| m.is_data_bearing()))
            .count()
    }

    /// Number of voting, data-bearing members that have reached `op_time`.
    pub fn num_voters_reached(&self, config: &ReplicaSetConfig, op_time: OpTime, durable: bool) -> usize {
        self.members
            .values()
            .filter(|p| p.can_acknowledge() && p.op_time(durable) >= op_time)
            .filter(|p| {
                config
                    .member_by_id(p.member_id)
                    .map_or(false, |m| m.is_voter() && m.is_data_bearing())
            })
            .count()
    }

    pub fn tag_pattern_satisfied(
        &self,
        config: &ReplicaSetConfig,
        pattern: &TagPattern,
        op_time: OpTime,
        durable: bool,
    ) -> bool {
        pattern.iter().all(|(tag, required)| {
            let values: HashSet<&String> = self
                .members
                .values()
                .filter(|p| p.can_acknowledge() && p.op_time(durable) >= op_time)
                .filter_map(|p| config.member_by_id(p.member_id))
                .filter_map(|m| m.tags.get(tag))
                .collect();
            values.len() >= *required
        })
    }

    /// The greatest optime a write majority of voting, data-bearing members has applied.
    pub fn majority_applied(&self, config: &ReplicaSetConfig) -> Option<OpTime> {
        let mut applied: Vec<OpTime> = self
            .members
            .values()
            .filter(|p| {
                config
                    .member_by_id(p.member_id)
                    .map_or(false, |m| m.is_voter() && m.is_data_bearing())
            })
            .map(|p| if p.can_acknowledge() { p.last_applied } else { OpTime::null() })
            .collect();
        let majority = config.write_majority();
        if majority == 0 || applied.len() < majority {
            return None;
        }
        applied.sort_unstable_by(|a, b| b.cmp(a));
        Some(applied[majority - 1])
    }

    /// Voting members currently considered up. This node counts itself.
    pub fn num_voters_up(&self, config: &ReplicaSetConfig) -> usize {
        self.members
            .values()
            .filter(|p| p.up)
            .filter(|p| config.member_by_id(p.member_id).map_or(false, |m| m.is_voter()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::config::tests::{config_doc, member};
    use crate::types::{Document, Term, Timestamp};

    fn op(secs: u32) -> OpTime {
        OpTime::new(Timestamp::new(secs, 1), Term::new(1))
    }

    fn three_node_config() -> ReplicaSetConfig {
        ReplicaSetConfig::parse(&config_doc(vec![
            member(0, "a:1").with("tags", Document::new().with("dc", "east")),
            member(1, "b:1").with("tags", Document::new().with("dc", "west")),
            member(2, "c:1").with("tags", Document::new().with("dc", "east")),
        ]))
        .unwrap()
    }

    #[test]
    fn progress_only_moves_forward() {
        let config = three_node_config();
        let mut progress = ProgressMap::new();
        progress.reset_for_config(&config, Some(0));

        assert!(progress.advance_applied(1, op(10)));
        assert!(!progress.advance_applied(1, op(5)));
        assert_eq!(progress.get(1).unwrap().last_applied, op(10));
        assert!(!progress.advance_applied(9, op(10)));
    }

    #[test]
    fn majority_applied_is_the_median_for_three() {
        let config = three_node_config();
        let mut progress = ProgressMap::new();
        progress.reset_for_config(&config, Some(0));
        progress.set_self(0, op(30), op(30));
        progress.advance_applied(1, op(20));
        progress.advance_applied(2, op(10));

        assert_eq!(progress.majority_applied(&config), Some(op(20)));
        assert_eq!(progress.num_reached(&config, op(20), false), 2);
        assert_eq!(progress.num_reached(&config, op(20), true), 1);
    }

    #[test]
    fn tag_patterns_count_distinct_values() {
        let config = three_node_config();
        let mut progress = ProgressMap::new();
        progress.reset_for_config(&config, Some(0));
        progress.set_self(0, op(30), op(30));
        progress.advance_applied(2, op(30));
        let mut pattern = TagPattern::new();
        pattern.insert("dc".into(), 2);

        // Two acks, both in "east".
        assert!(!progress.tag_pattern_satisfied(&config, &pattern, op(30), false));

        progress.advance_applied(1, op(30));
        assert!(progress.tag_pattern_satisfied(&config, &pattern, op(30), false));
    }

    #[test]
    fn rolling_back_members_do_not_acknowledge() {
        let config = three_node_config();
        let mut progress = ProgressMap::new();
        progress.reset_for_config(&config, Some(0));
        progress.set_self(0, op(30), op(30));
        progress.advance_applied(1, op(30));
        progress.get_mut(1).unwrap().state = MemberState::Rollback;
        progress.advance_applied(2, op(30));
        progress.get_mut(2).unwrap().state = MemberState::Startup2;

        assert_eq!(progress.num_voters_reached(&config, op(30), false), 1);
        assert_eq!(progress.num_reached(&config, op(30), false), 1);
        assert_eq!(progress.majority_applied(&config), Some(OpTime::null()));

        progress.get_mut(1).unwrap().state = MemberState::Secondary;
        assert_eq!(progress.num_voters_reached(&config, op(30), false), 2);
        assert_eq!(progress.majority_applied(&config), Some(op(30)));
    }

    #[test]
    fn reconfig_keeps_surviving_members() {
        let config = three_node_config();
        let mut progress = ProgressMap::new();
        progress.reset_for_config(&config, Some(0));
        progress.advance_applied(1, op(7));

        let smaller = ReplicaSetConfig::parse(&config_doc(vec![member(0, "a:1"), member(1, "b:1")])).unwrap();
        progress.reset_for_config(&smaller, Some(0));

        assert_eq!(progress.get(1).unwrap().last_applied, op(7));
        assert!(progress.get(2).is_none());
        assert!(progress.get(0).unwrap().up);
    }
}
