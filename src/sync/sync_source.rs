use crate::replica::{CoordinatorStatus, LoopbackNetwork, MemberState};
use crate::rollback::RollbackSource;
use crate::server::{GrpcConnectionPool, RemoteRollbackSource};
use crate::sync::SyncError;
use crate::types::HostAndPort;
use tokio::time::Duration;

/// Picks the freshest healthy member that is no further than `max_lag` behind the newest optime
/// this node knows of.
pub(crate) fn choose_sync_source(status: &CoordinatorStatus, max_lag: Duration) -> Option<HostAndPort> {
    let newest = status
        .members
        .iter()
        .map(|m| m.last_applied)
        .chain(std::iter::once(status.my_last_applied))
        .max()?;
    let lag = max_lag.as_secs();

    status
        .members
        .iter()
        .filter(|m| Some(m.member_id) != status.self_id)
        .filter(|m| m.up && matches!(m.state, MemberState::Primary | MemberState::Secondary))
        .filter(|m| u64::from(newest.timestamp().secs().saturating_sub(m.last_applied.timestamp().secs())) <= lag)
        .max_by_key(|m| m.last_applied)
        .map(|m| m.host.clone())
}

/// How a node reads another member's oplog.
pub(crate) enum SyncSourceConnector {
    Grpc {
        pool: GrpcConnectionPool,
        rpc_timeout: Duration,
    },
    Loopback {
        network: LoopbackNetwork,
        self_host: HostAndPort,
    },
}

impl SyncSourceConnector {
    pub(crate) fn connect(&self, host: &HostAndPort) -> Result<Box<dyn RollbackSource>, SyncError> {
        match self {
            SyncSourceConnector::Grpc { pool, rpc_timeout } => Ok(Box::new(RemoteRollbackSource::new(
                pool.clone(),
                host.clone(),
                *rpc_timeout,
            ))),
            SyncSourceConnector::Loopback { network, self_host } => {
                Ok(Box::new(network.sync_source(self_host, host)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::MemberProgress;
    use crate::types::{OpTime, Term, Timestamp};

    fn member(id: i64, state: MemberState, up: bool, secs: u32) -> MemberProgress {
        let mut m = MemberProgress::new(id, HostAndPort::new("h", 27017 + id as u16));
        m.state = state;
        m.up = up;
        m.last_applied = OpTime::new(Timestamp::new(secs, 1), Term::new(1));
        m
    }

    fn status(my_secs: u32, members: Vec<MemberProgress>) -> CoordinatorStatus {
        CoordinatorStatus {
            set_name: Some("rs".to_string()),
            self_id: Some(0),
            state: MemberState::Secondary,
            is_draining: false,
            election_in_progress: false,
            maintenance_count: 0,
            term: Term::new(1),
            config_version: 1,
            primary_id: None,
            commit_point: OpTime::null(),
            my_last_applied: OpTime::new(Timestamp::new(my_secs, 1), Term::new(1)),
            my_last_durable: OpTime::null(),
            committed_snapshot_op_time: OpTime::null(),
            step_down_until: None,
            members,
        }
    }

    #[test]
    fn picks_the_freshest_healthy_member_other_than_self() {
        let status = status(
            100,
            vec![
                member(0, MemberState::Secondary, true, 100),
                member(1, MemberState::Secondary, true, 90),
                member(2, MemberState::Primary, true, 95),
                member(3, MemberState::Secondary, false, 99),
                member(4, MemberState::Rollback, true, 98),
            ],
        );

        let chosen = choose_sync_source(&status, Duration::from_secs(30));

        assert_eq!(chosen, Some(HostAndPort::new("h", 27019)));
    }

    #[test]
    fn members_too_far_behind_are_skipped() {
        let status = status(100, vec![member(1, MemberState::Secondary, true, 50)]);

        assert_eq!(choose_sync_source(&status, Duration::from_secs(30)), None);
        assert!(choose_sync_source(&status, Duration::from_secs(60)).is_some());
    }
}
