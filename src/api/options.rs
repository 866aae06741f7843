use crate::pool::{ConnectionPoolOptions, ConnectionPoolOptionsValidated};
use std::convert::TryFrom;
use std::path::PathBuf;
use tokio::time::Duration;

/// Node-level knobs. Settings carried by the replica set config take precedence over these.
#[derive(Clone, Default)]
pub struct ReplicationOptions {
    pub election_timeout: Option<Duration>,
    pub heartbeat_interval: Option<Duration>,
    pub max_sync_source_lag: Option<Duration>,
    pub write_concern_majority_journal_default: Option<bool>,
    /// Fraction of the election timeout added at random to each election timer.
    pub election_timeout_offset_limit: Option<f64>,
    pub rpc_timeout: Option<Duration>,
    pub oplog_size_bytes: Option<i64>,
    /// Rollback save files go under `<db_path>/rollback`.
    pub db_path: Option<PathBuf>,
    /// Pause between oplog fetch passes on a secondary. Zero turns the background loop off.
    pub sync_interval: Option<Duration>,
    /// Most entries applied in one fetch pass.
    pub sync_batch_limit: Option<usize>,
    pub connection_pool: ConnectionPoolOptions,
}

pub(crate) struct ReplicationOptionsValidated {
    pub election_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub max_sync_source_lag: Duration,
    pub write_concern_majority_journal_default: bool,
    pub election_timeout_offset_limit: f64,
    pub rpc_timeout: Duration,
    pub oplog_size_bytes: i64,
    pub db_path: PathBuf,
    pub sync_interval: Option<Duration>,
    pub sync_batch_limit: usize,
    pub connection_pool: ConnectionPoolOptionsValidated,
}

impl ReplicationOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.heartbeat_interval >= self.election_timeout {
            return Err("Heartbeat interval must be shorter than the election timeout");
        }
        if !(0.0..=1.0).contains(&self.election_timeout_offset_limit) {
            return Err("Election timeout offset limit must be a fraction between 0 and 1");
        }
        if self.rpc_timeout == Duration::from_secs(0) {
            return Err("RPC timeout must be positive");
        }
        if self.oplog_size_bytes <= 0 {
            return Err("Oplog size must be positive");
        }
        if self.sync_batch_limit == 0 {
            return Err("Sync batch limit must be positive");
        }

        Ok(())
    }
}

impl TryFrom<ReplicationOptions> for ReplicationOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ReplicationOptions) -> Result<Self, Self::Error> {
        let values = ReplicationOptionsValidated {
            election_timeout: options.election_timeout.unwrap_or(Duration::from_secs(10)),
            heartbeat_interval: options.heartbeat_interval.unwrap_or(Duration::from_secs(2)),
            max_sync_source_lag: options.max_sync_source_lag.unwrap_or(Duration::from_secs(30)),
            write_concern_majority_journal_default: options.write_concern_majority_journal_default.unwrap_or(true),
            election_timeout_offset_limit: options.election_timeout_offset_limit.unwrap_or(0.15),
            rpc_timeout: options.rpc_timeout.unwrap_or(Duration::from_secs(10)),
            oplog_size_bytes: options.oplog_size_bytes.unwrap_or(192 << 20),
            db_path: options.db_path.unwrap_or_else(std::env::temp_dir),
            sync_interval: match options.sync_interval {
                Some(interval) if interval == Duration::from_secs(0) => None,
                Some(interval) => Some(interval),
                None => Some(Duration::from_secs(1)),
            },
            sync_batch_limit: options.sync_batch_limit.unwrap_or(1000),
            connection_pool: ConnectionPoolOptionsValidated::try_from(options.connection_pool)?,
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = ReplicationOptionsValidated::try_from(ReplicationOptions::default()).unwrap();

        assert_eq!(options.election_timeout, Duration::from_secs(10));
        assert_eq!(options.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(options.max_sync_source_lag, Duration::from_secs(30));
        assert!(options.write_concern_majority_journal_default);
        assert_eq!(options.rpc_timeout, Duration::from_secs(10));
        assert_eq!(options.sync_interval, Some(Duration::from_secs(1)));
        assert_eq!(options.sync_batch_limit, 1000);
    }

    #[test]
    fn zero_sync_interval_disables_the_loop() {
        let options = ReplicationOptionsValidated::try_from(ReplicationOptions {
            sync_interval: Some(Duration::from_secs(0)),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(options.sync_interval, None);
    }

    #[test]
    fn rejects_bad_relationships() {
        let cases: Vec<ReplicationOptions> = vec![
            ReplicationOptions {
                heartbeat_interval: Some(Duration::from_secs(10)),
                ..Default::default()
            },
            ReplicationOptions {
                election_timeout_offset_limit: Some(1.5),
                ..Default::default()
            },
            ReplicationOptions {
                rpc_timeout: Some(Duration::from_secs(0)),
                ..Default::default()
            },
            ReplicationOptions {
                oplog_size_bytes: Some(0),
                ..Default::default()
            },
            ReplicationOptions {
                sync_batch_limit: Some(0),
                ..Default::default()
            },
        ];

        for options in cases {
            assert!(ReplicationOptionsValidated::try_from(options).is_err());
        }
    }
}
