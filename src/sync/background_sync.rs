use crate::actor::WeakCoordinatorClient;
use crate::clock::StopToken;
use crate::replica::MemberState;
use crate::storage::StorageCatalog;
use crate::sync::applier::OplogApplier;
use crate::sync::fetcher::fetch_batch;
use crate::sync::sync_source::{choose_sync_source, SyncSourceConnector};
use crate::sync::SyncError;
use crate::types::{HostAndPort, OpTime, OperationContext};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Duration;

/// What one pass of the sync loop did.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncPass {
    /// Only secondaries pull from a sync source.
    NotSecondary(MemberState),
    NoSyncSource,
    UpToDate(HostAndPort),
    Applied {
        source: HostAndPort,
        entries: usize,
        last_applied: OpTime,
    },
}

/// BackgroundSync keeps a secondary's oplog in step with a sync source. Every pass fetches what
/// the source has past our newest entry, applies it, then moves our applied and durable optimes
/// forward. The coordinator reports the new position to the primary on its own.
pub(crate) struct BackgroundSync {
    logger: slog::Logger,
    coordinator: WeakCoordinatorClient,
    connector: SyncSourceConnector,
    catalog: Arc<StorageCatalog>,
    applier: OplogApplier,
    new_op_lock: Arc<AsyncMutex<()>>,
    max_sync_source_lag: Duration,
    batch_limit: usize,
}

impl BackgroundSync {
    pub(crate) fn new(
        logger: slog::Logger,
        coordinator: WeakCoordinatorClient,
        connector: SyncSourceConnector,
        catalog: Arc<StorageCatalog>,
        new_op_lock: Arc<AsyncMutex<()>>,
        max_sync_source_lag: Duration,
        batch_limit: usize,
    ) -> Self {
        let applier = OplogApplier::new(logger.new(slog::o!("Component" => "OplogApplier")), catalog.clone());
        BackgroundSync {
            logger,
            coordinator,
            connector,
            catalog,
            applier,
            new_op_lock,
            max_sync_source_lag,
            batch_limit,
        }
    }

    pub(crate) fn max_sync_source_lag(&self) -> Duration {
        self.max_sync_source_lag
    }

    pub(crate) async fn sync_once(&self, ctx: &OperationContext) -> Result<SyncPass, SyncError> {
        let coordinator = self.coordinator.upgrade().ok_or(SyncError::ShutdownInProgress)?;
        let status = coordinator.status().await;
        if status.state != MemberState::Secondary {
            return Ok(SyncPass::NotSecondary(status.state));
        }
        let host = match choose_sync_source(&status, self.max_sync_source_lag) {
            Some(host) => host,
            None => return Ok(SyncPass::NoSyncSource),
        };
        let source = self.connector.connect(&host)?;

        let _new_op_guard = self.new_op_lock.lock().await;
        let last = self.catalog.local_oplog().last_entry()?;
        let batch = fetch_batch(source.as_ref(), last.as_ref(), self.batch_limit).await?;
        if batch.is_empty() {
            return Ok(SyncPass::UpToDate(host));
        }

        let snapshot_name = coordinator.reserve_snapshot_name().await;
        let last_applied = self.applier.apply_batch(ctx, &batch)?;
        coordinator.set_my_last_applied_forward(last_applied).await;
        coordinator.set_my_last_durable_forward(last_applied).await;
        coordinator.create_snapshot(last_applied, snapshot_name).await;

        slog::debug!(self.logger, "Applied {} entries from {}", batch.len(), host; "LastApplied" => ?last_applied);
        Ok(SyncPass::Applied {
            source: host,
            entries: batch.len(),
            last_applied,
        })
    }

    /// Runs a pass every `interval` until `stop` fires or the coordinator goes away.
    pub(crate) async fn run(self: Arc<Self>, interval: Duration, mut stop: StopToken) {
        slog::info!(self.logger, "Background sync started"; "Interval" => ?interval);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.stopped() => break,
            }

            match self.sync_once(&OperationContext::new()).await {
                Ok(SyncPass::Applied { .. }) | Ok(SyncPass::UpToDate(_)) | Ok(SyncPass::NotSecondary(_)) => {}
                Ok(SyncPass::NoSyncSource) => slog::debug!(self.logger, "No sync source available"),
                Err(SyncError::ShutdownInProgress) => break,
                Err(e) if e.needs_rollback() => {
                    slog::warn!(self.logger, "Oplog diverged from the sync source, rollback required: {}", e)
                }
                Err(e) => slog::warn!(self.logger, "Sync pass failed: {}", e),
            }
        }
        slog::info!(self.logger, "Background sync stopped");
    }
}
