use crate::oplog::{OplogEntry, OplogIterator};
use crate::rollback::RollbackError;
use crate::types::{OpTime, RecordId};

/// Walks `local` and `remote` backward in lockstep until an entry with the same timestamp and
/// hash shows up in both. Every local entry newer than that point is handed to `on_local_op`.
///
/// Returns the common point and its record id in the local oplog.
pub async fn find_common_point<F>(
    local: &mut dyn OplogIterator,
    remote: &mut dyn OplogIterator,
    mut on_local_op: F,
) -> Result<(OpTime, RecordId), RollbackError>
where
    F: FnMut(&OplogEntry) -> Result<(), RollbackError> + Send,
{
    let mut local_next = next_local(local).await?;
    let mut remote_next = remote
        .next()
        .await
        .map_err(|e| RollbackError::Source(e.into()))?
        .map(|(entry, _)| entry);

    if remote_next.is_none() {
        return Err(RollbackError::UnrecoverableRollbackError(
            "remote oplog empty or unreadable".to_string(),
        ));
    }

    loop {
        let (local_entry, local_id) = match &local_next {
            Some(next) => next,
            None => {
                return Err(RollbackError::OplogStartMissing(
                    "reached beginning of local oplog before finding a common point".to_string(),
                ))
            }
        };
        let remote_entry = match &remote_next {
            Some(entry) => entry,
            None => {
                return Err(RollbackError::UnrecoverableRollbackError(
                    "reached beginning of remote oplog before finding a common point".to_string(),
                ))
            }
        };

        if local_entry.ts == remote_entry.ts {
            if local_entry.h == remote_entry.h {
                return Ok((local_entry.op_time(), *local_id));
            }
            on_local_op(local_entry)?;
            local_next = next_local(local).await?;
            remote_next = next_remote(remote).await?;
        } else if local_entry.ts > remote_entry.ts {
            on_local_op(local_entry)?;
            local_next = next_local(local).await?;
        } else {
            remote_next = next_remote(remote).await?;
        }
    }
}

async fn next_local(iter: &mut dyn OplogIterator) -> Result<Option<(OplogEntry, RecordId)>, RollbackError> {
    iter.next().await.map_err(RollbackError::LocalOplog)
}

async fn next_remote(iter: &mut dyn OplogIterator) -> Result<Option<OplogEntry>, RollbackError> {
    Ok(iter
        .next()
        .await
        .map_err(|e| RollbackError::Source(e.into()))?
        .map(|(entry, _)| entry))
}
