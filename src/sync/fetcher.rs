use crate::oplog::OplogEntry;
use crate::rollback::{RollbackSource, RollbackSourceError};
use crate::sync::SyncError;

/// Returns the entries `source` has after `last`, oldest first and at most `limit` of them.
///
/// The source's oplog is walked newest first until it reaches `last`. Finding a different entry
/// in that place means the histories diverged. A source that runs out before reaching `last` has
/// already truncated past us. A source whose newest entry is older than `last` is behind us and
/// has nothing to offer.
pub async fn fetch_batch(
    source: &dyn RollbackSource,
    last: Option<&OplogEntry>,
    limit: usize,
) -> Result<Vec<OplogEntry>, SyncError> {
    let mut iter = source.oplog().await?;
    let mut newer = Vec::new();

    loop {
        let entry = match iter.next().await.map_err(RollbackSourceError::from)? {
            Some((entry, _)) => entry,
            None => {
                return match last {
                    Some(last) if !newer.is_empty() => Err(SyncError::OplogStartMissing(last.op_time())),
                    _ => Ok(oldest_first(newer, limit)),
                };
            }
        };

        let last = match last {
            Some(last) if entry.op_time() <= last.op_time() => last,
            _ => {
                newer.push(entry);
                continue;
            }
        };

        if entry.op_time() == last.op_time() && entry.h == last.h {
            return Ok(oldest_first(newer, limit));
        }
        if newer.is_empty() && entry.op_time() < last.op_time() {
            return Ok(Vec::new());
        }
        return Err(SyncError::Diverged {
            ours: last.op_time(),
            theirs: entry.op_time(),
        });
    }
}

fn oldest_first(mut newest_first: Vec<OplogEntry>, limit: usize) -> Vec<OplogEntry> {
    newest_first.reverse();
    newest_first.truncate(limit);
    newest_first
}
