//! Retention: pruning finished tasks past their TTL.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::error::{LedgerError, Result};
use super::partitions::encode_meta_key;
use super::store::LedgerStore;

/// Metadata key holding the RFC 3339 time of the last prune
pub const META_LAST_PRUNE: &str = "last_prune";

/// Pruning statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneStats {
    pub tasks_pruned: usize,
    pub chunks_pruned: usize,
    pub reservations_pruned: usize,
    pub slots_released: usize,
}

impl LedgerStore {
    /// Prune finished tasks older than `ttl_days`
    pub fn prune_expired(&self, ttl_days: u32) -> Result<PruneStats> {
        let cutoff = Self::now() - TimeDelta::days(i64::from(ttl_days));
        self.prune_finished_before(cutoff)
    }

    /// Delete every terminal task whose `finished_at` is before `cutoff`,
    /// cascading to its chunks, reservations and job tokens.
    pub fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> Result<PruneStats> {
        info!(%cutoff, "Starting pruning process");
        let mut stats = PruneStats::default();

        for task in self.list_tasks()? {
            let expired = task.is_terminal() && task.finished_at().is_some_and(|at| at < cutoff);
            if !expired {
                continue;
            }

            match self.delete_task(&task.task_id) {
                Ok(deleted) => {
                    stats.tasks_pruned += 1;
                    stats.chunks_pruned += deleted.chunks_removed;
                    stats.reservations_pruned += deleted.reservations_removed;
                    stats.slots_released += deleted.slots_released;
                }
                // Deleted concurrently
                Err(LedgerError::TaskNotFound(_)) => {
                    debug!(task_id = %task.task_id, "Task vanished during pruning");
                }
                Err(err) => return Err(err),
            }
        }

        self.metadata.insert(
            encode_meta_key(META_LAST_PRUNE),
            Self::now().to_rfc3339().into_bytes(),
        )?;
        self.persist()?;

        info!("Pruning complete: {:?}", stats);
        Ok(stats)
    }

    /// When pruning last completed, if ever
    pub fn last_prune(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .read_meta(META_LAST_PRUNE)?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|at| at.with_timezone(&Utc)))
    }
}
