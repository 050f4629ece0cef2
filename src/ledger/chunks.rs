//! Chunk claiming and execution transitions.

use fjall::WriteTransaction;
use tracing::{debug, info, warn};

use crate::model::{Chunk, ChunkState, TaskState};

use super::error::{LedgerError, Result};
use super::partitions::{encode_chunk_key, encode_chunk_prefix};
use super::records::ChunkRow;
use super::store::{LedgerStore, decode_rows, decode_value};

/// Result of a claim attempt.
///
/// Losing the race, or finding the task already finished, is an expected
/// outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Chunk),
    LostRace { state: ChunkState },
    TaskFinished { state: TaskState },
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed(_))
    }
}

/// How a running chunk ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Succeeded,
    Failed { reason: String },
}

impl LedgerStore {
    pub fn get_chunk(&self, task_id: &str, chunk_index: u32) -> Result<Option<Chunk>> {
        let row: Option<ChunkRow> =
            decode_value(self.chunks.get(encode_chunk_key(task_id, chunk_index))?)?;
        Ok(row.map(Chunk::try_from).transpose()?)
    }

    /// Chunks of a task in index order
    pub fn list_chunks(&self, task_id: &str) -> Result<Vec<Chunk>> {
        let tx = self.keyspace.read_tx();
        let rows: Vec<ChunkRow> = decode_rows(tx.prefix(&self.chunks, encode_chunk_prefix(task_id)))?;
        rows.into_iter()
            .map(|row| Chunk::try_from(row).map_err(LedgerError::from))
            .collect()
    }

    /// Move a chunk from `Pending` to `ResourceCreating`.
    ///
    /// Of any number of concurrent callers exactly one sees `Claimed`.
    pub fn claim_chunk(&self, task_id: &str, chunk_index: u32) -> Result<ClaimOutcome> {
        let mut tx = self.keyspace.write_tx();
        let mut chunk = self.load_chunk_tx(&mut tx, task_id, chunk_index)?;
        let task = self.load_task_tx(&mut tx, task_id)?;
        if task.is_terminal() {
            self.metrics.claim_lost();
            debug!(task_id, chunk_index, task_state = %task.state(), "Claim on finished task");
            return Ok(ClaimOutcome::TaskFinished {
                state: task.state(),
            });
        }
        if chunk.state() != ChunkState::Pending {
            self.metrics.claim_lost();
            debug!(task_id, chunk_index, state = %chunk.state(), "Claim lost");
            return Ok(ClaimOutcome::LostRace {
                state: chunk.state(),
            });
        }

        chunk.claim()?;
        self.save_chunk_tx(&mut tx, &chunk)?;
        tx.commit()?;

        self.metrics.chunk_claimed();
        debug!(task_id, chunk_index, "Chunk claimed");
        Ok(ClaimOutcome::Claimed(chunk))
    }

    /// Give a claim back without counting it as a retry.
    ///
    /// Used when a reservation for the claimed chunk could not be made. Any
    /// job token already issued for the chunk is released.
    pub fn unclaim_chunk(&self, task_id: &str, chunk_index: u32) -> Result<Chunk> {
        let now = Self::now();
        let mut tx = self.keyspace.write_tx();
        self.ensure_task_open_tx(&mut tx, task_id)?;
        let mut chunk = self.load_chunk_tx(&mut tx, task_id, chunk_index)?;
        chunk.requeue()?;
        let released = self.release_jobs_tx(&mut tx, task_id, Some(chunk_index), now)?;
        self.save_chunk_tx(&mut tx, &chunk)?;
        tx.commit()?;

        self.metrics.job_slots_released(released);
        debug!(task_id, chunk_index, released, "Chunk unclaimed");
        Ok(chunk)
    }

    /// Record that the chunk's compute resource is up and the chunk runs.
    pub fn start_chunk(&self, task_id: &str, chunk_index: u32, resource_info: &str) -> Result<Chunk> {
        let now = Self::now();
        let mut tx = self.keyspace.write_tx();
        let mut chunk = self.load_chunk_tx(&mut tx, task_id, chunk_index)?;
        chunk.start(resource_info, now)?;
        self.save_chunk_tx(&mut tx, &chunk)?;
        tx.commit()?;

        debug!(task_id, chunk_index, "Chunk started");
        Ok(chunk)
    }

    /// Finish a running chunk and release its job slot in the same
    /// transaction.
    ///
    /// A failure is also recorded in the owning task's error list.
    pub fn finish_chunk(
        &self,
        task_id: &str,
        chunk_index: u32,
        outcome: ChunkOutcome,
    ) -> Result<Chunk> {
        let now = Self::now();
        let mut tx = self.keyspace.write_tx();
        let mut chunk = self.load_chunk_tx(&mut tx, task_id, chunk_index)?;

        match &outcome {
            ChunkOutcome::Succeeded => chunk.succeed(now)?,
            ChunkOutcome::Failed { reason } => {
                chunk.fail(reason, now)?;
                let mut task = self.load_task_tx(&mut tx, task_id)?;
                if task.record_chunk_error(chunk_index, reason) {
                    self.save_task_tx(&mut tx, &task)?;
                }
            }
        }

        let released = self.release_jobs_tx(&mut tx, task_id, Some(chunk_index), now)?;
        self.save_chunk_tx(&mut tx, &chunk)?;
        tx.commit()?;

        self.metrics.job_slots_released(released);
        match outcome {
            ChunkOutcome::Succeeded => info!(task_id, chunk_index, "Chunk succeeded"),
            ChunkOutcome::Failed { reason } => {
                warn!(task_id, chunk_index, reason = %reason, "Chunk failed")
            }
        }
        Ok(chunk)
    }

    /// Send a chunk back to `Pending` for another attempt.
    ///
    /// Increments `retry_times` (saturating) and releases the chunk's job
    /// slot.
    pub fn requeue_chunk(&self, task_id: &str, chunk_index: u32) -> Result<Chunk> {
        let now = Self::now();
        let mut tx = self.keyspace.write_tx();
        self.ensure_task_open_tx(&mut tx, task_id)?;
        let mut chunk = self.load_chunk_tx(&mut tx, task_id, chunk_index)?;
        chunk.requeue()?;
        chunk.retry_times = chunk.retry_times.saturating_add(1);
        let released = self.release_jobs_tx(&mut tx, task_id, Some(chunk_index), now)?;
        self.save_chunk_tx(&mut tx, &chunk)?;
        tx.commit()?;

        self.metrics.job_slots_released(released);
        self.metrics.chunk_requeued();
        info!(task_id, chunk_index, retry_times = chunk.retry_times, "Chunk requeued");
        Ok(chunk)
    }

    /// A finished task's chunks never go back to `Pending`.
    fn ensure_task_open_tx(&self, tx: &mut WriteTransaction, task_id: &str) -> Result<()> {
        let task = self.load_task_tx(tx, task_id)?;
        if task.is_terminal() {
            return Err(LedgerError::TaskFinished {
                task_id: task_id.to_string(),
                state: task.state().as_str(),
            });
        }
        Ok(())
    }
}
