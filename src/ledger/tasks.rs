//! Task submission, lookup and finalization.

use serde::Serialize;
use tracing::{info, warn};

use crate::model::{
    CANCELLED, Chunk, ChunkSpec, ChunkState, NewTask, ReservationState, Task, TaskState,
    aggregate_outcome,
};

use super::error::{LedgerError, Result};
use super::partitions::{
    TASK_PREFIX, encode_chunk_prefix, encode_reservation_prefix, encode_task_key,
};
use super::records::TaskRow;
use super::store::{LedgerStore, decode_rows, decode_value};

/// What a cascading task delete removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteStats {
    pub chunks_removed: usize,
    pub reservations_removed: usize,
    pub slots_released: usize,
}

impl LedgerStore {
    /// Insert a task together with all of its chunks.
    ///
    /// `chunks[i]` becomes chunk `i`. Either every row lands or none does.
    pub fn submit_task(&self, new: NewTask, chunks: Vec<ChunkSpec>) -> Result<Task> {
        let now = Self::now();
        let task = Task::new(new, now)?;

        if task.num_of_chunks > self.max_chunks_per_task {
            return Err(LedgerError::TooManyChunks {
                task_id: task.task_id,
                limit: self.max_chunks_per_task,
            });
        }
        if chunks.len() != usize::from(task.num_of_chunks) {
            return Err(LedgerError::ChunkCountMismatch {
                task_id: task.task_id,
                expected: task.num_of_chunks,
                actual: chunks.len(),
            });
        }

        let mut tx = self.keyspace.write_tx();
        if tx.get(&self.tasks, encode_task_key(&task.task_id))?.is_some() {
            return Err(LedgerError::TaskAlreadyExists(task.task_id));
        }

        self.save_task_tx(&mut tx, &task)?;
        for (index, spec) in (0u32..).zip(chunks) {
            let chunk = Chunk::new(&task.task_id, index, spec, now);
            self.save_chunk_tx(&mut tx, &chunk)?;
        }
        tx.commit()?;

        info!(
            task_id = %task.task_id,
            num_of_chunks = task.num_of_chunks,
            "Task submitted"
        );
        Ok(task)
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let row: Option<TaskRow> = decode_value(self.tasks.get(encode_task_key(task_id))?)?;
        Ok(row.map(Task::try_from).transpose()?)
    }

    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        let tx = self.keyspace.read_tx();
        let rows: Vec<TaskRow> = decode_rows(tx.prefix(&self.tasks, TASK_PREFIX))?;
        rows.into_iter()
            .map(|row| Task::try_from(row).map_err(LedgerError::from))
            .collect()
    }

    /// Mark a pending task as picked up by the scheduler.
    ///
    /// Returns `false` when the task had already left `Pending`.
    pub fn pick_up_task(&self, task_id: &str) -> Result<bool> {
        let now = Self::now();
        let mut tx = self.keyspace.write_tx();
        let mut task = self.load_task_tx(&mut tx, task_id)?;
        if task.state() != TaskState::Pending {
            return Ok(false);
        }

        task.pick_up(now)?;
        self.save_task_tx(&mut tx, &task)?;
        tx.commit()?;

        info!(task_id, "Task picked up");
        Ok(true)
    }

    /// Derive the task outcome from its chunks and finalize it when every
    /// chunk is terminal.
    ///
    /// Returns the task state after the call; a task with chunks in flight is
    /// left untouched.
    pub fn aggregate_task(&self, task_id: &str) -> Result<TaskState> {
        let now = Self::now();
        let mut tx = self.keyspace.write_tx();
        let mut task = self.load_task_tx(&mut tx, task_id)?;
        if task.is_terminal() {
            return Ok(task.state());
        }

        let chunks = self.load_chunks_tx(&mut tx, task_id)?;
        if chunks.len() != usize::from(task.num_of_chunks) {
            return Err(LedgerError::ChunkCountMismatch {
                task_id: task_id.to_string(),
                expected: task.num_of_chunks,
                actual: chunks.len(),
            });
        }

        let Some(outcome) = aggregate_outcome(task.num_of_chunks, chunks.iter().map(Chunk::state))
        else {
            return Ok(task.state());
        };

        let mut failed = 0usize;
        for chunk in chunks.iter().filter(|c| c.state() == ChunkState::Failed) {
            failed += 1;
            let reason = chunk
                .meta()
                .and_then(|m| m.failure_reason)
                .unwrap_or_else(|| "unknown".to_string());
            task.record_chunk_error(chunk.chunk_index, &reason);
        }

        if task.state() == TaskState::Pending && outcome != TaskState::Failed {
            task.pick_up(now)?;
        }
        task.finish(outcome, now)?;
        if outcome == TaskState::Failed {
            task.set_failure_reason(&format!("all {failed} chunks failed"));
        }
        self.save_task_tx(&mut tx, &task)?;

        for mut reservation in self.load_reservations_tx(&mut tx, task_id)? {
            if reservation.status().is_terminal() {
                continue;
            }
            let next = if reservation.status() == ReservationState::Running {
                ReservationState::Finished
            } else {
                reservation.set_failure_reason("task finalized before reservation ran");
                ReservationState::Failed
            };
            reservation.advance(next, now)?;
            self.save_reservation_tx(&mut tx, &reservation)?;
        }

        tx.commit()?;
        self.metrics.task_finalized();
        info!(task_id, outcome = %outcome, failed_chunks = failed, "Task finalized");
        Ok(outcome)
    }

    /// Fail a task and everything still in flight under it.
    ///
    /// Non-terminal chunks fail with the same reason, their job slots are
    /// released and live reservations are marked failed.
    pub fn fail_task(&self, task_id: &str, reason: &str) -> Result<Task> {
        let now = Self::now();
        let mut tx = self.keyspace.write_tx();
        let mut task = self.load_task_tx(&mut tx, task_id)?;
        task.fail(reason, now)?;

        for mut chunk in self.load_chunks_tx(&mut tx, task_id)? {
            if chunk.state().is_terminal() {
                continue;
            }
            chunk.fail(reason, now)?;
            task.record_chunk_error(chunk.chunk_index, reason);
            self.save_chunk_tx(&mut tx, &chunk)?;
        }

        let released = self.release_jobs_tx(&mut tx, task_id, None, now)?;

        for mut reservation in self.load_reservations_tx(&mut tx, task_id)? {
            if reservation.status().is_terminal() {
                continue;
            }
            reservation.set_failure_reason(reason);
            reservation.advance(ReservationState::Failed, now)?;
            self.save_reservation_tx(&mut tx, &reservation)?;
        }

        self.save_task_tx(&mut tx, &task)?;
        tx.commit()?;

        self.metrics.job_slots_released(released);
        self.metrics.task_finalized();
        warn!(task_id, reason, released, "Task failed");
        Ok(task)
    }

    pub fn cancel_task(&self, task_id: &str) -> Result<Task> {
        self.fail_task(task_id, CANCELLED)
    }

    /// Attach output locations to a succeeded task.
    pub fn set_task_output(&self, task_id: &str, cdn_addr: &str, output_addr: &str) -> Result<Task> {
        let mut tx = self.keyspace.write_tx();
        let mut task = self.load_task_tx(&mut tx, task_id)?;
        task.set_output(cdn_addr, output_addr)?;
        self.save_task_tx(&mut tx, &task)?;
        tx.commit()?;
        Ok(task)
    }

    /// Bump the task-level retry counter, saturating at `u8::MAX`.
    pub fn increment_task_retry(&self, task_id: &str) -> Result<u8> {
        let mut tx = self.keyspace.write_tx();
        let mut task = self.load_task_tx(&mut tx, task_id)?;
        task.retry_times = task.retry_times.saturating_add(1);
        self.save_task_tx(&mut tx, &task)?;
        tx.commit()?;
        Ok(task.retry_times)
    }

    /// Remove a task, its chunks, its reservations and every job token it
    /// still holds.
    pub fn delete_task(&self, task_id: &str) -> Result<DeleteStats> {
        let now = Self::now();
        let mut tx = self.keyspace.write_tx();
        let task_key = encode_task_key(task_id);
        if tx.get(&self.tasks, &task_key)?.is_none() {
            return Err(LedgerError::TaskNotFound(task_id.to_string()));
        }

        let chunk_keys = collect_keys(tx.prefix(&self.chunks, encode_chunk_prefix(task_id)))?;
        let reservation_keys =
            collect_keys(tx.prefix(&self.reservations, encode_reservation_prefix(task_id)))?;

        let stats = DeleteStats {
            chunks_removed: chunk_keys.len(),
            reservations_removed: reservation_keys.len(),
            slots_released: self.release_jobs_tx(&mut tx, task_id, None, now)?,
        };

        for key in chunk_keys {
            tx.remove(&self.chunks, key);
        }
        for key in reservation_keys {
            tx.remove(&self.reservations, key);
        }
        tx.remove(&self.tasks, task_key);
        tx.commit()?;

        self.metrics.job_slots_released(stats.slots_released);
        info!(task_id, ?stats, "Task deleted");
        Ok(stats)
    }
}

fn collect_keys<K, V>(iter: impl Iterator<Item = fjall::Result<(K, V)>>) -> Result<Vec<K>> {
    let mut keys = Vec::new();
    for item in iter {
        let (key, _) = item?;
        keys.push(key);
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::model::ExtractedParams;
    use tempfile::TempDir;

    fn create_test_store() -> (LedgerStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = LedgerStore::open(temp_dir.path().join("test_ledger")).unwrap();
        (store, temp_dir)
    }

    fn new_task(task_id: &str, chunks: u16) -> NewTask {
        NewTask::builder()
            .task_id(task_id)
            .num_of_chunks(chunks)
            .area("sg")
            .extracted_params(ExtractedParams {
                mode: Some("car".to_string()),
                option: Some("flexible".to_string()),
                ..Default::default()
            })
            .build()
    }

    fn specs(n: usize) -> Vec<ChunkSpec> {
        vec![ChunkSpec::default(); n]
    }

    #[test]
    fn test_submit_and_get_task() {
        let (store, _temp) = create_test_store();
        store.submit_task(new_task("t1", 3), specs(3)).unwrap();

        let task = store.get_task("t1").unwrap().unwrap();
        assert_eq!(task.state(), TaskState::Pending);
        assert_eq!(task.num_of_chunks, 3);
        assert_eq!(store.list_chunks("t1").unwrap().len(), 3);
        assert!(store.get_task("missing").unwrap().is_none());
    }

    #[test]
    fn test_submit_rejects_mismatched_chunks() {
        let (store, _temp) = create_test_store();
        let err = store.submit_task(new_task("t1", 3), specs(2)).unwrap_err();
        assert!(matches!(err, LedgerError::ChunkCountMismatch { expected: 3, actual: 2, .. }));
        assert!(store.get_task("t1").unwrap().is_none());
        assert!(store.list_chunks("t1").unwrap().is_empty());
    }

    #[test]
    fn test_submit_rejects_duplicates() {
        let (store, _temp) = create_test_store();
        store.submit_task(new_task("t1", 1), specs(1)).unwrap();
        let err = store.submit_task(new_task("t1", 1), specs(1)).unwrap_err();
        assert!(matches!(err, LedgerError::TaskAlreadyExists(_)));
    }

    #[test]
    fn test_pick_up_is_one_shot() {
        let (store, _temp) = create_test_store();
        store.submit_task(new_task("t1", 1), specs(1)).unwrap();

        assert!(store.pick_up_task("t1").unwrap());
        assert!(!store.pick_up_task("t1").unwrap());
        let task = store.get_task("t1").unwrap().unwrap();
        assert_eq!(task.state(), TaskState::Running);
        assert!(task.picked_up_at().is_some());
    }

    #[test]
    fn test_cancel_fails_open_chunks() {
        let (store, _temp) = create_test_store();
        store.submit_task(new_task("t1", 2), specs(2)).unwrap();

        let task = store.cancel_task("t1").unwrap();
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(
            task.meta().unwrap().failure_reason.as_deref(),
            Some(CANCELLED)
        );
        for chunk in store.list_chunks("t1").unwrap() {
            assert_eq!(chunk.state(), ChunkState::Failed);
        }
        assert!(store.cancel_task("t1").is_err());
    }

    #[test]
    fn test_increment_retry_saturates() {
        let (store, _temp) = create_test_store();
        store.submit_task(new_task("t1", 1), specs(1)).unwrap();
        let mut last = 0;
        for _ in 0..300 {
            last = store.increment_task_retry("t1").unwrap();
        }
        assert_eq!(last, u8::MAX);
    }

    #[test]
    fn test_output_requires_success() {
        let (store, _temp) = create_test_store();
        store.submit_task(new_task("t1", 1), specs(1)).unwrap();
        assert!(store.set_task_output("t1", "cdn", "out").is_err());
    }

    #[test]
    fn test_delete_removes_chunks() {
        let (store, _temp) = create_test_store();
        store.submit_task(new_task("t1", 2), specs(2)).unwrap();
        store.submit_task(new_task("t10", 1), specs(1)).unwrap();

        let stats = store.delete_task("t1").unwrap();
        assert_eq!(stats.chunks_removed, 2);
        assert!(store.get_task("t1").unwrap().is_none());
        assert_eq!(store.list_chunks("t10").unwrap().len(), 1);
        assert!(matches!(
            store.delete_task("t1").unwrap_err(),
            LedgerError::TaskNotFound(_)
        ));
    }

    #[test]
    fn test_submit_respects_chunk_limit() {
        let temp_dir = TempDir::new().unwrap();
        let config = LedgerConfig {
            max_chunks_per_task: 2,
            ..Default::default()
        };
        let store = LedgerStore::open_with(temp_dir.path().join("test_ledger"), &config).unwrap();

        let err = store.submit_task(new_task("t1", 3), specs(3)).unwrap_err();
        assert!(matches!(err, LedgerError::TooManyChunks { limit: 2, .. }));
        assert!(store.get_task("t1").unwrap().is_none());

        store.submit_task(new_task("t2", 2), specs(2)).unwrap();
    }
}
