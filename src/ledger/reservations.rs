//! Reservations: binding claimed chunks to pods, and undoing that binding
//! when a pod fails.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::model::{
    Binding, ChunkState, JobToken, PodState, Reservation, ReservationState, TaskState,
};

use super::error::{LedgerError, Result};
use super::partitions::{encode_reservation_key, encode_reservation_prefix};
use super::records::ReservationRow;
use super::store::{LedgerStore, decode_rows, decode_value};

/// What reconciling a failed pod changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Chunks sent back to `Pending` for another attempt
    pub requeued: Vec<u32>,
    /// Job tokens removed from the failed pod
    pub slots_released: usize,
    /// Bound chunks the failed pod no longer held a slot for
    pub already_reconciled: Vec<u32>,
}

impl LedgerStore {
    /// Bind claimed chunks of a running task to pods.
    ///
    /// In one transaction: every chunk must be `ResourceCreating` and not yet
    /// held by any pod, every pod must be eligible for the task's affinity key
    /// with a free slot counted after the bindings before it. Tokens are then
    /// appended and a `Pending` reservation is written. On error nothing is
    /// written and the caller should unclaim the chunks.
    pub fn reserve(&self, task_id: &str, bindings: Vec<Binding>) -> Result<Reservation> {
        if bindings.is_empty() {
            return Err(LedgerError::EmptyReservation);
        }

        let now = Self::now();
        let mut tx = self.keyspace.write_tx();
        let task = self.load_task_tx(&mut tx, task_id)?;
        if task.state() != TaskState::Running {
            return Err(LedgerError::TaskNotRunning {
                task_id: task_id.to_string(),
                state: task.state().as_str(),
            });
        }
        let key = task
            .affinity_key()
            .ok_or_else(|| LedgerError::NoAffinityKey(task_id.to_string()))?;

        let mut pods: BTreeMap<String, _> = self
            .load_pods_tx(&mut tx)?
            .into_iter()
            .map(|pod| (pod.name.clone(), pod))
            .collect();

        for binding in &bindings {
            let chunk = self.load_chunk_tx(&mut tx, task_id, binding.chunk_index)?;
            if chunk.state() != ChunkState::ResourceCreating {
                return Err(LedgerError::ChunkNotClaimed {
                    task_id: task_id.to_string(),
                    chunk_index: binding.chunk_index,
                    state: chunk.state().as_str(),
                });
            }

            // Earlier bindings of this call are already appended, so a chunk
            // listed twice is caught here too.
            let token = JobToken::new(task_id, binding.chunk_index);
            if let Some(holder) = pods.values().find(|p| p.holds(&token)) {
                return Err(LedgerError::ChunkAlreadyBound {
                    task_id: task_id.to_string(),
                    chunk_index: binding.chunk_index,
                    pod: holder.name.clone(),
                });
            }

            let pod = pods
                .get_mut(&binding.pod)
                .ok_or_else(|| LedgerError::PodNotFound(binding.pod.clone()))?;
            if !pod.is_eligible(&key) {
                let full = pod.state().is_available()
                    && pod.matches(&key.mode, &key.area, &key.option);
                return Err(if full {
                    LedgerError::CapacityExhausted(pod.name.clone())
                } else {
                    LedgerError::PodNotEligible {
                        pod: pod.name.clone(),
                        task_id: task_id.to_string(),
                    }
                });
            }
            pod.append_current_job(task_id, binding.chunk_index);
            pod.updated_at = now;
        }

        let touched: HashSet<&str> = bindings.iter().map(|b| b.pod.as_str()).collect();
        for pod in pods.values().filter(|p| touched.contains(p.name.as_str())) {
            self.save_pod_tx(&mut tx, pod)?;
        }

        let reservation = Reservation::new(task_id, key, bindings, now)?;
        self.save_reservation_tx(&mut tx, &reservation)?;
        tx.commit()?;

        self.metrics.reservation_created();
        info!(
            task_id,
            reservation_id = %reservation.id,
            chunks = reservation.bindings().len(),
            "Reservation created"
        );
        Ok(reservation)
    }

    pub fn get_reservation(&self, task_id: &str, reservation_id: &str) -> Result<Option<Reservation>> {
        let key = encode_reservation_key(task_id, reservation_id);
        let row: Option<ReservationRow> = decode_value(self.reservations.get(key)?)?;
        Ok(row.map(Reservation::try_from).transpose()?)
    }

    /// Reservations of a task, oldest first
    pub fn list_reservations(&self, task_id: &str) -> Result<Vec<Reservation>> {
        let tx = self.keyspace.read_tx();
        let rows: Vec<ReservationRow> = decode_rows(
            tx.prefix(&self.reservations, encode_reservation_prefix(task_id)),
        )?;
        rows.into_iter()
            .map(|row| Reservation::try_from(row).map_err(LedgerError::from))
            .collect()
    }

    pub fn advance_reservation(
        &self,
        task_id: &str,
        reservation_id: &str,
        next: ReservationState,
    ) -> Result<Reservation> {
        let now = Self::now();
        let mut tx = self.keyspace.write_tx();
        let mut reservation = self.load_reservation_tx(&mut tx, task_id, reservation_id)?;
        reservation.advance(next, now)?;
        self.save_reservation_tx(&mut tx, &reservation)?;
        tx.commit()?;

        debug!(task_id, reservation_id, status = %next, "Reservation advanced");
        Ok(reservation)
    }

    /// Undo the part of a reservation placed on a failed pod.
    ///
    /// Only `pod` is touched: its tokens for the bound chunks are removed and
    /// it moves to `Failed` when that transition is allowed. A chunk goes back
    /// to `Pending` with one more retry only if this pod still held its slot
    /// and the task is not finished; a chunk with no slot left on the pod is
    /// reported as already reconciled and left alone. Chunks bound to other
    /// pods keep their slots. The reservation itself is marked failed.
    pub fn reconcile_pod_failure(
        &self,
        task_id: &str,
        reservation_id: &str,
        pod_name: &str,
        reason: &str,
    ) -> Result<ReconcileReport> {
        let now = Self::now();
        let mut tx = self.keyspace.write_tx();
        let mut reservation = self.load_reservation_tx(&mut tx, task_id, reservation_id)?;
        let mut pod = self.load_pod_tx(&mut tx, pod_name)?;
        let task_open = !self.load_task_tx(&mut tx, task_id)?.is_terminal();
        let mut report = ReconcileReport::default();

        for chunk_index in reservation.chunks_on_pod(pod_name) {
            let removed = pod.remove_current_job(task_id, Some(chunk_index));
            report.slots_released += removed;
            // Nothing removed: the chunk finished, was requeued, or has moved
            // on to another reservation since this one was made.
            if removed == 0 {
                report.already_reconciled.push(chunk_index);
                continue;
            }
            if !task_open {
                continue;
            }

            let mut chunk = self.load_chunk_tx(&mut tx, task_id, chunk_index)?;
            if !matches!(
                chunk.state(),
                ChunkState::ResourceCreating | ChunkState::Running
            ) {
                continue;
            }
            chunk.set_failure_reason(reason);
            chunk.requeue()?;
            chunk.retry_times = chunk.retry_times.saturating_add(1);
            self.save_chunk_tx(&mut tx, &chunk)?;
            report.requeued.push(chunk_index);
        }

        if pod.state().can_transition_to(PodState::Failed) {
            pod.transition(PodState::Failed, now)?;
            pod.set_failure_reason(reason);
        }
        pod.updated_at = now;
        self.save_pod_tx(&mut tx, &pod)?;

        if !reservation.status().is_terminal() {
            reservation.set_failure_reason(reason);
            reservation.advance(ReservationState::Failed, now)?;
            self.save_reservation_tx(&mut tx, &reservation)?;
        }

        tx.commit()?;

        self.metrics.reconciliation();
        self.metrics.job_slots_released(report.slots_released);
        for _ in &report.requeued {
            self.metrics.chunk_requeued();
        }
        warn!(
            task_id,
            reservation_id,
            pod = pod_name,
            requeued = ?report.requeued,
            released = report.slots_released,
            already_reconciled = ?report.already_reconciled,
            "Pod failure reconciled"
        );
        Ok(report)
    }
}
