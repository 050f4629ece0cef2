use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fjall::{
    Config, PartitionCreateOptions, PersistMode, TransactionalKeyspace,
    TransactionalPartitionHandle, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::config::LedgerConfig;
use crate::model::{Chunk, Pod, Reservation, Task};
use crate::observability::{Metrics, MetricsSnapshot};

use super::error::{LedgerError, Result};
use super::partitions::{
    CHUNK_PREFIX, POD_PREFIX, RESERVATION_PREFIX, TASK_PREFIX, encode_chunk_key,
    encode_chunk_prefix, encode_meta_key, encode_pod_key, encode_reservation_key,
    encode_reservation_prefix, encode_task_key,
};
use super::records::{ChunkRow, PodRow, ReservationRow, TaskRow};

/// Fjall-backed ledger for tasks, chunks, pods and reservations
///
/// Every mutation runs in a single write transaction. Fjall serializes write
/// transactions, so a read-check-write inside one is a compare-and-set with
/// respect to every other writer of this store.
#[derive(Clone)]
pub struct LedgerStore {
    pub(super) keyspace: TransactionalKeyspace,
    pub(super) tasks: TransactionalPartitionHandle,
    pub(super) chunks: TransactionalPartitionHandle,
    pub(super) pods: TransactionalPartitionHandle,
    pub(super) reservations: TransactionalPartitionHandle,
    pub(super) metadata: TransactionalPartitionHandle,
    pub(super) metrics: Arc<Metrics>,
    pub(super) max_chunks_per_task: u16,
}

impl LedgerStore {
    /// Open or create a ledger at the given path with default tuning
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &LedgerConfig::default())
    }

    /// Open or create a ledger, migrating stored rows to the current schema
    pub fn open_with<P: AsRef<Path>>(path: P, config: &LedgerConfig) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening ledger at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path)
            .cache_size(config.cache_size_mb * 1024 * 1024)
            .open_transactional()?;

        let tasks = keyspace.open_partition("tasks", PartitionCreateOptions::default())?;
        let chunks = keyspace.open_partition("chunks", PartitionCreateOptions::default())?;
        let pods = keyspace.open_partition("pods", PartitionCreateOptions::default())?;
        let reservations =
            keyspace.open_partition("reservations", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        let store = Self {
            keyspace,
            tasks,
            chunks,
            pods,
            reservations,
            metadata,
            metrics: Arc::new(Metrics::new()),
            max_chunks_per_task: config.max_chunks_per_task,
        };

        let revision = store.migrate()?;
        info!(schema_version = revision.version(), "Ledger opened successfully");
        Ok(store)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Schema revision recorded in the metadata partition
    pub fn schema_version(&self) -> Result<Option<u32>> {
        self.read_meta(super::migration::META_SCHEMA_VERSION)?
            .map(|v| v.parse().map_err(|_| LedgerError::CorruptSchemaVersion(v)))
            .transpose()
    }

    /// Row counts per partition (for debugging/monitoring)
    pub fn stats(&self) -> Result<StoreStats> {
        let tx = self.keyspace.read_tx();
        let mut stats = StoreStats::default();

        for item in tx.prefix(&self.tasks, TASK_PREFIX) {
            item?;
            stats.task_count += 1;
        }
        for item in tx.prefix(&self.chunks, CHUNK_PREFIX) {
            item?;
            stats.chunk_count += 1;
        }
        for item in tx.prefix(&self.pods, POD_PREFIX) {
            item?;
            stats.pod_count += 1;
        }
        for item in tx.prefix(&self.reservations, RESERVATION_PREFIX) {
            item?;
            stats.reservation_count += 1;
        }

        Ok(stats)
    }

    pub(super) fn read_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .metadata
            .get(encode_meta_key(key))?
            .map(|v| String::from_utf8_lossy(&v).to_string()))
    }

    pub(super) fn now() -> DateTime<Utc> {
        Utc::now()
    }

    // Write-transaction accessors. Each loads a row, rebuilds the entity and
    // maps absence to the matching not-found error.

    pub(super) fn load_task_tx(&self, tx: &mut WriteTransaction, task_id: &str) -> Result<Task> {
        let row: TaskRow = decode_value(tx.get(&self.tasks, encode_task_key(task_id))?)?
            .ok_or_else(|| LedgerError::TaskNotFound(task_id.to_string()))?;
        Ok(Task::try_from(row)?)
    }

    pub(super) fn save_task_tx(&self, tx: &mut WriteTransaction, task: &Task) -> Result<()> {
        tx.insert(
            &self.tasks,
            encode_task_key(&task.task_id),
            encode_row(&TaskRow::from(task))?,
        );
        Ok(())
    }

    pub(super) fn load_chunk_tx(
        &self,
        tx: &mut WriteTransaction,
        task_id: &str,
        chunk_index: u32,
    ) -> Result<Chunk> {
        let row: ChunkRow =
            decode_value(tx.get(&self.chunks, encode_chunk_key(task_id, chunk_index))?)?
                .ok_or_else(|| LedgerError::ChunkNotFound {
                    task_id: task_id.to_string(),
                    chunk_index,
                })?;
        Ok(Chunk::try_from(row)?)
    }

    pub(super) fn load_chunks_tx(
        &self,
        tx: &mut WriteTransaction,
        task_id: &str,
    ) -> Result<Vec<Chunk>> {
        let rows: Vec<ChunkRow> = decode_rows(tx.prefix(&self.chunks, encode_chunk_prefix(task_id)))?;
        rows.into_iter()
            .map(|row| Chunk::try_from(row).map_err(LedgerError::from))
            .collect()
    }

    pub(super) fn save_chunk_tx(&self, tx: &mut WriteTransaction, chunk: &Chunk) -> Result<()> {
        tx.insert(
            &self.chunks,
            encode_chunk_key(&chunk.task_id, chunk.chunk_index),
            encode_row(&ChunkRow::from(chunk))?,
        );
        Ok(())
    }

    pub(super) fn load_pod_tx(&self, tx: &mut WriteTransaction, name: &str) -> Result<Pod> {
        let row: PodRow = decode_value(tx.get(&self.pods, encode_pod_key(name))?)?
            .ok_or_else(|| LedgerError::PodNotFound(name.to_string()))?;
        Ok(Pod::try_from(row)?)
    }

    pub(super) fn load_pods_tx(&self, tx: &mut WriteTransaction) -> Result<Vec<Pod>> {
        let rows: Vec<PodRow> = decode_rows(tx.prefix(&self.pods, POD_PREFIX))?;
        rows.into_iter()
            .map(|row| Pod::try_from(row).map_err(LedgerError::from))
            .collect()
    }

    pub(super) fn save_pod_tx(&self, tx: &mut WriteTransaction, pod: &Pod) -> Result<()> {
        tx.insert(
            &self.pods,
            encode_pod_key(&pod.name),
            encode_row(&PodRow::from(pod))?,
        );
        Ok(())
    }

    pub(super) fn load_reservation_tx(
        &self,
        tx: &mut WriteTransaction,
        task_id: &str,
        reservation_id: &str,
    ) -> Result<Reservation> {
        let key = encode_reservation_key(task_id, reservation_id);
        let row: ReservationRow = decode_value(tx.get(&self.reservations, key)?)?
            .ok_or_else(|| LedgerError::ReservationNotFound(reservation_id.to_string()))?;
        Ok(Reservation::try_from(row)?)
    }

    pub(super) fn load_reservations_tx(
        &self,
        tx: &mut WriteTransaction,
        task_id: &str,
    ) -> Result<Vec<Reservation>> {
        let rows: Vec<ReservationRow> = decode_rows(
            tx.prefix(&self.reservations, encode_reservation_prefix(task_id)),
        )?;
        rows.into_iter()
            .map(|row| Reservation::try_from(row).map_err(LedgerError::from))
            .collect()
    }

    pub(super) fn save_reservation_tx(
        &self,
        tx: &mut WriteTransaction,
        reservation: &Reservation,
    ) -> Result<()> {
        tx.insert(
            &self.reservations,
            encode_reservation_key(&reservation.task_id, &reservation.id),
            encode_row(&ReservationRow::from(reservation))?,
        );
        Ok(())
    }

    /// Drop job tokens of `task_id` from every pod ledger that holds them.
    ///
    /// `chunk_index` narrows the removal to one token. Returns the number of
    /// slots released.
    pub(super) fn release_jobs_tx(
        &self,
        tx: &mut WriteTransaction,
        task_id: &str,
        chunk_index: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut released = 0;
        for mut pod in self.load_pods_tx(tx)? {
            let removed = pod.remove_current_job(task_id, chunk_index);
            if removed > 0 {
                pod.updated_at = now;
                self.save_pod_tx(tx, &pod)?;
                released += removed;
            }
        }
        Ok(released)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub task_count: usize,
    pub chunk_count: usize,
    pub pod_count: usize,
    pub reservation_count: usize,
}

pub(super) fn encode_row<T: Serialize>(row: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(row)?)
}

pub(super) fn decode_value<T, V>(value: Option<V>) -> Result<Option<T>>
where
    T: DeserializeOwned,
    V: Deref<Target = [u8]>,
{
    match value {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Decode every value yielded by a partition scan.
pub(super) fn decode_rows<T, K, V>(
    iter: impl Iterator<Item = fjall::Result<(K, V)>>,
) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    V: Deref<Target = [u8]>,
{
    let mut rows = Vec::new();
    for item in iter {
        let (_, value) = item?;
        rows.push(serde_json::from_slice(&value)?);
    }
    Ok(rows)
}
