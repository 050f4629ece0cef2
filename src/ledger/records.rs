//! Stored row shapes.
//!
//! Rows carry the column forms: integer state codes, pipe-joined lists and
//! raw meta strings. Entities are rebuilt from rows through `TryFrom`, which
//! is where the row-level invariants (ledger count, parallel list lengths)
//! are checked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::codec::{decode_list, encode_list};
use crate::model::{
    AffinityKey, Binding, Chunk, ChunkState, JobToken, ModelError, Pod, PodState, Reservation,
    ReservationState, Task, TaskState,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    pub task_id: String,
    pub num_of_chunks: u16,
    pub state: u8,
    pub original_req: String,
    pub extracted_params: String,
    pub resource_allocator_meta: String,
    pub area: String,
    pub retry_times: u8,
    #[serde(default)]
    pub cdn_addr: String,
    #[serde(default)]
    pub output_addr: String,
    #[serde(default)]
    pub meta: String,
    pub created_at: DateTime<Utc>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

impl From<&Task> for TaskRow {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            num_of_chunks: task.num_of_chunks,
            state: task.state.code(),
            original_req: task.original_req.clone(),
            extracted_params: task.extracted_params.clone(),
            resource_allocator_meta: task.resource_allocator_meta.clone(),
            area: task.area.clone(),
            retry_times: task.retry_times,
            cdn_addr: task.cdn_addr.clone().unwrap_or_default(),
            output_addr: task.output_addr.clone().unwrap_or_default(),
            meta: task.meta.clone(),
            created_at: task.created_at,
            picked_up_at: task.picked_up_at,
            finished_at: task.finished_at,
        }
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = ModelError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Self {
            state: TaskState::from_code(row.state)?,
            task_id: row.task_id,
            num_of_chunks: row.num_of_chunks,
            original_req: row.original_req,
            extracted_params: row.extracted_params,
            resource_allocator_meta: row.resource_allocator_meta,
            area: row.area,
            retry_times: row.retry_times,
            created_at: row.created_at,
            cdn_addr: non_empty(row.cdn_addr),
            output_addr: non_empty(row.output_addr),
            meta: row.meta,
            picked_up_at: row.picked_up_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRow {
    pub task_id: String,
    pub chunk_index: u32,
    pub state: u8,
    pub retry_times: u8,
    pub origins: String,
    pub destinations: String,
    pub origin_index: String,
    pub destination_index: String,
    #[serde(default)]
    pub resource_info: String,
    #[serde(default)]
    pub meta: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Chunk> for ChunkRow {
    fn from(chunk: &Chunk) -> Self {
        Self {
            task_id: chunk.task_id.clone(),
            chunk_index: chunk.chunk_index,
            state: chunk.state.code(),
            retry_times: chunk.retry_times,
            origins: chunk.origins.clone(),
            destinations: chunk.destinations.clone(),
            origin_index: chunk.origin_index.clone(),
            destination_index: chunk.destination_index.clone(),
            resource_info: chunk.resource_info.clone(),
            meta: chunk.meta.clone(),
            created_at: chunk.created_at,
            started_at: chunk.started_at,
            finished_at: chunk.finished_at,
        }
    }
}

impl TryFrom<ChunkRow> for Chunk {
    type Error = ModelError;

    fn try_from(row: ChunkRow) -> Result<Self, Self::Error> {
        Ok(Self {
            state: ChunkState::from_code(row.state)?,
            task_id: row.task_id,
            chunk_index: row.chunk_index,
            retry_times: row.retry_times,
            origins: row.origins,
            destinations: row.destinations,
            origin_index: row.origin_index,
            destination_index: row.destination_index,
            created_at: row.created_at,
            resource_info: row.resource_info,
            meta: row.meta,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodRow {
    pub name: String,
    pub cpu: u32,
    pub memory: u32,
    pub mode: String,
    pub area: String,
    pub option: String,
    pub state: u8,
    pub retry_times: u8,
    pub current_job: String,
    pub current_job_count: u32,
    #[serde(default)]
    pub resource_meta: String,
    #[serde(default)]
    pub meta: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PodRow {
    /// Parse the ledger column, keeping malformed tokens as errors.
    pub fn tokens(&self) -> Vec<Result<JobToken, ModelError>> {
        decode_list(&self.current_job)
            .into_iter()
            .map(str::parse)
            .collect()
    }
}

impl From<&Pod> for PodRow {
    fn from(pod: &Pod) -> Self {
        Self {
            name: pod.name.clone(),
            cpu: pod.cpu,
            memory: pod.memory,
            mode: pod.key.mode.clone(),
            area: pod.key.area.clone(),
            option: pod.key.option.clone(),
            state: pod.state.code(),
            retry_times: pod.retry_times,
            current_job: encode_list(&pod.current_job),
            current_job_count: pod.current_job_count(),
            resource_meta: pod.resource_meta.clone(),
            meta: pod.meta.clone(),
            created_at: pod.created_at,
            updated_at: pod.updated_at,
            finished_at: pod.finished_at,
        }
    }
}

impl TryFrom<PodRow> for Pod {
    type Error = ModelError;

    fn try_from(row: PodRow) -> Result<Self, Self::Error> {
        let current_job = row.tokens().into_iter().collect::<Result<Vec<_>, _>>()?;
        if current_job.len() != row.current_job_count as usize {
            return Err(ModelError::LedgerCountMismatch {
                pod: row.name,
                tokens: current_job.len(),
                count: row.current_job_count,
            });
        }

        Ok(Self {
            state: PodState::from_code(row.state)?,
            key: AffinityKey::new(row.mode, row.area, row.option),
            name: row.name,
            cpu: row.cpu,
            memory: row.memory,
            retry_times: row.retry_times,
            created_at: row.created_at,
            current_job,
            resource_meta: row.resource_meta,
            meta: row.meta,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRow {
    pub id: String,
    pub task_id: String,
    pub mode: String,
    pub area: String,
    pub option: String,
    pub state: u8,
    pub chunk: String,
    pub pod: String,
    #[serde(default)]
    pub meta: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Reservation> for ReservationRow {
    fn from(reservation: &Reservation) -> Self {
        Self {
            id: reservation.id.clone(),
            task_id: reservation.task_id.clone(),
            mode: reservation.key.mode.clone(),
            area: reservation.key.area.clone(),
            option: reservation.key.option.clone(),
            state: reservation.status.code(),
            chunk: encode_list(reservation.chunks()),
            pod: encode_list(reservation.pods()),
            meta: reservation.meta.clone(),
            created_at: reservation.created_at,
            finished_at: reservation.finished_at,
        }
    }
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = ModelError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let chunks = decode_list(&row.chunk);
        let pods = decode_list(&row.pod);
        if chunks.len() != pods.len() {
            return Err(ModelError::BindingLengthMismatch {
                chunks: chunks.len(),
                pods: pods.len(),
            });
        }

        let bindings = chunks
            .into_iter()
            .zip(pods)
            .map(|(chunk, pod)| {
                chunk
                    .parse::<u32>()
                    .map(|index| Binding::new(index, pod))
                    .map_err(|_| ModelError::InvalidToken(chunk.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            status: ReservationState::from_code(row.state)?,
            key: AffinityKey::new(row.mode, row.area, row.option),
            id: row.id,
            task_id: row.task_id,
            created_at: row.created_at,
            bindings,
            meta: row.meta,
            finished_at: row.finished_at,
        })
    }
}
