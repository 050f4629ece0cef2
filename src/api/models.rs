//! Response bodies of the operator API.
//!
//! Views flatten entities for operators: decoded meta instead of raw JSON
//! columns, state names instead of codes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::StoreStats;
use crate::model::{
    AffinityKey, Binding, Chunk, ChunkError, ChunkState, ExtractedParams, Pod, PodState,
    Reservation, ReservationState, ResourceMeta, Task, TaskState,
};
use crate::observability::MetricsSnapshot;

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: String,
    pub state: TaskState,
    pub num_of_chunks: u16,
    pub area: String,
    pub retry_times: u8,
    pub extracted_params: Option<ExtractedParams>,
    pub cdn_addr: Option<String>,
    pub output_addr: Option<String>,
    pub failure_reason: Option<String>,
    /// `None` when no error list could be read, as opposed to an empty one
    #[serde(default)]
    pub errors: Option<Vec<ChunkError>>,
    /// The stored meta column is present but not valid JSON
    #[serde(default)]
    pub meta_undecodable: bool,
    pub created_at: DateTime<Utc>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub chunks: Vec<ChunkView>,
}

impl TaskView {
    pub fn new(task: &Task, chunks: &[Chunk]) -> Self {
        let meta = task.meta();
        let meta_undecodable = meta.is_none() && !task.meta_raw().trim().is_empty();
        Self {
            task_id: task.task_id.clone(),
            state: task.state(),
            num_of_chunks: task.num_of_chunks,
            area: task.area.clone(),
            retry_times: task.retry_times,
            extracted_params: task.extracted_params(),
            cdn_addr: task.cdn_addr().map(str::to_string),
            output_addr: task.output_addr().map(str::to_string),
            failure_reason: meta.as_ref().and_then(|m| m.failure_reason.clone()),
            errors: meta.map(|m| m.errors),
            meta_undecodable,
            created_at: task.created_at,
            picked_up_at: task.picked_up_at(),
            finished_at: task.finished_at(),
            chunks: chunks.iter().map(ChunkView::from).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkView {
    pub chunk_index: u32,
    pub state: ChunkState,
    pub retry_times: u8,
    pub resource_info: String,
    pub failure_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Chunk> for ChunkView {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_index: chunk.chunk_index,
            state: chunk.state(),
            retry_times: chunk.retry_times,
            resource_info: chunk.resource_info().to_string(),
            failure_reason: chunk.meta().and_then(|m| m.failure_reason),
            started_at: chunk.started_at(),
            finished_at: chunk.finished_at(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PodView {
    pub name: String,
    pub state: PodState,
    pub cpu: u32,
    pub memory: u32,
    #[serde(flatten)]
    pub key: AffinityKey,
    pub current_jobs: Vec<String>,
    pub current_job_count: u32,
    pub available_quota: u32,
    pub resource_meta: Option<ResourceMeta>,
    pub failure_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Pod> for PodView {
    fn from(pod: &Pod) -> Self {
        Self {
            name: pod.name.clone(),
            state: pod.state(),
            cpu: pod.cpu,
            memory: pod.memory,
            key: pod.key.clone(),
            current_jobs: pod.current_jobs().iter().map(|t| t.to_string()).collect(),
            current_job_count: pod.current_job_count(),
            available_quota: pod.available_quota(),
            resource_meta: pod.resource_meta(),
            failure_reason: pod.meta().and_then(|m| m.failure_reason),
            updated_at: pod.updated_at(),
            finished_at: pod.finished_at(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReservationView {
    pub id: String,
    pub task_id: String,
    pub status: ReservationState,
    #[serde(flatten)]
    pub key: AffinityKey,
    pub bindings: Vec<Binding>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Reservation> for ReservationView {
    fn from(reservation: &Reservation) -> Self {
        Self {
            id: reservation.id.clone(),
            task_id: reservation.task_id.clone(),
            status: reservation.status(),
            key: reservation.key.clone(),
            bindings: reservation.bindings().to_vec(),
            failure_reason: reservation.meta().and_then(|m| m.failure_reason),
            created_at: reservation.created_at,
            finished_at: reservation.finished_at(),
        }
    }
}

/// Filter for `GET /operators/pods`.
///
/// With all three key fields present only eligible pods are listed.
#[derive(Debug, Default, Deserialize)]
pub struct PodQuery {
    pub mode: Option<String>,
    pub area: Option<String>,
    pub option: Option<String>,
}

impl PodQuery {
    pub fn affinity_key(&self) -> Option<AffinityKey> {
        match (&self.mode, &self.area, &self.option) {
            (Some(mode), Some(area), Some(option)) => {
                Some(AffinityKey::new(mode.as_str(), area.as_str(), option.as_str()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub counters: MetricsSnapshot,
    pub store: StoreStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}
