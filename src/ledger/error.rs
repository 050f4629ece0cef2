use thiserror::Error;

use crate::model::ModelError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task already exists: {0}")]
    TaskAlreadyExists(String),

    #[error("Chunk not found: {task_id}::{chunk_index}")]
    ChunkNotFound { task_id: String, chunk_index: u32 },

    #[error("Pod not found: {0}")]
    PodNotFound(String),

    #[error("Pod already exists: {0}")]
    PodAlreadyExists(String),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    #[error("Task {task_id} declares {expected} chunks but {actual} were supplied")]
    ChunkCountMismatch {
        task_id: String,
        expected: u16,
        actual: usize,
    },

    #[error("Task {task_id} exceeds the per-task chunk limit of {limit}")]
    TooManyChunks { task_id: String, limit: u16 },

    #[error("Task {task_id} is {state}, expected running")]
    TaskNotRunning { task_id: String, state: &'static str },

    #[error("Task {task_id} is already {state}")]
    TaskFinished { task_id: String, state: &'static str },

    #[error("Task {0} has no decodable affinity key")]
    NoAffinityKey(String),

    #[error("Chunk {task_id}::{chunk_index} is {state}, expected resource_creating")]
    ChunkNotClaimed {
        task_id: String,
        chunk_index: u32,
        state: &'static str,
    },

    #[error("Chunk {task_id}::{chunk_index} is already held by pod {pod}")]
    ChunkAlreadyBound {
        task_id: String,
        chunk_index: u32,
        pod: String,
    },

    #[error("Pod {pod} is not eligible for task {task_id}")]
    PodNotEligible { pod: String, task_id: String },

    #[error("Pod {0} has no free job slots")]
    CapacityExhausted(String),

    #[error("Reservation needs at least one binding")]
    EmptyReservation,

    #[error("Unsupported schema version: {0}")]
    UnsupportedSchema(u32),

    #[error("Unreadable schema version: {0:?}")]
    CorruptSchemaVersion(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
