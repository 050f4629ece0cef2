use std::fmt;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::codec::{JobToken, decode_json};
use super::error::{ModelError, Result};
use super::meta::{FailureMeta, edit_meta};

/// Chunk lifecycle.
///
/// `Pending -> ResourceCreating -> Running -> {Succeeded | Failed}`. Any
/// non-terminal state may fail, and a chunk goes back to `Pending` when it is
/// released or retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ChunkState {
    Pending = 0,
    ResourceCreating = 1,
    Running = 2,
    Succeeded = 3,
    Failed = 4,
}

/// Persisted layouts of the chunk `state` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaRevision {
    /// `pending=0, running=1, succeeded=2, failed=3`.
    V1,
    /// Adds `resource_creating=1` and shifts the later codes up by one.
    V2,
}

impl SchemaRevision {
    pub const CURRENT: SchemaRevision = SchemaRevision::V2;

    pub fn version(self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    pub fn from_version(version: u32) -> Option<Self> {
        match version {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }
}

impl ChunkState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Self::from_revision(code, SchemaRevision::CURRENT)
    }

    pub fn from_revision(code: u8, revision: SchemaRevision) -> Result<Self> {
        let state = match (revision, code) {
            (SchemaRevision::V1, 0) => Self::Pending,
            (SchemaRevision::V1, 1) => Self::Running,
            (SchemaRevision::V1, 2) => Self::Succeeded,
            (SchemaRevision::V1, 3) => Self::Failed,
            (SchemaRevision::V2, 0) => Self::Pending,
            (SchemaRevision::V2, 1) => Self::ResourceCreating,
            (SchemaRevision::V2, 2) => Self::Running,
            (SchemaRevision::V2, 3) => Self::Succeeded,
            (SchemaRevision::V2, 4) => Self::Failed,
            _ => return Err(ModelError::UnknownState { kind: "chunk", code }),
        };
        Ok(state)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ResourceCreating => "resource_creating",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn can_transition_to(self, next: ChunkState) -> bool {
        use ChunkState::*;
        match (self, next) {
            (Pending, ResourceCreating) => true,
            (ResourceCreating, Running) => true,
            (Running, Succeeded) => true,
            (Pending | ResourceCreating | Running, Failed) => true,
            (ResourceCreating | Running | Failed, Pending) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-range of the parent request a chunk covers, supplied by the splitter.
#[derive(Debug, Clone, Default, Builder)]
#[builder(on(String, into))]
pub struct ChunkSpec {
    #[builder(default)]
    pub origins: String,
    #[builder(default)]
    pub destinations: String,
    #[builder(default)]
    pub origin_index: String,
    #[builder(default)]
    pub destination_index: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub task_id: String,
    pub chunk_index: u32,
    pub retry_times: u8,
    pub origins: String,
    pub destinations: String,
    pub origin_index: String,
    pub destination_index: String,
    pub created_at: DateTime<Utc>,
    pub(crate) state: ChunkState,
    pub(crate) resource_info: String,
    pub(crate) meta: String,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

impl Chunk {
    pub fn new(task_id: &str, chunk_index: u32, spec: ChunkSpec, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task_id.to_string(),
            chunk_index,
            retry_times: 0,
            origins: spec.origins,
            destinations: spec.destinations,
            origin_index: spec.origin_index,
            destination_index: spec.destination_index,
            created_at: now,
            state: ChunkState::Pending,
            resource_info: String::new(),
            meta: String::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn resource_info(&self) -> &str {
        &self.resource_info
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn meta_raw(&self) -> &str {
        &self.meta
    }

    pub fn meta(&self) -> Option<FailureMeta> {
        decode_json(&self.meta)
    }

    pub fn token(&self) -> JobToken {
        JobToken::new(self.task_id.clone(), self.chunk_index)
    }

    fn transition(&mut self, next: ChunkState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                entity: "chunk",
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// `Pending -> ResourceCreating`. Atomicity is the caller's concern.
    pub fn claim(&mut self) -> Result<()> {
        self.transition(ChunkState::ResourceCreating)
    }

    pub fn start(&mut self, resource_info: &str, now: DateTime<Utc>) -> Result<()> {
        self.transition(ChunkState::Running)?;
        self.resource_info = resource_info.to_string();
        self.started_at = Some(now);
        Ok(())
    }

    pub fn succeed(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(ChunkState::Succeeded)?;
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        self.transition(ChunkState::Failed)?;
        self.finished_at = Some(now);
        self.set_failure_reason(reason);
        Ok(())
    }

    /// Back to `Pending` for another attempt. Does not touch `retry_times`.
    pub fn requeue(&mut self) -> Result<()> {
        self.transition(ChunkState::Pending)?;
        self.resource_info.clear();
        self.started_at = None;
        self.finished_at = None;
        Ok(())
    }

    pub fn set_failure_reason(&mut self, reason: &str) {
        edit_meta(&mut self.meta, |m| m.failure_reason = Some(reason.to_string()));
    }
}
