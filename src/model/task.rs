use std::fmt;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::affinity::AffinityKey;
use super::chunk::ChunkState;
use super::codec::{decode_json, validate_identifier};
use super::error::{ModelError, Result};
use super::meta::{ExtractedParams, FailureMeta, edit_meta};

/// Task lifecycle.
///
/// `Pending -> Running -> {PartiallySucceeded | FullySucceeded | Failed}`.
/// A task that has not been picked up yet may still be failed directly
/// (cancellation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskState {
    Pending = 0,
    Running = 1,
    PartiallySucceeded = 2,
    FullySucceeded = 3,
    Failed = 4,
}

impl TaskState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Running),
            2 => Ok(Self::PartiallySucceeded),
            3 => Ok(Self::FullySucceeded),
            4 => Ok(Self::Failed),
            _ => Err(ModelError::UnknownState { kind: "task", code }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::PartiallySucceeded => "partially_succeeded",
            Self::FullySucceeded => "fully_succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::PartiallySucceeded | Self::FullySucceeded | Self::Failed
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::PartiallySucceeded | Self::FullySucceeded)
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending, Self::Failed) => true,
            (Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive a task outcome from the states of its chunks.
///
/// Returns `None` while the chunk set is incomplete or any chunk is still
/// in flight.
pub fn aggregate_outcome<I>(num_of_chunks: u16, states: I) -> Option<TaskState>
where
    I: IntoIterator<Item = ChunkState>,
{
    let mut total = 0usize;
    let mut succeeded = 0usize;
    for state in states {
        if !state.is_terminal() {
            return None;
        }
        total += 1;
        if state == ChunkState::Succeeded {
            succeeded += 1;
        }
    }

    if total == 0 || total != usize::from(num_of_chunks) {
        return None;
    }
    Some(if succeeded == total {
        TaskState::FullySucceeded
    } else if succeeded == 0 {
        TaskState::Failed
    } else {
        TaskState::PartiallySucceeded
    })
}

/// Submission payload for a task, produced by the request splitter.
#[derive(Debug, Clone, Builder)]
#[builder(on(String, into))]
pub struct NewTask {
    pub task_id: String,
    pub num_of_chunks: u16,
    #[builder(default)]
    pub area: String,
    #[builder(default)]
    pub original_req: String,
    pub extracted_params: Option<ExtractedParams>,
    #[builder(default)]
    pub resource_allocator_meta: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub task_id: String,
    pub num_of_chunks: u16,
    pub original_req: String,
    pub extracted_params: String,
    pub resource_allocator_meta: String,
    pub area: String,
    pub retry_times: u8,
    pub created_at: DateTime<Utc>,
    pub(crate) state: TaskState,
    pub(crate) cdn_addr: Option<String>,
    pub(crate) output_addr: Option<String>,
    pub(crate) meta: String,
    pub(crate) picked_up_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(new: NewTask, now: DateTime<Utc>) -> Result<Self> {
        validate_identifier("task", &new.task_id)?;
        if new.num_of_chunks == 0 {
            return Err(ModelError::EmptyTask);
        }

        Ok(Self {
            task_id: new.task_id,
            num_of_chunks: new.num_of_chunks,
            original_req: new.original_req,
            extracted_params: new
                .extracted_params
                .map(|p| p.encode())
                .unwrap_or_default(),
            resource_allocator_meta: new.resource_allocator_meta,
            area: new.area,
            retry_times: 0,
            created_at: now,
            state: TaskState::Pending,
            cdn_addr: None,
            output_addr: None,
            meta: String::new(),
            picked_up_at: None,
            finished_at: None,
        })
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn cdn_addr(&self) -> Option<&str> {
        self.cdn_addr.as_deref()
    }

    pub fn output_addr(&self) -> Option<&str> {
        self.output_addr.as_deref()
    }

    pub fn picked_up_at(&self) -> Option<DateTime<Utc>> {
        self.picked_up_at
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

    pub fn extracted_params(&self) -> Option<ExtractedParams> {
        ExtractedParams::decode(&self.extracted_params)
    }

    /// Affinity key every chunk of this task must be matched against.
    ///
    /// `None` when the extracted params cannot be decoded; such a task has no
    /// eligible pods.
    pub fn affinity_key(&self) -> Option<AffinityKey> {
        let params = self.extracted_params()?;
        Some(AffinityKey::new(
            params.mode.unwrap_or_default(),
            self.area.clone(),
            params.option.unwrap_or_default(),
        ))
    }

    fn transition(&mut self, next: TaskState, now: DateTime<Utc>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                entity: "task",
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        if next == TaskState::Running {
            self.picked_up_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// First pickup by the scheduler.
    pub fn pick_up(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskState::Running, now)
    }

    /// Move to a terminal outcome.
    pub fn finish(&mut self, outcome: TaskState, now: DateTime<Utc>) -> Result<()> {
        if !outcome.is_terminal() {
            return Err(ModelError::InvalidTransition {
                entity: "task",
                from: self.state.as_str(),
                to: outcome.as_str(),
            });
        }
        self.transition(outcome, now)
    }

    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskState::Failed, now)?;
        self.set_failure_reason(reason);
        Ok(())
    }

    pub fn set_failure_reason(&mut self, reason: &str) {
        edit_meta(&mut self.meta, |m| m.failure_reason = Some(reason.to_string()));
    }

    /// Returns `false` when the same failure was already recorded.
    pub fn record_chunk_error(&mut self, chunk_index: u32, reason: &str) -> bool {
        let mut added = false;
        edit_meta(&mut self.meta, |m| added = m.push_error(chunk_index, reason));
        added
    }

    pub fn set_output(&mut self, cdn_addr: &str, output_addr: &str) -> Result<()> {
        if !self.state.is_success() {
            return Err(ModelError::OutputOnUnsuccessfulTask(self.state.as_str()));
        }
        self.cdn_addr = Some(cdn_addr.to_string());
        self.output_addr = Some(output_addr.to_string());
        Ok(())
    }
}
