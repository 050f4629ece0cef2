use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::affinity::AffinityKey;
use super::codec::{decode_json, validate_identifier};
use super::error::{ModelError, Result};
use super::meta::{FailureMeta, edit_meta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ReservationState {
    Pending = 0,
    Applying = 1,
    Running = 2,
    Finished = 3,
    Failed = 4,
}

impl ReservationState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Applying),
            2 => Ok(Self::Running),
            3 => Ok(Self::Finished),
            4 => Ok(Self::Failed),
            _ => Err(ModelError::UnknownState {
                kind: "reservation",
                code,
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    pub fn can_transition_to(self, next: ReservationState) -> bool {
        use ReservationState::*;
        match (self, next) {
            (Pending, Applying) | (Applying, Running) | (Running, Finished) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chunk bound to one pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub chunk_index: u32,
    pub pod: String,
}

impl Binding {
    pub fn new(chunk_index: u32, pod: impl Into<String>) -> Self {
        Self {
            chunk_index,
            pod: pod.into(),
        }
    }
}

/// A scheduling attempt: which pod runs which chunk of a task.
///
/// The bindings are fixed at construction; only the status and its
/// timestamps move afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: String,
    pub task_id: String,
    pub key: AffinityKey,
    pub created_at: DateTime<Utc>,
    pub(crate) status: ReservationState,
    pub(crate) bindings: Vec<Binding>,
    pub(crate) meta: String,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn new(
        task_id: &str,
        key: AffinityKey,
        bindings: Vec<Binding>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        validate_identifier("task", task_id)?;
        for binding in &bindings {
            validate_identifier("pod", &binding.pod)?;
        }
        Ok(Self {
            id: Uuid::now_v7().to_string(),
            task_id: task_id.to_string(),
            key,
            created_at: now,
            status: ReservationState::Pending,
            bindings,
            meta: String::new(),
            finished_at: None,
        })
    }

    pub fn status(&self) -> ReservationState {
        self.status
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Chunk indices in binding order.
    pub fn chunks(&self) -> Vec<u32> {
        self.bindings.iter().map(|b| b.chunk_index).collect()
    }

    /// Pod names in binding order, parallel to [`Reservation::chunks`].
    pub fn pods(&self) -> Vec<&str> {
        self.bindings.iter().map(|b| b.pod.as_str()).collect()
    }

    pub fn chunks_on_pod(&self, pod: &str) -> Vec<u32> {
        self.bindings
            .iter()
            .filter(|b| b.pod == pod)
            .map(|b| b.chunk_index)
            .collect()
    }

    pub fn advance(&mut self, next: ReservationState, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                entity: "reservation",
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    pub fn meta(&self) -> Option<FailureMeta> {
        decode_json(&self.meta)
    }

    pub fn set_failure_reason(&mut self, reason: &str) {
        edit_meta(&mut self.meta, |m| m.failure_reason = Some(reason.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation() -> Reservation {
        Reservation::new(
            "task-1",
            AffinityKey::new("car", "sg", "flexible"),
            vec![Binding::new(0, "p7"), Binding::new(1, "p9")],
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_parallel_lists() {
        let r = reservation();
        assert_eq!(r.chunks(), vec![0, 1]);
        assert_eq!(r.pods(), vec!["p7", "p9"]);
        assert_eq!(r.chunks_on_pod("p7"), vec![0]);
        assert!(r.chunks_on_pod("p8").is_empty());
    }

    #[test]
    fn test_status_flow() {
        let mut r = reservation();
        assert!(r.advance(ReservationState::Running, Utc::now()).is_err());
        r.advance(ReservationState::Applying, Utc::now()).unwrap();
        r.advance(ReservationState::Running, Utc::now()).unwrap();
        assert!(r.finished_at().is_none());
        r.advance(ReservationState::Finished, Utc::now()).unwrap();
        assert!(r.finished_at().is_some());
        assert!(r.advance(ReservationState::Failed, Utc::now()).is_err());
    }

    #[test]
    fn test_fail_from_any_live_state() {
        let mut r = reservation();
        r.advance(ReservationState::Failed, Utc::now()).unwrap();
        assert_eq!(r.status(), ReservationState::Failed);
    }

    #[test]
    fn test_rejects_bad_pod_names() {
        let result = Reservation::new(
            "task-1",
            AffinityKey::default(),
            vec![Binding::new(0, "p|7")],
            Utc::now(),
        );
        assert!(result.is_err());
    }
}
