use std::fmt;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::affinity::AffinityKey;
use super::codec::{JobToken, decode_json, encode_or_diagnostic, validate_identifier};
use super::error::{ModelError, Result};
use super::meta::{FailureMeta, ResourceMeta, edit_meta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PodState {
    Applying = 0,
    Running = 1,
    Failed = 2,
    Removed = 3,
    Cached = 4,
}

impl PodState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Applying),
            1 => Ok(Self::Running),
            2 => Ok(Self::Failed),
            3 => Ok(Self::Removed),
            4 => Ok(Self::Cached),
            _ => Err(ModelError::UnknownState { kind: "pod", code }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applying => "applying",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Removed => "removed",
            Self::Cached => "cached",
        }
    }

    /// Only running pods accept new work.
    pub fn is_available(self) -> bool {
        self == Self::Running
    }

    pub fn can_transition_to(self, next: PodState) -> bool {
        use PodState::*;
        matches!(
            (self, next),
            (Applying, Running | Failed)
                | (Running, Failed | Removed | Cached)
                | (Cached, Running | Removed)
                | (Failed, Removed)
        )
    }
}

impl fmt::Display for PodState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration payload for a pod, supplied by the orchestrator.
#[derive(Debug, Clone, Builder)]
#[builder(on(String, into))]
pub struct NewPod {
    pub name: String,
    pub cpu: u32,
    #[builder(default)]
    pub memory: u32,
    #[builder(default)]
    pub mode: String,
    #[builder(default)]
    pub area: String,
    #[builder(default)]
    pub option: String,
    #[builder(default = PodState::Applying)]
    pub state: PodState,
    pub resource_meta: Option<ResourceMeta>,
}

/// A worker registered under an affinity key, together with its job-slot ledger.
///
/// The ledger is the single source of truth for slot usage:
/// `current_job_count()` is its length.
#[derive(Debug, Clone, PartialEq)]
pub struct Pod {
    pub name: String,
    pub cpu: u32,
    pub memory: u32,
    pub key: AffinityKey,
    pub retry_times: u8,
    pub created_at: DateTime<Utc>,
    pub(crate) state: PodState,
    pub(crate) current_job: Vec<JobToken>,
    pub(crate) resource_meta: String,
    pub(crate) meta: String,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

impl Pod {
    pub fn new(new: NewPod, now: DateTime<Utc>) -> Result<Self> {
        validate_identifier("pod", &new.name)?;
        Ok(Self {
            name: new.name,
            cpu: new.cpu,
            memory: new.memory,
            key: AffinityKey::new(new.mode, new.area, new.option),
            retry_times: 0,
            created_at: now,
            state: new.state,
            current_job: Vec::new(),
            resource_meta: new
                .resource_meta
                .map(|m| encode_or_diagnostic(&m))
                .unwrap_or_default(),
            meta: String::new(),
            updated_at: now,
            finished_at: None,
        })
    }

    pub fn state(&self) -> PodState {
        self.state
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Affinity match: all three fields must be equal.
    pub fn matches(&self, mode: &str, area: &str, option: &str) -> bool {
        self.key.matches(mode, area, option)
    }

    pub fn current_jobs(&self) -> &[JobToken] {
        &self.current_job
    }

    pub fn current_job_count(&self) -> u32 {
        u32::try_from(self.current_job.len()).unwrap_or(u32::MAX)
    }

    pub fn available_quota(&self) -> u32 {
        self.cpu.saturating_sub(self.current_job_count())
    }

    /// Running, matching affinity, and at least one free slot.
    pub fn is_eligible(&self, key: &AffinityKey) -> bool {
        self.state.is_available()
            && self.available_quota() > 0
            && self.matches(&key.mode, &key.area, &key.option)
    }

    /// Add `<task_id>::<chunk_index>` to the ledger.
    ///
    /// Capacity is not checked here: callers verify [`Pod::is_eligible`] in the
    /// same transaction before appending.
    pub fn append_current_job(&mut self, task_id: &str, chunk_index: u32) {
        self.current_job.push(JobToken::new(task_id, chunk_index));
    }

    /// Remove the tokens of `task_id`: exactly `chunk_index` when given,
    /// every chunk of the task otherwise. Returns how many were removed.
    pub fn remove_current_job(&mut self, task_id: &str, chunk_index: Option<u32>) -> usize {
        let before = self.current_job.len();
        self.current_job.retain(|token| {
            let hit = token.belongs_to(task_id)
                && chunk_index.is_none_or(|index| token.chunk_index == index);
            !hit
        });
        before - self.current_job.len()
    }

    pub fn holds(&self, token: &JobToken) -> bool {
        self.current_job.contains(token)
    }

    pub fn transition(&mut self, next: PodState, now: DateTime<Utc>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                entity: "pod",
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        self.updated_at = now;
        if next == PodState::Removed {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    pub fn resource_meta(&self) -> Option<ResourceMeta> {
        decode_json(&self.resource_meta)
    }

    pub fn set_resource_meta(&mut self, meta: &ResourceMeta) {
        self.resource_meta = encode_or_diagnostic(meta);
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

    fn pod(cpu: u32) -> Pod {
        let new = NewPod::builder()
            .name("pod-a")
            .cpu(cpu)
            .mode("car")
            .area("sg")
            .option("flexible")
            .state(PodState::Running)
            .build();
        Pod::new(new, Utc::now()).unwrap()
    }

    #[test]
    fn test_match_is_exact_on_all_fields() {
        let pod = pod(2);
        assert!(pod.matches("car", "sg", "flexible"));
        assert!(!pod.matches("Car", "sg", "flexible"));
        assert!(!pod.matches("car", "sg ", "flexible"));
        assert!(!pod.matches("car", "sg", ""));
    }

    #[test]
    fn test_full_pod_is_not_eligible_but_append_still_works() {
        let mut pod = pod(2);
        let key = AffinityKey::new("car", "sg", "flexible");
        pod.append_current_job("t1", 0);
        pod.append_current_job("t1", 1);
        assert_eq!(pod.available_quota(), 0);
        assert!(!pod.is_eligible(&key));

        pod.append_current_job("t1", 2);
        assert_eq!(pod.current_job_count(), 3);
        assert_eq!(pod.available_quota(), 0);
    }

    #[test]
    fn test_append_then_remove_restores_ledger() {
        let mut pod = pod(4);
        pod.append_current_job("t0", 5);
        let before = pod.current_jobs().to_vec();
        let count = pod.current_job_count();

        pod.append_current_job("t1", 3);
        assert_eq!(pod.remove_current_job("t1", Some(3)), 1);

        assert_eq!(pod.current_jobs(), before.as_slice());
        assert_eq!(pod.current_job_count(), count);
    }

    #[test]
    fn test_remove_without_index_drops_whole_task() {
        let mut pod = pod(8);
        pod.append_current_job("t1", 0);
        pod.append_current_job("t10", 0);
        pod.append_current_job("t1", 1);
        pod.append_current_job("t2", 0);

        assert_eq!(pod.remove_current_job("t1", None), 2);
        let left: Vec<String> = pod.current_jobs().iter().map(|t| t.to_string()).collect();
        assert_eq!(left, vec!["t10::0", "t2::0"]);
    }

    #[test]
    fn test_remove_reports_nothing_to_remove() {
        let mut pod = pod(1);
        pod.append_current_job("t1", 0);
        assert_eq!(pod.remove_current_job("t1", Some(1)), 0);
        assert_eq!(pod.remove_current_job("t2", None), 0);
        assert_eq!(pod.current_job_count(), 1);
    }

    #[test]
    fn test_only_running_pods_are_eligible() {
        let key = AffinityKey::new("car", "sg", "flexible");
        let mut pod = pod(1);
        assert!(pod.is_eligible(&key));
        pod.transition(PodState::Cached, Utc::now()).unwrap();
        assert!(!pod.is_eligible(&key));
    }

    #[test]
    fn test_pod_transitions() {
        let mut pod = pod(1);
        assert!(pod.transition(PodState::Applying, Utc::now()).is_err());
        pod.transition(PodState::Failed, Utc::now()).unwrap();
        pod.transition(PodState::Removed, Utc::now()).unwrap();
        assert!(pod.finished_at().is_some());
        assert!(pod.transition(PodState::Running, Utc::now()).is_err());
    }

    #[test]
    fn test_resource_meta_decodes_on_demand() {
        let mut pod = pod(1);
        assert!(pod.resource_meta().is_none());

        let mut meta = ResourceMeta::default();
        meta.spec.app.replicas = 2;
        pod.set_resource_meta(&meta);
        assert_eq!(pod.resource_meta().unwrap().spec.app.replicas, 2);

        pod.resource_meta = "{broken".to_string();
        assert!(pod.resource_meta().is_none());
    }
}
