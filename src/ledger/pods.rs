//! Pod registry and job-slot ledger maintenance.

use tracing::{debug, info};

use crate::model::{AffinityKey, NewPod, Pod, PodState, ResourceMeta};

use super::error::{LedgerError, Result};
use super::partitions::{POD_PREFIX, encode_pod_key};
use super::records::PodRow;
use super::store::{LedgerStore, decode_rows, decode_value};

impl LedgerStore {
    pub fn register_pod(&self, new: NewPod) -> Result<Pod> {
        let pod = Pod::new(new, Self::now())?;

        let mut tx = self.keyspace.write_tx();
        if tx.get(&self.pods, encode_pod_key(&pod.name))?.is_some() {
            return Err(LedgerError::PodAlreadyExists(pod.name));
        }
        self.save_pod_tx(&mut tx, &pod)?;
        tx.commit()?;

        info!(
            pod = %pod.name,
            cpu = pod.cpu,
            mode = %pod.key.mode,
            area = %pod.key.area,
            option = %pod.key.option,
            "Pod registered"
        );
        Ok(pod)
    }

    pub fn get_pod(&self, name: &str) -> Result<Option<Pod>> {
        let row: Option<PodRow> = decode_value(self.pods.get(encode_pod_key(name))?)?;
        Ok(row.map(Pod::try_from).transpose()?)
    }

    pub fn list_pods(&self) -> Result<Vec<Pod>> {
        let tx = self.keyspace.read_tx();
        let rows: Vec<PodRow> = decode_rows(tx.prefix(&self.pods, POD_PREFIX))?;
        rows.into_iter()
            .map(|row| Pod::try_from(row).map_err(LedgerError::from))
            .collect()
    }

    /// Apply an orchestrator-reported lifecycle change.
    pub fn set_pod_state(&self, name: &str, state: PodState) -> Result<Pod> {
        let now = Self::now();
        let mut tx = self.keyspace.write_tx();
        let mut pod = self.load_pod_tx(&mut tx, name)?;
        let previous = pod.state();
        pod.transition(state, now)?;
        self.save_pod_tx(&mut tx, &pod)?;
        tx.commit()?;

        info!(pod = name, from = %previous, to = %state, "Pod state changed");
        Ok(pod)
    }

    pub fn set_pod_resource_meta(&self, name: &str, meta: &ResourceMeta) -> Result<Pod> {
        let now = Self::now();
        let mut tx = self.keyspace.write_tx();
        let mut pod = self.load_pod_tx(&mut tx, name)?;
        pod.set_resource_meta(meta);
        pod.updated_at = now;
        self.save_pod_tx(&mut tx, &pod)?;
        tx.commit()?;
        Ok(pod)
    }

    /// Running pods under `key` with at least one free slot.
    ///
    /// This is a snapshot; [`LedgerStore::reserve`] re-checks eligibility
    /// before issuing any slot.
    pub fn eligible_pods(&self, key: &AffinityKey) -> Result<Vec<Pod>> {
        let pods = self.list_pods()?;
        Ok(pods.into_iter().filter(|p| p.is_eligible(key)).collect())
    }

    /// Eligible pods for the affinity key of a stored task.
    pub fn eligible_pods_for_task(&self, task_id: &str) -> Result<Vec<Pod>> {
        let task = self
            .get_task(task_id)?
            .ok_or_else(|| LedgerError::TaskNotFound(task_id.to_string()))?;
        let key = task
            .affinity_key()
            .ok_or_else(|| LedgerError::NoAffinityKey(task_id.to_string()))?;
        self.eligible_pods(&key)
    }

    /// Remove job tokens of `task_id` from one pod's ledger.
    ///
    /// With `chunk_index` only that exact token goes; without it every token
    /// of the task does. Returns the number of slots released.
    pub fn remove_pod_jobs(
        &self,
        name: &str,
        task_id: &str,
        chunk_index: Option<u32>,
    ) -> Result<usize> {
        let now = Self::now();
        let mut tx = self.keyspace.write_tx();
        let mut pod = self.load_pod_tx(&mut tx, name)?;
        let removed = pod.remove_current_job(task_id, chunk_index);
        if removed == 0 {
            return Ok(0);
        }
        pod.updated_at = now;
        self.save_pod_tx(&mut tx, &pod)?;
        tx.commit()?;

        self.metrics.job_slots_released(removed);
        debug!(pod = name, task_id, ?chunk_index, removed, "Job slots released");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LedgerStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = LedgerStore::open(temp_dir.path().join("test_ledger")).unwrap();
        (store, temp_dir)
    }

    fn new_pod(name: &str, area: &str) -> NewPod {
        NewPod::builder()
            .name(name)
            .cpu(2)
            .mode("car")
            .area(area)
            .option("flexible")
            .build()
    }

    #[test]
    fn test_register_and_get_pod() {
        let (store, _temp) = create_test_store();
        store.register_pod(new_pod("p1", "sg")).unwrap();

        let pod = store.get_pod("p1").unwrap().unwrap();
        assert_eq!(pod.state(), PodState::Applying);
        assert_eq!(pod.current_job_count(), 0);
        assert!(matches!(
            store.register_pod(new_pod("p1", "sg")).unwrap_err(),
            LedgerError::PodAlreadyExists(_)
        ));
    }

    #[test]
    fn test_only_running_matching_pods_are_eligible() {
        let (store, _temp) = create_test_store();
        store.register_pod(new_pod("p1", "sg")).unwrap();
        store.register_pod(new_pod("p2", "sg")).unwrap();
        store.register_pod(new_pod("p3", "jp")).unwrap();
        store.set_pod_state("p1", PodState::Running).unwrap();
        store.set_pod_state("p3", PodState::Running).unwrap();

        let key = AffinityKey::new("car", "sg", "flexible");
        let names: Vec<String> = store
            .eligible_pods(&key)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["p1"]);
    }

    #[test]
    fn test_invalid_pod_transition_is_rejected() {
        let (store, _temp) = create_test_store();
        store.register_pod(new_pod("p1", "sg")).unwrap();
        assert!(store.set_pod_state("p1", PodState::Cached).is_err());
        assert_eq!(
            store.get_pod("p1").unwrap().unwrap().state(),
            PodState::Applying
        );
    }

    #[test]
    fn test_resource_meta_update() {
        let (store, _temp) = create_test_store();
        store.register_pod(new_pod("p1", "sg")).unwrap();

        let mut meta = ResourceMeta::default();
        meta.name = "routing-sg".to_string();
        store.set_pod_resource_meta("p1", &meta).unwrap();

        let pod = store.get_pod("p1").unwrap().unwrap();
        assert_eq!(pod.resource_meta().unwrap().name, "routing-sg");
    }
}
