use std::sync::Arc;
use std::thread;

use chrono::{TimeDelta, Utc};
use tempfile::TempDir;

use chunkledger::ledger::{ChunkOutcome, ClaimOutcome, LedgerError, LedgerStore};
use chunkledger::model::{
    Binding, ChunkSpec, ChunkState, ExtractedParams, JobToken, NewPod, NewTask, PodState,
    ReservationState, TaskState,
};

fn open_store() -> (LedgerStore, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = LedgerStore::open(temp_dir.path().join("ledger")).expect("Failed to open ledger");
    (store, temp_dir)
}

fn submit(store: &LedgerStore, task_id: &str, chunks: u16) {
    let new = NewTask::builder()
        .task_id(task_id)
        .num_of_chunks(chunks)
        .area("sg")
        .original_req(r#"{"route":"r1"}"#)
        .extracted_params(ExtractedParams {
            mode: Some("car".to_string()),
            option: Some("flexible".to_string()),
            ..Default::default()
        })
        .build();
    let specs = (0..chunks)
        .map(|i| {
            ChunkSpec::builder()
                .origins(format!("o{i}"))
                .destinations(format!("d{i}"))
                .build()
        })
        .collect();
    store.submit_task(new, specs).unwrap();
}

fn register(store: &LedgerStore, name: &str, cpu: u32) {
    let pod = NewPod::builder()
        .name(name)
        .cpu(cpu)
        .memory(cpu * 1024)
        .mode("car")
        .area("sg")
        .option("flexible")
        .state(PodState::Running)
        .build();
    store.register_pod(pod).unwrap();
}

fn claim_all(store: &LedgerStore, task_id: &str, indices: &[u32]) {
    for &index in indices {
        assert!(store.claim_chunk(task_id, index).unwrap().is_claimed());
    }
}

#[test]
fn test_task_lifecycle_partial_success() {
    let (store, _temp) = open_store();
    submit(&store, "t1", 3);
    register(&store, "p1", 4);
    assert!(store.pick_up_task("t1").unwrap());

    claim_all(&store, "t1", &[0, 1, 2]);
    let reservation = store
        .reserve(
            "t1",
            vec![
                Binding::new(0, "p1"),
                Binding::new(1, "p1"),
                Binding::new(2, "p1"),
            ],
        )
        .unwrap();
    store
        .advance_reservation("t1", &reservation.id, ReservationState::Applying)
        .unwrap();
    store
        .advance_reservation("t1", &reservation.id, ReservationState::Running)
        .unwrap();

    for index in 0..3 {
        store.start_chunk("t1", index, "10.0.0.7").unwrap();
    }
    store.finish_chunk("t1", 0, ChunkOutcome::Succeeded).unwrap();
    store.finish_chunk("t1", 1, ChunkOutcome::Succeeded).unwrap();

    // One chunk still running
    assert_eq!(store.aggregate_task("t1").unwrap(), TaskState::Running);
    assert_eq!(store.get_pod("p1").unwrap().unwrap().current_job_count(), 1);

    store
        .finish_chunk(
            "t1",
            2,
            ChunkOutcome::Failed {
                reason: "solver timeout".to_string(),
            },
        )
        .unwrap();
    assert_eq!(
        store.aggregate_task("t1").unwrap(),
        TaskState::PartiallySucceeded
    );

    let task = store.get_task("t1").unwrap().unwrap();
    assert!(task.finished_at().is_some());
    let errors = task.meta().unwrap().errors;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].chunk_index, 2);
    assert_eq!(errors[0].reason, "solver timeout");

    let pod = store.get_pod("p1").unwrap().unwrap();
    assert_eq!(pod.current_job_count(), 0);
    assert_eq!(pod.available_quota(), 4);

    let finished = store
        .get_reservation("t1", &reservation.id)
        .unwrap()
        .unwrap();
    assert_eq!(finished.status(), ReservationState::Finished);

    // Aggregation of a finished task is a no-op
    assert_eq!(
        store.aggregate_task("t1").unwrap(),
        TaskState::PartiallySucceeded
    );
    store
        .set_task_output("t1", "cdn://bucket/t1", "s3://bucket/t1")
        .unwrap();
    assert!(store.audit().unwrap().is_clean());
}

#[test]
fn test_all_chunks_failed() {
    let (store, _temp) = open_store();
    submit(&store, "t1", 2);
    register(&store, "p1", 2);
    store.pick_up_task("t1").unwrap();

    claim_all(&store, "t1", &[0, 1]);
    store
        .reserve("t1", vec![Binding::new(0, "p1"), Binding::new(1, "p1")])
        .unwrap();
    for index in 0..2 {
        store.start_chunk("t1", index, "10.0.0.7").unwrap();
        store
            .finish_chunk(
                "t1",
                index,
                ChunkOutcome::Failed {
                    reason: "oom".to_string(),
                },
            )
            .unwrap();
    }

    assert_eq!(store.aggregate_task("t1").unwrap(), TaskState::Failed);
    let task = store.get_task("t1").unwrap().unwrap();
    let meta = task.meta().unwrap();
    assert_eq!(meta.failure_reason.as_deref(), Some("all 2 chunks failed"));
    assert_eq!(meta.errors.len(), 2);

    // The reservation never ran, so it is failed rather than finished
    let reservations = store.list_reservations("t1").unwrap();
    assert_eq!(reservations[0].status(), ReservationState::Failed);
}

#[test]
fn test_pod_failure_requeues_only_its_chunks() {
    let (store, _temp) = open_store();
    submit(&store, "t1", 3);
    register(&store, "p1", 2);
    register(&store, "p2", 1);
    store.pick_up_task("t1").unwrap();

    claim_all(&store, "t1", &[0, 1, 2]);
    let reservation = store
        .reserve(
            "t1",
            vec![
                Binding::new(0, "p1"),
                Binding::new(1, "p1"),
                Binding::new(2, "p2"),
            ],
        )
        .unwrap();
    store.start_chunk("t1", 2, "10.0.0.9").unwrap();

    let report = store
        .reconcile_pod_failure("t1", &reservation.id, "p1", "node evicted")
        .unwrap();
    assert_eq!(report.requeued, vec![0, 1]);
    assert_eq!(report.slots_released, 2);

    let p1 = store.get_pod("p1").unwrap().unwrap();
    assert_eq!(p1.state(), PodState::Failed);
    assert_eq!(p1.current_job_count(), 0);

    // The healthy pod keeps its slot
    let p2 = store.get_pod("p2").unwrap().unwrap();
    assert!(p2.holds(&JobToken::new("t1", 2)));

    for index in [0, 1] {
        let chunk = store.get_chunk("t1", index).unwrap().unwrap();
        assert_eq!(chunk.state(), ChunkState::Pending);
        assert_eq!(chunk.retry_times, 1);
        assert_eq!(
            chunk.meta().unwrap().failure_reason.as_deref(),
            Some("node evicted")
        );
    }
    assert_eq!(
        store.get_chunk("t1", 2).unwrap().unwrap().state(),
        ChunkState::Running
    );

    let failed = store
        .get_reservation("t1", &reservation.id)
        .unwrap()
        .unwrap();
    assert_eq!(failed.status(), ReservationState::Failed);

    // The requeued chunks can be scheduled again on a fresh pod
    register(&store, "p3", 2);
    claim_all(&store, "t1", &[0, 1]);
    store
        .reserve("t1", vec![Binding::new(0, "p3"), Binding::new(1, "p3")])
        .unwrap();
    assert!(store.audit().unwrap().is_clean());

    let metrics = store.metrics();
    assert_eq!(metrics.reconciliations, 1);
    assert_eq!(metrics.chunks_requeued, 2);
    assert_eq!(metrics.reservations_created, 2);
}

#[test]
fn test_concurrent_claims_have_one_winner() {
    let (store, _temp) = open_store();
    submit(&store, "t1", 1);
    let store = Arc::new(store);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.claim_chunk("t1", 0).unwrap())
        })
        .collect();
    let outcomes: Vec<ClaimOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners = outcomes.iter().filter(|o| o.is_claimed()).count();
    assert_eq!(winners, 1);
    for outcome in outcomes.iter().filter(|o| !o.is_claimed()) {
        assert_eq!(
            outcome,
            &ClaimOutcome::LostRace {
                state: ChunkState::ResourceCreating
            }
        );
    }

    let metrics = store.metrics();
    assert_eq!(metrics.chunks_claimed, 1);
    assert_eq!(metrics.claims_lost, 7);
}

#[test]
fn test_full_pod_is_rejected() {
    let (store, _temp) = open_store();
    submit(&store, "t1", 1);
    submit(&store, "t2", 1);
    register(&store, "p1", 1);
    store.pick_up_task("t1").unwrap();
    store.pick_up_task("t2").unwrap();

    claim_all(&store, "t1", &[0]);
    store.reserve("t1", vec![Binding::new(0, "p1")]).unwrap();
    assert!(store.eligible_pods_for_task("t2").unwrap().is_empty());

    claim_all(&store, "t2", &[0]);
    let err = store.reserve("t2", vec![Binding::new(0, "p1")]).unwrap_err();
    assert!(matches!(err, LedgerError::CapacityExhausted(ref pod) if pod == "p1"));

    // Caller gives the claim back; nothing was written
    let chunk = store.unclaim_chunk("t2", 0).unwrap();
    assert_eq!(chunk.state(), ChunkState::Pending);
    assert_eq!(chunk.retry_times, 0);
    assert!(store.list_reservations("t2").unwrap().is_empty());
}

#[test]
fn test_reserve_requires_running_task() {
    let (store, _temp) = open_store();
    submit(&store, "t1", 1);
    register(&store, "p1", 1);

    claim_all(&store, "t1", &[0]);
    let err = store.reserve("t1", vec![Binding::new(0, "p1")]).unwrap_err();
    assert!(matches!(err, LedgerError::TaskNotRunning { .. }));
}

#[test]
fn test_cancel_releases_slots() {
    let (store, _temp) = open_store();
    submit(&store, "t1", 2);
    register(&store, "p1", 2);
    store.pick_up_task("t1").unwrap();

    claim_all(&store, "t1", &[0, 1]);
    store
        .reserve("t1", vec![Binding::new(0, "p1"), Binding::new(1, "p1")])
        .unwrap();

    let task = store.cancel_task("t1").unwrap();
    assert_eq!(task.state(), TaskState::Failed);
    assert_eq!(store.get_pod("p1").unwrap().unwrap().current_job_count(), 0);
    for chunk in store.list_chunks("t1").unwrap() {
        assert_eq!(chunk.state(), ChunkState::Failed);
    }
    assert!(matches!(
        store.cancel_task("t1").unwrap_err(),
        LedgerError::Model(_)
    ));
    assert!(store.audit().unwrap().is_clean());
}

#[test]
fn test_delete_cascades_to_pods() {
    let (store, _temp) = open_store();
    submit(&store, "t1", 2);
    register(&store, "p1", 2);
    store.pick_up_task("t1").unwrap();

    claim_all(&store, "t1", &[0, 1]);
    store
        .reserve("t1", vec![Binding::new(0, "p1"), Binding::new(1, "p1")])
        .unwrap();

    let stats = store.delete_task("t1").unwrap();
    assert_eq!(stats.chunks_removed, 2);
    assert_eq!(stats.reservations_removed, 1);
    assert_eq!(stats.slots_released, 2);

    assert!(store.get_task("t1").unwrap().is_none());
    assert!(store.list_chunks("t1").unwrap().is_empty());
    assert_eq!(store.get_pod("p1").unwrap().unwrap().current_job_count(), 0);
    assert!(matches!(
        store.delete_task("t1").unwrap_err(),
        LedgerError::TaskNotFound(_)
    ));
}

#[test]
fn test_prune_and_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ledger");

    {
        let store = LedgerStore::open(&path).unwrap();
        submit(&store, "old", 1);
        submit(&store, "live", 1);
        store.cancel_task("old").unwrap();

        let stats = store
            .prune_finished_before(Utc::now() + TimeDelta::minutes(1))
            .unwrap();
        assert_eq!(stats.tasks_pruned, 1);
        assert_eq!(stats.chunks_pruned, 1);
    }

    let store = LedgerStore::open(&path).unwrap();
    assert!(store.get_task("old").unwrap().is_none());
    assert_eq!(
        store.get_task("live").unwrap().unwrap().state(),
        TaskState::Pending
    );
    assert!(store.last_prune().unwrap().is_some());
    assert_eq!(store.stats().unwrap().task_count, 1);
}

#[test]
fn test_remove_pod_jobs_counts_exact_tokens() {
    let (store, _temp) = open_store();
    submit(&store, "t1", 2);
    submit(&store, "t10", 1);
    register(&store, "p1", 3);
    for task_id in ["t1", "t10"] {
        store.pick_up_task(task_id).unwrap();
    }

    claim_all(&store, "t1", &[0, 1]);
    claim_all(&store, "t10", &[0]);
    store
        .reserve("t1", vec![Binding::new(0, "p1"), Binding::new(1, "p1")])
        .unwrap();
    store.reserve("t10", vec![Binding::new(0, "p1")]).unwrap();

    assert_eq!(store.remove_pod_jobs("p1", "t1", Some(0)).unwrap(), 1);
    // Already gone
    assert_eq!(store.remove_pod_jobs("p1", "t1", Some(0)).unwrap(), 0);
    assert_eq!(store.remove_pod_jobs("p1", "t1", None).unwrap(), 1);
    assert_eq!(store.remove_pod_jobs("p1", "t1", None).unwrap(), 0);

    let pod = store.get_pod("p1").unwrap().unwrap();
    assert_eq!(pod.current_job_count(), 1);
    assert!(pod.holds(&JobToken::new("t10", 0)));
    assert_eq!(store.metrics().job_slots_released, 2);

    assert!(matches!(
        store.remove_pod_jobs("ghost", "t1", None).unwrap_err(),
        LedgerError::PodNotFound(_)
    ));
}

#[test]
fn test_cancelled_task_cannot_be_revived() {
    let (store, _temp) = open_store();
    submit(&store, "t1", 1);
    register(&store, "p1", 1);
    store.pick_up_task("t1").unwrap();

    claim_all(&store, "t1", &[0]);
    store.reserve("t1", vec![Binding::new(0, "p1")]).unwrap();
    store.start_chunk("t1", 0, "10.0.0.7").unwrap();
    store.cancel_task("t1").unwrap();

    assert!(matches!(
        store.requeue_chunk("t1", 0).unwrap_err(),
        LedgerError::TaskFinished { .. }
    ));
    assert_eq!(
        store.claim_chunk("t1", 0).unwrap(),
        ClaimOutcome::TaskFinished {
            state: TaskState::Failed
        }
    );
    assert_eq!(
        store.get_task("t1").unwrap().unwrap().state(),
        TaskState::Failed
    );
}
