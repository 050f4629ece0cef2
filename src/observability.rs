//! Scheduling counters and tracing setup

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Counters recorded by the ledger store
#[derive(Debug, Default)]
pub struct Metrics {
    chunks_claimed: AtomicU64,
    claims_lost: AtomicU64,
    reservations_created: AtomicU64,
    job_slots_released: AtomicU64,
    chunks_requeued: AtomicU64,
    tasks_finalized: AtomicU64,
    reconciliations: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_claimed(&self) {
        self.chunks_claimed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "chunks_claimed", "Metric incremented");
    }

    pub fn claim_lost(&self) {
        self.claims_lost.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "claims_lost", "Metric incremented");
    }

    pub fn reservation_created(&self) {
        self.reservations_created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "reservations_created", "Metric incremented");
    }

    pub fn job_slots_released(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.job_slots_released
            .fetch_add(count as u64, Ordering::Relaxed);
        tracing::debug!(counter = "job_slots_released", count, "Metric incremented");
    }

    pub fn chunk_requeued(&self) {
        self.chunks_requeued.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "chunks_requeued", "Metric incremented");
    }

    pub fn task_finalized(&self) {
        self.tasks_finalized.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "tasks_finalized", "Metric incremented");
    }

    pub fn reconciliation(&self) {
        self.reconciliations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "reconciliations", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chunks_claimed: self.chunks_claimed.load(Ordering::Relaxed),
            claims_lost: self.claims_lost.load(Ordering::Relaxed),
            reservations_created: self.reservations_created.load(Ordering::Relaxed),
            job_slots_released: self.job_slots_released.load(Ordering::Relaxed),
            chunks_requeued: self.chunks_requeued.load(Ordering::Relaxed),
            tasks_finalized: self.tasks_finalized.load(Ordering::Relaxed),
            reconciliations: self.reconciliations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub chunks_claimed: u64,
    pub claims_lost: u64,
    pub reservations_created: u64,
    pub job_slots_released: u64,
    pub chunks_requeued: u64,
    pub tasks_finalized: u64,
    pub reconciliations: u64,
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over the configured filter. Calling this twice is harmless;
/// the second install is ignored.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = Metrics::new();
        metrics.chunk_claimed();
        metrics.chunk_claimed();
        metrics.claim_lost();
        metrics.job_slots_released(3);
        metrics.job_slots_released(0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.chunks_claimed, 2);
        assert_eq!(snapshot.claims_lost, 1);
        assert_eq!(snapshot.job_slots_released, 3);
        assert_eq!(snapshot.reservations_created, 0);
    }
}
