//! Fjall-based persistence for the scheduling ledger
//!
//! The store keeps four kinds of rows, each in its own partition:
//!
//! - Tasks (client-visible work and its aggregated outcome)
//! - Chunks (the schedulable pieces of a task)
//! - Pods (workers, with the job-slot ledger in `current_job`)
//! - Reservations (chunk-to-pod bindings of one scheduling attempt)
//!
//! plus a metadata partition for the schema revision and the last prune time.
//!
//! ## Concurrency
//!
//! Every mutating operation is one Fjall write transaction. Write
//! transactions are serialized, which gives:
//!
//! - `claim_chunk`: a compare-and-set from `Pending`, one winner per chunk
//! - `reserve`: capacity checks and token appends that cannot interleave
//! - `finish_chunk`/`requeue_chunk`: state change and slot release together
//!
//! ## Retention
//!
//! Finished tasks past `retention.task_ttl_days` are removed with everything
//! they own by `LedgerStore::prune_expired()`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chunkledger::ledger::{ClaimOutcome, LedgerStore};
//!
//! let store = LedgerStore::open("data/ledger")?;
//! store.submit_task(new_task, chunk_specs)?;
//! if let ClaimOutcome::Claimed(chunk) = store.claim_chunk("t1", 0)? {
//!     store.reserve("t1", vec![Binding::new(chunk.chunk_index, "pod-a")])?;
//! }
//! ```

pub mod audit;
pub mod chunks;
pub mod error;
pub mod migration;
pub mod partitions;
pub mod pods;
pub mod pruning;
pub mod records;
pub mod reservations;
pub mod store;
pub mod tasks;

pub use audit::{AuditReport, Violation};
pub use chunks::{ChunkOutcome, ClaimOutcome};
pub use error::{LedgerError, Result};
pub use pruning::PruneStats;
pub use reservations::ReconcileReport;
pub use store::{LedgerStore, StoreStats};
pub use tasks::DeleteStats;
