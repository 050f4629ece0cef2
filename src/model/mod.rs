//! Entities of the scheduling ledger and their state machines.
//!
//! - [`Task`]: client-visible work, split into a fixed number of chunks
//! - [`Chunk`]: one schedulable unit of a task
//! - [`Pod`]: a capacity-bounded worker and its job-slot ledger
//! - [`Reservation`]: one scheduling attempt binding chunks to pods
//!
//! Everything here is pure and in-memory. Atomicity across entities is
//! provided by [`crate::ledger::LedgerStore`].

pub mod affinity;
pub mod chunk;
pub mod codec;
pub mod error;
pub mod meta;
pub mod pod;
pub mod reservation;
pub mod task;

pub use affinity::AffinityKey;
pub use chunk::{Chunk, ChunkSpec, ChunkState, SchemaRevision};
pub use codec::JobToken;
pub use error::ModelError;
pub use meta::{CANCELLED, ChunkError, ExtractedParams, FailureMeta, ResourceMeta};
pub use pod::{NewPod, Pod, PodState};
pub use reservation::{Binding, Reservation, ReservationState};
pub use task::{NewTask, Task, TaskState, aggregate_outcome};
