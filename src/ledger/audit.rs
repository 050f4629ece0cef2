//! Consistency audit over raw rows.
//!
//! The audit reads rows without rebuilding entities, so a row that would fail
//! to load (bad state code, drifted ledger count) is reported instead of
//! aborting the scan.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::{info, warn};

use crate::model::codec::decode_list;
use crate::model::{ChunkState, PodState, ReservationState, TaskState};

use super::error::Result;
use super::partitions::{CHUNK_PREFIX, POD_PREFIX, RESERVATION_PREFIX, TASK_PREFIX};
use super::records::{ChunkRow, PodRow, ReservationRow, TaskRow};
use super::store::{LedgerStore, decode_rows};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    UnknownState {
        entity: &'static str,
        key: String,
        code: u8,
    },
    ChunkCardinality {
        task_id: String,
        expected: u16,
        actual: usize,
    },
    MissingChunk {
        task_id: String,
        chunk_index: u32,
    },
    OrphanChunk {
        task_id: String,
        chunk_index: u32,
    },
    FinishedAtMismatch {
        task_id: String,
        state: &'static str,
    },
    MalformedToken {
        pod: String,
        token: String,
    },
    LedgerCountMismatch {
        pod: String,
        tokens: usize,
        count: u32,
    },
    OverCapacity {
        pod: String,
        tokens: usize,
        cpu: u32,
    },
    /// A pod holds a slot for a chunk that is not between claim and finish.
    StaleToken {
        pod: String,
        token: String,
        chunk_state: Option<&'static str>,
    },
    BindingLengthMismatch {
        reservation_id: String,
        chunks: usize,
        pods: usize,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub tasks_checked: usize,
    pub chunks_checked: usize,
    pub pods_checked: usize,
    pub reservations_checked: usize,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

impl LedgerStore {
    /// Check every stored row against the ledger invariants.
    ///
    /// All partitions are read from one snapshot.
    pub fn audit(&self) -> Result<AuditReport> {
        let tx = self.keyspace.read_tx();
        let tasks: Vec<TaskRow> = decode_rows(tx.prefix(&self.tasks, TASK_PREFIX))?;
        let chunks: Vec<ChunkRow> = decode_rows(tx.prefix(&self.chunks, CHUNK_PREFIX))?;
        let pods: Vec<PodRow> = decode_rows(tx.prefix(&self.pods, POD_PREFIX))?;
        let reservations: Vec<ReservationRow> =
            decode_rows(tx.prefix(&self.reservations, RESERVATION_PREFIX))?;

        let mut report = AuditReport {
            tasks_checked: tasks.len(),
            chunks_checked: chunks.len(),
            pods_checked: pods.len(),
            reservations_checked: reservations.len(),
            violations: Vec::new(),
        };

        let mut chunk_states = HashMap::new();
        let mut by_task: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
        for row in &chunks {
            let state = match ChunkState::from_code(row.state) {
                Ok(state) => Some(state),
                Err(_) => {
                    report.violations.push(Violation::UnknownState {
                        entity: "chunk",
                        key: format!("{}::{}", row.task_id, row.chunk_index),
                        code: row.state,
                    });
                    None
                }
            };
            chunk_states.insert((row.task_id.as_str(), row.chunk_index), state);
            by_task
                .entry(row.task_id.clone())
                .or_default()
                .insert(row.chunk_index);
        }

        for row in &tasks {
            check_task(row, by_task.remove(&row.task_id), &mut report.violations);
        }
        for (task_id, indices) in by_task {
            for chunk_index in indices {
                report.violations.push(Violation::OrphanChunk {
                    task_id: task_id.clone(),
                    chunk_index,
                });
            }
        }

        for row in &pods {
            check_pod(row, &chunk_states, &mut report.violations);
        }
        for row in &reservations {
            check_reservation(row, &mut report.violations);
        }

        if report.is_clean() {
            info!(
                tasks = report.tasks_checked,
                chunks = report.chunks_checked,
                pods = report.pods_checked,
                "Audit clean"
            );
        } else {
            warn!(violations = report.violations.len(), "Audit found violations");
        }
        Ok(report)
    }
}

fn check_task(row: &TaskRow, indices: Option<BTreeSet<u32>>, out: &mut Vec<Violation>) {
    let indices = indices.unwrap_or_default();
    if indices.len() != usize::from(row.num_of_chunks) {
        out.push(Violation::ChunkCardinality {
            task_id: row.task_id.clone(),
            expected: row.num_of_chunks,
            actual: indices.len(),
        });
    }
    for chunk_index in 0..u32::from(row.num_of_chunks) {
        if !indices.contains(&chunk_index) {
            out.push(Violation::MissingChunk {
                task_id: row.task_id.clone(),
                chunk_index,
            });
        }
    }

    match TaskState::from_code(row.state) {
        Ok(state) => {
            if state.is_terminal() != row.finished_at.is_some() {
                out.push(Violation::FinishedAtMismatch {
                    task_id: row.task_id.clone(),
                    state: state.as_str(),
                });
            }
        }
        Err(_) => out.push(Violation::UnknownState {
            entity: "task",
            key: row.task_id.clone(),
            code: row.state,
        }),
    }
}

fn check_pod(
    row: &PodRow,
    chunk_states: &HashMap<(&str, u32), Option<ChunkState>>,
    out: &mut Vec<Violation>,
) {
    if PodState::from_code(row.state).is_err() {
        out.push(Violation::UnknownState {
            entity: "pod",
            key: row.name.clone(),
            code: row.state,
        });
    }

    let raw_tokens = decode_list(&row.current_job);
    if raw_tokens.len() != row.current_job_count as usize {
        out.push(Violation::LedgerCountMismatch {
            pod: row.name.clone(),
            tokens: raw_tokens.len(),
            count: row.current_job_count,
        });
    }
    if raw_tokens.len() > row.cpu as usize {
        out.push(Violation::OverCapacity {
            pod: row.name.clone(),
            tokens: raw_tokens.len(),
            cpu: row.cpu,
        });
    }

    for (raw, parsed) in raw_tokens.iter().zip(row.tokens()) {
        let token = match parsed {
            Ok(token) => token,
            Err(_) => {
                out.push(Violation::MalformedToken {
                    pod: row.name.clone(),
                    token: raw.to_string(),
                });
                continue;
            }
        };
        let state = chunk_states
            .get(&(token.task_id.as_str(), token.chunk_index))
            .copied()
            .flatten();
        let holds_slot = matches!(
            state,
            Some(ChunkState::ResourceCreating | ChunkState::Running)
        );
        if !holds_slot {
            out.push(Violation::StaleToken {
                pod: row.name.clone(),
                token: raw.to_string(),
                chunk_state: state.map(ChunkState::as_str),
            });
        }
    }
}

fn check_reservation(row: &ReservationRow, out: &mut Vec<Violation>) {
    if ReservationState::from_code(row.state).is_err() {
        out.push(Violation::UnknownState {
            entity: "reservation",
            key: row.id.clone(),
            code: row.state,
        });
    }

    let chunks = decode_list(&row.chunk).len();
    let pods = decode_list(&row.pod).len();
    if chunks != pods {
        out.push(Violation::BindingLengthMismatch {
            reservation_id: row.id.clone(),
            chunks,
            pods,
        });
    }
}
