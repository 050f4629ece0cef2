use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: &'static str,
        to: &'static str,
    },

    #[error("unknown {kind} state code: {code}")]
    UnknownState { kind: &'static str, code: u8 },

    #[error("invalid {kind} identifier: {value:?}")]
    InvalidIdentifier { kind: &'static str, value: String },

    #[error("malformed job token: {0:?}")]
    InvalidToken(String),

    #[error("pod {pod} ledger holds {tokens} tokens but current_job_count is {count}")]
    LedgerCountMismatch {
        pod: String,
        tokens: usize,
        count: u32,
    },

    #[error("reservation binds {chunks} chunks to {pods} pods")]
    BindingLengthMismatch { chunks: usize, pods: usize },

    #[error("task must have at least one chunk")]
    EmptyTask,

    #[error("output can only be recorded on a succeeded task (state: {0})")]
    OutputOnUnsuccessfulTask(&'static str),
}

pub type Result<T> = std::result::Result<T, ModelError>;
