use thiserror::Error;

use crate::ids::NodeId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid bounds: {prev} must sort before {next}")]
    InvalidBounds { prev: String, next: String },
    #[error("invalid rank key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("moving {node} under {parent} would create a cycle")]
    CycleRejected { node: NodeId, parent: NodeId },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rank key {key} is already taken by sibling {holder}")]
    KeyCollision { key: String, holder: NodeId },
    #[error("transaction aborted by storage isolation: {0}")]
    SerializationConflict(String),
    #[error("could not complete {op} after {attempts} attempts, please retry")]
    RetriesExhausted {
        op: &'static str,
        attempts: u32,
        #[source]
        last: Box<Error>,
    },
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether re-running the whole atomic unit with fresh reads may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::KeyCollision { .. } | Error::SerializationConflict(_))
    }

    /// Stable machine-readable code used by procedure-style responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidBounds { .. } => "invalid_bounds",
            Error::InvalidKey { .. } => "invalid_key",
            Error::CycleRejected { .. } => "cycle_rejected",
            Error::NotFound(_) => "not_found",
            Error::KeyCollision { .. } => "key_collision",
            Error::SerializationConflict(_) => "serialization_conflict",
            Error::RetriesExhausted { .. } => "retries_exhausted",
            Error::InvalidOperation(_) => "invalid_operation",
            Error::InconsistentState(_) => "inconsistent_state",
            Error::Storage(_) => "storage",
            Error::Config(_) => "config",
        }
    }

    pub(crate) fn not_found(what: &str, id: NodeId) -> Self {
        Error::NotFound(format!("{what} {id}"))
    }
}
