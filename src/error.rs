// Error taxonomy for the exception workflow engine
//
// Domain errors (NotFound, InvalidTransition) are recovered locally inside
// bulk operations (converted to per-item skips) but surface as failures for
// single-item calls. Contract errors (UnknownAction, Classification,
// InvalidRequest) always propagate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    /// Referenced exception ID does not exist in the store
    #[error("exception {0} not found")]
    NotFound(String),

    /// Requested action is illegal from the current status
    #[error("action '{action}' is not allowed from status '{status}'")]
    InvalidTransition { action: String, status: String },

    /// Bulk action not in {assign, resolve, export}
    #[error("unknown bulk action '{0}'")]
    UnknownAction(String),

    /// Malformed MatchResult reaching the classifier (upstream contract bug)
    #[error("classification failed: {0}")]
    Classification(String),

    /// Concurrent-mutation race under the "reject" conflict policy.
    /// No partial mutation occurred; the caller may retry.
    #[error("exception {0} was modified concurrently")]
    Conflict(String),

    /// Request-shape error (e.g. bulk assign without an assignee)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Storage failure below the domain layer
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ReconError {
    pub fn invalid_transition(action: &str, status: &str) -> Self {
        ReconError::InvalidTransition {
            action: action.to_string(),
            status: status.to_string(),
        }
    }

    /// Skip reason used when this error is absorbed by a bulk operation.
    pub fn skip_reason(&self) -> &'static str {
        match self {
            ReconError::NotFound(_) => "not_found",
            ReconError::InvalidTransition { .. } => "invalid_transition",
            ReconError::Conflict(_) => "conflict",
            _ => "error",
        }
    }
}

pub type ReconResult<T> = Result<T, ReconError>;
