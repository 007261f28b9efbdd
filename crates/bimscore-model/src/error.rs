//! Error taxonomy shared by the store and the engines.

use crate::status::Role;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input caught before any I/O.
    Validation,
    /// Role may not perform the action.
    Forbidden,
    NotFound,
    /// Locked period, version mismatch, unmet approval precondition.
    /// Recoverable only by refetching current state.
    Conflict,
    /// Network failure or 5xx. Reads may fall back to the local store.
    Unavailable,
    /// Unparseable stored payload or unexpected backend shape.
    Schema,
    /// Caller broke an API contract (e.g. missing version token).
    Contract,
    Storage,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("role {role} may not {action}")]
    Forbidden { role: Role, action: &'static str },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("period {scope} is locked")]
    Locked {
        scope: String,
        snapshot_id: Option<String>,
    },

    #[error("not eligible for approval: {awaiting_review} evidence item(s) awaiting review")]
    NotEligible { awaiting_review: usize },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("version conflict: {message}")]
    VersionConflict { message: String },

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend rejected request ({code}): {message}")]
    BackendRejected {
        status: u16,
        code: String,
        message: String,
    },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("contract violation: {0}")]
    Contract(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Validation(_) => ErrorKind::Validation,
            WorkflowError::Forbidden { .. } => ErrorKind::Forbidden,
            WorkflowError::NotFound(_) => ErrorKind::NotFound,
            WorkflowError::Locked { .. }
            | WorkflowError::NotEligible { .. }
            | WorkflowError::Conflict(_)
            | WorkflowError::VersionConflict { .. } => ErrorKind::Conflict,
            WorkflowError::BackendUnavailable(_) => ErrorKind::Unavailable,
            // 4xx: never retried, never masked by a local fallback.
            WorkflowError::BackendRejected { .. } => ErrorKind::Conflict,
            WorkflowError::Schema(_) => ErrorKind::Schema,
            WorkflowError::Contract(_) => ErrorKind::Contract,
            WorkflowError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        WorkflowError::Validation(message.into())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        WorkflowError::Storage(err.to_string())
    }
}

pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;
