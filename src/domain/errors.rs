//! Error types for the workflow run domain.

use crate::domain::run::RunStatus;
use thiserror::Error;

/// Errors raised by aggregates, ports and use cases.
///
/// Every variant carries a stable machine-readable [`code`](Self::code) and a
/// [`transient`](Self::is_transient) flag so callers can decide whether a
/// reload-and-retry makes sense.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    /// Malformed configuration rejected at construction.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Illegal run status change.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: RunStatus, to: RunStatus },

    /// Illegal task/work execution status change.
    #[error("invalid execution transition: {message}")]
    InvalidExecutionTransition { message: String },

    /// Attempt to edit a step that has already started or completed.
    #[error("work node {sequence} is locked (current work index {current_index})")]
    WorkNodeLocked { sequence: u32, current_index: usize },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Optimistic lock failure (concurrent modification detected).
    #[error("concurrent modification of {kind} '{id}': expected version {expected}, found {actual}")]
    OptimisticLock {
        kind: &'static str,
        id: String,
        expected: u64,
        actual: u64,
    },

    /// Git, filesystem or storage failure.
    #[error("{operation} failed: {message}")]
    Infrastructure { operation: String, message: String },

    /// Checkpoint does not belong to the run or cannot be applied.
    #[error("checkpoint '{checkpoint_id}' is invalid: {reason}")]
    CheckpointInvalid {
        checkpoint_id: String,
        reason: String,
    },

    /// A git or MCP reference is no longer valid.
    #[error("reference '{id}' is no longer valid")]
    InvalidReference { id: String },

    #[error("file '{path}' is {size} bytes, above the {limit} byte limit")]
    FileTooLarge { path: String, size: u64, limit: u64 },

    #[error("path '{path}' escapes the workspace")]
    PathRejected { path: String },
}

impl WorkflowError {
    /// Stable snake_case code for callers mapping errors to responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "invalid_config",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::InvalidExecutionTransition { .. } => "invalid_execution_transition",
            Self::WorkNodeLocked { .. } => "work_node_locked",
            Self::NotFound { .. } => "not_found",
            Self::OptimisticLock { .. } => "optimistic_lock",
            Self::Infrastructure { .. } => "infrastructure",
            Self::CheckpointInvalid { .. } => "checkpoint_invalid",
            Self::InvalidReference { .. } => "invalid_reference",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::PathRejected { .. } => "path_rejected",
        }
    }

    /// Returns true if retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::OptimisticLock { .. } | Self::Infrastructure { .. }
        )
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn infra(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Infrastructure {
            operation: operation.into(),
            message: err.to_string(),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
