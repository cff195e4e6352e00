//! Workflow error types.

use crate::ids::{CircuitId, DocumentId, StatusId, StepId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of entity a [`WorkflowError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// A circuit definition.
    Circuit,
    /// A step of a circuit.
    Step,
    /// A status attached to a step.
    Status,
    /// A document's workflow state.
    Document,
    /// A workflow action.
    Action,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Circuit => write!(f, "circuit"),
            EntityKind::Step => write!(f, "step"),
            EntityKind::Status => write!(f, "status"),
            EntityKind::Document => write!(f, "document"),
            EntityKind::Action => write!(f, "action"),
        }
    }
}

/// Stable, serializable classification of a [`WorkflowError`].
///
/// Callers map these to notifications; the string form never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request.
    Validation,
    /// Unknown document, circuit, step, status or action.
    NotFound,
    /// Required statuses of the current step are incomplete.
    RequirementsNotMet,
    /// Return requested on a circuit that forbids backtracking.
    BacktrackNotAllowed,
    /// Advance that skips one or more steps of an ordered circuit.
    StepSkip,
    /// Move to the step the document already occupies.
    NoOpTransition,
    /// Caller's role may not act on the step.
    PermissionDenied,
    /// Concurrent modification of a document's workflow state.
    StateConflict,
    /// Deleting configuration that documents still use.
    Conflict,
    /// Status does not belong to the document's current step.
    InvalidStatus,
    /// Engine assembled with missing or invalid parts.
    Configuration,
    /// Backing store failure.
    Storage,
}

impl ErrorKind {
    /// Returns the stable snake_case name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RequirementsNotMet => "requirements_not_met",
            ErrorKind::BacktrackNotAllowed => "backtrack_not_allowed",
            ErrorKind::StepSkip => "step_skip",
            ErrorKind::NoOpTransition => "no_op_transition",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidStatus => "invalid_status",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by the circuit engine.
///
/// None of these are swallowed: every failed operation leaves the document's
/// state untouched and returns one of these variants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WorkflowError {
    /// The request is malformed or violates a configuration rule.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What kind of entity was looked up.
        kind: EntityKind,
        /// The raw id that was looked up.
        id: u64,
    },

    /// The current step still has incomplete required statuses.
    #[error("Requirements of step {step_id} are not met: missing statuses {missing:?}")]
    RequirementsNotMet {
        /// The step being left.
        step_id: StepId,
        /// Required statuses that are not complete.
        missing: Vec<StatusId>,
    },

    /// The circuit does not allow returning to an earlier step.
    #[error("Circuit {circuit_id} does not allow returning to a previous step")]
    BacktrackNotAllowed {
        /// The circuit the document is in.
        circuit_id: CircuitId,
    },

    /// The move would skip steps of an ordered circuit.
    #[error("Cannot skip steps: order {from_order} to order {to_order}")]
    StepSkip {
        /// Order index of the current step.
        from_order: u32,
        /// Order index of the requested step.
        to_order: u32,
    },

    /// The document already occupies the requested step.
    #[error("Document is already at step {0}")]
    NoOpTransition(StepId),

    /// The caller may not act on the step.
    #[error("Permission denied on step {step_id}: {reason}")]
    PermissionDenied {
        /// The step the caller tried to act on.
        step_id: StepId,
        /// Why the capability check failed.
        reason: String,
    },

    /// The document was modified concurrently; re-fetch and resubmit.
    #[error("Workflow state of document {document_id} changed concurrently: {details}")]
    StateConflict {
        /// The contended document.
        document_id: DocumentId,
        /// What did not match.
        details: String,
    },

    /// Configuration is still in use and cannot be deleted.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The status is not part of the document's current step.
    #[error("Status {status_id} does not belong to the current step {step_id}")]
    InvalidStatus {
        /// The offending status.
        status_id: StatusId,
        /// The document's current step.
        step_id: StepId,
    },

    /// The engine was assembled incorrectly.
    #[error("Invalid engine configuration: {0}")]
    Configuration(String),

    /// The backing store failed.
    #[error("Storage failure: {0}")]
    Storage(String),
}

impl WorkflowError {
    /// Shorthand for a [`WorkflowError::NotFound`].
    pub fn not_found(kind: EntityKind, id: impl Into<u64>) -> Self {
        WorkflowError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Returns the stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Validation(_) => ErrorKind::Validation,
            WorkflowError::NotFound { .. } => ErrorKind::NotFound,
            WorkflowError::RequirementsNotMet { .. } => ErrorKind::RequirementsNotMet,
            WorkflowError::BacktrackNotAllowed { .. } => ErrorKind::BacktrackNotAllowed,
            WorkflowError::StepSkip { .. } => ErrorKind::StepSkip,
            WorkflowError::NoOpTransition(_) => ErrorKind::NoOpTransition,
            WorkflowError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            WorkflowError::StateConflict { .. } => ErrorKind::StateConflict,
            WorkflowError::Conflict(_) => ErrorKind::Conflict,
            WorkflowError::InvalidStatus { .. } => ErrorKind::InvalidStatus,
            WorkflowError::Configuration(_) => ErrorKind::Configuration,
            WorkflowError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Only concurrent modification is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::StateConflict { .. })
    }
}

/// Result alias used throughout the engine.
pub type WorkflowResult<T> = Result<T, WorkflowError>;
