//! Storage seams.
//!
//! The engine never talks to a database directly. Circuits, steps, statuses
//! and actions are reference data behind [`DefinitionStore`]; workflow state
//! and history are per-document transactional data behind [`DocumentStore`].
//! Neither trait carries transition rules.

use crate::action::{Action, NewAction};
use crate::circuit::{Circuit, NewCircuit, NewStep, Step};
use crate::error::WorkflowResult;
use crate::history::{HistoryEntry, HistoryQuery, NewHistoryEntry};
use crate::ids::{ActionId, CircuitId, DocumentId, StatusId, StepId};
use crate::state::{DocumentWorkflowState, Version};
use crate::status::{NewStatus, Status};
use async_trait::async_trait;

/// Reference data: circuits, steps, statuses and actions.
///
/// Insert methods allocate ids and keys. Removing a circuit removes its
/// steps and their statuses; removing a step removes its statuses.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn insert_circuit(&self, circuit: NewCircuit) -> WorkflowResult<Circuit>;

    async fn update_circuit(&self, circuit: Circuit) -> WorkflowResult<()>;

    async fn remove_circuit(&self, id: CircuitId) -> WorkflowResult<()>;

    async fn circuit(&self, id: CircuitId) -> WorkflowResult<Option<Circuit>>;

    async fn circuits(&self) -> WorkflowResult<Vec<Circuit>>;

    async fn insert_step(&self, circuit_id: CircuitId, step: NewStep) -> WorkflowResult<Step>;

    /// Replaces several steps in one write.
    async fn update_steps(&self, steps: Vec<Step>) -> WorkflowResult<()>;

    /// Removes a step with its statuses and stores `reindexed`, the
    /// circuit's remaining steps with their new order indices, in the same
    /// write.
    async fn remove_step(&self, id: StepId, reindexed: Vec<Step>) -> WorkflowResult<()>;

    async fn step(&self, id: StepId) -> WorkflowResult<Option<Step>>;

    /// Steps of a circuit, in no particular order.
    async fn steps(&self, circuit_id: CircuitId) -> WorkflowResult<Vec<Step>>;

    async fn insert_status(&self, step_id: StepId, status: NewStatus) -> WorkflowResult<Status>;

    async fn update_status(&self, status: Status) -> WorkflowResult<()>;

    async fn remove_status(&self, id: StatusId) -> WorkflowResult<()>;

    async fn status(&self, id: StatusId) -> WorkflowResult<Option<Status>>;

    async fn statuses(&self, step_id: StepId) -> WorkflowResult<Vec<Status>>;

    async fn insert_action(&self, action: NewAction) -> WorkflowResult<Action>;

    async fn action(&self, id: ActionId) -> WorkflowResult<Option<Action>>;

    async fn actions(&self) -> WorkflowResult<Vec<Action>>;
}

/// A state write and its history record, applied as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// The new state. Its `version` is overwritten by the store.
    pub state: DocumentWorkflowState,
    /// `None` creates the state; `Some(v)` requires the stored version to be `v`.
    pub expected_version: Option<Version>,
    pub entry: NewHistoryEntry,
}

/// Transactional per-document data: workflow state and history.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn state(&self, id: DocumentId) -> WorkflowResult<Option<DocumentWorkflowState>>;

    async fn states(&self) -> WorkflowResult<Vec<DocumentWorkflowState>>;

    /// Writes the state and appends the history entry, or does neither.
    ///
    /// # Errors
    ///
    /// - [`StateConflict`](crate::WorkflowError::StateConflict) if the stored
    ///   version does not match `expected_version`
    /// - [`Storage`](crate::WorkflowError::Storage) if the store fails
    async fn commit(&self, commit: Commit) -> WorkflowResult<(DocumentWorkflowState, HistoryEntry)>;

    /// Matching entries in insertion order.
    async fn history(&self, query: HistoryQuery) -> WorkflowResult<Vec<HistoryEntry>>;
}
