//! Workflow state tracker.
//!
//! Reads a document's state together with everything the transition rules
//! need, and derives the flags and actions a caller is offered.

use crate::circuits::CircuitRegistry;
use crate::statuses::{is_satisfied, StatusRegistry};
use chrono::Utc;
use docflow_core::{
    Action, ActionEffect, CallerContext, CircuitDefinition, DefinitionStore, DocumentId,
    DocumentStatus, DocumentStore, DocumentWorkflowState, EntityKind, LifecycleStatus, Status,
    StatusId, Step, StepId, WorkflowError, WorkflowResult,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// A document's committed state plus the circuit data it refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub state: DocumentWorkflowState,
    pub definition: CircuitDefinition,
    pub current: Step,
    /// Statuses of every step of the circuit, sorted by id.
    pub requirements: BTreeMap<StepId, Vec<Status>>,
}

impl Snapshot {
    /// Statuses of a step of the circuit.
    pub fn statuses(&self, step_id: StepId) -> &[Status] {
        self.requirements
            .get(&step_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn current_statuses(&self) -> &[Status] {
        self.statuses(self.current.id)
    }

    /// All required statuses of the current step are complete.
    pub fn is_current_satisfied(&self) -> bool {
        is_satisfied(self.current_statuses(), &self.state.completed_status_ids)
    }
}

/// What a caller sees for a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatusView {
    #[serde(flatten)]
    pub state: DocumentWorkflowState,
    pub circuit_title: String,
    pub current_step: Step,
    pub statuses: Vec<DocumentStatus>,
    pub available_actions: Vec<Action>,
    pub can_advance_to_next_step: bool,
    pub can_return_to_previous_step: bool,
}

/// True iff the circuit is ordered, a step at `order + 1` exists and the
/// current step is satisfied.
pub fn can_advance_to_next_step(snapshot: &Snapshot) -> bool {
    snapshot.definition.circuit.has_ordered_flow
        && snapshot.definition.next_step(&snapshot.current).is_some()
        && snapshot.is_current_satisfied()
}

/// True iff backtracking is allowed and a step at `order - 1` exists.
/// Status completion is irrelevant.
pub fn can_return_to_previous_step(snapshot: &Snapshot) -> bool {
    let circuit = &snapshot.definition.circuit;
    circuit.has_ordered_flow
        && circuit.allow_backtrack
        && snapshot.definition.previous_step(&snapshot.current).is_some()
}

/// Marks the circuit completed if `step` is final and satisfied.
///
/// The only place where `Completed` is set without an explicit approval.
pub fn evaluate_completion(state: &mut DocumentWorkflowState, step: &Step, statuses: &[Status]) {
    if step.is_final_step && is_satisfied(statuses, &state.completed_status_ids) {
        state.lifecycle_status = LifecycleStatus::Completed;
        state.is_circuit_completed = true;
    }
}

/// Actions `ctx` may perform on the document right now, sorted by id.
pub fn available_actions(
    ctx: &CallerContext,
    snapshot: &Snapshot,
    actions: &[Action],
) -> Vec<Action> {
    if !ctx.can_act_on(&snapshot.current) {
        return Vec::new();
    }
    let lifecycle = snapshot.state.lifecycle_status;
    let has_next = snapshot.definition.next_step(&snapshot.current).is_some();
    let has_other_steps = snapshot.definition.steps.len() > 1;

    let mut offered: Vec<Action> = actions
        .iter()
        .filter(|action| match (lifecycle, action.effect) {
            (LifecycleStatus::Completed, _) => false,
            (LifecycleStatus::Rejected, effect) => effect == ActionEffect::Approve,
            (_, ActionEffect::Approve) => has_next || snapshot.current.is_final_step,
            (_, ActionEffect::Reject) => true,
            (_, ActionEffect::Move) => has_other_steps,
        })
        .cloned()
        .collect();
    offered.sort_by_key(|a| a.id);
    offered
}

/// Reads workflow state and derives the caller's view of it.
#[derive(Clone)]
pub struct WorkflowTracker {
    circuits: CircuitRegistry,
    statuses: StatusRegistry,
    definitions: Arc<dyn DefinitionStore>,
    documents: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for WorkflowTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowTracker").finish_non_exhaustive()
    }
}

impl WorkflowTracker {
    pub fn new(
        circuits: CircuitRegistry,
        statuses: StatusRegistry,
        definitions: Arc<dyn DefinitionStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            circuits,
            statuses,
            definitions,
            documents,
        }
    }

    /// Last committed state of a document.
    pub async fn state(&self, document_id: DocumentId) -> WorkflowResult<DocumentWorkflowState> {
        self.documents
            .state(document_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(EntityKind::Document, document_id))
    }

    pub async fn snapshot(&self, document_id: DocumentId) -> WorkflowResult<Snapshot> {
        let state = self.state(document_id).await?;
        self.snapshot_of(state).await
    }

    /// Loads the circuit data a state refers to.
    pub async fn snapshot_of(&self, state: DocumentWorkflowState) -> WorkflowResult<Snapshot> {
        let (circuit_id, step_id) = match (state.circuit_id, state.current_step_id) {
            (Some(circuit_id), Some(step_id)) => (circuit_id, step_id),
            _ => {
                return Err(WorkflowError::Validation(format!(
                    "document {} is not assigned to a circuit",
                    state.document_id
                )))
            }
        };
        let definition = self.circuits.definition(circuit_id).await?;
        let current = definition.step(step_id).cloned().ok_or_else(|| {
            WorkflowError::Storage(format!(
                "document {} references step {step_id} outside circuit {circuit_id}",
                state.document_id
            ))
        })?;

        let mut requirements = BTreeMap::new();
        for step in &definition.steps {
            requirements.insert(step.id, self.statuses.get_requirements(step.id).await?);
        }

        Ok(Snapshot {
            state,
            definition,
            current,
            requirements,
        })
    }

    /// The document's state, checklist, flags and the actions `ctx` may take.
    pub async fn get_status(
        &self,
        ctx: &CallerContext,
        document_id: DocumentId,
    ) -> WorkflowResult<WorkflowStatusView> {
        let snapshot = self.snapshot(document_id).await?;
        let actions = self.definitions.actions().await?;
        Ok(self.view(ctx, snapshot, &actions))
    }

    /// Builds the caller's view of a snapshot.
    pub fn view(
        &self,
        ctx: &CallerContext,
        snapshot: Snapshot,
        actions: &[Action],
    ) -> WorkflowStatusView {
        let statuses = snapshot
            .current_statuses()
            .iter()
            .map(|status| {
                let completion = snapshot.state.completions.get(&status.id);
                DocumentStatus {
                    status: status.clone(),
                    is_complete: snapshot.state.completed_status_ids.contains(&status.id),
                    completed_by: completion.map(|c| c.completed_by.clone()),
                    completed_at: completion.map(|c| c.completed_at),
                }
            })
            .collect();
        let available_actions = available_actions(ctx, &snapshot, actions);
        let can_advance_to_next_step = can_advance_to_next_step(&snapshot);
        let can_return_to_previous_step = can_return_to_previous_step(&snapshot);

        WorkflowStatusView {
            circuit_title: snapshot.definition.circuit.title,
            current_step: snapshot.current,
            state: snapshot.state,
            statuses,
            available_actions,
            can_advance_to_next_step,
            can_return_to_previous_step,
        }
    }

    /// Toggles a status of the current step and returns the new state.
    ///
    /// A completed status records `completed_by` and the time. Completes
    /// the circuit when the current step is final and now satisfied.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::InvalidStatus`] if the status belongs to another step.
    pub fn mark_status_complete(
        &self,
        snapshot: &Snapshot,
        status_id: StatusId,
        is_complete: bool,
        completed_by: &str,
    ) -> WorkflowResult<DocumentWorkflowState> {
        if !snapshot.current_statuses().iter().any(|s| s.id == status_id) {
            return Err(WorkflowError::InvalidStatus {
                status_id,
                step_id: snapshot.current.id,
            });
        }

        let now = Utc::now();
        let mut state = snapshot.state.clone();
        if is_complete {
            state.complete_status(status_id, completed_by, now);
        } else {
            state.reopen_status(status_id);
        }
        if state.lifecycle_status == LifecycleStatus::Draft {
            state.lifecycle_status = LifecycleStatus::InProgress;
        }
        evaluate_completion(&mut state, &snapshot.current, snapshot.current_statuses());
        state.updated_at = now;

        if state.is_circuit_completed {
            info!(document_id = %state.document_id, step_id = %snapshot.current.id, "Circuit completed");
        }
        Ok(state)
    }
}
