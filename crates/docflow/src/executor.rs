//! Action executor.
//!
//! Every mutation runs as one unit of work under the document's lock:
//! load, authorize, check the version, compute the new state, then commit
//! the state and its history entry together.

use crate::circuits::CircuitRegistry;
use crate::locks::{DocumentGuard, DocumentLocks};
use crate::resolver::{classify, Transition, TransitionKind, TransitionResolver};
use crate::statuses::StatusRegistry;
use crate::tracker::{evaluate_completion, Snapshot, WorkflowTracker};
use chrono::Utc;
use docflow_core::{
    Action, ActionEffect, ActionId, CallerContext, CircuitId, Commit, DefinitionStore,
    DocumentId, DocumentStore, DocumentWorkflowState, EntityKind, LifecycleStatus,
    NewHistoryEntry, StatusId, StepId, Version, WorkflowError, WorkflowResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedRwLockReadGuard;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignCircuit {
    pub document_id: DocumentId,
    pub circuit_id: CircuitId,
}

/// Approve, reject or move a document through a registered action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformAction {
    pub document_id: DocumentId,
    pub action_id: ActionId,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub is_approved: bool,
    /// Required by move actions; optional return target of a rejection.
    #[serde(default)]
    pub target_step_id: Option<StepId>,
    #[serde(default)]
    pub expected_version: Option<Version>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveToNextStep {
    pub document_id: DocumentId,
    /// The step the caller believes the document is on.
    pub current_step_id: StepId,
    pub next_step_id: StepId,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub expected_version: Option<Version>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveToStep {
    pub document_id: DocumentId,
    pub target_step_id: StepId,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub expected_version: Option<Version>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteStatus {
    pub document_id: DocumentId,
    pub status_id: StatusId,
    pub is_complete: bool,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub expected_version: Option<Version>,
}

// The outcome of a rule check, not yet committed.
struct Mutation {
    state: DocumentWorkflowState,
    action_id: Option<ActionId>,
    status_id: Option<StatusId>,
    comments: String,
    is_approved: bool,
}

// A checked mutation still holding the document lock and the shared side
// of the layout lock.
struct Pending {
    mutation: Mutation,
    version: Version,
    step_id: StepId,
    _guard: DocumentGuard,
    _layout: OwnedRwLockReadGuard<()>,
}

impl Mutation {
    fn new(state: DocumentWorkflowState, comments: String, is_approved: bool) -> Self {
        Self {
            state,
            action_id: None,
            status_id: None,
            comments,
            is_approved,
        }
    }
}

/// Applies transitions, actions and status toggles.
#[derive(Clone)]
pub struct ActionExecutor {
    tracker: WorkflowTracker,
    resolver: TransitionResolver,
    circuits: CircuitRegistry,
    statuses: StatusRegistry,
    definitions: Arc<dyn DefinitionStore>,
    documents: Arc<dyn DocumentStore>,
    locks: Arc<DocumentLocks>,
    lock_timeout: Duration,
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("resolver", &self.resolver)
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

impl ActionExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tracker: WorkflowTracker,
        resolver: TransitionResolver,
        circuits: CircuitRegistry,
        statuses: StatusRegistry,
        definitions: Arc<dyn DefinitionStore>,
        documents: Arc<dyn DocumentStore>,
        locks: Arc<DocumentLocks>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            tracker,
            resolver,
            circuits,
            statuses,
            definitions,
            documents,
            locks,
            lock_timeout,
        }
    }

    /// Places a document on the entry step of an active circuit.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::Validation`] if the circuit is inactive or empty, or
    /// the document already belongs to a circuit.
    pub async fn assign_circuit(
        &self,
        ctx: &CallerContext,
        request: AssignCircuit,
    ) -> WorkflowResult<DocumentWorkflowState> {
        let AssignCircuit {
            document_id,
            circuit_id,
        } = request;
        let _guard = self.locks.acquire(document_id, self.lock_timeout).await?;
        let _layout = self.circuits.layout().shared().await;

        let existing = self.documents.state(document_id).await?;
        if let Some(existing) = &existing {
            if let Some(assigned) = existing.circuit_id {
                return Err(WorkflowError::Validation(format!(
                    "document {document_id} is already assigned to circuit {assigned}"
                )));
            }
        }

        let definition = self.circuits.definition(circuit_id).await?;
        if !definition.circuit.is_active {
            return Err(WorkflowError::Validation(format!(
                "circuit {} is inactive",
                definition.circuit.key
            )));
        }
        let entry = definition.entry_step().cloned().ok_or_else(|| {
            WorkflowError::Validation(format!("circuit {} has no steps", definition.circuit.key))
        })?;
        if !ctx.can_act_on(&entry) {
            return Err(denied(ctx, &entry));
        }

        let now = Utc::now();
        let mut state = DocumentWorkflowState::assigned(document_id, circuit_id, entry.id, now);
        let entry_statuses = self.statuses.get_requirements(entry.id).await?;
        evaluate_completion(&mut state, &entry, &entry_statuses);

        let (state, _) = self
            .documents
            .commit(Commit {
                state,
                expected_version: existing.map(|s| s.version),
                entry: NewHistoryEntry {
                    document_id,
                    step_id: entry.id,
                    action_id: None,
                    status_id: None,
                    processed_by: ctx.user.clone(),
                    processed_at: now,
                    comments: format!("assigned to circuit {}", definition.circuit.key),
                    is_approved: true,
                },
            })
            .await?;

        info!(
            document_id = %document_id,
            circuit_id = %circuit_id,
            step_id = %entry.id,
            user = %ctx.user,
            "Circuit assigned"
        );
        Ok(state)
    }

    /// Runs a registered action against a document.
    ///
    /// Approving a rejected document re-submits it on its current step.
    pub async fn perform_action(
        &self,
        ctx: &CallerContext,
        request: PerformAction,
    ) -> WorkflowResult<DocumentWorkflowState> {
        let action = self.action(request.action_id).await?;
        if let Some(target) = request.target_step_id {
            self.circuits.step(target).await?;
        }

        let PerformAction {
            document_id,
            comments,
            is_approved,
            target_step_id,
            expected_version,
            ..
        } = request;

        let mutation = match action.effect {
            ActionEffect::Approve => {
                self.mutate(ctx, document_id, expected_version, |snap| {
                    self.approve(snap, comments, is_approved)
                })
                .await
            }
            ActionEffect::Reject => {
                self.mutate(ctx, document_id, expected_version, |snap| {
                    reject(snap, target_step_id, comments, is_approved)
                })
                .await
            }
            ActionEffect::Move => {
                let target = target_step_id.ok_or_else(|| {
                    WorkflowError::Validation(format!(
                        "action {} requires a target step",
                        action.key
                    ))
                })?;
                self.mutate(ctx, document_id, expected_version, |snap| {
                    ensure_open(snap)?;
                    let transition = self.resolver.resolve(snap, target)?;
                    Ok(Mutation::new(enter(snap, &transition), comments, is_approved))
                })
                .await
            }
        };

        let mut pending = mutation?;
        pending.mutation.action_id = Some(action.id);
        self.commit(ctx, document_id, pending, &action.key).await
    }

    /// Advances an ordered circuit by exactly one step.
    ///
    /// In unordered circuits this is a plain move.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::StateConflict`] if the document is no longer on
    /// `current_step_id`.
    pub async fn move_to_next_step(
        &self,
        ctx: &CallerContext,
        request: MoveToNextStep,
    ) -> WorkflowResult<DocumentWorkflowState> {
        self.circuits.step(request.next_step_id).await?;
        let MoveToNextStep {
            document_id,
            current_step_id,
            next_step_id,
            comments,
            expected_version,
        } = request;

        let pending = self
            .mutate(ctx, document_id, expected_version, |snap| {
                if snap.current.id != current_step_id {
                    return Err(WorkflowError::StateConflict {
                        document_id,
                        details: format!(
                            "document is on step {}, not {current_step_id}",
                            snap.current.id
                        ),
                    });
                }
                ensure_open(snap)?;
                let transition = self.resolver.resolve(snap, next_step_id)?;
                let behind = snap
                    .definition
                    .step(next_step_id)
                    .is_some_and(|s| s.order_index <= snap.current.order_index);
                if transition.kind == TransitionKind::Return || behind {
                    return Err(WorkflowError::Validation(format!(
                        "step {next_step_id} is not ahead of step {}",
                        snap.current.key
                    )));
                }
                Ok(Mutation::new(enter(snap, &transition), comments, true))
            })
            .await?;
        self.commit(ctx, document_id, pending, "advance").await
    }

    /// Moves a document to any step the transition rules allow.
    pub async fn move_to_step(
        &self,
        ctx: &CallerContext,
        request: MoveToStep,
    ) -> WorkflowResult<DocumentWorkflowState> {
        self.circuits.step(request.target_step_id).await?;
        let MoveToStep {
            document_id,
            target_step_id,
            comments,
            expected_version,
        } = request;

        let pending = self
            .mutate(ctx, document_id, expected_version, |snap| {
                ensure_open(snap)?;
                let transition = self.resolver.resolve(snap, target_step_id)?;
                let is_approved = transition.kind != TransitionKind::Return;
                Ok(Mutation::new(enter(snap, &transition), comments, is_approved))
            })
            .await?;
        self.commit(ctx, document_id, pending, "move").await
    }

    /// Toggles a status of the document's current step.
    pub async fn complete_status(
        &self,
        ctx: &CallerContext,
        request: CompleteStatus,
    ) -> WorkflowResult<DocumentWorkflowState> {
        self.statuses.status(request.status_id).await?;
        let CompleteStatus {
            document_id,
            status_id,
            is_complete,
            comments,
            expected_version,
        } = request;

        let mut pending = self
            .mutate(ctx, document_id, expected_version, |snap| {
                ensure_open(snap)?;
                let state = self
                    .tracker
                    .mark_status_complete(snap, status_id, is_complete, &ctx.user)?;
                Ok(Mutation::new(state, comments, is_complete))
            })
            .await?;
        pending.mutation.status_id = Some(status_id);
        self.commit(ctx, document_id, pending, "status").await
    }

    fn approve(
        &self,
        snap: &Snapshot,
        comments: String,
        is_approved: bool,
    ) -> WorkflowResult<Mutation> {
        match snap.state.lifecycle_status {
            LifecycleStatus::Rejected => {
                let mut state = snap.state.clone();
                state.lifecycle_status = LifecycleStatus::InProgress;
                state.updated_at = Utc::now();
                return Ok(Mutation::new(state, comments, is_approved));
            }
            LifecycleStatus::Completed => return Err(closed(snap)),
            LifecycleStatus::Draft | LifecycleStatus::InProgress => {}
        }

        if snap.current.is_final_step {
            let missing = crate::statuses::missing_requirements(
                snap.current_statuses(),
                &snap.state.completed_status_ids,
            );
            if !missing.is_empty() {
                return Err(WorkflowError::RequirementsNotMet {
                    step_id: snap.current.id,
                    missing,
                });
            }
            let mut state = snap.state.clone();
            state.lifecycle_status = LifecycleStatus::Completed;
            state.is_circuit_completed = true;
            state.updated_at = Utc::now();
            return Ok(Mutation::new(state, comments, is_approved));
        }

        let next = snap.definition.next_step(&snap.current).ok_or_else(|| {
            WorkflowError::Validation(format!(
                "step {} has no next step to approve into",
                snap.current.key
            ))
        })?;
        let transition = self.resolver.resolve(snap, next.id)?;
        Ok(Mutation::new(enter(snap, &transition), comments, is_approved))
    }

    // Lock, load, authorize and version-check, then hand the snapshot to `apply`.
    async fn mutate<F>(
        &self,
        ctx: &CallerContext,
        document_id: DocumentId,
        expected_version: Option<Version>,
        apply: F,
    ) -> WorkflowResult<Pending>
    where
        F: FnOnce(&Snapshot) -> WorkflowResult<Mutation>,
    {
        let guard = self.locks.acquire(document_id, self.lock_timeout).await?;
        let layout = self.circuits.layout().shared().await;
        let snap = self.tracker.snapshot(document_id).await?;

        if !ctx.can_act_on(&snap.current) {
            return Err(denied(ctx, &snap.current));
        }
        if let Some(expected) = expected_version {
            if expected != snap.state.version {
                warn!(
                    document_id = %document_id,
                    expected = %expected,
                    found = %snap.state.version,
                    "Stale version"
                );
                return Err(WorkflowError::StateConflict {
                    document_id,
                    details: format!("expected {expected}, found {}", snap.state.version),
                });
            }
        }

        let mutation = apply(&snap)?;
        Ok(Pending {
            mutation,
            version: snap.state.version,
            step_id: snap.current.id,
            _guard: guard,
            _layout: layout,
        })
    }

    async fn commit(
        &self,
        ctx: &CallerContext,
        document_id: DocumentId,
        pending: Pending,
        label: &str,
    ) -> WorkflowResult<DocumentWorkflowState> {
        let Pending {
            mutation,
            version,
            step_id,
            _guard,
            _layout,
        } = pending;
        let Mutation {
            state,
            action_id,
            status_id,
            comments,
            is_approved,
        } = mutation;

        let (state, entry) = self
            .documents
            .commit(Commit {
                state,
                expected_version: Some(version),
                entry: NewHistoryEntry {
                    document_id,
                    step_id,
                    action_id,
                    status_id,
                    processed_by: ctx.user.clone(),
                    processed_at: Utc::now(),
                    comments,
                    is_approved,
                },
            })
            .await?;

        info!(
            document_id = %document_id,
            action = label,
            from = %step_id,
            step_id = ?state.current_step_id,
            lifecycle = %state.lifecycle_status,
            version = %state.version,
            history_id = %entry.id,
            user = %ctx.user,
            "Workflow updated"
        );
        Ok(state)
    }

    async fn action(&self, id: ActionId) -> WorkflowResult<Action> {
        self.definitions
            .action(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(EntityKind::Action, id))
    }
}

fn reject(
    snap: &Snapshot,
    target: Option<StepId>,
    comments: String,
    is_approved: bool,
) -> WorkflowResult<Mutation> {
    ensure_open(snap)?;
    let mut state = match target {
        Some(target) => {
            let kind = classify(&snap.definition, &snap.current, target)?;
            let to = snap
                .definition
                .step(target)
                .ok_or_else(|| WorkflowError::not_found(EntityKind::Step, target))?;
            // Only back to an earlier, non-final step.
            if kind == TransitionKind::Advance
                || to.is_final_step
                || to.order_index >= snap.current.order_index
            {
                return Err(WorkflowError::Validation(
                    "a rejection can only send the document back to an earlier step"
                        .to_string(),
                ));
            }
            enter(
                snap,
                &Transition {
                    kind,
                    from: snap.current.id,
                    to: target,
                },
            )
        }
        None => snap.state.clone(),
    };
    state.lifecycle_status = LifecycleStatus::Rejected;
    state.is_circuit_completed = false;
    state.updated_at = Utc::now();
    Ok(Mutation::new(state, comments, is_approved))
}

// New state after entering the transition's target step.
fn enter(snap: &Snapshot, transition: &Transition) -> DocumentWorkflowState {
    let mut state = snap.state.clone();
    state.enter_step(transition.to);
    if state.lifecycle_status == LifecycleStatus::Draft {
        state.lifecycle_status = LifecycleStatus::InProgress;
    }
    if let Some(step) = snap.definition.step(transition.to) {
        evaluate_completion(&mut state, step, snap.statuses(transition.to));
    }
    state.updated_at = Utc::now();
    state
}

fn ensure_open(snap: &Snapshot) -> WorkflowResult<()> {
    if snap.state.is_closed() {
        return Err(closed(snap));
    }
    Ok(())
}

fn closed(snap: &Snapshot) -> WorkflowError {
    WorkflowError::Validation(format!(
        "document {} is {}",
        snap.state.document_id, snap.state.lifecycle_status
    ))
}

fn denied(ctx: &CallerContext, step: &docflow_core::Step) -> WorkflowError {
    warn!(user = %ctx.user, role = %ctx.role, step_id = %step.id, "Permission denied");
    WorkflowError::PermissionDenied {
        step_id: step.id,
        reason: format!("role {} cannot act on step {}", ctx.role, step.key),
    }
}
