//! Per-document workflow state.

use crate::ids::{CircuitId, DocumentId, StatusId, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Coarse state of a document's participation in its circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleStatus {
    /// Assigned, nobody has acted yet.
    Draft,
    InProgress,
    Completed,
    /// Awaiting re-submission.
    Rejected,
}

impl LifecycleStatus {
    /// Completed and rejected documents are logically closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, LifecycleStatus::Completed | LifecycleStatus::Rejected)
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleStatus::Draft => write!(f, "Draft"),
            LifecycleStatus::InProgress => write!(f, "InProgress"),
            LifecycleStatus::Completed => write!(f, "Completed"),
            LifecycleStatus::Rejected => write!(f, "Rejected"),
        }
    }
}

/// Optimistic concurrency token of a [`DocumentWorkflowState`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Version of a freshly created state.
    pub const INITIAL: Version = Version(1);

    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// The version the next commit produces.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Who completed a status, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCompletion {
    pub completed_by: String,
    pub completed_at: DateTime<Utc>,
}

/// Where a document sits in its circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentWorkflowState {
    pub document_id: DocumentId,
    pub circuit_id: Option<CircuitId>,
    /// Always a step of `circuit_id` when set.
    pub current_step_id: Option<StepId>,
    pub lifecycle_status: LifecycleStatus,
    /// Completed statuses of the current step only; cleared on every step change.
    pub completed_status_ids: BTreeSet<StatusId>,
    /// Attribution for entries of `completed_status_ids`.
    #[serde(default)]
    pub completions: BTreeMap<StatusId, StatusCompletion>,
    pub is_circuit_completed: bool,
    pub version: Version,
    pub updated_at: DateTime<Utc>,
}

impl DocumentWorkflowState {
    /// A document freshly placed on the entry step of a circuit.
    pub fn assigned(
        document_id: DocumentId,
        circuit_id: CircuitId,
        entry_step_id: StepId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            document_id,
            circuit_id: Some(circuit_id),
            current_step_id: Some(entry_step_id),
            lifecycle_status: LifecycleStatus::Draft,
            completed_status_ids: BTreeSet::new(),
            completions: BTreeMap::new(),
            is_circuit_completed: false,
            version: Version::INITIAL,
            updated_at: now,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle_status.is_closed()
    }

    /// Marks a status of the current step complete.
    pub fn complete_status(
        &mut self,
        status_id: StatusId,
        completed_by: impl Into<String>,
        completed_at: DateTime<Utc>,
    ) {
        self.completed_status_ids.insert(status_id);
        self.completions.insert(
            status_id,
            StatusCompletion {
                completed_by: completed_by.into(),
                completed_at,
            },
        );
    }

    pub fn reopen_status(&mut self, status_id: StatusId) {
        self.completed_status_ids.remove(&status_id);
        self.completions.remove(&status_id);
    }

    /// Places the document on `step_id`, resetting the per-visit checklist.
    pub fn enter_step(&mut self, step_id: StepId) {
        if self.current_step_id != Some(step_id) {
            self.completed_status_ids.clear();
            self.completions.clear();
        }
        self.current_step_id = Some(step_id);
        self.is_circuit_completed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_step_resets_checklist() {
        let mut state = DocumentWorkflowState::assigned(
            DocumentId::new(1),
            CircuitId::new(1),
            StepId::new(1),
            Utc::now(),
        );
        state.complete_status(StatusId::new(5), "alice", Utc::now());

        state.enter_step(StepId::new(1));
        assert_eq!(state.completed_status_ids.len(), 1);
        assert_eq!(state.completions[&StatusId::new(5)].completed_by, "alice");

        state.enter_step(StepId::new(2));
        assert!(state.completed_status_ids.is_empty());
        assert!(state.completions.is_empty());
        assert_eq!(state.current_step_id, Some(StepId::new(2)));
    }

    #[test]
    fn test_reopen_status_drops_attribution() {
        let mut state = DocumentWorkflowState::assigned(
            DocumentId::new(1),
            CircuitId::new(1),
            StepId::new(1),
            Utc::now(),
        );
        state.complete_status(StatusId::new(5), "alice", Utc::now());
        state.complete_status(StatusId::new(6), "bob", Utc::now());

        state.reopen_status(StatusId::new(5));
        assert!(!state.completed_status_ids.contains(&StatusId::new(5)));
        assert!(!state.completions.contains_key(&StatusId::new(5)));
        assert_eq!(state.completions[&StatusId::new(6)].completed_by, "bob");
    }

    #[test]
    fn test_lifecycle_closed() {
        assert!(LifecycleStatus::Completed.is_closed());
        assert!(LifecycleStatus::Rejected.is_closed());
        assert!(!LifecycleStatus::Draft.is_closed());
        assert!(!LifecycleStatus::InProgress.is_closed());
        assert_eq!(Version::INITIAL.next(), Version::new(2));
    }
}
