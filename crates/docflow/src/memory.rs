//! In-memory implementation of the store traits.

use async_trait::async_trait;
use docflow_core::{
    Action, ActionId, Circuit, CircuitId, Commit, DefinitionStore, DocumentId, DocumentStore,
    DocumentWorkflowState, EntityKind, HistoryEntry, HistoryId, HistoryQuery, NewAction,
    NewCircuit, NewStatus, NewStep, Status, StatusId, Step, StepId, Version, WorkflowError,
    WorkflowResult,
};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Definitions {
    next_id: u64,
    circuits: BTreeMap<CircuitId, Circuit>,
    steps: BTreeMap<StepId, Step>,
    statuses: BTreeMap<StatusId, Status>,
    actions: BTreeMap<ActionId, Action>,
    // Key counters survive deletions so keys are never reused.
    step_counters: HashMap<CircuitId, u32>,
    status_counters: HashMap<StepId, u32>,
}

impl Definitions {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
struct Documents {
    next_history_id: u64,
    states: BTreeMap<DocumentId, DocumentWorkflowState>,
    history: Vec<HistoryEntry>,
}

/// Keeps everything in process memory.
///
/// State and history live behind one lock, which makes
/// [`DocumentStore::commit`] all-or-nothing.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    definitions: RwLock<Definitions>,
    documents: RwLock<Documents>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionStore for InMemoryStore {
    async fn insert_circuit(&self, circuit: NewCircuit) -> WorkflowResult<Circuit> {
        let mut defs = self.definitions.write().await;
        let id = CircuitId::new(defs.allocate());
        let circuit = Circuit {
            id,
            key: format!("CR-{:04}", id.get()),
            title: circuit.title,
            description: circuit.description,
            is_active: circuit.is_active,
            has_ordered_flow: circuit.has_ordered_flow,
            allow_backtrack: circuit.allow_backtrack,
        };
        defs.circuits.insert(id, circuit.clone());
        Ok(circuit)
    }

    async fn update_circuit(&self, circuit: Circuit) -> WorkflowResult<()> {
        let mut defs = self.definitions.write().await;
        match defs.circuits.get_mut(&circuit.id) {
            Some(stored) => {
                *stored = circuit;
                Ok(())
            }
            None => Err(WorkflowError::not_found(EntityKind::Circuit, circuit.id)),
        }
    }

    async fn remove_circuit(&self, id: CircuitId) -> WorkflowResult<()> {
        let mut defs = self.definitions.write().await;
        if defs.circuits.remove(&id).is_none() {
            return Err(WorkflowError::not_found(EntityKind::Circuit, id));
        }
        let step_ids: Vec<StepId> = defs
            .steps
            .values()
            .filter(|s| s.circuit_id == id)
            .map(|s| s.id)
            .collect();
        for step_id in &step_ids {
            defs.steps.remove(step_id);
            defs.status_counters.remove(step_id);
        }
        defs.statuses.retain(|_, s| !step_ids.contains(&s.step_id));
        defs.step_counters.remove(&id);
        Ok(())
    }

    async fn circuit(&self, id: CircuitId) -> WorkflowResult<Option<Circuit>> {
        Ok(self.definitions.read().await.circuits.get(&id).cloned())
    }

    async fn circuits(&self) -> WorkflowResult<Vec<Circuit>> {
        Ok(self.definitions.read().await.circuits.values().cloned().collect())
    }

    async fn insert_step(&self, circuit_id: CircuitId, step: NewStep) -> WorkflowResult<Step> {
        let mut defs = self.definitions.write().await;
        let circuit_key = match defs.circuits.get(&circuit_id) {
            Some(c) => c.key.clone(),
            None => return Err(WorkflowError::not_found(EntityKind::Circuit, circuit_id)),
        };
        let id = StepId::new(defs.allocate());
        let counter = defs.step_counters.entry(circuit_id).or_insert(0);
        *counter += 1;
        let step = Step {
            id,
            key: format!("{circuit_key}-ST{:02}", *counter),
            circuit_id,
            title: step.title,
            description: step.description,
            order_index: step.order_index,
            responsible_role: step.responsible_role,
            is_final_step: step.is_final_step,
        };
        defs.steps.insert(id, step.clone());
        Ok(step)
    }

    async fn update_steps(&self, steps: Vec<Step>) -> WorkflowResult<()> {
        let mut defs = self.definitions.write().await;
        if let Some(missing) = steps.iter().find(|s| !defs.steps.contains_key(&s.id)) {
            return Err(WorkflowError::not_found(EntityKind::Step, missing.id));
        }
        for step in steps {
            defs.steps.insert(step.id, step);
        }
        Ok(())
    }

    async fn remove_step(&self, id: StepId, reindexed: Vec<Step>) -> WorkflowResult<()> {
        let mut defs = self.definitions.write().await;
        if !defs.steps.contains_key(&id) {
            return Err(WorkflowError::not_found(EntityKind::Step, id));
        }
        if let Some(missing) = reindexed
            .iter()
            .find(|s| s.id == id || !defs.steps.contains_key(&s.id))
        {
            return Err(WorkflowError::not_found(EntityKind::Step, missing.id));
        }
        defs.steps.remove(&id);
        defs.statuses.retain(|_, s| s.step_id != id);
        defs.status_counters.remove(&id);
        for step in reindexed {
            defs.steps.insert(step.id, step);
        }
        Ok(())
    }

    async fn step(&self, id: StepId) -> WorkflowResult<Option<Step>> {
        Ok(self.definitions.read().await.steps.get(&id).cloned())
    }

    async fn steps(&self, circuit_id: CircuitId) -> WorkflowResult<Vec<Step>> {
        Ok(self
            .definitions
            .read()
            .await
            .steps
            .values()
            .filter(|s| s.circuit_id == circuit_id)
            .cloned()
            .collect())
    }

    async fn insert_status(&self, step_id: StepId, status: NewStatus) -> WorkflowResult<Status> {
        let mut defs = self.definitions.write().await;
        let step_key = match defs.steps.get(&step_id) {
            Some(s) => s.key.clone(),
            None => return Err(WorkflowError::not_found(EntityKind::Step, step_id)),
        };
        let id = StatusId::new(defs.allocate());
        let counter = defs.status_counters.entry(step_id).or_insert(0);
        *counter += 1;
        let status = Status {
            id,
            key: format!("{step_key}-SS{:02}", *counter),
            step_id,
            title: status.title,
            is_required: status.is_required,
        };
        defs.statuses.insert(id, status.clone());
        Ok(status)
    }

    async fn update_status(&self, status: Status) -> WorkflowResult<()> {
        let mut defs = self.definitions.write().await;
        match defs.statuses.get_mut(&status.id) {
            Some(stored) => {
                *stored = status;
                Ok(())
            }
            None => Err(WorkflowError::not_found(EntityKind::Status, status.id)),
        }
    }

    async fn remove_status(&self, id: StatusId) -> WorkflowResult<()> {
        let mut defs = self.definitions.write().await;
        match defs.statuses.remove(&id) {
            Some(_) => Ok(()),
            None => Err(WorkflowError::not_found(EntityKind::Status, id)),
        }
    }

    async fn status(&self, id: StatusId) -> WorkflowResult<Option<Status>> {
        Ok(self.definitions.read().await.statuses.get(&id).cloned())
    }

    async fn statuses(&self, step_id: StepId) -> WorkflowResult<Vec<Status>> {
        Ok(self
            .definitions
            .read()
            .await
            .statuses
            .values()
            .filter(|s| s.step_id == step_id)
            .cloned()
            .collect())
    }

    async fn insert_action(&self, action: NewAction) -> WorkflowResult<Action> {
        let mut defs = self.definitions.write().await;
        if defs.actions.values().any(|a| a.key == action.key) {
            return Err(WorkflowError::Validation(format!(
                "action key '{}' already exists",
                action.key
            )));
        }
        let id = ActionId::new(defs.allocate());
        let action = Action {
            id,
            key: action.key,
            title: action.title,
            description: action.description,
            effect: action.effect,
        };
        defs.actions.insert(id, action.clone());
        Ok(action)
    }

    async fn action(&self, id: ActionId) -> WorkflowResult<Option<Action>> {
        Ok(self.definitions.read().await.actions.get(&id).cloned())
    }

    async fn actions(&self) -> WorkflowResult<Vec<Action>> {
        Ok(self.definitions.read().await.actions.values().cloned().collect())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn state(&self, id: DocumentId) -> WorkflowResult<Option<DocumentWorkflowState>> {
        Ok(self.documents.read().await.states.get(&id).cloned())
    }

    async fn states(&self) -> WorkflowResult<Vec<DocumentWorkflowState>> {
        Ok(self.documents.read().await.states.values().cloned().collect())
    }

    async fn commit(
        &self,
        commit: Commit,
    ) -> WorkflowResult<(DocumentWorkflowState, HistoryEntry)> {
        let mut docs = self.documents.write().await;
        let Commit {
            mut state,
            expected_version,
            entry,
        } = commit;
        let document_id = state.document_id;
        let stored = docs.states.get(&document_id).map(|s| s.version);

        state.version = match (expected_version, stored) {
            (None, None) => Version::INITIAL,
            (Some(expected), Some(found)) if expected == found => found.next(),
            (Some(expected), Some(found)) => {
                return Err(WorkflowError::StateConflict {
                    document_id,
                    details: format!("expected {expected}, found {found}"),
                })
            }
            (None, Some(found)) => {
                return Err(WorkflowError::StateConflict {
                    document_id,
                    details: format!("state already exists at {found}"),
                })
            }
            (Some(expected), None) => {
                return Err(WorkflowError::StateConflict {
                    document_id,
                    details: format!("expected {expected}, found no state"),
                })
            }
        };

        docs.next_history_id += 1;
        let entry = entry.into_entry(HistoryId::new(docs.next_history_id));
        docs.states.insert(document_id, state.clone());
        docs.history.push(entry.clone());
        Ok((state, entry))
    }

    async fn history(&self, query: HistoryQuery) -> WorkflowResult<Vec<HistoryEntry>> {
        Ok(self
            .documents
            .read()
            .await
            .history
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docflow_core::NewHistoryEntry;

    fn entry(document_id: DocumentId, step_id: StepId) -> NewHistoryEntry {
        NewHistoryEntry {
            document_id,
            step_id,
            action_id: None,
            status_id: None,
            processed_by: "alice".to_string(),
            processed_at: Utc::now(),
            comments: String::new(),
            is_approved: true,
        }
    }

    #[tokio::test]
    async fn test_keys_are_generated_per_parent() {
        let store = InMemoryStore::new();
        let circuit = store
            .insert_circuit(NewCircuit::ordered("Invoices"))
            .await
            .expect("circuit");
        let first = store
            .insert_step(circuit.id, NewStep::new("Draft", 0))
            .await
            .expect("step");
        let second = store
            .insert_step(circuit.id, NewStep::new("Review", 1))
            .await
            .expect("step");
        let status = store
            .insert_status(second.id, NewStatus::required("Approved"))
            .await
            .expect("status");

        assert_eq!(circuit.key, format!("CR-{:04}", circuit.id.get()));
        assert_eq!(first.key, format!("{}-ST01", circuit.key));
        assert_eq!(second.key, format!("{}-ST02", circuit.key));
        assert_eq!(status.key, format!("{}-SS01", second.key));
    }

    #[tokio::test]
    async fn test_remove_circuit_cascades() {
        let store = InMemoryStore::new();
        let circuit = store
            .insert_circuit(NewCircuit::ordered("Invoices"))
            .await
            .expect("circuit");
        let step = store
            .insert_step(circuit.id, NewStep::new("Draft", 0))
            .await
            .expect("step");
        let status = store
            .insert_status(step.id, NewStatus::optional("Signed"))
            .await
            .expect("status");

        store.remove_circuit(circuit.id).await.expect("removed");
        assert_eq!(store.step(step.id).await.expect("read"), None);
        assert_eq!(store.status(status.id).await.expect("read"), None);
        assert!(matches!(
            store.remove_circuit(circuit.id).await,
            Err(WorkflowError::NotFound { kind: EntityKind::Circuit, .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_step_stores_reindexed_steps() {
        let store = InMemoryStore::new();
        let circuit = store
            .insert_circuit(NewCircuit::ordered("Invoices"))
            .await
            .expect("circuit");
        let draft = store
            .insert_step(circuit.id, NewStep::new("Draft", 0))
            .await
            .expect("step");
        let review = store
            .insert_step(circuit.id, NewStep::new("Review", 1))
            .await
            .expect("step");
        store
            .insert_status(draft.id, NewStatus::required("Filled"))
            .await
            .expect("status");

        let moved = Step {
            order_index: 0,
            ..review.clone()
        };
        store
            .remove_step(draft.id, vec![moved.clone()])
            .await
            .expect("removed");
        assert_eq!(store.step(draft.id).await.expect("read"), None);
        assert!(store.statuses(draft.id).await.expect("read").is_empty());
        assert_eq!(store.step(review.id).await.expect("read"), Some(moved));

        // Nothing is written when a reindexed step is unknown.
        let ghost = Step {
            id: StepId::new(999),
            ..review.clone()
        };
        assert!(matches!(
            store.remove_step(review.id, vec![ghost]).await,
            Err(WorkflowError::NotFound { kind: EntityKind::Step, .. })
        ));
        assert!(store.step(review.id).await.expect("read").is_some());
    }

    #[tokio::test]
    async fn test_commit_checks_version() {
        let store = InMemoryStore::new();
        let doc = DocumentId::new(1);
        let state = DocumentWorkflowState::assigned(doc, CircuitId::new(1), StepId::new(2), Utc::now());

        let (created, first) = store
            .commit(Commit {
                state: state.clone(),
                expected_version: None,
                entry: entry(doc, StepId::new(2)),
            })
            .await
            .expect("created");
        assert_eq!(created.version, Version::INITIAL);

        let (updated, second) = store
            .commit(Commit {
                state: created.clone(),
                expected_version: Some(Version::INITIAL),
                entry: entry(doc, StepId::new(2)),
            })
            .await
            .expect("updated");
        assert_eq!(updated.version, Version::new(2));
        assert!(second.id > first.id);

        let stale = store
            .commit(Commit {
                state: created,
                expected_version: Some(Version::INITIAL),
                entry: entry(doc, StepId::new(2)),
            })
            .await;
        assert!(matches!(stale, Err(WorkflowError::StateConflict { .. })));

        let history = store
            .history(HistoryQuery::Document(doc))
            .await
            .expect("history");
        assert_eq!(history.len(), 2);
    }
}
