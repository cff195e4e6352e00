//! Circuit definition registry.
//!
//! Owns the layout rules of circuits and steps. It never looks at transitions.

use docflow_core::{
    Circuit, CircuitDefinition, CircuitId, DefinitionStore, DocumentStore, EntityKind,
    NewCircuit, NewStep, Step, StepId, StepOrder, WorkflowError, WorkflowResult,
};
use crate::locks::LayoutLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// CRUD over circuits and steps with layout validation.
#[derive(Clone)]
pub struct CircuitRegistry {
    definitions: Arc<dyn DefinitionStore>,
    documents: Arc<dyn DocumentStore>,
    layout: LayoutLock,
}

impl std::fmt::Debug for CircuitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitRegistry").finish_non_exhaustive()
    }
}

impl CircuitRegistry {
    pub fn new(definitions: Arc<dyn DefinitionStore>, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            definitions,
            documents,
            layout: LayoutLock::new(),
        }
    }

    /// Taken shared by document mutations, exclusive by layout changes.
    pub(crate) fn layout(&self) -> &LayoutLock {
        &self.layout
    }

    pub async fn create_circuit(&self, circuit: NewCircuit) -> WorkflowResult<Circuit> {
        require_title(&circuit.title)?;
        let circuit = self.definitions.insert_circuit(circuit).await?;
        info!(circuit_id = %circuit.id, key = %circuit.key, "Circuit created");
        Ok(circuit)
    }

    /// Replaces a circuit's settings.
    ///
    /// Switching a circuit to ordered flow requires its steps to already have
    /// unique, contiguous order indices.
    pub async fn update_circuit(&self, circuit: Circuit) -> WorkflowResult<Circuit> {
        require_title(&circuit.title)?;
        let _layout = self.layout.exclusive().await;
        let stored = self.circuit(circuit.id).await?;
        if stored.key != circuit.key {
            return Err(WorkflowError::Validation(
                "circuit key cannot be changed".to_string(),
            ));
        }
        let steps = self.definitions.steps(circuit.id).await?;
        validate_layout(&circuit, &steps)?;
        self.definitions.update_circuit(circuit.clone()).await?;
        info!(circuit_id = %circuit.id, "Circuit updated");
        Ok(circuit)
    }

    /// Deletes a circuit with its steps and their statuses.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::Conflict`] if any document is placed in the circuit.
    pub async fn delete_circuit(&self, id: CircuitId) -> WorkflowResult<()> {
        let _layout = self.layout.exclusive().await;
        self.circuit(id).await?;
        let in_use = self
            .documents
            .states()
            .await?
            .iter()
            .filter(|s| s.circuit_id == Some(id))
            .count();
        if in_use > 0 {
            return Err(WorkflowError::Conflict(format!(
                "circuit {id} has {in_use} document(s) in it"
            )));
        }
        self.definitions.remove_circuit(id).await?;
        info!(circuit_id = %id, "Circuit deleted");
        Ok(())
    }

    pub async fn circuit(&self, id: CircuitId) -> WorkflowResult<Circuit> {
        self.definitions
            .circuit(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(EntityKind::Circuit, id))
    }

    pub async fn circuits(&self) -> WorkflowResult<Vec<Circuit>> {
        self.definitions.circuits().await
    }

    /// The circuit with its steps sorted ascending by order index.
    pub async fn definition(&self, id: CircuitId) -> WorkflowResult<CircuitDefinition> {
        let circuit = self.circuit(id).await?;
        let steps = self.definitions.steps(id).await?;
        Ok(CircuitDefinition::new(circuit, steps))
    }

    /// Steps of a circuit sorted ascending by order index.
    pub async fn steps(&self, circuit_id: CircuitId) -> WorkflowResult<Vec<Step>> {
        Ok(self.definition(circuit_id).await?.steps)
    }

    pub async fn step(&self, id: StepId) -> WorkflowResult<Step> {
        self.definitions
            .step(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(EntityKind::Step, id))
    }

    pub async fn add_step(&self, circuit_id: CircuitId, step: NewStep) -> WorkflowResult<Step> {
        require_title(&step.title)?;
        let _layout = self.layout.exclusive().await;
        let definition = self.definition(circuit_id).await?;
        if definition.circuit.has_ordered_flow {
            if let Some(taken) = definition.step_at(step.order_index) {
                return Err(WorkflowError::Validation(format!(
                    "order index {} is already used by step {}",
                    step.order_index, taken.key
                )));
            }
        }

        let mut candidate = definition.steps.clone();
        candidate.push(Step {
            id: StepId::new(0),
            key: String::new(),
            circuit_id,
            title: step.title.clone(),
            description: step.description.clone(),
            order_index: step.order_index,
            responsible_role: step.responsible_role,
            is_final_step: step.is_final_step,
        });
        validate_layout(&definition.circuit, &candidate)?;

        let step = self.definitions.insert_step(circuit_id, step).await?;
        info!(circuit_id = %circuit_id, step_id = %step.id, order = step.order_index, "Step added");
        Ok(step)
    }

    pub async fn update_step(&self, id: StepId, update: NewStep) -> WorkflowResult<Step> {
        require_title(&update.title)?;
        let _layout = self.layout.exclusive().await;
        let stored = self.step(id).await?;
        let definition = self.definition(stored.circuit_id).await?;
        let updated = Step {
            title: update.title,
            description: update.description,
            order_index: update.order_index,
            responsible_role: update.responsible_role,
            is_final_step: update.is_final_step,
            ..stored
        };
        let candidate: Vec<Step> = definition
            .steps
            .iter()
            .map(|s| if s.id == id { updated.clone() } else { s.clone() })
            .collect();
        validate_layout(&definition.circuit, &candidate)?;

        self.definitions.update_steps(vec![updated.clone()]).await?;
        info!(step_id = %id, "Step updated");
        Ok(updated)
    }

    /// Deletes a step and its statuses.
    ///
    /// Later steps of an ordered circuit move down one index so the order
    /// stays contiguous.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::Conflict`] if any document currently sits on the step.
    pub async fn delete_step(&self, id: StepId) -> WorkflowResult<()> {
        let _layout = self.layout.exclusive().await;
        let step = self.step(id).await?;
        let occupied = self
            .documents
            .states()
            .await?
            .iter()
            .filter(|s| s.current_step_id == Some(id))
            .count();
        if occupied > 0 {
            return Err(WorkflowError::Conflict(format!(
                "step {} has {occupied} document(s) on it",
                step.key
            )));
        }

        let definition = self.definition(step.circuit_id).await?;
        let shifted: Vec<Step> = if definition.circuit.has_ordered_flow {
            definition
                .steps
                .into_iter()
                .filter(|s| s.order_index > step.order_index)
                .map(|s| Step {
                    order_index: s.order_index - 1,
                    ..s
                })
                .collect()
        } else {
            Vec::new()
        };
        self.definitions.remove_step(id, shifted).await?;
        info!(step_id = %id, circuit_id = %step.circuit_id, "Step deleted");
        Ok(())
    }

    /// Assigns new order indices to steps of a circuit in one write.
    ///
    /// Steps not listed keep their index. The resulting layout is validated
    /// as a whole.
    pub async fn reorder_steps(
        &self,
        circuit_id: CircuitId,
        orders: Vec<StepOrder>,
    ) -> WorkflowResult<Vec<Step>> {
        let _layout = self.layout.exclusive().await;
        let definition = self.definition(circuit_id).await?;
        let mut wanted: HashMap<StepId, u32> = HashMap::new();
        for order in &orders {
            if !definition.contains(order.step_id) {
                return Err(WorkflowError::Validation(format!(
                    "step {} does not belong to circuit {circuit_id}",
                    order.step_id
                )));
            }
            if wanted.insert(order.step_id, order.order_index).is_some() {
                return Err(WorkflowError::Validation(format!(
                    "step {} listed more than once",
                    order.step_id
                )));
            }
        }

        let candidate: Vec<Step> = definition
            .steps
            .iter()
            .map(|s| Step {
                order_index: wanted.get(&s.id).copied().unwrap_or(s.order_index),
                ..s.clone()
            })
            .collect();
        validate_layout(&definition.circuit, &candidate)?;

        let changed: Vec<Step> = candidate
            .iter()
            .filter(|s| wanted.contains_key(&s.id))
            .cloned()
            .collect();
        self.definitions.update_steps(changed).await?;
        info!(circuit_id = %circuit_id, moved = orders.len(), "Steps reordered");
        Ok(CircuitDefinition::new(definition.circuit, candidate).steps)
    }
}

fn require_title(title: &str) -> WorkflowResult<()> {
    if title.trim().is_empty() {
        return Err(WorkflowError::Validation("title is required".to_string()));
    }
    Ok(())
}

/// Checks the layout invariants of a circuit's steps.
///
/// - ordered circuits: order indices are exactly `0..n`
/// - any circuit: only steps at the highest order index may be final
pub(crate) fn validate_layout(circuit: &Circuit, steps: &[Step]) -> WorkflowResult<()> {
    if circuit.has_ordered_flow {
        let mut orders: Vec<u32> = steps.iter().map(|s| s.order_index).collect();
        orders.sort_unstable();
        for (expected, found) in orders.iter().enumerate() {
            if *found as usize != expected {
                return Err(WorkflowError::Validation(format!(
                    "ordered circuit {} needs unique, contiguous order indices starting at 0",
                    circuit.key
                )));
            }
        }
    }

    if let Some(max) = steps.iter().map(|s| s.order_index).max() {
        if let Some(misplaced) = steps
            .iter()
            .find(|s| s.is_final_step && s.order_index != max)
        {
            return Err(WorkflowError::Validation(format!(
                "final step '{}' must have the highest order index",
                misplaced.title
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use chrono::Utc;
    use docflow_core::{
        Commit, DocumentId, DocumentWorkflowState, NewHistoryEntry, NewStatus,
    };

    fn registry() -> (CircuitRegistry, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (CircuitRegistry::new(store.clone(), store.clone()), store)
    }

    async fn place_document(store: &InMemoryStore, circuit_id: CircuitId, step_id: StepId) {
        let doc = DocumentId::new(99);
        store
            .commit(Commit {
                state: DocumentWorkflowState::assigned(doc, circuit_id, step_id, Utc::now()),
                expected_version: None,
                entry: NewHistoryEntry {
                    document_id: doc,
                    step_id,
                    action_id: None,
                    status_id: None,
                    processed_by: "test".to_string(),
                    processed_at: Utc::now(),
                    comments: String::new(),
                    is_approved: true,
                },
            })
            .await
            .expect("placed");
    }

    #[tokio::test]
    async fn test_steps_listed_in_order() {
        let (registry, _) = registry();
        let circuit = registry
            .create_circuit(NewCircuit::unordered("Contracts"))
            .await
            .expect("circuit");
        registry
            .add_step(circuit.id, NewStep::new("Sign", 2))
            .await
            .expect("step");
        registry
            .add_step(circuit.id, NewStep::new("Draft", 0))
            .await
            .expect("step");
        registry
            .add_step(circuit.id, NewStep::new("Review", 1))
            .await
            .expect("step");

        let titles: Vec<String> = registry
            .steps(circuit.id)
            .await
            .expect("steps")
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(titles, vec!["Draft", "Review", "Sign"]);
    }

    #[tokio::test]
    async fn test_ordered_circuit_rejects_collisions_and_gaps() {
        let (registry, _) = registry();
        let circuit = registry
            .create_circuit(NewCircuit::ordered("Invoices"))
            .await
            .expect("circuit");
        registry
            .add_step(circuit.id, NewStep::new("Draft", 0))
            .await
            .expect("step");

        let collision = registry
            .add_step(circuit.id, NewStep::new("Again", 0))
            .await;
        assert!(matches!(collision, Err(WorkflowError::Validation(msg)) if msg.contains("already used")));

        let gap = registry.add_step(circuit.id, NewStep::new("Far", 5)).await;
        assert!(matches!(gap, Err(WorkflowError::Validation(_))));
    }

    #[tokio::test]
    async fn test_final_step_must_be_last() {
        let (registry, _) = registry();
        let circuit = registry
            .create_circuit(NewCircuit::ordered("Invoices"))
            .await
            .expect("circuit");
        registry
            .add_step(circuit.id, NewStep::new("Draft", 0))
            .await
            .expect("step");
        registry
            .add_step(circuit.id, NewStep::new("Done", 1).final_step())
            .await
            .expect("final step");

        let after_final = registry
            .add_step(circuit.id, NewStep::new("Archive", 2))
            .await;
        assert!(matches!(after_final, Err(WorkflowError::Validation(msg)) if msg.contains("final step")));
    }

    #[tokio::test]
    async fn test_delete_in_use_is_conflict() {
        let (registry, store) = registry();
        let circuit = registry
            .create_circuit(NewCircuit::ordered("Invoices"))
            .await
            .expect("circuit");
        let draft = registry
            .add_step(circuit.id, NewStep::new("Draft", 0))
            .await
            .expect("step");
        place_document(&store, circuit.id, draft.id).await;

        assert!(matches!(
            registry.delete_step(draft.id).await,
            Err(WorkflowError::Conflict(_))
        ));
        assert!(matches!(
            registry.delete_circuit(circuit.id).await,
            Err(WorkflowError::Conflict(_))
        ));
        assert!(registry.step(draft.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_step_compacts_order_and_statuses() {
        let (registry, store) = registry();
        let circuit = registry
            .create_circuit(NewCircuit::ordered("Invoices"))
            .await
            .expect("circuit");
        registry
            .add_step(circuit.id, NewStep::new("Draft", 0))
            .await
            .expect("step");
        let review = registry
            .add_step(circuit.id, NewStep::new("Review", 1))
            .await
            .expect("step");
        let sign = registry
            .add_step(circuit.id, NewStep::new("Sign", 2))
            .await
            .expect("step");
        let status = store
            .insert_status(review.id, NewStatus::required("Checked"))
            .await
            .expect("status");

        registry.delete_step(review.id).await.expect("deleted");

        assert_eq!(registry.step(sign.id).await.expect("sign").order_index, 1);
        assert_eq!(store.status(status.id).await.expect("read"), None);
    }

    #[tokio::test]
    async fn test_reorder_steps() {
        let (registry, _) = registry();
        let circuit = registry
            .create_circuit(NewCircuit::ordered("Invoices"))
            .await
            .expect("circuit");
        let a = registry
            .add_step(circuit.id, NewStep::new("A", 0))
            .await
            .expect("step");
        let b = registry
            .add_step(circuit.id, NewStep::new("B", 1))
            .await
            .expect("step");

        let steps = registry
            .reorder_steps(
                circuit.id,
                vec![
                    StepOrder { step_id: a.id, order_index: 1 },
                    StepOrder { step_id: b.id, order_index: 0 },
                ],
            )
            .await
            .expect("reordered");
        assert_eq!(steps[0].id, b.id);
        assert_eq!(steps[1].id, a.id);

        let broken = registry
            .reorder_steps(circuit.id, vec![StepOrder { step_id: a.id, order_index: 0 }])
            .await;
        assert!(matches!(broken, Err(WorkflowError::Validation(_))));
        assert_eq!(registry.step(a.id).await.expect("a").order_index, 1);
    }

    #[tokio::test]
    async fn test_switch_to_ordered_requires_contiguous_steps() {
        let (registry, _) = registry();
        let circuit = registry
            .create_circuit(NewCircuit::unordered("Loose"))
            .await
            .expect("circuit");
        registry
            .add_step(circuit.id, NewStep::new("A", 0))
            .await
            .expect("step");
        registry
            .add_step(circuit.id, NewStep::new("B", 0))
            .await
            .expect("duplicate order allowed when unordered");

        let ordered = Circuit {
            has_ordered_flow: true,
            ..circuit
        };
        assert!(matches!(
            registry.update_circuit(ordered).await,
            Err(WorkflowError::Validation(_))
        ));
    }
}
