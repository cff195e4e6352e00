//! Status requirement registry.

use docflow_core::{
    DefinitionStore, EntityKind, NewStatus, Status, StatusId, StepId, WorkflowError,
    WorkflowResult,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Required statuses of `statuses` that are not in `completed`.
pub fn missing_requirements(statuses: &[Status], completed: &BTreeSet<StatusId>) -> Vec<StatusId> {
    statuses
        .iter()
        .filter(|s| s.is_required && !completed.contains(&s.id))
        .map(|s| s.id)
        .collect()
}

/// A step is satisfied when every required status is complete.
///
/// A step without statuses is trivially satisfied.
pub fn is_satisfied(statuses: &[Status], completed: &BTreeSet<StatusId>) -> bool {
    missing_requirements(statuses, completed).is_empty()
}

/// CRUD over step statuses and the satisfaction check.
#[derive(Clone)]
pub struct StatusRegistry {
    definitions: Arc<dyn DefinitionStore>,
}

impl std::fmt::Debug for StatusRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusRegistry").finish_non_exhaustive()
    }
}

impl StatusRegistry {
    pub fn new(definitions: Arc<dyn DefinitionStore>) -> Self {
        Self { definitions }
    }

    pub async fn create_status(&self, step_id: StepId, status: NewStatus) -> WorkflowResult<Status> {
        if status.title.trim().is_empty() {
            return Err(WorkflowError::Validation("title is required".to_string()));
        }
        self.require_step(step_id).await?;
        let status = self.definitions.insert_status(step_id, status).await?;
        info!(step_id = %step_id, status_id = %status.id, required = status.is_required, "Status created");
        Ok(status)
    }

    pub async fn update_status(&self, id: StatusId, update: NewStatus) -> WorkflowResult<Status> {
        if update.title.trim().is_empty() {
            return Err(WorkflowError::Validation("title is required".to_string()));
        }
        let status = Status {
            title: update.title,
            is_required: update.is_required,
            ..self.status(id).await?
        };
        self.definitions.update_status(status.clone()).await?;
        info!(status_id = %id, "Status updated");
        Ok(status)
    }

    pub async fn delete_status(&self, id: StatusId) -> WorkflowResult<()> {
        self.definitions.remove_status(id).await?;
        info!(status_id = %id, "Status deleted");
        Ok(())
    }

    /// Deletes several statuses. Nothing is deleted if any id is unknown.
    pub async fn delete_statuses(&self, ids: &[StatusId]) -> WorkflowResult<()> {
        for id in ids {
            self.status(*id).await?;
        }
        for id in ids {
            self.definitions.remove_status(*id).await?;
        }
        info!(count = ids.len(), "Statuses deleted");
        Ok(())
    }

    pub async fn status(&self, id: StatusId) -> WorkflowResult<Status> {
        self.definitions
            .status(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(EntityKind::Status, id))
    }

    /// All statuses of a step, in creation order.
    pub async fn get_requirements(&self, step_id: StepId) -> WorkflowResult<Vec<Status>> {
        self.require_step(step_id).await?;
        let mut statuses = self.definitions.statuses(step_id).await?;
        statuses.sort_by_key(|s| s.id);
        Ok(statuses)
    }

    pub async fn is_step_satisfied(
        &self,
        step_id: StepId,
        completed: &BTreeSet<StatusId>,
    ) -> WorkflowResult<bool> {
        let statuses = self.get_requirements(step_id).await?;
        Ok(is_satisfied(&statuses, completed))
    }

    async fn require_step(&self, step_id: StepId) -> WorkflowResult<()> {
        match self.definitions.step(step_id).await? {
            Some(_) => Ok(()),
            None => Err(WorkflowError::not_found(EntityKind::Step, step_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use docflow_core::{NewCircuit, NewStep};

    async fn step_with_store() -> (StatusRegistry, StepId) {
        let store = Arc::new(InMemoryStore::new());
        let circuit = store
            .insert_circuit(NewCircuit::ordered("Invoices"))
            .await
            .expect("circuit");
        let step = store
            .insert_step(circuit.id, NewStep::new("Review", 0))
            .await
            .expect("step");
        (StatusRegistry::new(store), step.id)
    }

    #[tokio::test]
    async fn test_step_without_statuses_is_satisfied() {
        let (registry, step_id) = step_with_store().await;
        let satisfied = registry
            .is_step_satisfied(step_id, &BTreeSet::new())
            .await
            .expect("check");
        assert!(satisfied);
    }

    #[tokio::test]
    async fn test_only_required_statuses_gate() {
        let (registry, step_id) = step_with_store().await;
        let approved = registry
            .create_status(step_id, NewStatus::required("Approved"))
            .await
            .expect("status");
        let optional = registry
            .create_status(step_id, NewStatus::optional("Commented"))
            .await
            .expect("status");

        let mut completed = BTreeSet::from([optional.id]);
        assert!(!registry
            .is_step_satisfied(step_id, &completed)
            .await
            .expect("check"));

        completed.insert(approved.id);
        assert!(registry
            .is_step_satisfied(step_id, &completed)
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn test_bulk_delete_is_all_or_nothing() {
        let (registry, step_id) = step_with_store().await;
        let a = registry
            .create_status(step_id, NewStatus::required("A"))
            .await
            .expect("status");

        let result = registry.delete_statuses(&[a.id, StatusId::new(999)]).await;
        assert!(matches!(result, Err(WorkflowError::NotFound { .. })));
        assert!(registry.status(a.id).await.is_ok());

        registry.delete_statuses(&[a.id]).await.expect("deleted");
        assert!(registry.get_requirements(step_id).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_step() {
        let (registry, _) = step_with_store().await;
        let result = registry
            .create_status(StepId::new(12345), NewStatus::required("X"))
            .await;
        assert!(matches!(
            result,
            Err(WorkflowError::NotFound { kind: EntityKind::Step, .. })
        ));
    }
}
