//! The engine's public surface.

use crate::circuits::CircuitRegistry;
use crate::config::EngineConfig;
use crate::executor::{
    ActionExecutor, AssignCircuit, CompleteStatus, MoveToNextStep, MoveToStep, PerformAction,
};
use crate::history::{HistoryLog, HistoryView};
use crate::locks::DocumentLocks;
use crate::memory::InMemoryStore;
use crate::resolver::TransitionResolver;
use crate::statuses::StatusRegistry;
use crate::tracker::{WorkflowStatusView, WorkflowTracker};
use docflow_core::{
    Action, CallerContext, Circuit, CircuitId, DefinitionStore, DocumentId, DocumentStore,
    DocumentWorkflowState, HistoryEntry, NewAction, NewCircuit, NewStatus, NewStep, Status,
    StatusId, Step, StepId, StepOrder, WorkflowError, WorkflowResult,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Document approval circuits: configuration, transitions, actions and
/// history behind one handle.
///
/// # Example
///
/// ```rust,ignore
/// use docflow::prelude::*;
///
/// let service = WorkflowService::in_memory();
/// let admin = CallerContext::admin("alice");
///
/// let circuit = service.create_circuit(NewCircuit::ordered("Invoices")).await?;
/// service.add_step(circuit.id, NewStep::new("Draft", 0)).await?;
/// service.add_step(circuit.id, NewStep::new("Final", 1).final_step()).await?;
///
/// let doc = DocumentId::new(1);
/// service
///     .assign_circuit(&admin, AssignCircuit { document_id: doc, circuit_id: circuit.id })
///     .await?;
/// let view = service.get_current_status(&admin, doc).await?;
/// assert!(view.can_advance_to_next_step);
/// ```
#[derive(Clone)]
pub struct WorkflowService {
    circuits: CircuitRegistry,
    statuses: StatusRegistry,
    tracker: WorkflowTracker,
    executor: ActionExecutor,
    history: HistoryLog,
    definitions: Arc<dyn DefinitionStore>,
    documents: Arc<dyn DocumentStore>,
    config: EngineConfig,
}

impl fmt::Debug for WorkflowService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WorkflowService {
    /// Creates a new service builder.
    pub fn builder() -> WorkflowServiceBuilder {
        WorkflowServiceBuilder::new()
    }

    /// A service over a fresh [`InMemoryStore`] with the default config.
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self::assemble(store.clone(), store, EngineConfig::default())
    }

    fn assemble(
        definitions: Arc<dyn DefinitionStore>,
        documents: Arc<dyn DocumentStore>,
        config: EngineConfig,
    ) -> Self {
        let circuits = CircuitRegistry::new(definitions.clone(), documents.clone());
        let statuses = StatusRegistry::new(definitions.clone());
        let tracker = WorkflowTracker::new(
            circuits.clone(),
            statuses.clone(),
            definitions.clone(),
            documents.clone(),
        );
        let executor = ActionExecutor::new(
            tracker.clone(),
            TransitionResolver::new(config.gate_unordered_moves),
            circuits.clone(),
            statuses.clone(),
            definitions.clone(),
            documents.clone(),
            Arc::new(DocumentLocks::new()),
            config.lock_timeout,
        );
        let history = HistoryLog::new(documents.clone(), definitions.clone());

        Self {
            circuits,
            statuses,
            tracker,
            executor,
            history,
            definitions,
            documents,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // Document operations

    pub async fn assign_circuit(
        &self,
        ctx: &CallerContext,
        request: AssignCircuit,
    ) -> WorkflowResult<DocumentWorkflowState> {
        self.executor.assign_circuit(ctx, request).await
    }

    /// The document's state, checklist, navigation flags and the actions the
    /// caller may take. Has no side effects.
    pub async fn get_current_status(
        &self,
        ctx: &CallerContext,
        document_id: DocumentId,
    ) -> WorkflowResult<WorkflowStatusView> {
        self.tracker.get_status(ctx, document_id).await
    }

    pub async fn perform_action(
        &self,
        ctx: &CallerContext,
        request: PerformAction,
    ) -> WorkflowResult<DocumentWorkflowState> {
        self.executor.perform_action(ctx, request).await
    }

    pub async fn move_to_next_step(
        &self,
        ctx: &CallerContext,
        request: MoveToNextStep,
    ) -> WorkflowResult<DocumentWorkflowState> {
        self.executor.move_to_next_step(ctx, request).await
    }

    pub async fn move_to_step(
        &self,
        ctx: &CallerContext,
        request: MoveToStep,
    ) -> WorkflowResult<DocumentWorkflowState> {
        self.executor.move_to_step(ctx, request).await
    }

    pub async fn complete_status(
        &self,
        ctx: &CallerContext,
        request: CompleteStatus,
    ) -> WorkflowResult<DocumentWorkflowState> {
        self.executor.complete_status(ctx, request).await
    }

    /// The document's history, oldest first.
    pub async fn get_history(&self, document_id: DocumentId) -> WorkflowResult<Vec<HistoryEntry>> {
        Ok(self.history.for_document(document_id).await?.collect())
    }

    /// The document's history with step, action and status titles.
    pub async fn get_history_details(
        &self,
        document_id: DocumentId,
    ) -> WorkflowResult<Vec<HistoryView>> {
        self.history.details(document_id).await
    }

    /// Everything processed at a step, across documents.
    pub async fn get_step_history(&self, step_id: StepId) -> WorkflowResult<Vec<HistoryEntry>> {
        Ok(self.history.for_step(step_id).await?.collect())
    }

    /// Open documents whose current step the caller may act on.
    pub async fn pending_documents(
        &self,
        ctx: &CallerContext,
    ) -> WorkflowResult<Vec<DocumentWorkflowState>> {
        let mut pending = Vec::new();
        for state in self.documents.states().await? {
            if state.lifecycle_status == docflow_core::LifecycleStatus::Completed {
                continue;
            }
            let Some(step_id) = state.current_step_id else {
                continue;
            };
            if ctx.can_act_on(&self.circuits.step(step_id).await?) {
                pending.push(state);
            }
        }
        pending.sort_by_key(|s| s.document_id);
        Ok(pending)
    }

    /// Runs `call` again while it fails with a state conflict, following the
    /// configured [`RetryPolicy`](crate::RetryPolicy).
    ///
    /// `call` must re-read whatever version token it submits; resubmitting a
    /// stale token fails the same way every time.
    pub async fn retry_on_conflict<T, F, Fut>(&self, mut call: F) -> WorkflowResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = WorkflowResult<T>>,
    {
        let policy = &self.config.conflict_retry;
        let max_retries = policy.max_retries();
        let mut attempt = 0;
        loop {
            match call().await {
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        max_retries,
                        "State conflict, retrying"
                    );
                    if let Some(delay) = policy.delay_for_attempt(attempt) {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    // Configuration

    pub async fn create_circuit(&self, circuit: NewCircuit) -> WorkflowResult<Circuit> {
        self.circuits.create_circuit(circuit).await
    }

    pub async fn update_circuit(&self, circuit: Circuit) -> WorkflowResult<Circuit> {
        self.circuits.update_circuit(circuit).await
    }

    pub async fn delete_circuit(&self, id: CircuitId) -> WorkflowResult<()> {
        self.circuits.delete_circuit(id).await
    }

    pub async fn circuits(&self) -> WorkflowResult<Vec<Circuit>> {
        self.circuits.circuits().await
    }

    /// Steps of a circuit sorted by order index.
    pub async fn get_circuit_steps(&self, circuit_id: CircuitId) -> WorkflowResult<Vec<Step>> {
        self.circuits.steps(circuit_id).await
    }

    pub async fn add_step(&self, circuit_id: CircuitId, step: NewStep) -> WorkflowResult<Step> {
        self.circuits.add_step(circuit_id, step).await
    }

    pub async fn update_step(&self, id: StepId, step: NewStep) -> WorkflowResult<Step> {
        self.circuits.update_step(id, step).await
    }

    pub async fn delete_step(&self, id: StepId) -> WorkflowResult<()> {
        self.circuits.delete_step(id).await
    }

    pub async fn reorder_steps(
        &self,
        circuit_id: CircuitId,
        order: Vec<StepOrder>,
    ) -> WorkflowResult<Vec<Step>> {
        self.circuits.reorder_steps(circuit_id, order).await
    }

    pub async fn get_step_statuses(&self, step_id: StepId) -> WorkflowResult<Vec<Status>> {
        self.statuses.get_requirements(step_id).await
    }

    pub async fn create_status(&self, step_id: StepId, status: NewStatus) -> WorkflowResult<Status> {
        self.statuses.create_status(step_id, status).await
    }

    pub async fn update_status(&self, id: StatusId, status: NewStatus) -> WorkflowResult<Status> {
        self.statuses.update_status(id, status).await
    }

    pub async fn delete_status(&self, id: StatusId) -> WorkflowResult<()> {
        self.statuses.delete_status(id).await
    }

    pub async fn delete_statuses(&self, ids: &[StatusId]) -> WorkflowResult<()> {
        self.statuses.delete_statuses(ids).await
    }

    pub async fn create_action(&self, action: NewAction) -> WorkflowResult<Action> {
        if action.key.trim().is_empty() || action.title.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "action key and title are required".to_string(),
            ));
        }
        let action = self.definitions.insert_action(action).await?;
        info!(action_id = %action.id, key = %action.key, effect = %action.effect, "Action created");
        Ok(action)
    }

    /// Registered actions sorted by id.
    pub async fn actions(&self) -> WorkflowResult<Vec<Action>> {
        let mut actions = self.definitions.actions().await?;
        actions.sort_by_key(|a| a.id);
        Ok(actions)
    }
}

/// Builder for constructing [`WorkflowService`] instances.
#[derive(Default)]
pub struct WorkflowServiceBuilder {
    definitions: Option<Arc<dyn DefinitionStore>>,
    documents: Option<Arc<dyn DocumentStore>>,
    config: EngineConfig,
}

impl WorkflowServiceBuilder {
    /// Creates a builder with the default config and no stores.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the store holding circuits, steps, statuses and actions.
    pub fn definitions(mut self, store: Arc<dyn DefinitionStore>) -> Self {
        self.definitions = Some(store);
        self
    }

    /// Sets the store holding workflow state and history.
    pub fn documents(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(store);
        self
    }

    /// Uses one store for both roles.
    pub fn store<S>(self, store: Arc<S>) -> Self
    where
        S: DefinitionStore + DocumentStore + 'static,
    {
        self.definitions(store.clone()).documents(store)
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the service.
    pub fn build(self) -> WorkflowResult<WorkflowService> {
        let definitions = self.definitions.ok_or_else(|| {
            WorkflowError::Configuration("definition store must be specified".to_string())
        })?;
        let documents = self.documents.ok_or_else(|| {
            WorkflowError::Configuration("document store must be specified".to_string())
        })?;
        self.config
            .conflict_retry
            .validate()
            .map_err(|e| WorkflowError::Configuration(format!("conflict_retry: {e}")))?;
        if self.config.lock_timeout.is_zero() {
            return Err(WorkflowError::Configuration(
                "lock_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(WorkflowService::assemble(definitions, documents, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn test_builder_requires_stores() {
        let result = WorkflowService::builder().build();
        assert!(matches!(result, Err(WorkflowError::Configuration(_))));

        let store = Arc::new(InMemoryStore::new());
        let result = WorkflowService::builder()
            .definitions(store.clone())
            .build();
        assert!(matches!(result, Err(WorkflowError::Configuration(_))));

        let result = WorkflowService::builder().store(store).build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_builder_rejects_zero_lock_timeout() {
        let result = WorkflowService::builder()
            .store(Arc::new(InMemoryStore::new()))
            .config(EngineConfig {
                lock_timeout: Duration::ZERO,
                ..EngineConfig::default()
            })
            .build();
        assert!(matches!(result, Err(WorkflowError::Configuration(_))));
    }

    #[test]
    fn test_builder_rejects_invalid_retry_policy() {
        let config: EngineConfig = serde_json::from_str(
            r#"{ "conflict_retry": {
                "kind": "exponential_backoff",
                "max_retries": 3,
                "initial_delay": { "secs": 1, "nanos": 0 },
                "max_delay": { "secs": 0, "nanos": 0 },
                "multiplier": 2
            } }"#,
        )
        .expect("well-formed config");
        let result = WorkflowService::builder()
            .store(Arc::new(InMemoryStore::new()))
            .config(config)
            .build();
        assert_eq!(
            result.map(|_| ()),
            Err(WorkflowError::Configuration(
                "conflict_retry: max_delay must be >= initial_delay".to_string()
            ))
        );
    }

    fn with_retry(policy: RetryPolicy) -> WorkflowService {
        WorkflowService::builder()
            .store(Arc::new(InMemoryStore::new()))
            .config(EngineConfig {
                conflict_retry: policy,
                ..EngineConfig::default()
            })
            .build()
            .expect("valid service")
    }

    fn conflict() -> WorkflowError {
        WorkflowError::StateConflict {
            document_id: DocumentId::new(1),
            details: "stale".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retry_on_conflict_retries_conflicts_only() {
        let service = with_retry(RetryPolicy::fixed(3, Duration::from_millis(1)));

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = service
            .retry_on_conflict(move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(conflict())
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: WorkflowResult<()> = service
            .retry_on_conflict(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(WorkflowError::Validation("bad".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_on_conflict_gives_up() {
        let service = with_retry(RetryPolicy::fixed(2, Duration::from_millis(1)));
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: WorkflowResult<()> = service
            .retry_on_conflict(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(conflict())
            })
            .await;
        assert_eq!(result, Err(conflict()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
