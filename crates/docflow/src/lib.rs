//! Document approval circuits for Rust.
//!
//! A circuit is an ordered or unordered set of steps a document moves
//! through. Each step may carry statuses that must be completed before the
//! document advances, and every change is recorded in an append-only
//! history.
//!
//! # Example
//!
//! ```rust,ignore
//! use docflow::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> WorkflowResult<()> {
//!     let service = WorkflowService::in_memory();
//!     let admin = CallerContext::admin("alice");
//!
//!     let circuit = service.create_circuit(NewCircuit::ordered("Contracts")).await?;
//!     service.add_step(circuit.id, NewStep::new("Draft", 0)).await?;
//!     let review = service.add_step(circuit.id, NewStep::new("Review", 1)).await?;
//!     service.add_step(circuit.id, NewStep::new("Final", 2).final_step()).await?;
//!     let approved = service
//!         .create_status(review.id, NewStatus::required("Approved"))
//!         .await?;
//!
//!     let doc = DocumentId::new(42);
//!     service
//!         .assign_circuit(&admin, AssignCircuit { document_id: doc, circuit_id: circuit.id })
//!         .await?;
//!     service
//!         .move_to_step(&admin, MoveToStep {
//!             document_id: doc,
//!             target_step_id: review.id,
//!             comments: String::new(),
//!             expected_version: None,
//!         })
//!         .await?;
//!     service
//!         .complete_status(&admin, CompleteStatus {
//!             document_id: doc,
//!             status_id: approved.id,
//!             is_complete: true,
//!             comments: String::new(),
//!             expected_version: None,
//!         })
//!         .await?;
//!
//!     let view = service.get_current_status(&admin, doc).await?;
//!     assert!(view.can_advance_to_next_step);
//!     Ok(())
//! }
//! ```

mod busy;
mod circuits;
mod config;
mod executor;
mod history;
mod locks;
mod memory;
mod resolver;
mod service;
mod statuses;
mod tracker;

// Re-export core types
pub use docflow_core::*;

pub use busy::{BusyFlags, MoveGuard};
pub use circuits::CircuitRegistry;
pub use config::{EngineConfig, RetryPolicy, RetryPolicyError};
pub use executor::{
    ActionExecutor, AssignCircuit, CompleteStatus, MoveToNextStep, MoveToStep, PerformAction,
};
pub use history::{HistoryIter, HistoryLog, HistoryView};
pub use locks::{DocumentGuard, DocumentLocks, LayoutLock};
pub use memory::InMemoryStore;
pub use resolver::{classify, Transition, TransitionKind, TransitionResolver};
pub use service::{WorkflowService, WorkflowServiceBuilder};
pub use statuses::{is_satisfied, missing_requirements, StatusRegistry};
pub use tracker::{
    available_actions, can_advance_to_next_step, can_return_to_previous_step, Snapshot,
    WorkflowStatusView, WorkflowTracker,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        ActionEffect, AssignCircuit, CallerContext, CircuitId, CompleteStatus, DocumentId,
        EngineConfig, ErrorKind, LifecycleStatus, MoveToNextStep, MoveToStep, NewAction,
        NewCircuit, NewStatus, NewStep, PerformAction, RetryPolicy, Role, StatusId, StepId,
        WorkflowError, WorkflowResult, WorkflowService,
    };
}
