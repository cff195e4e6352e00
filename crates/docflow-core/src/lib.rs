//! Core types and traits for the docflow circuit engine.
//!
//! This crate holds the data model and has no runtime dependencies.
//! Storage backends depend on this crate to implement the store traits.
//!
//! # Core Types
//!
//! - [`Circuit`], [`Step`], [`CircuitDefinition`] - circuit configuration
//! - [`Status`] - checklist items gating a step
//! - [`DocumentWorkflowState`] - where a document sits in its circuit
//! - [`HistoryEntry`] - append-only record of applied changes
//! - [`WorkflowError`] - error taxonomy with stable [`ErrorKind`]s
//!
//! # Storage Traits
//!
//! - [`DefinitionStore`] - circuits, steps, statuses and actions
//! - [`DocumentStore`] - workflow state and history, committed together

mod action;
mod circuit;
mod context;
mod error;
mod history;
mod ids;
mod state;
mod status;
mod store;

pub use action::{Action, ActionEffect, NewAction};
pub use circuit::{Circuit, CircuitDefinition, NewCircuit, NewStep, Step, StepOrder};
pub use context::{can_perform_action, CallerContext, Role};
pub use error::{EntityKind, ErrorKind, WorkflowError, WorkflowResult};
pub use history::{HistoryEntry, HistoryQuery, NewHistoryEntry};
pub use ids::{ActionId, CircuitId, DocumentId, HistoryId, StatusId, StepId};
pub use state::{DocumentWorkflowState, LifecycleStatus, StatusCompletion, Version};
pub use status::{DocumentStatus, NewStatus, Status};
pub use store::{Commit, DefinitionStore, DocumentStore};
