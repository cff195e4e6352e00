//! Circuit and step definitions.

use crate::context::Role;
use crate::ids::{CircuitId, StepId};
use serde::{Deserialize, Serialize};

/// A configured approval circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Circuit {
    pub id: CircuitId,
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub is_active: bool,
    /// Steps must be taken one `order_index` at a time.
    pub has_ordered_flow: bool,
    /// Documents may return to earlier steps. Only meaningful for ordered flows.
    pub allow_backtrack: bool,
}

/// Fields supplied when creating a circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCircuit {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub has_ordered_flow: bool,
    #[serde(default)]
    pub allow_backtrack: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewCircuit {
    /// An active, ordered circuit without backtracking.
    pub fn ordered(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            has_ordered_flow: true,
            allow_backtrack: false,
            is_active: true,
        }
    }

    /// An active circuit whose steps may be visited in any order.
    pub fn unordered(title: impl Into<String>) -> Self {
        Self {
            has_ordered_flow: false,
            ..Self::ordered(title)
        }
    }

    /// Allows returning to earlier steps.
    pub fn with_backtrack(mut self) -> Self {
        self.allow_backtrack = true;
        self
    }
}

/// A stage of a circuit that a document occupies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: StepId,
    pub key: String,
    pub circuit_id: CircuitId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub order_index: u32,
    /// Role required to act on documents at this step, if any.
    pub responsible_role: Option<Role>,
    pub is_final_step: bool,
}

/// Fields supplied when creating or updating a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStep {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub order_index: u32,
    #[serde(default)]
    pub responsible_role: Option<Role>,
    #[serde(default)]
    pub is_final_step: bool,
}

impl NewStep {
    pub fn new(title: impl Into<String>, order_index: u32) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            order_index,
            responsible_role: None,
            is_final_step: false,
        }
    }

    /// Marks the step as the circuit's final step.
    pub fn final_step(mut self) -> Self {
        self.is_final_step = true;
        self
    }

    /// Restricts the step to callers holding `role`.
    pub fn responsible(mut self, role: Role) -> Self {
        self.responsible_role = Some(role);
        self
    }
}

/// New position of a step, used when reordering a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOrder {
    pub step_id: StepId,
    pub order_index: u32,
}

/// A circuit together with its steps sorted by `(order_index, id)`.
///
/// This is the read model the transition rules operate on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitDefinition {
    pub circuit: Circuit,
    pub steps: Vec<Step>,
}

impl CircuitDefinition {
    /// Builds a definition, sorting the steps.
    pub fn new(circuit: Circuit, mut steps: Vec<Step>) -> Self {
        steps.sort_by_key(|s| (s.order_index, s.id));
        Self { circuit, steps }
    }

    pub fn id(&self) -> CircuitId {
        self.circuit.id
    }

    /// Looks up a member step.
    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: StepId) -> bool {
        self.step(id).is_some()
    }

    /// First step with the given order index.
    pub fn step_at(&self, order_index: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.order_index == order_index)
    }

    /// The step a newly assigned document enters.
    pub fn entry_step(&self) -> Option<&Step> {
        self.steps.first()
    }

    /// The step at `order_index + 1`.
    pub fn next_step(&self, current: &Step) -> Option<&Step> {
        current
            .order_index
            .checked_add(1)
            .and_then(|order| self.step_at(order))
    }

    /// The step at `order_index - 1`.
    pub fn previous_step(&self, current: &Step) -> Option<&Step> {
        current
            .order_index
            .checked_sub(1)
            .and_then(|order| self.step_at(order))
    }

    /// Highest order index in the circuit.
    pub fn max_order(&self) -> Option<u32> {
        self.steps.last().map(|s| s.order_index)
    }
}
