//! Workflow actions.

use crate::ids::ActionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What performing an action does to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionEffect {
    /// Advance to the next step, or complete the circuit at a final step.
    Approve,
    /// Mark the document rejected, optionally returning it to an earlier step.
    Reject,
    /// Move to a step chosen by the caller.
    Move,
}

impl fmt::Display for ActionEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionEffect::Approve => write!(f, "approve"),
            ActionEffect::Reject => write!(f, "reject"),
            ActionEffect::Move => write!(f, "move"),
        }
    }
}

/// An action callers can perform on a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "actionId")]
    pub id: ActionId,
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub effect: ActionEffect,
}

/// Fields supplied when registering an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAction {
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub effect: ActionEffect,
}

impl NewAction {
    pub fn new(key: impl Into<String>, title: impl Into<String>, effect: ActionEffect) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            description: String::new(),
            effect,
        }
    }
}
