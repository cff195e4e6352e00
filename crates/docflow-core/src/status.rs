//! Step status checklist items.

use crate::ids::{StatusId, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A checklist item attached to one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(rename = "statusId")]
    pub id: StatusId,
    pub key: String,
    pub step_id: StepId,
    pub title: String,
    /// Must be complete before the step counts as satisfied.
    pub is_required: bool,
}

/// Fields supplied when creating or updating a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStatus {
    pub title: String,
    pub is_required: bool,
}

impl NewStatus {
    pub fn required(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            is_required: true,
        }
    }

    pub fn optional(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            is_required: false,
        }
    }
}

/// A status of the current step as seen by one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStatus {
    #[serde(flatten)]
    pub status: Status,
    pub is_complete: bool,
    pub completed_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}
