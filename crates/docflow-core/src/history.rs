//! Append-only workflow history records.

use crate::ids::{ActionId, DocumentId, HistoryId, StatusId, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One applied transition, action or status toggle. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: HistoryId,
    pub document_id: DocumentId,
    /// Step the document was at when the entry was recorded.
    pub step_id: StepId,
    pub action_id: Option<ActionId>,
    pub status_id: Option<StatusId>,
    pub processed_by: String,
    pub processed_at: DateTime<Utc>,
    pub comments: String,
    pub is_approved: bool,
}

/// A history entry before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub document_id: DocumentId,
    pub step_id: StepId,
    pub action_id: Option<ActionId>,
    pub status_id: Option<StatusId>,
    pub processed_by: String,
    pub processed_at: DateTime<Utc>,
    pub comments: String,
    pub is_approved: bool,
}

impl NewHistoryEntry {
    pub fn into_entry(self, id: HistoryId) -> HistoryEntry {
        HistoryEntry {
            id,
            document_id: self.document_id,
            step_id: self.step_id,
            action_id: self.action_id,
            status_id: self.status_id,
            processed_by: self.processed_by,
            processed_at: self.processed_at,
            comments: self.comments,
            is_approved: self.is_approved,
        }
    }
}

/// Selects history entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryQuery {
    Document(DocumentId),
    Step(StepId),
}

impl HistoryQuery {
    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        match self {
            HistoryQuery::Document(id) => entry.document_id == *id,
            HistoryQuery::Step(id) => entry.step_id == *id,
        }
    }
}
