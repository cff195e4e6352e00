//! History queries.
//!
//! Entries are only ever appended by [`DocumentStore::commit`], together with
//! the state change they record.

use docflow_core::{
    ActionId, DefinitionStore, DocumentId, DocumentStore, HistoryEntry, HistoryQuery, StatusId,
    StepId, WorkflowResult,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Read access to the append-only history.
#[derive(Clone)]
pub struct HistoryLog {
    documents: Arc<dyn DocumentStore>,
    definitions: Arc<dyn DefinitionStore>,
}

/// A history entry with the titles of what it refers to.
///
/// Titles are `None` once the referenced configuration has been deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryView {
    #[serde(flatten)]
    pub entry: HistoryEntry,
    pub step_title: Option<String>,
    pub action_title: Option<String>,
    pub status_title: Option<String>,
}

impl std::fmt::Debug for HistoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryLog").finish_non_exhaustive()
    }
}

/// Entries of one query, oldest first.
///
/// Holds a snapshot taken when the query ran; later commits are not visible.
#[derive(Debug)]
pub struct HistoryIter {
    entries: std::vec::IntoIter<HistoryEntry>,
}

impl Iterator for HistoryIter {
    type Item = HistoryEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for HistoryIter {}

impl HistoryLog {
    pub fn new(documents: Arc<dyn DocumentStore>, definitions: Arc<dyn DefinitionStore>) -> Self {
        Self {
            documents,
            definitions,
        }
    }

    /// Runs a query against the store, ordered by `processed_at` then id.
    pub async fn query(&self, query: HistoryQuery) -> WorkflowResult<HistoryIter> {
        let mut entries = self.documents.history(query).await?;
        entries.sort_by(|a, b| (a.processed_at, a.id).cmp(&(b.processed_at, b.id)));
        Ok(HistoryIter {
            entries: entries.into_iter(),
        })
    }

    pub async fn for_document(&self, document_id: DocumentId) -> WorkflowResult<HistoryIter> {
        self.query(HistoryQuery::Document(document_id)).await
    }

    pub async fn for_step(&self, step_id: StepId) -> WorkflowResult<HistoryIter> {
        self.query(HistoryQuery::Step(step_id)).await
    }

    /// The document's history with step, action and status titles, oldest
    /// first.
    pub async fn details(&self, document_id: DocumentId) -> WorkflowResult<Vec<HistoryView>> {
        let entries = self.for_document(document_id).await?;
        let mut steps: HashMap<StepId, Option<String>> = HashMap::new();
        let mut actions: HashMap<ActionId, Option<String>> = HashMap::new();
        let mut statuses: HashMap<StatusId, Option<String>> = HashMap::new();

        let mut views = Vec::with_capacity(entries.len());
        for entry in entries {
            let step_title = match steps.get(&entry.step_id) {
                Some(title) => title.clone(),
                None => {
                    let title = self.definitions.step(entry.step_id).await?.map(|s| s.title);
                    steps.insert(entry.step_id, title.clone());
                    title
                }
            };
            let action_title = match entry.action_id {
                Some(id) => match actions.get(&id) {
                    Some(title) => title.clone(),
                    None => {
                        let title = self.definitions.action(id).await?.map(|a| a.title);
                        actions.insert(id, title.clone());
                        title
                    }
                },
                None => None,
            };
            let status_title = match entry.status_id {
                Some(id) => match statuses.get(&id) {
                    Some(title) => title.clone(),
                    None => {
                        let title = self.definitions.status(id).await?.map(|s| s.title);
                        statuses.insert(id, title.clone());
                        title
                    }
                },
                None => None,
            };
            views.push(HistoryView {
                entry,
                step_title,
                action_title,
                status_title,
            });
        }
        Ok(views)
    }
}
