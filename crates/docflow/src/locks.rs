//! Per-document mutual exclusion.

use docflow_core::{DocumentId, WorkflowError, WorkflowResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::time::timeout;
use tracing::warn;

// Idle entries are pruned once the table grows past this.
const PRUNE_THRESHOLD: usize = 1024;

/// Serializes validate-mutate-log sequences per document.
///
/// Distinct documents never contend with each other.
#[derive(Debug, Default)]
pub struct DocumentLocks {
    table: Mutex<HashMap<DocumentId, Arc<Mutex<()>>>>,
}

/// Held for the duration of one mutation.
#[derive(Debug)]
pub struct DocumentGuard {
    _guard: OwnedMutexGuard<()>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits up to `wait` for the document's lock.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::StateConflict`] if another mutation on the same
    /// document holds the lock for longer than `wait`.
    pub async fn acquire(
        &self,
        document_id: DocumentId,
        wait: Duration,
    ) -> WorkflowResult<DocumentGuard> {
        let lock = {
            let mut table = self.table.lock().await;
            if table.len() > PRUNE_THRESHOLD {
                table.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            table.entry(document_id).or_default().clone()
        };

        match timeout(wait, lock.lock_owned()).await {
            Ok(guard) => Ok(DocumentGuard { _guard: guard }),
            Err(_) => {
                warn!(document_id = %document_id, "Timed out waiting for document lock");
                Err(WorkflowError::StateConflict {
                    document_id,
                    details: format!("document busy for more than {wait:?}"),
                })
            }
        }
    }
}

/// Orders document commits against changes to circuit layout.
///
/// Mutations hold the shared side from load to commit. Deleting or
/// re-laying out circuits and steps takes the exclusive side, so an
/// occupancy check always sees every committed placement.
#[derive(Debug, Clone, Default)]
pub struct LayoutLock {
    inner: Arc<RwLock<()>>,
}

impl LayoutLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn shared(&self) -> OwnedRwLockReadGuard<()> {
        self.inner.clone().read_owned().await
    }

    pub async fn exclusive(&self) -> OwnedRwLockWriteGuard<()> {
        self.inner.clone().write_owned().await
    }
}
