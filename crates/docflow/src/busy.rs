//! Client-side busy flags.
//!
//! Keeps one caller from firing a second move for a document while its
//! first one is still in flight. This is a courtesy for interactive
//! clients; the engine's own locking and versioning do not depend on it.

use docflow_core::DocumentId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Documents with an operation in flight.
#[derive(Debug, Clone, Default)]
pub struct BusyFlags {
    inner: Arc<Mutex<HashSet<DocumentId>>>,
}

/// Clears the document's flag when dropped.
#[derive(Debug)]
#[must_use = "the flag is cleared as soon as the guard is dropped"]
pub struct MoveGuard {
    flags: BusyFlags,
    document_id: DocumentId,
}

impl BusyFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags the document, or returns `None` if it is already flagged.
    pub fn try_begin(&self, document_id: DocumentId) -> Option<MoveGuard> {
        if !self.set().insert(document_id) {
            debug!(document_id = %document_id, "Move already in flight");
            return None;
        }
        Some(MoveGuard {
            flags: self.clone(),
            document_id,
        })
    }

    pub fn is_busy(&self, document_id: DocumentId) -> bool {
        self.set().contains(&document_id)
    }

    fn set(&self) -> MutexGuard<'_, HashSet<DocumentId>> {
        // A panic while holding the flag set leaves it consistent.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for MoveGuard {
    fn drop(&mut self) {
        self.flags.set().remove(&self.document_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_begin_is_refused() {
        let flags = BusyFlags::new();
        let doc = DocumentId::new(1);

        let guard = flags.try_begin(doc);
        assert!(guard.is_some());
        assert!(flags.is_busy(doc));
        assert!(flags.try_begin(doc).is_none());
        assert!(flags.try_begin(DocumentId::new(2)).is_some());

        drop(guard);
        assert!(!flags.is_busy(doc));
        assert!(flags.try_begin(doc).is_some());
    }
}
