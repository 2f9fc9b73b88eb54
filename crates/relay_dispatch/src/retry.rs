//! Retry queue for messages that could not be dispatched.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// A message waiting for a backend session to become available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuestion {
    pub conversation_id: String,
    pub user_id: String,
    pub text: String,
}

/// Pending messages keyed by user id. A newer message from the same user
/// supersedes the older one: this is last-write-wins, not a queue, so only
/// the latest unanswered message per user is ever retried.
#[derive(Default)]
pub struct RetryQueue {
    pending: Mutex<HashMap<String, PendingQuestion>>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingQuestion>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn save(&self, question: PendingQuestion) {
        self.pending()
            .insert(question.user_id.clone(), question);
    }

    /// Copy of the current entries, for a retry sweep to iterate without
    /// holding the lock.
    pub fn snapshot(&self) -> Vec<PendingQuestion> {
        self.pending().values().cloned().collect()
    }

    /// Remove a user's entry only if it still holds `question` (a newer
    /// message may have superseded it while the sweep ran).
    pub fn remove_if_current(&self, question: &PendingQuestion) {
        let mut pending = self.pending();
        if pending.get(&question.user_id) == Some(question) {
            pending.remove(&question.user_id);
        }
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }
}
