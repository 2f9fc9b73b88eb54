//! Stored conversation exchanges.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// System role used when a conversation has no persona override.
pub const DEFAULT_SYSTEM_ROLE: &str = "You are a helpful assistant";

/// One stored user-message/assistant-completion pair.
///
/// Exchanges are immutable once written and form a singly-linked backward
/// chain via `parent_message_id`, terminating at a root exchange with no
/// parent.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Exchange {
    pub message: String,
    pub parent_message_id: Option<Uuid>,
    pub completion: String,
}

impl Exchange {
    pub fn new(
        message: impl Into<String>,
        parent_message_id: Option<Uuid>,
        completion: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            parent_message_id,
            completion: completion.into(),
        }
    }

    /// Combined text used when estimating this exchange's token cost.
    pub fn combined_text(&self) -> String {
        format!("{} {}", self.message, self.completion)
    }

    pub fn is_root(&self) -> bool {
        self.parent_message_id.is_none()
    }
}
