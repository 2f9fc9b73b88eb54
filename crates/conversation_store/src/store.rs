//! Conversation store - durable exchange chains and per-conversation state.
//!
//! Records are kept in a [`DurableMap`] under flat keys, one exchange per
//! `"{conversation}:{message_id}"` entry, plus a `last_message_id` pointer
//! and an optional persona role per conversation. Writes for a conversation
//! are serialized through a per-conversation lock so two concurrent appends
//! can never race on the same parent pointer and fork the chain.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::kv::DurableMap;
use relay_core::Exchange;

const LAST_MESSAGE_ID_SUFFIX: &str = "last_message_id";
const ROLE_SUFFIX: &str = "role";

pub struct ConversationStore<S: DurableMap> {
    kv: Arc<S>,
    default_role: String,
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: DurableMap> ConversationStore<S> {
    pub fn new(kv: S, default_role: impl Into<String>) -> Self {
        Self {
            kv: Arc::new(kv),
            default_role: default_role.into(),
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_role(&self) -> &str {
        &self.default_role
    }

    fn exchange_key(conversation_id: &str, message_id: Uuid) -> String {
        format!("{}:{}", conversation_id, message_id)
    }

    fn last_key(conversation_id: &str) -> String {
        format!("{}:{}", conversation_id, LAST_MESSAGE_ID_SUFFIX)
    }

    fn role_key(conversation_id: &str) -> String {
        format!("{}:{}", conversation_id, ROLE_SUFFIX)
    }

    /// Per-conversation writer lock; single writer per conversation.
    async fn writer(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut writers = self.writers.lock().await;
        writers
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Look up one exchange.
    pub async fn get(&self, conversation_id: &str, message_id: Uuid) -> Result<Option<Exchange>> {
        let key = Self::exchange_key(conversation_id, message_id);
        match self.kv.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Append a completed exchange and advance the last-message pointer.
    ///
    /// The new exchange's parent is whatever the pointer referenced when the
    /// writer lock was acquired.
    pub async fn append(
        &self,
        conversation_id: &str,
        message: &str,
        completion: &str,
    ) -> Result<Uuid> {
        let writer = self.writer(conversation_id).await;
        let _guard = writer.lock().await;

        let message_id = Uuid::new_v4();
        let key = Self::exchange_key(conversation_id, message_id);
        if self.kv.contains(&key).await? {
            return Err(StoreError::Integrity(format!(
                "duplicate message id {message_id} in conversation {conversation_id}"
            )));
        }

        let parent_message_id = self.last_message_id(conversation_id).await?;
        let exchange = Exchange::new(message, parent_message_id, completion);
        self.kv
            .set(&key, &serde_json::to_string(&exchange)?)
            .await?;
        self.kv
            .set(&Self::last_key(conversation_id), &message_id.to_string())
            .await?;

        tracing::debug!(
            conversation_id,
            %message_id,
            parent = ?parent_message_id,
            "appended exchange"
        );
        Ok(message_id)
    }

    pub async fn last_message_id(&self, conversation_id: &str) -> Result<Option<Uuid>> {
        let key = Self::last_key(conversation_id);
        match self.kv.get(&key).await? {
            Some(raw) => {
                let id = Uuid::parse_str(raw.trim()).map_err(|e| StoreError::InvalidValue {
                    key,
                    reason: e.to_string(),
                })?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    pub async fn set_last_message_id(
        &self,
        conversation_id: &str,
        message_id: Uuid,
    ) -> Result<()> {
        self.kv
            .set(&Self::last_key(conversation_id), &message_id.to_string())
            .await
    }

    /// Forget the conversation's context chain head. Stored exchanges are
    /// kept; only the pointer is dropped.
    pub async fn clear_last_message_id(&self, conversation_id: &str) -> Result<()> {
        self.kv.delete(&Self::last_key(conversation_id)).await
    }

    /// The conversation's system role, falling back to the default.
    pub async fn role(&self, conversation_id: &str) -> Result<String> {
        match self.kv.get(&Self::role_key(conversation_id)).await? {
            Some(role) => Ok(role),
            None => Ok(self.default_role.clone()),
        }
    }

    /// Set the persona for a conversation. Changing the role invalidates
    /// prior context framing, so a different value also clears the last
    /// pointer; setting the current value is a no-op.
    ///
    /// Returns whether the role actually changed.
    pub async fn set_role(&self, conversation_id: &str, role: &str) -> Result<bool> {
        if self.role(conversation_id).await? == role {
            return Ok(false);
        }
        self.kv.set(&Self::role_key(conversation_id), role).await?;
        self.clear_last_message_id(conversation_id).await?;
        tracing::debug!(conversation_id, "persona changed, context cleared");
        Ok(true)
    }

    /// Restore the default persona.
    pub async fn reset_role(&self, conversation_id: &str) -> Result<bool> {
        let default_role = self.default_role.clone();
        self.set_role(conversation_id, &default_role).await
    }

    /// Flush the underlying map. Must be called before process exit.
    pub async fn close(&self) -> Result<()> {
        self.kv.flush().await
    }
}
