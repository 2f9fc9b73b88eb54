//! Prompt window assembly.
//!
//! Walks the parent-pointer chain backward from a conversation's last
//! exchange, accumulating history until the token budget is exhausted, and
//! emits an ordered prompt: oldest-to-newest prior exchanges, the system
//! role, then the new user message.

use thiserror::Error;

use crate::error::StoreError;
use crate::kv::DurableMap;
use crate::store::ConversationStore;
use relay_core::{tokens, PromptMessage};

#[derive(Error, Debug)]
pub enum PromptError {
    /// The system role plus the new message alone exceed the budget. Not
    /// retried; the caller surfaces a "message too long" reply.
    #[error("prompt exceeds the configured token budget")]
    TooLarge,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct PromptWindowBuilder {
    budget: usize,
}

impl PromptWindowBuilder {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Build the prompt for `message` in `conversation_id`.
    ///
    /// With no prior context the prompt is the bare user message. Otherwise
    /// history is added newest-first until the next exchange would push the
    /// running total over the budget, then reversed to oldest-first. The
    /// system role is always included and never evicted, but its cost does
    /// count toward the running total.
    pub async fn build<S: DurableMap>(
        &self,
        store: &ConversationStore<S>,
        conversation_id: &str,
        message: &str,
    ) -> Result<Vec<PromptMessage>, PromptError> {
        let mut cursor = match store.last_message_id(conversation_id).await? {
            Some(id) => id,
            None => return Ok(vec![PromptMessage::user(message)]),
        };

        let role = store.role(conversation_id).await?;
        let mut total = tokens::estimate(&role) + tokens::estimate(message);
        if total > self.budget {
            return Err(PromptError::TooLarge);
        }

        // Newest-first accumulation along the parent chain.
        let mut history = Vec::new();
        loop {
            let exchange = store
                .get(conversation_id, cursor)
                .await?
                .ok_or_else(|| {
                    StoreError::Integrity(format!(
                        "dangling parent pointer {cursor} in conversation {conversation_id}"
                    ))
                })?;

            let cost = tokens::estimate(&exchange.combined_text());
            if total + cost > self.budget {
                break;
            }
            total += cost;

            let parent = exchange.parent_message_id;
            history.push(exchange);
            match parent {
                Some(id) => cursor = id,
                None => break,
            }
        }
        tracing::debug!(conversation_id, total, "estimated prompt token count");

        history.reverse();
        let mut prompt = Vec::with_capacity(history.len() * 2 + 2);
        for exchange in history {
            prompt.push(PromptMessage::user(exchange.message));
            prompt.push(PromptMessage::assistant(exchange.completion));
        }
        prompt.push(PromptMessage::system(role));
        prompt.push(PromptMessage::user(message));
        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use relay_core::Role;

    fn store() -> ConversationStore<MemoryKvStore> {
        ConversationStore::new(MemoryKvStore::new(), "role")
    }

    #[tokio::test]
    async fn no_history_yields_bare_user_message() {
        let store = store();
        let builder = PromptWindowBuilder::new(3000);

        let prompt = builder.build(&store, "conv", "hello").await.unwrap();
        assert_eq!(prompt, vec![PromptMessage::user("hello")]);
    }

    #[tokio::test]
    async fn history_is_ordered_oldest_first() {
        let store = store();
        store.append("conv", "first q", "first a").await.unwrap();
        store.append("conv", "second q", "second a").await.unwrap();

        let builder = PromptWindowBuilder::new(3000);
        let prompt = builder.build(&store, "conv", "third q").await.unwrap();

        let contents: Vec<&str> = prompt.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["first q", "first a", "second q", "second a", "role", "third q"]
        );
        assert_eq!(prompt[4].role, Role::System);
        assert_eq!(prompt[5].role, Role::User);
    }

    #[tokio::test]
    async fn budget_never_exceeded_drops_oldest_first() {
        let store = store();
        // Each exchange costs well over budget/5; only the newest fit.
        for i in 0..5 {
            let filler = "x".repeat(160); // ~40 tokens per side
            store
                .append("conv", &format!("{filler}{i}"), &filler)
                .await
                .unwrap();
        }

        // role (~1) + message (~1) + ~81 per exchange; budget of 200 fits
        // two exchanges only.
        let builder = PromptWindowBuilder::new(200);
        let prompt = builder.build(&store, "conv", "next").await.unwrap();

        // 2 exchanges * 2 turns + system + user message.
        assert_eq!(prompt.len(), 6);
        // The survivors are the two newest, oldest of them first.
        assert!(prompt[0].content.ends_with('3'));
        assert!(prompt[2].content.ends_with('4'));

        let total: usize = prompt
            .iter()
            .map(|m| relay_core::tokens::estimate(&m.content))
            .sum();
        assert!(total <= 200);
    }

    #[tokio::test]
    async fn oversized_message_fails_before_walking() {
        let store = store();
        store.append("conv", "q", "a").await.unwrap();

        let builder = PromptWindowBuilder::new(10);
        let result = builder
            .build(&store, "conv", &"word ".repeat(100))
            .await;
        assert!(matches!(result, Err(PromptError::TooLarge)));
    }

    #[tokio::test]
    async fn dangling_pointer_is_an_integrity_fault() {
        let store = store();
        // Point the conversation at a message that was never written.
        store
            .set_last_message_id("conv", uuid::Uuid::new_v4())
            .await
            .unwrap();

        let builder = PromptWindowBuilder::new(3000);
        let result = builder.build(&store, "conv", "hi").await;
        assert!(matches!(
            result,
            Err(PromptError::Store(StoreError::Integrity(_)))
        ));
    }

    #[tokio::test]
    async fn system_role_is_always_present_with_history() {
        let store = store();
        store.append("conv", "q", "a").await.unwrap();

        // Budget fits role + message but not the exchange.
        let builder = PromptWindowBuilder::new(2);
        let prompt = builder.build(&store, "conv", "hi").await.unwrap();
        assert_eq!(
            prompt,
            vec![PromptMessage::system("role"), PromptMessage::user("hi")]
        );
    }
}
