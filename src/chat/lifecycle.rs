//! Conversation lifecycle: creation and per-user cap enforcement.

use std::sync::Arc;

use tracing::{debug, info};

use crate::chat::core::config::{LifecycleConfig, RetryConfig};
use crate::chat::core::conversation::ConversationRecord;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{ConversationId, UserId};
use crate::chat::storage::conversation_store::ConversationStore;
use crate::chat::storage::retry::with_retry;

/// Creates conversations and enforces the per-user conversation cap via
/// FIFO eviction (oldest by creation timestamp, ties by id ascending).
///
/// The cap is soft-enforced: two concurrent creations may briefly overshoot
/// it, and the next lifecycle operation for that user evicts back down.
/// There is deliberately no user-scoped lock here.
pub struct LifecycleManager {
    store: Arc<dyn ConversationStore>,
    retry: RetryConfig,
    max_conversations: u64,
}

impl LifecycleManager {
    /// Create a new lifecycle manager.
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>, config: &LifecycleConfig, retry: &RetryConfig) -> Self {
        Self {
            store,
            retry: retry.clone(),
            max_conversations: config.max_conversations,
        }
    }

    /// Resolve the target conversation for a user message.
    ///
    /// With an explicit id, the conversation is returned only if it belongs
    /// to `user_id`; anything else fails with `NotOwned`, which renders as
    /// not-found so cross-user existence never leaks. Without an id, a new
    /// conversation is created, evicting the user's oldest conversations
    /// first if the cap is reached. Eviction is not rolled back if the
    /// subsequent creation fails: never exceeding the cap wins over never
    /// evicting needlessly.
    ///
    /// # Errors
    /// Returns `NotOwned` for unknown or foreign conversations, or a store
    /// error once the retry budget is exhausted.
    pub async fn resolve_conversation(
        &self,
        user_id: UserId,
        conversation_id: Option<ConversationId>,
    ) -> ChatResult<ConversationRecord> {
        match conversation_id {
            Some(id) => self.resolve_existing(user_id, id).await,
            None => self.create_with_eviction(user_id).await,
        }
    }

    async fn resolve_existing(
        &self,
        user_id: UserId,
        id: ConversationId,
    ) -> ChatResult<ConversationRecord> {
        let found = with_retry(&self.retry, || self.store.get_conversation(id)).await?;
        match found {
            Some(conversation) if conversation.owner_id == user_id => Ok(conversation),
            Some(_) | None => Err(ChatError::NotOwned),
        }
    }

    async fn create_with_eviction(&self, user_id: UserId) -> ChatResult<ConversationRecord> {
        let mut count =
            with_retry(&self.retry, || self.store.count_conversations(user_id)).await?;

        // A concurrent creation may have overshot the cap; evict until there
        // is room for exactly one more.
        while count >= self.max_conversations {
            let oldest =
                with_retry(&self.retry, || self.store.oldest_conversation(user_id)).await?;
            let Some(oldest) = oldest else {
                break;
            };
            info!(
                user_id = %user_id,
                conversation_id = %oldest.id,
                created_at = %oldest.created_at,
                "Evicting oldest conversation at cap"
            );
            with_retry(&self.retry, || self.store.delete_conversation(oldest.id)).await?;
            count = count.saturating_sub(1);
        }

        let record = ConversationRecord::new(user_id);
        with_retry(&self.retry, || {
            self.store.create_conversation(record.clone())
        })
        .await?;
        debug!(user_id = %user_id, conversation_id = %record.id, "Created conversation");
        Ok(record)
    }
}
