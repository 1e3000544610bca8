//! Session orchestrator: the sole externally callable entry point of the
//! conversation pipeline.
//!
//! Composes the validator, the lifecycle manager, the store (with bounded
//! retry), and the per-conversation dispatcher into a single
//! `handle_user_message` call.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::agent::AgentEngine;
use crate::chat::core::config::ChatConfig;
use crate::chat::core::errors::{ChatError, ChatResult, ValidationError};
use crate::chat::core::ids::{ConversationId, MessageId, UserId};
use crate::chat::core::message::MessageRecord;
use crate::chat::dispatch::{ConversationDispatcher, SubmitAcceptance};
use crate::chat::guard::AgentGuard;
use crate::chat::lifecycle::LifecycleManager;
use crate::chat::storage::conversation_store::{ConversationStore, SqliteConversationStore};
use crate::chat::storage::retry::with_retry;
use crate::chat::validate::validate_content;

/// Outcome of accepting one user message.
#[derive(Debug)]
pub enum MessageAcceptance {
    /// The message was persisted and processing started immediately.
    Accepted {
        /// Identifier of the accepted message.
        message_id: MessageId,
        /// Conversation the message was routed to.
        conversation_id: ConversationId,
    },
    /// The message was persisted and queued behind an in-flight message.
    Queued {
        /// Identifier of the accepted message.
        message_id: MessageId,
        /// Conversation the message was routed to.
        conversation_id: ConversationId,
        /// 1-based position behind the in-flight message.
        position: usize,
    },
    /// The content was rejected before any state mutation.
    Rejected(ValidationError),
    /// Lifecycle resolution or persistence could not complete after
    /// retries; the caller keeps the content and may retry.
    Failed(ChatError),
}

/// Public entry point composing the conversation pipeline.
pub struct SessionOrchestrator {
    config: ChatConfig,
    store: Arc<dyn ConversationStore>,
    lifecycle: LifecycleManager,
    dispatcher: ConversationDispatcher,
}

impl SessionOrchestrator {
    /// Create an orchestrator over an existing store and agent engine.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: ChatConfig,
        store: Arc<dyn ConversationStore>,
        engine: Arc<dyn AgentEngine>,
    ) -> ChatResult<Self> {
        config.validate()?;
        let guard = Arc::new(AgentGuard::new(engine, &config.guard));
        let lifecycle = LifecycleManager::new(store.clone(), &config.lifecycle, &config.retry);
        let dispatcher = ConversationDispatcher::new(store.clone(), guard, &config.retry);

        Ok(Self {
            config,
            store,
            lifecycle,
            dispatcher,
        })
    }

    /// Create an orchestrator with the default `SQLite` store.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the database
    /// cannot be opened.
    pub async fn from_config(
        config: ChatConfig,
        engine: Arc<dyn AgentEngine>,
    ) -> ChatResult<Self> {
        let store = Arc::new(SqliteConversationStore::new(&config.storage).await?);
        Self::new(config, store, engine)
    }

    /// Accept a user message into the pipeline.
    ///
    /// Returns one of four acceptance states; validation and ownership
    /// problems are terminal and returned synchronously, while agent
    /// timeouts and later persistence failures are recorded against the
    /// message itself. Rejected input creates no state at all, and a
    /// `Failed` acceptance means the content was never persisted, so the
    /// caller can replay it verbatim.
    pub async fn handle_user_message(
        &self,
        user_id: UserId,
        conversation_id: Option<ConversationId>,
        content: &str,
    ) -> MessageAcceptance {
        match self.accept(user_id, conversation_id, content).await {
            Ok(acceptance) => acceptance,
            Err(ChatError::Validation(err)) => MessageAcceptance::Rejected(err),
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "Message not accepted");
                MessageAcceptance::Failed(err)
            }
        }
    }

    async fn accept(
        &self,
        user_id: UserId,
        conversation_id: Option<ConversationId>,
        content: &str,
    ) -> ChatResult<MessageAcceptance> {
        let validated = validate_content(content, &self.config.validation)?;

        let conversation = self
            .lifecycle
            .resolve_conversation(user_id, conversation_id)
            .await?;

        // The TTL is bounded by `ChatConfig::validate`, so both conversions
        // succeed; `try_seconds` keeps this panic-free regardless.
        let expires_at = self
            .config
            .retention
            .message_ttl_seconds
            .and_then(|ttl| i64::try_from(ttl).ok())
            .and_then(ChronoDuration::try_seconds)
            .map(|ttl| Utc::now() + ttl);
        let message = MessageRecord::user(conversation.id, validated.into_string(), expires_at);

        with_retry(&self.config.retry, || {
            self.store.append_message(message.clone())
        })
        .await?;

        let ticket = self.dispatcher.submit(message);
        info!(
            user_id = %user_id,
            conversation_id = %conversation.id,
            message_id = %ticket.message_id,
            ?ticket.acceptance,
            "User message accepted"
        );

        Ok(match ticket.acceptance {
            SubmitAcceptance::Processing => MessageAcceptance::Accepted {
                message_id: ticket.message_id,
                conversation_id: conversation.id,
            },
            SubmitAcceptance::Queued { position } => MessageAcceptance::Queued {
                message_id: ticket.message_id,
                conversation_id: conversation.id,
                position,
            },
        })
    }

    /// Load the ordered message history of a conversation owned by the user.
    ///
    /// # Errors
    /// Returns `NotOwned` for unknown or foreign conversations, or a store
    /// error once the retry budget is exhausted.
    pub async fn conversation_history(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> ChatResult<Vec<MessageRecord>> {
        let conversation = self
            .lifecycle
            .resolve_conversation(user_id, Some(conversation_id))
            .await?;
        Ok(with_retry(&self.config.retry, || {
            self.store.load_messages(conversation.id)
        })
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentEngineError, AgentReply, AgentTurn};
    use crate::chat::core::config::{LifecycleConfig, RetryConfig, StorageConfig};
    use crate::chat::core::conversation::ConversationRecord;
    use crate::chat::core::message::{MessageRole, MessageStatus};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Replies `ok` after a small fixed delay so queueing is observable.
    struct EchoEngine {
        delay: Duration,
    }

    #[async_trait]
    impl AgentEngine for EchoEngine {
        async fn invoke(&self, _history: &[AgentTurn]) -> Result<AgentReply, AgentEngineError> {
            tokio::time::sleep(self.delay).await;
            Ok(AgentReply {
                content: "ok".to_string(),
                tool_calls: Vec::new(),
            })
        }
    }

    async fn setup(
        max_conversations: u64,
        delay: Duration,
    ) -> (Arc<SqliteConversationStore>, SessionOrchestrator) {
        let config = ChatConfig {
            storage: StorageConfig {
                sqlite_path: PathBuf::from(":memory:"),
                ..StorageConfig::default()
            },
            lifecycle: LifecycleConfig { max_conversations },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
            },
            ..ChatConfig::default()
        };

        let store = Arc::new(SqliteConversationStore::new(&config.storage).await.unwrap());
        let orchestrator =
            SessionOrchestrator::new(config, store.clone(), Arc::new(EchoEngine { delay }))
                .unwrap();
        (store, orchestrator)
    }

    async fn wait_for_terminal(
        store: &SqliteConversationStore,
        message_id: MessageId,
    ) -> MessageStatus {
        for _ in 0..100 {
            let message = store.get_message(message_id).await.unwrap().unwrap();
            if message.status.is_terminal() {
                return message.status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("message never reached a terminal state");
    }

    #[tokio::test]
    async fn test_message_accepted_into_new_conversation() {
        let (store, orchestrator) = setup(100, Duration::from_millis(1)).await;
        let user = UserId::new();

        let acceptance = orchestrator
            .handle_user_message(user, None, "Buy milk")
            .await;
        let MessageAcceptance::Accepted {
            message_id,
            conversation_id,
        } = acceptance
        else {
            panic!("expected Accepted, got {acceptance:?}");
        };

        assert_eq!(wait_for_terminal(&store, message_id).await, MessageStatus::Completed);
        let history = store.load_messages(conversation_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_second_message_queued_then_processed() {
        let (store, orchestrator) = setup(100, Duration::from_millis(80)).await;
        let user = UserId::new();

        let first = orchestrator.handle_user_message(user, None, "A").await;
        let MessageAcceptance::Accepted {
            conversation_id, ..
        } = first
        else {
            panic!("expected Accepted, got {first:?}");
        };

        let second = orchestrator
            .handle_user_message(user, Some(conversation_id), "B")
            .await;
        let MessageAcceptance::Queued {
            message_id,
            position,
            ..
        } = second
        else {
            panic!("expected Queued, got {second:?}");
        };
        assert_eq!(position, 1);

        // Once A completes, B is promoted and completes on its own.
        assert_eq!(wait_for_terminal(&store, message_id).await, MessageStatus::Completed);
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let (_, orchestrator) = setup(100, Duration::from_millis(1)).await;
        let acceptance = orchestrator
            .handle_user_message(UserId::new(), None, "   ")
            .await;
        assert!(matches!(
            acceptance,
            MessageAcceptance::Rejected(ValidationError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_oversized_message_rejected_with_counts() {
        let (_, orchestrator) = setup(100, Duration::from_millis(1)).await;
        let content = "x".repeat(2001);
        let acceptance = orchestrator
            .handle_user_message(UserId::new(), None, &content)
            .await;
        assert!(matches!(
            acceptance,
            MessageAcceptance::Rejected(ValidationError::ContentTooLong {
                actual: 2001,
                max: 2000
            })
        ));
    }

    #[tokio::test]
    async fn test_foreign_conversation_fails_as_not_owned() {
        let (store, orchestrator) = setup(100, Duration::from_millis(1)).await;

        let foreign = ConversationRecord::new(UserId::new());
        store.create_conversation(foreign.clone()).await.unwrap();

        let acceptance = orchestrator
            .handle_user_message(UserId::new(), Some(foreign.id), "hello")
            .await;
        assert!(matches!(
            acceptance,
            MessageAcceptance::Failed(ChatError::NotOwned)
        ));
    }

    #[tokio::test]
    async fn test_new_conversation_at_cap_evicts_oldest() {
        let (store, orchestrator) = setup(2, Duration::from_millis(1)).await;
        let user = UserId::new();

        let first = orchestrator.handle_user_message(user, None, "one").await;
        let MessageAcceptance::Accepted {
            conversation_id: oldest,
            ..
        } = first
        else {
            panic!("expected Accepted, got {first:?}");
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        orchestrator.handle_user_message(user, None, "two").await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let third = orchestrator
            .handle_user_message(user, None, "Buy milk")
            .await;
        assert!(matches!(third, MessageAcceptance::Accepted { .. }));

        assert_eq!(store.count_conversations(user).await.unwrap(), 2);
        assert!(store.get_conversation(oldest).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_scoped_to_owner() {
        let (_, orchestrator) = setup(100, Duration::from_millis(1)).await;
        let user = UserId::new();

        let acceptance = orchestrator.handle_user_message(user, None, "hello").await;
        let MessageAcceptance::Accepted {
            conversation_id, ..
        } = acceptance
        else {
            panic!("expected Accepted, got {acceptance:?}");
        };

        let history = orchestrator
            .conversation_history(user, conversation_id)
            .await
            .unwrap();
        assert!(!history.is_empty());

        let err = orchestrator
            .conversation_history(UserId::new(), conversation_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotOwned));
    }
}
