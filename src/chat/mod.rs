//! Conversation pipeline for the Taskline agent.
//!
//! This module provides the message-processing and resilience layer between
//! transport and agent, organized into:
//! - `core`: Configuration, errors, IDs, conversations, and messages
//! - `validate`: Content validation ahead of any state mutation
//! - `storage`: Conversation/message store with `SQLite` backend and retry
//! - `lifecycle`: Conversation resolution and FIFO capacity eviction
//! - `guard`: Deadline-bounded agent invocation
//! - `dispatch`: Per-conversation FIFO dispatch with lane workers
//! - `orchestrator`: The externally callable pipeline entry point
//! - `maintenance`: Background retention sweeping

pub mod core;
pub mod dispatch;
pub mod guard;
pub mod lifecycle;
pub mod maintenance;
pub mod orchestrator;
pub mod storage;
pub mod validate;

// Re-export commonly used types for convenience
pub use core::{
    ChatConfig, ChatError, ChatResult, ConversationId, ConversationRecord, FailureReason,
    GuardConfig, LifecycleConfig, MessageId, MessageRecord, MessageRole, MessageStatus,
    RetentionConfig, RetryConfig, StorageConfig, StoreError, UserId, ValidationConfig,
    ValidationError,
};
pub use dispatch::{ConversationDispatcher, MessageOutcome, SubmitAcceptance, SubmitTicket};
pub use guard::{AgentGuard, GuardError};
pub use lifecycle::LifecycleManager;
pub use maintenance::{RetentionSweeper, SweepStats};
pub use orchestrator::{MessageAcceptance, SessionOrchestrator};
pub use storage::{ConversationStore, SqliteConversationStore, StoreFuture, StoreResult, with_retry};
pub use validate::{ValidatedContent, validate_content};
