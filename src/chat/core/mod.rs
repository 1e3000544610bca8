//! Core types for the conversation pipeline: configuration, errors, IDs,
//! and the conversation/message records.

pub mod config;
pub mod conversation;
pub mod errors;
pub mod ids;
pub mod message;

pub use config::{
    ChatConfig, GuardConfig, LifecycleConfig, RetentionConfig, RetryConfig, StorageConfig,
    ValidationConfig,
};
pub use conversation::ConversationRecord;
pub use errors::{ChatError, ChatResult, StoreError, ValidationError};
pub use ids::{ConversationId, MessageId, UserId};
pub use message::{FailureReason, MessageRecord, MessageRole, MessageStatus};
