//! Message model for conversation threads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::chat::core::ids::{ConversationId, MessageId};

/// Role of a stored message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

impl MessageRole {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

/// Processing status of a message.
///
/// The dispatcher guarantees that at most one message per conversation is
/// `Processing` at any instant.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Accepted and waiting behind an in-flight message.
    Queued,
    /// Currently being handled by the conversation worker.
    Processing,
    /// A response was persisted.
    Completed,
    /// The deadline or retry budget was exhausted.
    Failed,
}

impl MessageStatus {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the status is terminal (`Completed` or `Failed`).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(value.to_string()),
        }
    }
}

/// Why a message ended up `Failed`, retained for observability.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The agent exceeded its deadline.
    Timeout,
    /// The agent returned an explicit failure (not a timeout).
    AgentError,
    /// The store retry budget was exhausted.
    Persistence,
    /// The conversation disappeared between queueing and processing.
    NotFound,
}

impl FailureReason {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::AgentError => "agent_error",
            Self::Persistence => "persistence",
            Self::NotFound => "not_found",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FailureReason {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "timeout" => Ok(Self::Timeout),
            "agent_error" => Ok(Self::AgentError),
            "persistence" => Ok(Self::Persistence),
            "not_found" => Ok(Self::NotFound),
            _ => Err(value.to_string()),
        }
    }
}

/// A single persisted message belonging to exactly one conversation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Message identifier.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Role of the message.
    pub role: MessageRole,
    /// UTF-8 content payload.
    pub content: String,
    /// Processing status.
    pub status: MessageStatus,
    /// Failure reason, set only when `status` is `Failed`.
    pub failure_reason: Option<FailureReason>,
    /// Creation timestamp for ordering.
    pub created_at: DateTime<Utc>,
    /// Optional retention expiry timestamp.
    pub expires_at: Option<DateTime<Utc>>,
}

impl MessageRecord {
    /// Build a freshly accepted user message in status `Queued`.
    #[must_use]
    pub fn user(
        conversation_id: ConversationId,
        content: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            role: MessageRole::User,
            content: content.into(),
            status: MessageStatus::Queued,
            failure_reason: None,
            created_at: Utc::now(),
            expires_at,
        }
    }

    /// Build an assistant reply in status `Completed`.
    #[must_use]
    pub fn assistant(
        conversation_id: ConversationId,
        content: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            role: MessageRole::Assistant,
            content: content.into(),
            status: MessageStatus::Completed,
            failure_reason: None,
            created_at: Utc::now(),
            expires_at,
        }
    }
}
