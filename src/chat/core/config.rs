//! Configuration for the conversation pipeline.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chat::core::errors::{ChatError, ChatResult};

/// Ceiling for configurable message TTLs; chrono durations carry
/// millisecond precision in an `i64`, so larger values cannot be
/// represented.
#[allow(clippy::cast_sign_loss)]
pub const MAX_MESSAGE_TTL_SECONDS: u64 = (i64::MAX / 1000) as u64;

/// Top-level configuration for the conversation pipeline.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Input validation settings.
    pub validation: ValidationConfig,
    /// Per-user conversation cap settings.
    pub lifecycle: LifecycleConfig,
    /// Agent invocation deadline settings.
    pub guard: GuardConfig,
    /// Store retry settings.
    pub retry: RetryConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Retention and TTL settings.
    pub retention: RetentionConfig,
}

impl ChatConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        if self.validation.max_content_chars == 0 {
            return Err(ChatError::InvalidConfig(
                "validation.max_content_chars must be > 0".to_string(),
            ));
        }

        if self.lifecycle.max_conversations == 0 {
            return Err(ChatError::InvalidConfig(
                "lifecycle.max_conversations must be > 0".to_string(),
            ));
        }

        if self.guard.deadline_ms == 0 {
            return Err(ChatError::InvalidConfig(
                "guard.deadline_ms must be > 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ChatError::InvalidConfig(
                "retry.max_attempts must be > 0".to_string(),
            ));
        }

        if self.retention.interval_seconds == 0 {
            return Err(ChatError::InvalidConfig(
                "retention.interval_seconds must be > 0".to_string(),
            ));
        }

        if let Some(ttl) = self.retention.message_ttl_seconds {
            if ttl == 0 {
                return Err(ChatError::InvalidConfig(
                    "retention.message_ttl_seconds must be > 0 when set".to_string(),
                ));
            }
            if ttl > MAX_MESSAGE_TTL_SECONDS {
                return Err(ChatError::InvalidConfig(format!(
                    "retention.message_ttl_seconds must be <= {MAX_MESSAGE_TTL_SECONDS}"
                )));
            }
        }

        Ok(())
    }
}

/// Input validation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Maximum user message length in Unicode code points.
    pub max_content_chars: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_content_chars: 2000,
        }
    }
}

/// Per-user conversation cap settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Maximum conversations per user; the oldest is evicted beyond this.
    pub max_conversations: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_conversations: 100,
        }
    }
}

/// Agent invocation deadline settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Deadline for a single agent invocation, in milliseconds.
    pub deadline_ms: u64,
}

impl GuardConfig {
    /// Deadline as a `Duration`.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 30_000, // 30 seconds
        }
    }
}

/// Store retry settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per operation (1 initial + retries).
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds; doubles on each retry.
    pub base_delay_ms: u64,
}

impl RetryConfig {
    /// Base backoff delay as a `Duration`.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

/// Storage configuration for conversation data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Conversation table name.
    pub conversation_table: String,
    /// Message table name.
    pub message_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("taskline.sqlite"),
            conversation_table: "conversations".to_string(),
            message_table: "messages".to_string(),
        }
    }
}

/// Retention settings for the background sweeper.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Interval between sweep runs (in seconds).
    pub interval_seconds: u64,
    /// Whether the background sweeper is enabled.
    pub enabled: bool,
    /// Optional TTL applied to new messages, in seconds.
    ///
    /// When unset, messages carry no expiry and the sweeper is a no-op.
    pub message_ttl_seconds: Option<u64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600, // 1 hour
            enabled: true,
            message_ttl_seconds: None,
        }
    }
}
