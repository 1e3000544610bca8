//! Conversation model: an ordered thread of messages owned by one user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::core::ids::{ConversationId, UserId};

/// A persisted conversation record.
///
/// Messages are stored separately and ordered by creation timestamp; the
/// conversation exclusively owns them (deletes cascade).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Conversation identifier.
    pub id: ConversationId,
    /// Owning user.
    pub owner_id: UserId,
    /// Creation timestamp; eviction order is oldest-first on this field.
    pub created_at: DateTime<Utc>,
    /// Last-activity timestamp, bumped on every appended message.
    pub updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    /// Build a new conversation for a user.
    #[must_use]
    pub fn new(owner_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            owner_id,
            created_at: now,
            updated_at: now,
        }
    }
}
