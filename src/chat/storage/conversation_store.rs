//! Conversation and message persistence.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::chat::core::config::StorageConfig;
use crate::chat::core::conversation::ConversationRecord;
use crate::chat::core::errors::StoreError;
use crate::chat::core::ids::{ConversationId, MessageId, UserId};
use crate::chat::core::message::{FailureReason, MessageRecord, MessageRole, MessageStatus};

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Convenience result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence facade for conversations and their messages.
///
/// Implementations own the read/write path; bounded-retry semantics live in
/// [`super::retry::with_retry`], which wraps individual calls.
pub trait ConversationStore: Send + Sync {
    /// Create a conversation record.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn create_conversation(&self, record: ConversationRecord) -> StoreFuture<'_, StoreResult<()>>;

    /// Fetch a conversation by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get_conversation(
        &self,
        id: ConversationId,
    ) -> StoreFuture<'_, StoreResult<Option<ConversationRecord>>>;

    /// Count conversations owned by a user.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn count_conversations(&self, owner_id: UserId) -> StoreFuture<'_, StoreResult<u64>>;

    /// Fetch the user's oldest conversation by creation timestamp,
    /// ties broken by id ascending.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn oldest_conversation(
        &self,
        owner_id: UserId,
    ) -> StoreFuture<'_, StoreResult<Option<ConversationRecord>>>;

    /// Delete a conversation and all of its messages in one transaction.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete_conversation(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<()>>;

    /// Append a message and bump the conversation's last-activity timestamp
    /// in one transaction.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn append_message(&self, record: MessageRecord) -> StoreFuture<'_, StoreResult<()>>;

    /// Update a message's processing status (and failure reason, if any).
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if the message no longer exists, e.g.
    /// deleted by retention between queueing and processing.
    fn update_message_status(
        &self,
        id: MessageId,
        status: MessageStatus,
        failure_reason: Option<FailureReason>,
    ) -> StoreFuture<'_, StoreResult<()>>;

    /// Persist a completed exchange in one transaction: insert the assistant
    /// reply, mark the user message `Completed`, and bump the conversation's
    /// last-activity timestamp.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if the user message no longer exists;
    /// the transaction is rolled back so no partial reply is written.
    fn record_exchange(
        &self,
        user_message_id: MessageId,
        reply: MessageRecord,
    ) -> StoreFuture<'_, StoreResult<()>>;

    /// Load all messages of a conversation ordered by creation timestamp.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn load_messages(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, StoreResult<Vec<MessageRecord>>>;

    /// Fetch a message by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get_message(&self, id: MessageId) -> StoreFuture<'_, StoreResult<Option<MessageRecord>>>;

    /// Delete messages whose expiry timestamp has passed.
    ///
    /// Returns the number of deleted rows.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete_expired_messages(&self, now: DateTime<Utc>) -> StoreFuture<'_, StoreResult<u64>>;
}

/// `SQLite` implementation of the conversation store.
pub struct SqliteConversationStore {
    conn: Connection,
    conversation_table: String,
    message_table: String,
}

impl SqliteConversationStore {
    /// Initialize the conversation store.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> StoreResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        let conversation_table = config.conversation_table.clone();
        let message_table = config.message_table.clone();

        let conversations = conversation_table.clone();
        let messages = message_table.clone();
        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {conversations} (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{conversations}_owner_created
                    ON {conversations} (owner_id, created_at);
                CREATE TABLE IF NOT EXISTS {messages} (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    status TEXT NOT NULL,
                    failure_reason TEXT,
                    created_at INTEGER NOT NULL,
                    expires_at INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_{messages}_conversation_created
                    ON {messages} (conversation_id, created_at);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            conversation_table,
            message_table,
        })
    }
}

/// Raw message row as read from `SQLite`, before decoding enums.
type MessageRow = (
    MessageId,
    ConversationId,
    String,
    String,
    String,
    Option<String>,
    i64,
    Option<i64>,
);

fn decode_timestamp(millis: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StoreError::InvalidRecord("invalid timestamp".to_string()))
}

fn decode_message(row: MessageRow) -> StoreResult<MessageRecord> {
    let (id, conversation_id, role, content, status, failure_reason, created_at, expires_at) = row;
    Ok(MessageRecord {
        id,
        conversation_id,
        role: MessageRole::from_str(&role)
            .map_err(|value| StoreError::InvalidRecord(format!("invalid role: {value}")))?,
        content,
        status: MessageStatus::from_str(&status)
            .map_err(|value| StoreError::InvalidRecord(format!("invalid status: {value}")))?,
        failure_reason: failure_reason
            .map(|value| {
                FailureReason::from_str(&value).map_err(|value| {
                    StoreError::InvalidRecord(format!("invalid failure reason: {value}"))
                })
            })
            .transpose()?,
        created_at: decode_timestamp(created_at)?,
        expires_at: expires_at.map(decode_timestamp).transpose()?,
    })
}

fn decode_conversation(row: (ConversationId, UserId, i64, i64)) -> StoreResult<ConversationRecord> {
    let (id, owner_id, created_at, updated_at) = row;
    Ok(ConversationRecord {
        id,
        owner_id,
        created_at: decode_timestamp(created_at)?,
        updated_at: decode_timestamp(updated_at)?,
    })
}

impl ConversationStore for SqliteConversationStore {
    fn create_conversation(&self, record: ConversationRecord) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let table = self.conversation_table.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (id, owner_id, created_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4)"
                        ),
                        rusqlite::params![
                            record.id,
                            record.owner_id,
                            record.created_at.timestamp_millis(),
                            record.updated_at.timestamp_millis()
                        ],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn get_conversation(
        &self,
        id: ConversationId,
    ) -> StoreFuture<'_, StoreResult<Option<ConversationRecord>>> {
        Box::pin(async move {
            let table = self.conversation_table.clone();
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!(
                                "SELECT id, owner_id, created_at, updated_at
                                 FROM {table} WHERE id = ?1"
                            ),
                            rusqlite::params![id],
                            |row| {
                                Ok((
                                    row.get::<_, ConversationId>(0)?,
                                    row.get::<_, UserId>(1)?,
                                    row.get::<_, i64>(2)?,
                                    row.get::<_, i64>(3)?,
                                ))
                            },
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;

            row.map(decode_conversation).transpose()
        })
    }

    fn count_conversations(&self, owner_id: UserId) -> StoreFuture<'_, StoreResult<u64>> {
        Box::pin(async move {
            let table = self.conversation_table.clone();
            let count = self
                .conn
                .call(move |conn| {
                    let count: i64 = conn.query_row(
                        &format!("SELECT COUNT(*) FROM {table} WHERE owner_id = ?1"),
                        rusqlite::params![owner_id],
                        |row| row.get(0),
                    )?;
                    Ok(count)
                })
                .await?;
            u64::try_from(count)
                .map_err(|_| StoreError::InvalidRecord("invalid conversation count".to_string()))
        })
    }

    fn oldest_conversation(
        &self,
        owner_id: UserId,
    ) -> StoreFuture<'_, StoreResult<Option<ConversationRecord>>> {
        Box::pin(async move {
            let table = self.conversation_table.clone();
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!(
                                "SELECT id, owner_id, created_at, updated_at
                                 FROM {table}
                                 WHERE owner_id = ?1
                                 ORDER BY created_at ASC, id ASC
                                 LIMIT 1"
                            ),
                            rusqlite::params![owner_id],
                            |row| {
                                Ok((
                                    row.get::<_, ConversationId>(0)?,
                                    row.get::<_, UserId>(1)?,
                                    row.get::<_, i64>(2)?,
                                    row.get::<_, i64>(3)?,
                                ))
                            },
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;

            row.map(decode_conversation).transpose()
        })
    }

    fn delete_conversation(&self, id: ConversationId) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let conversations = self.conversation_table.clone();
            let messages = self.message_table.clone();
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    tx.execute(
                        &format!("DELETE FROM {messages} WHERE conversation_id = ?1"),
                        rusqlite::params![id],
                    )?;
                    tx.execute(
                        &format!("DELETE FROM {conversations} WHERE id = ?1"),
                        rusqlite::params![id],
                    )?;
                    tx.commit()?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn append_message(&self, record: MessageRecord) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let conversations = self.conversation_table.clone();
            let messages = self.message_table.clone();
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    tx.execute(
                        &format!(
                            "INSERT INTO {messages}
                             (id, conversation_id, role, content, status, failure_reason,
                              created_at, expires_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                        ),
                        rusqlite::params![
                            record.id,
                            record.conversation_id,
                            record.role.as_str(),
                            record.content,
                            record.status.as_str(),
                            record.failure_reason.map(FailureReason::as_str),
                            record.created_at.timestamp_millis(),
                            record.expires_at.map(|ts| ts.timestamp_millis())
                        ],
                    )?;
                    tx.execute(
                        &format!("UPDATE {conversations} SET updated_at = ?1 WHERE id = ?2"),
                        rusqlite::params![
                            record.created_at.timestamp_millis(),
                            record.conversation_id
                        ],
                    )?;
                    tx.commit()?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn update_message_status(
        &self,
        id: MessageId,
        status: MessageStatus,
        failure_reason: Option<FailureReason>,
    ) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let table = self.message_table.clone();
            let changed = self
                .conn
                .call(move |conn| {
                    let changed = conn.execute(
                        &format!(
                            "UPDATE {table} SET status = ?1, failure_reason = ?2 WHERE id = ?3"
                        ),
                        rusqlite::params![
                            status.as_str(),
                            failure_reason.map(FailureReason::as_str),
                            id
                        ],
                    )?;
                    Ok(changed)
                })
                .await?;

            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    fn record_exchange(
        &self,
        user_message_id: MessageId,
        reply: MessageRecord,
    ) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let conversations = self.conversation_table.clone();
            let messages = self.message_table.clone();
            let found = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let changed = tx.execute(
                        &format!(
                            "UPDATE {messages} SET status = ?1, failure_reason = NULL
                             WHERE id = ?2"
                        ),
                        rusqlite::params![MessageStatus::Completed.as_str(), user_message_id],
                    )?;
                    if changed == 0 {
                        // User message vanished; do not write an orphan reply.
                        tx.rollback()?;
                        return Ok(false);
                    }
                    tx.execute(
                        &format!(
                            "INSERT INTO {messages}
                             (id, conversation_id, role, content, status, failure_reason,
                              created_at, expires_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                        ),
                        rusqlite::params![
                            reply.id,
                            reply.conversation_id,
                            reply.role.as_str(),
                            reply.content,
                            reply.status.as_str(),
                            reply.failure_reason.map(FailureReason::as_str),
                            reply.created_at.timestamp_millis(),
                            reply.expires_at.map(|ts| ts.timestamp_millis())
                        ],
                    )?;
                    tx.execute(
                        &format!("UPDATE {conversations} SET updated_at = ?1 WHERE id = ?2"),
                        rusqlite::params![
                            reply.created_at.timestamp_millis(),
                            reply.conversation_id
                        ],
                    )?;
                    tx.commit()?;
                    Ok(true)
                })
                .await?;

            if !found {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    fn load_messages(
        &self,
        conversation_id: ConversationId,
    ) -> StoreFuture<'_, StoreResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            let table = self.message_table.clone();
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT id, conversation_id, role, content, status, failure_reason,
                                created_at, expires_at
                         FROM {table}
                         WHERE conversation_id = ?1
                         ORDER BY created_at ASC, rowid ASC"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![conversation_id], |row| {
                            Ok((
                                row.get::<_, MessageId>(0)?,
                                row.get::<_, ConversationId>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                                row.get::<_, Option<String>>(5)?,
                                row.get::<_, i64>(6)?,
                                row.get::<_, Option<i64>>(7)?,
                            ))
                        })?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;

            rows.into_iter().map(decode_message).collect()
        })
    }

    fn get_message(&self, id: MessageId) -> StoreFuture<'_, StoreResult<Option<MessageRecord>>> {
        Box::pin(async move {
            let table = self.message_table.clone();
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!(
                                "SELECT id, conversation_id, role, content, status,
                                        failure_reason, created_at, expires_at
                                 FROM {table} WHERE id = ?1"
                            ),
                            rusqlite::params![id],
                            |row| {
                                Ok((
                                    row.get::<_, MessageId>(0)?,
                                    row.get::<_, ConversationId>(1)?,
                                    row.get::<_, String>(2)?,
                                    row.get::<_, String>(3)?,
                                    row.get::<_, String>(4)?,
                                    row.get::<_, Option<String>>(5)?,
                                    row.get::<_, i64>(6)?,
                                    row.get::<_, Option<i64>>(7)?,
                                ))
                            },
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;

            row.map(decode_message).transpose()
        })
    }

    fn delete_expired_messages(&self, now: DateTime<Utc>) -> StoreFuture<'_, StoreResult<u64>> {
        Box::pin(async move {
            let table = self.message_table.clone();
            let now_millis = now.timestamp_millis();
            let deleted = self
                .conn
                .call(move |conn| {
                    let deleted = conn.execute(
                        &format!(
                            "DELETE FROM {table}
                             WHERE expires_at IS NOT NULL AND expires_at <= ?1"
                        ),
                        rusqlite::params![now_millis],
                    )?;
                    Ok(deleted)
                })
                .await?;
            u64::try_from(deleted)
                .map_err(|_| StoreError::InvalidRecord("invalid delete count".to_string()))
        })
    }
}
