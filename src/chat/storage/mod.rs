//! Persistence facade: conversation/message store plus bounded retry.

pub mod conversation_store;
pub mod retry;

pub use conversation_store::{
    ConversationStore, SqliteConversationStore, StoreFuture, StoreResult,
};
pub use retry::with_retry;
