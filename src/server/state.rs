//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::agent::AgentEngine;
use crate::chat::core::config::ChatConfig;
use crate::chat::core::errors::ChatResult;
use crate::chat::orchestrator::SessionOrchestrator;
use crate::chat::storage::conversation_store::{ConversationStore, SqliteConversationStore};

/// Shared application state.
pub struct AppState {
    /// Entry point into the conversation pipeline.
    pub orchestrator: SessionOrchestrator,
    /// Store handle, kept for background maintenance.
    pub store: Arc<dyn ConversationStore>,
}

impl AppState {
    /// Create a new application state over the default `SQLite` store.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the database
    /// cannot be opened.
    pub async fn new(config: ChatConfig, engine: Arc<dyn AgentEngine>) -> ChatResult<Arc<Self>> {
        let store: Arc<dyn ConversationStore> =
            Arc::new(SqliteConversationStore::new(&config.storage).await?);
        let orchestrator = SessionOrchestrator::new(config, store.clone(), engine)?;

        Ok(Arc::new(Self { orchestrator, store }))
    }
}
