//! Agent engine seam: the external natural-language/tool-invocation engine.
//!
//! The pipeline treats the engine as an opaque asynchronous operation with a
//! result or failure and no guaranteed latency bound; the invocation guard
//! imposes the deadline.

pub mod ollama;

pub use ollama::OllamaAgentEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chat::core::message::{MessageRecord, MessageRole};

/// One turn of conversation context handed to the engine.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AgentTurn {
    /// Role of the turn.
    pub role: MessageRole,
    /// Content payload.
    pub content: String,
}

impl From<&MessageRecord> for AgentTurn {
    fn from(record: &MessageRecord) -> Self {
        Self {
            role: record.role,
            content: record.content.clone(),
        }
    }
}

/// A structured tool call reported by the engine (e.g. a todo mutation).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Tool name.
    pub name: String,
    /// Tool arguments as reported by the engine.
    pub arguments: serde_json::Value,
}

/// The engine's full reply for one user turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReply {
    /// Natural-language response content.
    pub content: String,
    /// Structured tool-call records, passed through unchanged.
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Errors returned by an agent engine.
#[derive(Debug, Error)]
pub enum AgentEngineError {
    /// HTTP transport failure while reaching the engine.
    #[error("agent http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The engine answered with a non-success status.
    #[error("agent http status not ok: {0}")]
    StatusNotOk(u16),
    /// The engine's response could not be decoded.
    #[error("agent response malformed: {0}")]
    Malformed(String),
}

/// Asynchronous agent engine.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    /// Invoke the engine with the ordered conversation history, most recent
    /// turn last.
    ///
    /// # Errors
    /// Returns an error if the engine call fails or its response cannot be
    /// decoded. Latency is unbounded; callers impose their own deadline.
    async fn invoke(&self, history: &[AgentTurn]) -> Result<AgentReply, AgentEngineError>;
}
