//! Ollama-backed agent engine for the task-management assistant.
//!
//! Thin async adapter over the Ollama `/api/chat` endpoint. No timeout is
//! configured on the HTTP client: the invocation guard owns the deadline and
//! drops the in-flight call when it fires.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::{AgentEngine, AgentEngineError, AgentReply, AgentTurn, ToolCallRecord};
use crate::chat::core::message::MessageRole;

/// Default chat model as installed in Ollama.
const DEFAULT_MODEL: &str = "mistral:7b-instruct-q8_0";

/// Default Ollama API host.
const DEFAULT_OLLAMA_HOST: &str = "127.0.0.1";
/// Default Ollama API port.
const DEFAULT_OLLAMA_PORT: u16 = 11_434;

/// Environment variable for a custom Ollama URL (e.g., "http://10.0.0.5:19212").
const OLLAMA_URL_ENV: &str = "TASKLINE_OLLAMA_URL";
/// Environment variable for the chat model name.
const MODEL_ENV: &str = "TASKLINE_MODEL";

/// Keep the model loaded in memory for a reasonable duration.
const KEEP_ALIVE: &str = "1h";

/// System prompt framing the assistant as a todo-list manager.
const SYSTEM_PROMPT: &str = "You are a task-management assistant. You help the \
user maintain their todo list: adding, completing, updating, and listing tasks. \
Keep replies short and confirm every change you make.";

/// Get the Ollama base URL from the environment or use the default localhost.
fn ollama_base_url() -> String {
    std::env::var(OLLAMA_URL_ENV)
        .unwrap_or_else(|_| format!("http://{DEFAULT_OLLAMA_HOST}:{DEFAULT_OLLAMA_PORT}"))
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    keep_alive: &'a str,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponseBody {
    message: WireReply,
}

#[derive(Deserialize)]
struct WireReply {
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    function: WireToolFunction,
}

#[derive(Deserialize)]
struct WireToolFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Agent engine backed by an Ollama chat endpoint.
pub struct OllamaAgentEngine {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaAgentEngine {
    /// Create an engine against an explicit base URL and model.
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    /// Create an engine from `TASKLINE_OLLAMA_URL` / `TASKLINE_MODEL`,
    /// falling back to localhost and the default model.
    #[must_use]
    pub fn from_env() -> Self {
        let model = std::env::var(MODEL_ENV).unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(ollama_base_url(), model)
    }

    /// Model name used for invocations.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn wire_messages<'a>(history: &'a [AgentTurn]) -> Vec<WireMessage<'a>> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: SYSTEM_PROMPT,
        });
        for turn in history {
            messages.push(WireMessage {
                role: match turn.role {
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                },
                content: &turn.content,
            });
        }
        messages
    }
}

#[async_trait]
impl AgentEngine for OllamaAgentEngine {
    async fn invoke(&self, history: &[AgentTurn]) -> Result<AgentReply, AgentEngineError> {
        let body = ChatRequestBody {
            model: &self.model,
            messages: Self::wire_messages(history),
            stream: false,
            keep_alive: KEEP_ALIVE,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentEngineError::StatusNotOk(status.as_u16()));
        }

        let parsed: ChatResponseBody = response
            .json()
            .await
            .map_err(|err| AgentEngineError::Malformed(err.to_string()))?;

        Ok(AgentReply {
            content: parsed.message.content,
            tool_calls: parsed
                .message
                .tool_calls
                .into_iter()
                .map(|call| ToolCallRecord {
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_messages_prepend_system_prompt() {
        let history = vec![
            AgentTurn {
                role: MessageRole::User,
                content: "Buy milk".to_string(),
            },
            AgentTurn {
                role: MessageRole::Assistant,
                content: "Added.".to_string(),
            },
        ];

        let messages = OllamaAgentEngine::wire_messages(&history);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "assistant");
    }

    #[test]
    fn test_response_decoding_with_tool_calls() {
        let raw = r#"{
            "message": {
                "content": "Added \"Buy milk\" to your list.",
                "tool_calls": [
                    {"function": {"name": "create_task", "arguments": {"title": "Buy milk"}}}
                ]
            }
        }"#;

        let parsed: ChatResponseBody = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.message.tool_calls.len(), 1);
        assert_eq!(parsed.message.tool_calls[0].function.name, "create_task");
    }

    #[test]
    fn test_response_decoding_without_tool_calls() {
        let raw = r#"{"message": {"content": "Your list is empty."}}"#;
        let parsed: ChatResponseBody = serde_json::from_str(raw).unwrap();
        assert!(parsed.message.tool_calls.is_empty());
    }
}
