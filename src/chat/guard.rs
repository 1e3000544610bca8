//! Agent invocation guard: a deadline-bounded wrapper around the external
//! agent engine.
//!
//! Timing out abandons the wait rather than cancelling the engine itself:
//! the in-flight future is dropped and any late completion is discarded,
//! giving at-most-once delivery to the user. There is deliberately no retry
//! here: re-invoking a possibly-still-running engine risks duplicate tool
//! side effects (e.g. a task created twice).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::agent::{AgentEngine, AgentEngineError, AgentReply, AgentTurn};
use crate::chat::core::config::GuardConfig;

/// Errors produced by a guarded agent invocation.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The engine did not reply within the deadline.
    #[error("agent invocation exceeded deadline")]
    DeadlineExceeded,
    /// The engine returned an explicit failure before the deadline.
    #[error(transparent)]
    Agent(#[from] AgentEngineError),
}

/// Deadline-bounded agent invocation.
pub struct AgentGuard {
    engine: Arc<dyn AgentEngine>,
    deadline: Duration,
}

impl AgentGuard {
    /// Create a guard around an engine.
    #[must_use]
    pub fn new(engine: Arc<dyn AgentEngine>, config: &GuardConfig) -> Self {
        Self {
            engine,
            deadline: config.deadline(),
        }
    }

    /// Invoke the engine, racing it against the configured deadline.
    ///
    /// # Errors
    /// Returns `DeadlineExceeded` if the engine does not reply in time, or
    /// `Agent` if it fails explicitly.
    pub async fn invoke(&self, history: &[AgentTurn]) -> Result<AgentReply, GuardError> {
        match tokio::time::timeout(self.deadline, self.engine.invoke(history)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => Err(GuardError::Agent(err)),
            Err(_) => {
                warn!(deadline = ?self.deadline, "Agent invocation exceeded deadline, abandoning wait");
                Err(GuardError::DeadlineExceeded)
            }
        }
    }
}
