//! Per-conversation dispatcher: serializes message processing within one
//! conversation while keeping conversations fully independent.
//!
//! Each conversation gets a *lane*: a mutex-guarded FIFO queue plus a
//! single-slot in-flight marker. Submitting to an idle lane spawns a worker
//! task bound to that lane; the worker drains the queue in strict arrival
//! order and on exit removes the lane from the registry, so an idle
//! conversation holds neither a task nor a map entry. Submitting to a busy
//! lane appends to the queue. Only the lane's worker ever pops.
//!
//! Lock order is registry shard, then lane mutex, on both the submit and
//! the removal path; submit pushes while still holding the map entry so a
//! draining worker can never orphan a concurrently queued message.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::agent::{AgentReply, AgentTurn};
use crate::chat::core::config::RetryConfig;
use crate::chat::core::errors::StoreError;
use crate::chat::core::ids::{ConversationId, MessageId};
use crate::chat::core::message::{FailureReason, MessageRecord, MessageStatus};
use crate::chat::guard::{AgentGuard, GuardError};
use crate::chat::storage::conversation_store::ConversationStore;
use crate::chat::storage::retry::with_retry;

/// How a submitted message was accepted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitAcceptance {
    /// The lane was idle; processing starts immediately.
    Processing,
    /// Another message is in flight; queued at this 1-based position.
    Queued {
        /// Position behind the in-flight message.
        position: usize,
    },
}

/// Terminal result of processing one message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The agent replied and the exchange was persisted.
    Completed(AgentReply),
    /// The message failed; the reason is also recorded on the stored row.
    Failed(FailureReason),
}

/// Handle returned by [`ConversationDispatcher::submit`].
pub struct SubmitTicket {
    /// Identifier of the submitted message.
    pub message_id: MessageId,
    /// Immediate acceptance state.
    pub acceptance: SubmitAcceptance,
    /// Resolves once the message reaches a terminal state.
    pub outcome: oneshot::Receiver<MessageOutcome>,
}

struct PendingMessage {
    message: MessageRecord,
    outcome: oneshot::Sender<MessageOutcome>,
}

#[derive(Default)]
struct LaneState {
    queue: VecDeque<PendingMessage>,
    in_flight: bool,
}

/// One conversation's FIFO queue and in-flight marker.
#[derive(Default)]
struct ConversationLane {
    state: Mutex<LaneState>,
}

impl ConversationLane {
    /// Lock the lane state, recovering from a poisoned mutex.
    fn lock_state(&self) -> MutexGuard<'_, LaneState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Dispatcher owning all conversation lanes.
pub struct ConversationDispatcher {
    lanes: Arc<DashMap<ConversationId, Arc<ConversationLane>>>,
    store: Arc<dyn ConversationStore>,
    guard: Arc<AgentGuard>,
    retry: RetryConfig,
}

impl ConversationDispatcher {
    /// Create a new dispatcher.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        guard: Arc<AgentGuard>,
        retry: &RetryConfig,
    ) -> Self {
        Self {
            lanes: Arc::new(DashMap::new()),
            store,
            guard,
            retry: retry.clone(),
        }
    }

    /// Submit an already-persisted user message for processing.
    ///
    /// Returns immediately: `Processing` if the conversation's lane was
    /// idle, `Queued` with the 1-based position otherwise. Messages for one
    /// conversation are processed to completion in strict arrival order;
    /// message *N+1* never begins before message *N* reaches a terminal
    /// state. No ordering exists across conversations.
    #[must_use]
    pub fn submit(&self, message: MessageRecord) -> SubmitTicket {
        let conversation_id = message.conversation_id;
        let message_id = message.id;
        let (tx, rx) = oneshot::channel();
        let pending = PendingMessage {
            message,
            outcome: tx,
        };

        // Atomic append-and-check: the map entry is held across the lane
        // mutex, so a worker draining in parallel either sees this message
        // or has already unlinked the lane before the entry was taken.
        let acceptance = {
            let entry = self
                .lanes
                .entry(conversation_id)
                .or_insert_with(|| Arc::new(ConversationLane::default()));
            let lane = Arc::clone(entry.value());
            let mut state = lane.lock_state();
            if state.in_flight {
                state.queue.push_back(pending);
                SubmitAcceptance::Queued {
                    position: state.queue.len(),
                }
            } else {
                state.in_flight = true;
                let worker = LaneWorker {
                    conversation_id,
                    lane: Arc::clone(&lane),
                    lanes: Arc::clone(&self.lanes),
                    store: self.store.clone(),
                    guard: self.guard.clone(),
                    retry: self.retry.clone(),
                };
                tokio::spawn(worker.run(pending));
                SubmitAcceptance::Processing
            }
        };

        debug!(
            conversation_id = %conversation_id,
            message_id = %message_id,
            ?acceptance,
            "Message submitted"
        );

        SubmitTicket {
            message_id,
            acceptance,
            outcome: rx,
        }
    }
}

/// Worker bound to one lane for the duration of a busy period.
struct LaneWorker {
    conversation_id: ConversationId,
    lane: Arc<ConversationLane>,
    lanes: Arc<DashMap<ConversationId, Arc<ConversationLane>>>,
    store: Arc<dyn ConversationStore>,
    guard: Arc<AgentGuard>,
    retry: RetryConfig,
}

impl LaneWorker {
    /// Drain the lane starting from `first`, then unlink it and exit.
    async fn run(self, first: PendingMessage) {
        let mut current = Some(first);
        while let Some(pending) = current {
            let outcome = self.process(&pending.message).await;
            // The submitter may have dropped its ticket; that is fine.
            let _ = pending.outcome.send(outcome);

            current = {
                let mut state = self.lane.lock_state();
                match state.queue.pop_front() {
                    Some(next) => Some(next),
                    None => {
                        state.in_flight = false;
                        None
                    }
                }
            };
        }

        // Unlink the idle lane so evicted or expired conversations do not
        // accumulate registry entries. The state is re-checked under both
        // the shard and lane locks: a submit that raced in after the drain
        // has already flipped `in_flight` and keeps the lane alive.
        self.lanes.remove_if(&self.conversation_id, |_, lane| {
            let state = lane.lock_state();
            state.queue.is_empty() && !state.in_flight
        });
    }

    /// Process a single message to a terminal state.
    ///
    /// A failure here never propagates as an error: it is recorded on the
    /// message and the queue advances.
    async fn process(&self, message: &MessageRecord) -> MessageOutcome {
        if let Err(err) = with_retry(&self.retry, || {
            self.store
                .update_message_status(message.id, MessageStatus::Processing, None)
        })
        .await
        {
            return self.fail(message.id, failure_reason_for(&err)).await;
        }

        let history = match with_retry(&self.retry, || {
            self.store.load_messages(self.conversation_id)
        })
        .await
        {
            Ok(history) => history,
            Err(err) => return self.fail(message.id, failure_reason_for(&err)).await,
        };
        let turns: Vec<AgentTurn> = history.iter().map(AgentTurn::from).collect();

        match self.guard.invoke(&turns).await {
            Ok(reply) => self.complete(message, reply).await,
            Err(GuardError::DeadlineExceeded) => {
                // Partial state is kept: the user's turn stays in the
                // history with a recorded timeout.
                self.fail(message.id, FailureReason::Timeout).await
            }
            Err(GuardError::Agent(err)) => {
                warn!(
                    conversation_id = %self.conversation_id,
                    message_id = %message.id,
                    error = %err,
                    "Agent returned an explicit failure"
                );
                self.fail(message.id, FailureReason::AgentError).await
            }
        }
    }

    async fn complete(&self, message: &MessageRecord, reply: AgentReply) -> MessageOutcome {
        let assistant = MessageRecord::assistant(
            self.conversation_id,
            reply.content.clone(),
            message.expires_at,
        );

        match with_retry(&self.retry, || {
            self.store.record_exchange(message.id, assistant.clone())
        })
        .await
        {
            Ok(()) => {
                debug!(
                    conversation_id = %self.conversation_id,
                    message_id = %message.id,
                    "Exchange completed"
                );
                MessageOutcome::Completed(reply)
            }
            Err(err) => self.fail(message.id, failure_reason_for(&err)).await,
        }
    }

    /// Record a failure on the message (best effort) and report it.
    async fn fail(&self, message_id: MessageId, reason: FailureReason) -> MessageOutcome {
        let persisted = with_retry(&self.retry, || {
            self.store
                .update_message_status(message_id, MessageStatus::Failed, Some(reason))
        })
        .await;

        match persisted {
            Ok(()) => {}
            // The row is already gone; nothing left to annotate.
            Err(StoreError::NotFound) => {}
            Err(err) => {
                error!(
                    conversation_id = %self.conversation_id,
                    message_id = %message_id,
                    error = %err,
                    "Could not record failure status"
                );
            }
        }

        MessageOutcome::Failed(reason)
    }
}

fn failure_reason_for(err: &StoreError) -> FailureReason {
    match err {
        StoreError::NotFound => FailureReason::NotFound,
        _ => FailureReason::Persistence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentEngine, AgentEngineError};
    use crate::chat::core::config::{GuardConfig, StorageConfig};
    use crate::chat::core::conversation::ConversationRecord;
    use crate::chat::core::ids::UserId;
    use crate::chat::core::message::MessageRole;
    use crate::chat::storage::conversation_store::SqliteConversationStore;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Engine scripted by the last user turn's content:
    /// `slow:<ms>` sleeps before replying, `boom` fails, `hang` never
    /// finishes in time. Records start/end events for ordering assertions.
    struct ScriptedEngine {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedEngine {
        fn new() -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
            let events = Arc::new(Mutex::new(Vec::new()));
            (
                Arc::new(Self {
                    events: events.clone(),
                }),
                events,
            )
        }

        fn record(&self, event: String) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event);
            }
        }
    }

    #[async_trait]
    impl AgentEngine for ScriptedEngine {
        async fn invoke(&self, history: &[AgentTurn]) -> Result<AgentReply, AgentEngineError> {
            let content = history
                .iter()
                .rev()
                .find(|turn| turn.role == MessageRole::User)
                .map(|turn| turn.content.clone())
                .unwrap_or_default();

            self.record(format!("start:{content}"));

            if let Some(ms) = content.strip_prefix("slow:") {
                let ms: u64 = ms.parse().unwrap();
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if content == "hang" {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if content == "boom" {
                return Err(AgentEngineError::StatusNotOk(500));
            }

            self.record(format!("end:{content}"));
            Ok(AgentReply {
                content: format!("ok:{content}"),
                tool_calls: Vec::new(),
            })
        }
    }

    async fn setup(deadline_ms: u64) -> (Arc<SqliteConversationStore>, ConversationDispatcher) {
        let config = StorageConfig {
            sqlite_path: PathBuf::from(":memory:"),
            ..StorageConfig::default()
        };
        let store = Arc::new(SqliteConversationStore::new(&config).await.unwrap());
        let (engine, _) = ScriptedEngine::new();
        let guard = Arc::new(AgentGuard::new(engine, &GuardConfig { deadline_ms }));
        let retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
        };
        let dispatcher = ConversationDispatcher::new(store.clone(), guard, &retry);
        (store, dispatcher)
    }

    async fn setup_with_events(
        deadline_ms: u64,
    ) -> (
        Arc<SqliteConversationStore>,
        ConversationDispatcher,
        Arc<Mutex<Vec<String>>>,
    ) {
        let config = StorageConfig {
            sqlite_path: PathBuf::from(":memory:"),
            ..StorageConfig::default()
        };
        let store = Arc::new(SqliteConversationStore::new(&config).await.unwrap());
        let (engine, events) = ScriptedEngine::new();
        let guard = Arc::new(AgentGuard::new(engine, &GuardConfig { deadline_ms }));
        let retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
        };
        let dispatcher = ConversationDispatcher::new(store.clone(), guard, &retry);
        (store, dispatcher, events)
    }

    async fn persisted_message(
        store: &SqliteConversationStore,
        conversation_id: ConversationId,
        content: &str,
    ) -> MessageRecord {
        let message = MessageRecord::user(conversation_id, content, None);
        store.append_message(message.clone()).await.unwrap();
        message
    }

    async fn new_conversation(store: &SqliteConversationStore) -> ConversationRecord {
        let conversation = ConversationRecord::new(UserId::new());
        store
            .create_conversation(conversation.clone())
            .await
            .unwrap();
        conversation
    }

    #[tokio::test]
    async fn test_single_message_completed() {
        let (store, dispatcher) = setup(5_000).await;
        let conversation = new_conversation(&store).await;
        let message = persisted_message(&store, conversation.id, "Buy milk").await;

        let ticket = dispatcher.submit(message.clone());
        assert_eq!(ticket.acceptance, SubmitAcceptance::Processing);

        let outcome = ticket.outcome.await.unwrap();
        assert!(matches!(outcome, MessageOutcome::Completed(_)));

        let stored = store.get_message(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Completed);

        let all = store.load_messages(conversation.id).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].role, MessageRole::Assistant);
        assert_eq!(all[1].content, "ok:Buy milk");
    }

    #[tokio::test]
    async fn test_fifo_ordering_within_conversation() {
        let (store, dispatcher, events) = setup_with_events(5_000).await;
        let conversation = new_conversation(&store).await;

        let a = persisted_message(&store, conversation.id, "slow:50").await;
        let b = persisted_message(&store, conversation.id, "second").await;

        let ticket_a = dispatcher.submit(a);
        let ticket_b = dispatcher.submit(b);

        assert_eq!(ticket_a.acceptance, SubmitAcceptance::Processing);
        assert_eq!(
            ticket_b.acceptance,
            SubmitAcceptance::Queued { position: 1 }
        );

        let outcome_a = ticket_a.outcome.await.unwrap();
        let outcome_b = ticket_b.outcome.await.unwrap();
        assert!(matches!(outcome_a, MessageOutcome::Completed(_)));
        assert!(matches!(outcome_b, MessageOutcome::Completed(_)));

        // B must not start before A finished.
        let events = events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "start:slow:50".to_string(),
                "end:slow:50".to_string(),
                "start:second".to_string(),
                "end:second".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_conversations_isolated() {
        let (store, dispatcher) = setup(5_000).await;
        let slow_conversation = new_conversation(&store).await;
        let fast_conversation = new_conversation(&store).await;

        let slow = persisted_message(&store, slow_conversation.id, "slow:500").await;
        let fast = persisted_message(&store, fast_conversation.id, "quick").await;

        let slow_ticket = dispatcher.submit(slow);
        let fast_ticket = dispatcher.submit(fast);

        // Both lanes start immediately; the slow conversation does not
        // delay the fast one.
        assert_eq!(fast_ticket.acceptance, SubmitAcceptance::Processing);
        let fast_outcome = tokio::time::timeout(Duration::from_millis(300), fast_ticket.outcome)
            .await
            .expect("fast conversation blocked behind slow one")
            .unwrap();
        assert!(matches!(fast_outcome, MessageOutcome::Completed(_)));

        let slow_outcome = slow_ticket.outcome.await.unwrap();
        assert!(matches!(slow_outcome, MessageOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_timeout_records_failure_and_keeps_user_turn() {
        let (store, dispatcher) = setup(50).await;
        let conversation = new_conversation(&store).await;
        let message = persisted_message(&store, conversation.id, "hang").await;

        let ticket = dispatcher.submit(message.clone());
        let outcome = ticket.outcome.await.unwrap();
        assert_eq!(outcome, MessageOutcome::Failed(FailureReason::Timeout));

        let stored = store.get_message(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Failed);
        assert_eq!(stored.failure_reason, Some(FailureReason::Timeout));
        // The user's turn is never silently missing from the history.
        assert_eq!(stored.content, "hang");

        let all = store.load_messages(conversation.id).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_agent_error_records_failure() {
        let (store, dispatcher) = setup(5_000).await;
        let conversation = new_conversation(&store).await;
        let message = persisted_message(&store, conversation.id, "boom").await;

        let ticket = dispatcher.submit(message.clone());
        let outcome = ticket.outcome.await.unwrap();
        assert_eq!(outcome, MessageOutcome::Failed(FailureReason::AgentError));

        let stored = store.get_message(message.id).await.unwrap().unwrap();
        assert_eq!(stored.failure_reason, Some(FailureReason::AgentError));
    }

    #[tokio::test]
    async fn test_failure_does_not_block_next_message() {
        let (store, dispatcher) = setup(5_000).await;
        let conversation = new_conversation(&store).await;

        let failing = persisted_message(&store, conversation.id, "boom").await;
        let following = persisted_message(&store, conversation.id, "after").await;

        let failing_ticket = dispatcher.submit(failing);
        let following_ticket = dispatcher.submit(following);

        assert_eq!(
            failing_ticket.outcome.await.unwrap(),
            MessageOutcome::Failed(FailureReason::AgentError)
        );
        assert!(matches!(
            following_ticket.outcome.await.unwrap(),
            MessageOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_vanished_message_fails_as_not_found() {
        let (store, dispatcher) = setup(5_000).await;
        let conversation = new_conversation(&store).await;
        let message = persisted_message(&store, conversation.id, "gone").await;

        // Retention deleted the conversation between queueing and
        // processing.
        store.delete_conversation(conversation.id).await.unwrap();

        let ticket = dispatcher.submit(message);
        let outcome = ticket.outcome.await.unwrap();
        assert_eq!(outcome, MessageOutcome::Failed(FailureReason::NotFound));
    }

    #[tokio::test]
    async fn test_idle_lane_removed_from_registry() {
        let (store, dispatcher) = setup(5_000).await;
        let conversation = new_conversation(&store).await;

        let message = persisted_message(&store, conversation.id, "one").await;
        let ticket = dispatcher.submit(message);
        ticket.outcome.await.unwrap();

        // The outcome resolves just before the worker unlinks the lane, so
        // give the task a moment to finish.
        for _ in 0..100 {
            if dispatcher.lanes.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(dispatcher.lanes.is_empty());

        // A later message recreates the lane and processes normally.
        let second = persisted_message(&store, conversation.id, "two").await;
        let ticket = dispatcher.submit(second);
        assert_eq!(ticket.acceptance, SubmitAcceptance::Processing);
        assert!(matches!(
            ticket.outcome.await.unwrap(),
            MessageOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_lane_drains_and_accepts_again() {
        let (store, dispatcher) = setup(5_000).await;
        let conversation = new_conversation(&store).await;

        let first = persisted_message(&store, conversation.id, "one").await;
        let ticket = dispatcher.submit(first);
        ticket.outcome.await.unwrap();

        // The worker exited after draining; a later message starts a new
        // busy period immediately.
        let second = persisted_message(&store, conversation.id, "two").await;
        let ticket = dispatcher.submit(second);
        assert_eq!(ticket.acceptance, SubmitAcceptance::Processing);
        assert!(matches!(
            ticket.outcome.await.unwrap(),
            MessageOutcome::Completed(_)
        ));
    }
}
