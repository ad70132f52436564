//! Live conversation runtime
//!
//! One runtime per conversation, each owning its transcript, its tagged turn
//! phase, and a broadcast channel of state events for stream subscribers.
//! Turns run on spawned driver tasks that feed events back through the pure
//! transition function under the conversation lock.
//!
//! Every driver captures the conversation's generation counter at spawn time;
//! `reset` and each accepted submission bump the counter, so events from a
//! driver that outlived a reset, and seed-suggestion completions overtaken by
//! a turn, are discarded instead of landing in the live transcript.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::conversation::{
    transition, Effect, Phase, Transcript, TransitionError, TurnEvent,
};
use crate::llm::ChatBackend;
use crate::session::SessionManager;
use crate::suggestions::SuggestionGenerator;
use crate::topics::Topic;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Conversations past this count evict the oldest one.
const MAX_CONVERSATIONS: usize = 256;

/// Event published to stream subscribers.
///
/// `Snapshot` opens every subscription (and follows a reset); the rest mirror
/// transcript mutations in order. `Completed` marks the conversation
/// submittable again, whether or not suggestions were produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    Snapshot {
        transcript: Transcript,
        phase: Phase,
    },
    TurnAccepted {
        text: String,
    },
    StreamStarted,
    Fragment {
        text: String,
    },
    TurnFailed {
        message: String,
    },
    Completed {
        suggestions: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("unknown conversation {0}")]
    UnknownConversation(Uuid),
}

struct Inner {
    phase: Phase,
    transcript: Transcript,
    generation: u64,
}

/// A single live conversation.
pub struct ConversationRuntime {
    pub id: Uuid,
    topic: Topic,
    inner: Mutex<Inner>,
    events: broadcast::Sender<ConversationEvent>,
    sessions: Arc<SessionManager>,
    suggestions: Arc<SuggestionGenerator>,
}

impl ConversationRuntime {
    /// Start a conversation seeded with the topic's question and initial
    /// answer. Suggestions for the seed exchange settle in the background;
    /// the conversation is submittable immediately, and a turn accepted
    /// meanwhile supersedes the seed call.
    fn start(
        topic: Topic,
        sessions: Arc<SessionManager>,
        suggestions: Arc<SuggestionGenerator>,
    ) -> Arc<Self> {
        let transcript = Transcript::seeded(&topic.question, &topic.initial_answer);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let runtime = Arc::new(Self {
            id: Uuid::new_v4(),
            topic,
            inner: Mutex::new(Inner {
                phase: Phase::idle(),
                transcript,
                generation: 0,
            }),
            events,
            sessions,
            suggestions,
        });

        let driver = Arc::clone(&runtime);
        tokio::spawn(async move { driver.drive_suggestions(0).await });

        runtime
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Current transcript and phase.
    pub async fn snapshot(&self) -> (Transcript, Phase) {
        let inner = self.inner.lock().await;
        (inner.transcript.clone(), inner.phase.clone())
    }

    /// Snapshot plus a receiver for everything published after it. Taken
    /// under the conversation lock so no event falls between the two.
    pub async fn subscribe(&self) -> (ConversationEvent, broadcast::Receiver<ConversationEvent>) {
        let inner = self.inner.lock().await;
        let snapshot = ConversationEvent::Snapshot {
            transcript: inner.transcript.clone(),
            phase: inner.phase.clone(),
        };
        (snapshot, self.events.subscribe())
    }

    /// Submit a user turn. Returns false, changing nothing, when the message
    /// is empty after trimming or a turn is already in flight.
    pub async fn submit(self: &Arc<Self>, text: String, suggested: bool) -> bool {
        let (generation, transcript) = {
            let mut inner = self.inner.lock().await;
            let result = match transition(&inner.phase, TurnEvent::Submit { text, suggested }) {
                Ok(result) => result,
                Err(TransitionError::TurnInFlight) => {
                    tracing::debug!(conversation = %self.id, "submission ignored: turn in flight");
                    return false;
                }
                Err(error) => {
                    tracing::debug!(conversation = %self.id, %error, "submission rejected");
                    return false;
                }
            };
            self.apply_effects(&mut inner, &result.effects);
            inner.phase = result.next;
            // An accepted turn supersedes any suggestion call still settling
            // for the previous exchange.
            inner.generation += 1;
            (inner.generation, inner.transcript.clone())
        };

        let driver = Arc::clone(self);
        tokio::spawn(async move { driver.drive_turn(generation, transcript).await });
        true
    }

    /// Replace the transcript with the seed exchange and supersede any turn
    /// still in flight. The conversation's remote session is evicted so the
    /// persona restarts from a clean history.
    pub async fn reset(self: &Arc<Self>) {
        let generation = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            inner.transcript =
                Transcript::seeded(&self.topic.question, &self.topic.initial_answer);
            inner.phase = Phase::idle();
            let _ = self.events.send(ConversationEvent::Snapshot {
                transcript: inner.transcript.clone(),
                phase: inner.phase.clone(),
            });
            inner.generation
        };

        self.sessions.reset(self.topic.id).await;

        let driver = Arc::clone(self);
        tokio::spawn(async move { driver.drive_suggestions(generation).await });
    }

    /// Drive one turn: open the response stream, relay fragments, then settle
    /// suggestions. `transcript` is the snapshot taken when the turn was
    /// accepted, ending in the submitted user message.
    async fn drive_turn(&self, generation: u64, transcript: Transcript) {
        // Superseded before starting: skip the remote call entirely.
        {
            let inner = self.inner.lock().await;
            if inner.generation != generation {
                return;
            }
        }

        match self.sessions.stream_response(&self.topic, &transcript).await {
            Err(error) => {
                tracing::error!(conversation = %self.id, %error, "could not open response stream");
                self.apply(
                    generation,
                    TurnEvent::StreamFailed {
                        message: error.to_string(),
                    },
                )
                .await;
                return;
            }
            Ok(mut stream) => {
                if !self.apply(generation, TurnEvent::StreamOpened).await {
                    return;
                }
                while let Some(text) = stream.next().await {
                    if !self.apply(generation, TurnEvent::Fragment { text }).await {
                        return;
                    }
                }
                if !self.apply(generation, TurnEvent::StreamClosed).await {
                    return;
                }
            }
        }

        self.drive_suggestions(generation).await;
    }

    /// Settle the suggestion phase for the latest exchange.
    async fn drive_suggestions(&self, generation: u64) {
        let exchange = {
            let inner = self.inner.lock().await;
            if inner.generation != generation {
                return;
            }
            let user = inner.transcript.last_user().map(str::to_string);
            let model = inner.transcript.last_model().map(str::to_string);
            (user, model)
        };
        let (Some(user), Some(model)) = exchange else {
            self.apply(generation, TurnEvent::SuggestionsFailed).await;
            return;
        };

        let questions = self.suggestions.suggest(&self.topic, &user, &model).await;

        let event = if questions.is_empty() {
            TurnEvent::SuggestionsFailed
        } else {
            TurnEvent::SuggestionsReady { questions }
        };
        self.apply(generation, event).await;
    }

    /// Run one event through the transition function and publish the
    /// resulting mutations. Returns false when the event was discarded,
    /// either because the driver was superseded by a reset or because the
    /// event no longer fits the phase.
    async fn apply(&self, generation: u64, event: TurnEvent) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            tracing::debug!(conversation = %self.id, "discarding event from superseded turn");
            return false;
        }

        let result = match transition(&inner.phase, event.clone()) {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(conversation = %self.id, %error, "turn event rejected");
                return false;
            }
        };

        self.apply_effects(&mut inner, &result.effects);
        inner.phase = result.next;

        if matches!(
            event,
            TurnEvent::SuggestionsReady { .. }
                | TurnEvent::SuggestionsFailed
                | TurnEvent::StreamFailed { .. }
        ) {
            let _ = self.events.send(ConversationEvent::Completed {
                suggestions: inner.phase.suggestions().to_vec(),
            });
        }

        true
    }

    fn apply_effects(&self, inner: &mut Inner, effects: &[Effect]) {
        for effect in effects {
            effect.apply(&mut inner.transcript);
            if let Some(published) = event_for(effect) {
                let _ = self.events.send(published);
            }
        }
    }
}

fn event_for(effect: &Effect) -> Option<ConversationEvent> {
    match effect {
        Effect::AppendUserTurn { text } => Some(ConversationEvent::TurnAccepted {
            text: text.clone(),
        }),
        Effect::BeginModelTurn => Some(ConversationEvent::StreamStarted),
        Effect::AppendFragment { text } => Some(ConversationEvent::Fragment {
            text: text.clone(),
        }),
        Effect::AppendModelTurn { text } => Some(ConversationEvent::TurnFailed {
            message: text.clone(),
        }),
        Effect::OpenStream | Effect::RequestSuggestions => None,
    }
}

/// Owner of all live conversations.
pub struct ConversationManager {
    backend: Option<Arc<dyn ChatBackend>>,
    suggestions: Arc<SuggestionGenerator>,
    conversations: Mutex<ConversationTable>,
}

/// Conversation map with insertion order, for oldest-first eviction.
#[derive(Default)]
struct ConversationTable {
    next_seq: u64,
    entries: HashMap<Uuid, (u64, Arc<ConversationRuntime>)>,
}

impl ConversationManager {
    pub fn new(
        backend: Option<Arc<dyn ChatBackend>>,
        suggestions: Arc<SuggestionGenerator>,
    ) -> Self {
        Self {
            backend,
            suggestions,
            conversations: Mutex::new(ConversationTable::default()),
        }
    }

    /// Start a new conversation on `topic`. Each conversation gets its own
    /// session manager, so retained wire histories never leak between
    /// students on the same topic. Past the conversation cap the oldest
    /// conversation is dropped from the map; subscribers holding its handle
    /// finish undisturbed.
    pub async fn create(&self, topic: Topic) -> Arc<ConversationRuntime> {
        let runtime = ConversationRuntime::start(
            topic,
            Arc::new(SessionManager::new(self.backend.clone())),
            Arc::clone(&self.suggestions),
        );

        let mut table = self.conversations.lock().await;
        if table.entries.len() >= MAX_CONVERSATIONS {
            if let Some(oldest) = table
                .entries
                .iter()
                .min_by_key(|(_, (seq, _))| *seq)
                .map(|(id, _)| *id)
            {
                table.entries.remove(&oldest);
                tracing::info!(conversation = %oldest, "evicted oldest conversation");
            }
        }
        let seq = table.next_seq;
        table.next_seq += 1;
        table.entries.insert(runtime.id, (seq, Arc::clone(&runtime)));
        runtime
    }

    pub async fn get(&self, id: Uuid) -> Result<Arc<ConversationRuntime>, ConversationError> {
        self.conversations
            .lock()
            .await
            .entries
            .get(&id)
            .map(|(_, runtime)| Arc::clone(runtime))
            .ok_or(ConversationError::UnknownConversation(id))
    }

    #[cfg(test)]
    async fn count(&self) -> usize {
        self.conversations.lock().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::SUGGESTED_MARKER;
    use crate::llm::WireMessage;
    use crate::session::MISSING_CREDENTIAL_MESSAGE;
    use crate::testing::{ScriptedBackend, ScriptedResponse};

    const SUGGESTION_JSON: &str =
        r#"{"questions": ["성찰은 어떻게 시작하나요?", "행복과 쾌락은 다른가요?"]}"#;

    fn test_topic() -> Topic {
        Topic {
            id: 1,
            question: "진정한 행복이란 무엇인가요?".to_string(),
            philosopher: "소크라테스".to_string(),
            initial_answer: "성찰하는 삶이 행복입니다.".to_string(),
            video_url: String::new(),
            image_url: String::new(),
        }
    }

    fn manager_with(backend: Option<Arc<ScriptedBackend>>) -> ConversationManager {
        let backend = backend.map(|b| b as Arc<dyn ChatBackend>);
        ConversationManager::new(
            backend.clone(),
            Arc::new(SuggestionGenerator::new(backend)),
        )
    }

    async fn wait_idle(runtime: &Arc<ConversationRuntime>) {
        while runtime.snapshot().await.1.is_busy() {
            tokio::task::yield_now().await;
        }
    }

    /// Wait until the pending suggestion call has settled with questions.
    async fn wait_suggestions(runtime: &Arc<ConversationRuntime>) {
        while runtime.snapshot().await.1.suggestions().is_empty() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn new_conversation_is_seeded_and_requests_suggestions() {
        let backend = Arc::new(ScriptedBackend::always(SUGGESTION_JSON));
        let manager = manager_with(Some(backend.clone()));

        let runtime = manager.create(test_topic()).await;
        let (snapshot, _events) = runtime.subscribe().await;

        // Seeded transcript, submittable right away while the initial
        // suggestion call settles in the background.
        match snapshot {
            ConversationEvent::Snapshot { transcript, phase } => {
                assert_eq!(transcript.len(), 2);
                assert!(!phase.is_busy());
            }
            other => panic!("expected snapshot, got {other:?}"),
        }

        wait_suggestions(&runtime).await;
        let (transcript, phase) = runtime.snapshot().await;
        assert_eq!(transcript.len(), 2);
        assert_eq!(phase.suggestions().len(), 2);

        // The initial suggestion prompt carried the seed exchange.
        let prompt = &backend.calls()[0].history[0].text;
        assert!(prompt.contains("진정한 행복이란 무엇인가요?"));
        assert!(prompt.contains("성찰하는 삶이 행복입니다."));
    }

    #[tokio::test]
    async fn full_turn_publishes_events_in_order() {
        let backend = Arc::new(ScriptedBackend::new([
            ScriptedResponse::Fragments(vec![SUGGESTION_JSON.to_string()]),
            ScriptedResponse::Fragments(vec!["행복은 ".to_string(), "성찰입니다.".to_string()]),
            ScriptedResponse::Fragments(vec![SUGGESTION_JSON.to_string()]),
        ]));
        let manager = manager_with(Some(backend));
        let runtime = manager.create(test_topic()).await;
        wait_suggestions(&runtime).await;

        let (_, mut events) = runtime.subscribe().await;
        assert!(runtime.submit("왜 그런가요?".to_string(), false).await);

        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.unwrap();
            let done = matches!(event, ConversationEvent::Completed { .. });
            seen.push(event);
            if done {
                break;
            }
        }

        assert!(matches!(&seen[0], ConversationEvent::TurnAccepted { text } if text == "왜 그런가요?"));
        assert!(matches!(seen[1], ConversationEvent::StreamStarted));
        assert!(matches!(&seen[2], ConversationEvent::Fragment { text } if text == "행복은 "));
        assert!(matches!(&seen[3], ConversationEvent::Fragment { text } if text == "성찰입니다."));
        assert!(
            matches!(&seen[4], ConversationEvent::Completed { suggestions } if suggestions.len() == 2)
        );

        let (transcript, phase) = runtime.snapshot().await;
        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript.last().unwrap().content, "행복은 성찰입니다.");
        assert!(!phase.is_busy());
    }

    #[tokio::test]
    async fn submission_while_busy_is_a_silent_no_op() {
        let backend = Arc::new(ScriptedBackend::always(SUGGESTION_JSON));
        let manager = manager_with(Some(backend));
        let runtime = manager.create(test_topic()).await;
        wait_suggestions(&runtime).await;

        assert!(runtime.submit("첫 질문입니다".to_string(), false).await);
        // The first turn is still in flight.
        assert!(!runtime.submit("둘째 질문입니다".to_string(), false).await);

        wait_idle(&runtime).await;
        let (transcript, _) = runtime.snapshot().await;
        // Seed, the accepted question, and its answer. Nothing queued.
        assert_eq!(transcript.len(), 4);
    }

    #[tokio::test]
    async fn suggested_submission_is_marked_in_transcript() {
        let backend = Arc::new(ScriptedBackend::always(SUGGESTION_JSON));
        let manager = manager_with(Some(backend));
        let runtime = manager.create(test_topic()).await;
        wait_suggestions(&runtime).await;

        assert!(
            runtime
                .submit("성찰은 어떻게 시작하나요?".to_string(), true)
                .await
        );
        wait_idle(&runtime).await;

        let (transcript, _) = runtime.snapshot().await;
        let marked = format!("{SUGGESTED_MARKER}성찰은 어떻게 시작하나요?");
        assert_eq!(transcript.turns()[2].content, marked);
    }

    #[tokio::test]
    async fn reset_supersedes_in_flight_turn() {
        let backend = Arc::new(ScriptedBackend::always(SUGGESTION_JSON));
        let manager = manager_with(Some(backend));
        let runtime = manager.create(test_topic()).await;
        wait_suggestions(&runtime).await;

        // Accepted, but the driver has not run yet; the reset supersedes it.
        assert!(runtime.submit("곧 버려질 질문".to_string(), false).await);
        runtime.reset().await;
        // Once the replacement seed suggestions settle, every driver spawned
        // before the reset has run and been discarded.
        wait_suggestions(&runtime).await;

        let (transcript, phase) = runtime.snapshot().await;
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.turns()[0].content, "진정한 행복이란 무엇인가요?");
        assert!(!phase.is_busy());
    }

    #[tokio::test]
    async fn submission_accepted_during_seed_suggestion_window() {
        let backend = Arc::new(ScriptedBackend::new([
            ScriptedResponse::Fragments(vec!["행복은 성찰입니다.".to_string()]),
            ScriptedResponse::Fragments(vec![SUGGESTION_JSON.to_string()]),
        ]));
        let manager = manager_with(Some(backend.clone()));
        let runtime = manager.create(test_topic()).await;

        // The seed suggestion call has not settled; the turn goes through
        // anyway and supersedes it.
        assert!(runtime.submit("기다리지 않은 질문".to_string(), false).await);
        wait_idle(&runtime).await;

        let (transcript, phase) = runtime.snapshot().await;
        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript.last().unwrap().content, "행복은 성찰입니다.");
        // Suggestions belong to the submitted turn; the superseded seed call
        // never reached the backend.
        assert_eq!(phase.suggestions().len(), 2);
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn conversations_do_not_share_session_history() {
        let backend = Arc::new(ScriptedBackend::always(SUGGESTION_JSON));
        let manager = manager_with(Some(backend.clone()));

        let left = manager.create(test_topic()).await;
        let right = manager.create(test_topic()).await;
        wait_suggestions(&left).await;
        wait_suggestions(&right).await;

        assert!(left.submit("왼쪽 첫 질문입니다".to_string(), false).await);
        wait_idle(&left).await;
        assert!(right.submit("오른쪽 첫 질문입니다".to_string(), false).await);
        wait_idle(&right).await;

        // Resetting one conversation must not evict the other's session.
        left.reset().await;
        wait_suggestions(&left).await;

        assert!(right.submit("오른쪽 둘째 질문입니다".to_string(), false).await);
        wait_idle(&right).await;

        let calls = backend.calls();
        let history_ending_in = |text: &str| {
            calls
                .iter()
                .find(|call| call.history.last().map(|m| m.text.as_str()) == Some(text))
                .map(|call| call.history.clone())
                .unwrap_or_default()
        };

        // The first turn of each conversation carried no foreign exchanges.
        assert_eq!(
            history_ending_in("오른쪽 첫 질문입니다"),
            vec![WireMessage::user("오른쪽 첫 질문입니다")]
        );
        // The second turn retained only this conversation's own exchange.
        assert_eq!(
            history_ending_in("오른쪽 둘째 질문입니다"),
            vec![
                WireMessage::user("오른쪽 첫 질문입니다"),
                WireMessage::model(SUGGESTION_JSON),
                WireMessage::user("오른쪽 둘째 질문입니다"),
            ]
        );
    }

    #[tokio::test]
    async fn missing_credential_turn_ends_with_setup_instructions() {
        let manager = manager_with(None);
        let runtime = manager.create(test_topic()).await;

        assert!(runtime.submit("질문입니다".to_string(), false).await);
        wait_idle(&runtime).await;

        let (transcript, phase) = runtime.snapshot().await;
        assert_eq!(
            transcript.last().unwrap().content,
            MISSING_CREDENTIAL_MESSAGE
        );
        // No credential also means no suggestions, which is not an error.
        assert_eq!(phase.suggestions().len(), 0);
    }

    #[tokio::test]
    async fn manager_evicts_oldest_conversation_past_cap() {
        let manager = manager_with(None);

        let first = manager.create(test_topic()).await;
        for _ in 0..MAX_CONVERSATIONS {
            manager.create(test_topic()).await;
        }

        assert_eq!(manager.count().await, MAX_CONVERSATIONS);
        assert!(manager.get(first.id).await.is_err());
    }

    #[tokio::test]
    async fn unknown_conversation_is_an_error() {
        let manager = manager_with(None);
        assert!(matches!(
            manager.get(Uuid::new_v4()).await,
            Err(ConversationError::UnknownConversation(_))
        ));
    }
}
