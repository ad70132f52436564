//! Pure turn transition function
//!
//! Given the same phase and event this always produces the same next phase
//! and effects, with no I/O. The runtime applies the effects.

use super::{Effect, Phase, TurnEvent};
use thiserror::Error;

/// Marker prefixed to suggestion-derived questions. Cosmetic only.
pub const SUGGESTED_MARKER: &str = "💡 ";

/// Model turn appended when opening the response stream fails outright.
pub const STREAM_FAILURE_APOLOGY: &str = "죄송합니다. 답변을 생성하는 중에 오류가 발생했습니다.";

/// At most two follow-up suggestions are kept.
pub const MAX_SUGGESTIONS: usize = 2;

/// Result of a turn transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: Phase,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn new(next: Phase) -> Self {
        Self {
            next,
            effects: vec![],
        }
    }

    fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

#[derive(Debug, Error)]
pub enum TransitionError {
    /// A second submission while busy is a silent no-op at the caller.
    #[error("a turn is already in flight")]
    TurnInFlight,
    #[error("message is empty after trimming")]
    EmptyMessage,
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

pub fn transition(phase: &Phase, event: TurnEvent) -> Result<Transition, TransitionError> {
    match (phase, event) {
        // Submission: leave Idle, which structurally discards the suggestion
        // set, and ask the driver to open the response stream.
        (Phase::Idle { .. }, TurnEvent::Submit { text, suggested }) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(TransitionError::EmptyMessage);
            }
            let content = if suggested {
                format!("{SUGGESTED_MARKER}{trimmed}")
            } else {
                trimmed.to_string()
            };
            Ok(Transition::new(Phase::AwaitingStream)
                .with_effect(Effect::AppendUserTurn { text: content })
                .with_effect(Effect::OpenStream))
        }

        // At most one turn in flight: submissions while busy are rejected,
        // never queued.
        (Phase::AwaitingStream | Phase::AwaitingSuggestions, TurnEvent::Submit { .. }) => {
            Err(TransitionError::TurnInFlight)
        }

        // The placeholder turn goes in as soon as the stream is open, before
        // any fragment arrives.
        (Phase::AwaitingStream, TurnEvent::StreamOpened) => {
            Ok(Transition::new(Phase::AwaitingStream).with_effect(Effect::BeginModelTurn))
        }

        // Fragments are applied strictly in arrival order to the trailing
        // model turn.
        (Phase::AwaitingStream, TurnEvent::Fragment { text }) => {
            Ok(Transition::new(Phase::AwaitingStream).with_effect(Effect::AppendFragment { text }))
        }

        (Phase::AwaitingStream, TurnEvent::StreamClosed) => {
            Ok(Transition::new(Phase::AwaitingSuggestions)
                .with_effect(Effect::RequestSuggestions))
        }

        // Stream-open failure: fixed apology, straight back to submittable.
        (Phase::AwaitingStream, TurnEvent::StreamFailed { .. }) => {
            Ok(Transition::new(Phase::idle()).with_effect(Effect::AppendModelTurn {
                text: STREAM_FAILURE_APOLOGY.to_string(),
            }))
        }

        // Suggestions settle either after a turn (AwaitingSuggestions) or for
        // the seed exchange of a fresh conversation, which stays submittable
        // while the initial call is in flight (Idle).
        (
            Phase::AwaitingSuggestions | Phase::Idle { .. },
            TurnEvent::SuggestionsReady { mut questions },
        ) => {
            questions.truncate(MAX_SUGGESTIONS);
            Ok(Transition::new(Phase::Idle {
                suggestions: questions,
            }))
        }

        (
            Phase::AwaitingSuggestions | Phase::Idle { .. },
            TurnEvent::SuggestionsFailed,
        ) => Ok(Transition::new(Phase::idle())),

        (phase, event) => Err(TransitionError::InvalidTransition(format!(
            "no transition from {phase:?} with event {event:?}"
        ))),
    }
}
