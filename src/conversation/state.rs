//! Conversation state types

use serde::{Deserialize, Serialize};

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
}

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
        }
    }
}

/// Ordered turn history for the active topic.
///
/// Append-only, except the trailing model turn whose content grows in place
/// while a response streams. Replaced wholesale when the topic changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript(Vec<Turn>);

impl Transcript {
    /// Seed for a freshly selected topic: the fixed question asked by the
    /// student and the philosopher's canonical initial answer.
    pub fn seeded(question: &str, initial_answer: &str) -> Self {
        Self(vec![Turn::user(question), Turn::model(initial_answer)])
    }

    pub fn turns(&self) -> &[Turn] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.0.last()
    }

    /// Content of the most recent user turn.
    pub fn last_user(&self) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }

    /// Content of the most recent model turn.
    pub fn last_model(&self) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|t| t.role == Role::Model)
            .map(|t| t.content.as_str())
    }

    pub(crate) fn push_user(&mut self, text: &str) {
        self.0.push(Turn::user(text));
    }

    pub(crate) fn push_model(&mut self, text: &str) {
        self.0.push(Turn::model(text));
    }

    /// Append the empty placeholder that fragments accumulate into.
    pub(crate) fn begin_model_turn(&mut self) {
        self.0.push(Turn::model(""));
    }

    /// Grow the trailing model turn. Returns false (and leaves the transcript
    /// untouched) if the trailing turn is not a model turn.
    pub(crate) fn append_fragment(&mut self, text: &str) -> bool {
        match self.0.last_mut() {
            Some(turn) if turn.role == Role::Model => {
                turn.content.push_str(text);
                true
            }
            _ => false,
        }
    }
}

/// Tagged turn phase.
///
/// The suggestion set is a field of `Idle` only, so submitting a new turn
/// structurally clears it and a populated suggestion list can never coexist
/// with an in-flight turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Phase {
    /// Ready for the next submission.
    Idle { suggestions: Vec<String> },
    /// Response stream in flight.
    AwaitingStream,
    /// Stream finished; follow-up suggestions settling.
    AwaitingSuggestions,
}

impl Phase {
    pub fn idle() -> Self {
        Phase::Idle {
            suggestions: Vec::new(),
        }
    }

    /// A turn is in flight until both streaming and suggestion generation
    /// settle; no new turn may be submitted meanwhile.
    pub fn is_busy(&self) -> bool {
        !matches!(self, Phase::Idle { .. })
    }

    pub fn suggestions(&self) -> &[String] {
        match self {
            Phase::Idle { suggestions } => suggestions,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_transcript_is_question_then_answer() {
        let transcript = Transcript::seeded("Q", "A");
        assert_eq!(
            transcript.turns(),
            &[Turn::user("Q"), Turn::model("A")]
        );
    }

    #[test]
    fn append_fragment_requires_trailing_model_turn() {
        let mut transcript = Transcript::default();
        transcript.push_user("질문");
        assert!(!transcript.append_fragment("x"));

        transcript.begin_model_turn();
        assert!(transcript.append_fragment("답"));
        assert!(transcript.append_fragment("변"));
        assert_eq!(transcript.last().unwrap().content, "답변");
    }

    #[test]
    fn last_user_and_model_pick_most_recent() {
        let mut transcript = Transcript::seeded("Q1", "A1");
        transcript.push_user("Q2");
        transcript.push_model("A2");
        assert_eq!(transcript.last_user(), Some("Q2"));
        assert_eq!(transcript.last_model(), Some("A2"));
    }

    #[test]
    fn busy_everywhere_except_idle() {
        assert!(!Phase::idle().is_busy());
        assert!(Phase::AwaitingStream.is_busy());
        assert!(Phase::AwaitingSuggestions.is_busy());
    }
}
