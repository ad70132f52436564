//! Effects produced by turn transitions

use super::state::Transcript;

/// Side effects a transition asks the runtime to perform.
///
/// Transcript mutations are applied synchronously under the conversation
/// lock; `OpenStream` and `RequestSuggestions` are picked up by the turn
/// driver, which performs the corresponding await.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    AppendUserTurn { text: String },
    BeginModelTurn,
    AppendFragment { text: String },
    AppendModelTurn { text: String },
    OpenStream,
    RequestSuggestions,
}

impl Effect {
    /// Apply a transcript mutation. Driver effects leave the transcript
    /// untouched.
    pub fn apply(&self, transcript: &mut Transcript) {
        match self {
            Effect::AppendUserTurn { text } => transcript.push_user(text),
            Effect::BeginModelTurn => transcript.begin_model_turn(),
            Effect::AppendFragment { text } => {
                if !transcript.append_fragment(text) {
                    tracing::warn!("dropping fragment: trailing turn is not a model turn");
                }
            }
            Effect::AppendModelTurn { text } => transcript.push_model(text),
            Effect::OpenStream | Effect::RequestSuggestions => {}
        }
    }
}
