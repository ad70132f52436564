//! Events that drive a conversational turn

/// Inputs to the turn state machine, in the order a turn produces them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// User submitted a question, typed or picked from the suggestions.
    Submit { text: String, suggested: bool },
    /// The response stream was opened successfully.
    StreamOpened,
    /// One incremental text fragment arrived.
    Fragment { text: String },
    /// The remote side closed the stream normally.
    StreamClosed,
    /// Opening the stream itself failed.
    StreamFailed { message: String },
    /// Follow-up suggestion generation produced questions.
    SuggestionsReady { questions: Vec<String> },
    /// Suggestion generation failed; degrade to no suggestions.
    SuggestionsFailed,
}
