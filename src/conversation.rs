//! Conversation store and turn state machine
//!
//! The transcript and the tagged turn phase live here, along with the pure
//! transition function that sequences one conversational turn. All transcript
//! mutations are expressed as effects so the runtime stays a thin driver.

mod effect;
mod event;
mod state;
mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::TurnEvent;
pub use state::{Phase, Role, Transcript};
pub use transition::{transition, TransitionError, MAX_SUGGESTIONS, SUGGESTED_MARKER};
