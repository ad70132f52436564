//! Gemini chat backend
//!
//! A single trait seam (`ChatBackend`) separates the wire client from the
//! conversation logic so sessions and suggestion generation can be tested
//! against a scripted backend.

mod error;
mod gemini;

pub use error::{LlmError, LlmErrorKind};
pub use gemini::GeminiConfig;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// Role of an entry in the remote conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireRole {
    User,
    Model,
}

/// One entry in the remote conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub role: WireRole,
    pub text: String,
}

impl WireMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: WireRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: WireRole::Model,
            text: text.into(),
        }
    }
}

/// Ordered, finite stream of incremental text fragments from the model.
/// Not restartable: a second call re-sends the request.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Common interface for the generative chat API.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open a streaming generation call. Fragments arrive strictly in wire
    /// order; the stream ends when the remote side closes it.
    async fn stream_generate(
        &self,
        system_instruction: &str,
        history: &[WireMessage],
    ) -> Result<FragmentStream, LlmError>;

    /// Model identifier, for logging.
    fn model_id(&self) -> &str;
}

/// Collected variant of [`ChatBackend::stream_generate`]: drains the same
/// streaming interface and concatenates fragments in arrival order. Used
/// where a single result is wanted (suggestion generation).
pub async fn collect_response(
    backend: &dyn ChatBackend,
    system_instruction: &str,
    history: &[WireMessage],
) -> Result<String, LlmError> {
    let mut stream = backend.stream_generate(system_instruction, history).await?;
    let mut full = String::new();
    while let Some(fragment) = stream.next().await {
        full.push_str(&fragment?);
    }
    Ok(full)
}
