//! Scripted chat backend for tests

use crate::llm::{ChatBackend, FragmentStream, LlmError, WireMessage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One scripted reply, consumed per call in order.
pub enum ScriptedResponse {
    /// Stream opens and yields these fragments, then closes normally.
    Fragments(Vec<String>),
    /// Opening the stream fails outright.
    OpenError(LlmError),
    /// Stream opens, yields some fragments, then fails mid-stream.
    MidStreamError {
        fragments: Vec<String>,
        error: LlmError,
    },
}

/// A recorded `stream_generate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub system: String,
    pub history: Vec<WireMessage>,
}

/// Fake backend that replays a script and records every call it receives.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<ScriptedResponse>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn new(script: impl IntoIterator<Item = ScriptedResponse>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Backend that answers every call with the same single fragment.
    pub fn always(reply: &str) -> Self {
        Self::new([ScriptedResponse::Fragments(vec![reply.to_string()])])
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn stream_generate(
        &self,
        system_instruction: &str,
        history: &[WireMessage],
    ) -> Result<FragmentStream, LlmError> {
        self.calls.lock().unwrap().push(RecordedCall {
            system: system_instruction.to_string(),
            history: history.to_vec(),
        });

        // An `always` backend keeps replaying its single entry.
        let response = {
            let mut script = self.script.lock().unwrap();
            if script.len() == 1 {
                match script.front().unwrap() {
                    ScriptedResponse::Fragments(fragments) => {
                        Some(ScriptedResponse::Fragments(fragments.clone()))
                    }
                    _ => script.pop_front(),
                }
            } else {
                script.pop_front()
            }
        };

        match response.expect("scripted backend ran out of responses") {
            ScriptedResponse::Fragments(fragments) => Ok(Box::pin(futures::stream::iter(
                fragments.into_iter().map(Ok),
            ))),
            ScriptedResponse::OpenError(error) => Err(error),
            ScriptedResponse::MidStreamError { fragments, error } => {
                let items: Vec<Result<String, LlmError>> = fragments
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(error)))
                    .collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
        }
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}
