//! Remote chat sessions
//!
//! Remote chat sessions keyed by topic id, created lazily and cached in an
//! explicit map with an eviction operation. Each conversation owns its own
//! manager, so retained histories never mix between conversations that share
//! a topic. A session retains its own wire history: callers hand over the
//! whole transcript, but only the newest user message is sent, the remote
//! context coming from the retained history.
//!
//! Failures never surface as errors to the stream consumer. A missing
//! credential and remote call failures both become a single data-carrying
//! terminal fragment with a user-facing Korean diagnosis.

use crate::conversation::{Role, Transcript};
use crate::llm::{ChatBackend, LlmError, LlmErrorKind, WireMessage};
use crate::topics::Topic;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Fragment shown when no usable credential is configured.
pub const MISSING_CREDENTIAL_MESSAGE: &str = "**API 키가 설정되지 않았습니다.**\n\n`.env` 파일에 `GEMINI_API_KEY`를 설정해주세요.\n\nAPI 키는 다음 링크에서 발급받을 수 있습니다:\nhttps://aistudio.google.com/app/apikey";

const ERROR_PREAMBLE: &str = "죄송합니다, 답변을 가져오는 중 문제가 발생했습니다.";

/// Stream of display fragments. Remote failures have already been folded
/// into data-carrying terminal fragments, so items are plain text.
pub type DisplayStream = Pin<Box<dyn Stream<Item = String> + Send>>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("last transcript turn must be from the user")]
    LastTurnNotUser,
}

struct ChatSession {
    history: Vec<WireMessage>,
}

/// Owner of one conversation's session cache.
pub struct SessionManager {
    backend: Option<Arc<dyn ChatBackend>>,
    sessions: Mutex<HashMap<u32, ChatSession>>,
}

impl SessionManager {
    pub fn new(backend: Option<Arc<dyn ChatBackend>>) -> Self {
        Self {
            backend,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Discard the cached remote session for a topic. Called when a
    /// conversation is reset so the persona starts from a clean history.
    pub async fn reset(&self, topic_id: u32) {
        if self.sessions.lock().await.remove(&topic_id).is_some() {
            tracing::debug!(topic_id, "evicted chat session");
        }
    }

    /// Open the response stream for the newest user turn of `transcript`.
    ///
    /// The returned stream is finite and not restartable; a second call
    /// re-sends the message. On successful completion the exchange is folded
    /// into the topic's retained session history.
    pub async fn stream_response(
        self: &Arc<Self>,
        topic: &Topic,
        transcript: &Transcript,
    ) -> Result<DisplayStream, SessionError> {
        let last = transcript.last().ok_or(SessionError::LastTurnNotUser)?;
        if last.role != Role::User {
            return Err(SessionError::LastTurnNotUser);
        }
        let message = last.content.clone();

        let Some(backend) = self.backend.clone() else {
            tracing::warn!("no Gemini credential configured; answering with setup instructions");
            let single = futures::stream::once(async { MISSING_CREDENTIAL_MESSAGE.to_string() });
            return Ok(Box::pin(single));
        };

        // Retained history plus the new message, snapshotted so the lock is
        // not held across the remote call.
        let history = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.entry(topic.id).or_insert_with(|| {
                tracing::debug!(topic_id = topic.id, "creating chat session");
                ChatSession {
                    history: Vec::new(),
                }
            });
            let mut history = session.history.clone();
            history.push(WireMessage::user(message.clone()));
            history
        };

        let manager = Arc::clone(self);
        let system = system_instruction(topic);
        let topic_id = topic.id;

        let stream = async_stream::stream! {
            match backend.stream_generate(&system, &history).await {
                Err(error) => {
                    tracing::error!(
                        topic_id,
                        kind = ?error.kind,
                        error = %error,
                        "Gemini call failed"
                    );
                    yield diagnose(&error);
                }
                Ok(mut fragments) => {
                    let mut full = String::new();
                    let mut failed = false;
                    while let Some(fragment) = fragments.next().await {
                        match fragment {
                            Ok(text) => {
                                full.push_str(&text);
                                yield text;
                            }
                            Err(error) => {
                                tracing::error!(
                                    topic_id,
                                    kind = ?error.kind,
                                    error = %error,
                                    "Gemini stream failed"
                                );
                                failed = true;
                                yield diagnose(&error);
                                break;
                            }
                        }
                    }

                    if !failed {
                        let mut sessions = manager.sessions.lock().await;
                        let session =
                            sessions.entry(topic_id).or_insert_with(|| ChatSession {
                                history: Vec::new(),
                            });
                        session.history.push(WireMessage::user(message.clone()));
                        session.history.push(WireMessage::model(full));
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Persona directive preloading the topic's question and canonical answer,
/// with the behavioral rules the philosopher must follow.
fn system_instruction(topic: &Topic) -> String {
    format!(
        "당신은 철학자 '{philosopher}'입니다. 학생이 '{question}'이라는 주제에 대해 질문하고 있습니다. 당신의 철학에 기반하여, 다음 초기 답변을 바탕으로 학생의 질문에 친절하고 이해하기 쉽게 답변해주세요.\n\n\
**중요 규칙:**\n\
1. **간결성:** 모든 답변은 **반드시 2~3 문장 이내**로 매우 간결하게 작성해주세요. 길게 설명하지 마세요.\n\
2. **부적절한 입력 대응:** 학생이 욕설, 공격적인 언어, 주제와 무관한 무의미한 말을 할 경우, 직접적으로 반응하지 마세요. 대신, 철학자로서의 품위를 지키며 \"흥미로운 관점이네요. 다시 우리의 주제인 '{question}'에 대해 이야기해볼까요?\"와 같이 부드럽게 대화를 원래 주제로 유도해주세요. 같은 답변을 반복하지 말고 조금씩 다른 답변을 하세요. 학생을 꾸짖거나 비판하지 마세요.\n\
3. **마크다운 형식:** 답변은 항상 마크다운 형식으로 작성해주세요.\n\n\
초기 답변:\n{initial_answer}",
        philosopher = topic.philosopher,
        question = topic.question,
        initial_answer = topic.initial_answer,
    )
}

/// Turn a remote failure into the single user-facing fragment, keyed by the
/// status class of the failed call.
fn diagnose(error: &LlmError) -> String {
    let mut message = ERROR_PREAMBLE.to_string();
    match error.kind {
        LlmErrorKind::InvalidRequest => {
            message.push_str("\n\n400 에러: 요청 형식이 잘못되었습니다. API 키와 모델 설정을 확인해주세요.");
        }
        LlmErrorKind::Auth => {
            message.push_str("\n\n401 에러: API 키가 유효하지 않습니다. API 키를 확인해주세요.");
        }
        LlmErrorKind::Forbidden => {
            message.push_str("\n\n403 에러: API 키에 권한이 없습니다. Google Cloud Console에서 API를 활성화해주세요.");
        }
        _ => {}
    }
    message
}
