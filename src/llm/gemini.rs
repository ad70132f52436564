//! Google Gemini provider implementation
//!
//! Talks to the `streamGenerateContent` endpoint with `alt=sse` and exposes
//! the response as an ordered fragment stream. The collected call shape used
//! for suggestions drains this same interface (see `collect_response`).

use super::{ChatBackend, FragmentStream, LlmError, WireMessage, WireRole};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Placeholder value shipped in .env templates; treated as unset.
const PLACEHOLDER_KEY: &str = "your_api_key_here";

/// Gemini configuration resolved from the environment.
#[derive(Debug, Clone, Default)]
pub struct GeminiConfig {
    /// Resolved credential; `None` when unset or still the placeholder.
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        let api_key = std::env::var("API_KEY")
            .ok()
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .filter(|k| !k.is_empty() && k != PLACEHOLDER_KEY);

        Self {
            api_key,
            model: std::env::var("GEMINI_MODEL").ok(),
            base_url: None,
        }
    }

    /// Build a client, or `None` when no usable credential is configured.
    /// Absence is not an error: the session layer reports it inline.
    pub fn client(&self) -> Option<GeminiClient> {
        self.api_key.as_ref().map(|key| {
            GeminiClient::new(
                key.clone(),
                self.model.as_deref().unwrap_or(DEFAULT_MODEL),
                self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
            )
        })
    }
}

/// Gemini REST client
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: &str, base_url: &str) -> Self {
        // No overall timeout: the streaming body stays open for the whole
        // generation. Connect timeout still bounds a dead endpoint.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.model, self.api_key
        )
    }

    fn translate_request(system_instruction: &str, history: &[WireMessage]) -> GenerateRequest {
        let contents = history
            .iter()
            .map(|msg| Content {
                role: Some(
                    match msg.role {
                        WireRole::User => "user",
                        WireRole::Model => "model",
                    }
                    .to_string(),
                ),
                parts: vec![Part {
                    text: msg.text.clone(),
                }],
            })
            .collect();

        let system_instruction = if system_instruction.is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: vec![Part {
                    text: system_instruction.to_string(),
                }],
            })
        };

        GenerateRequest {
            contents,
            system_instruction,
            generation_config: Some(GenerationConfig {
                thinking_config: Some(ThinkingConfig { thinking_budget: 0 }),
            }),
        }
    }
}

#[async_trait]
impl ChatBackend for GeminiClient {
    async fn stream_generate(
        &self,
        system_instruction: &str,
        history: &[WireMessage],
    ) -> Result<FragmentStream, LlmError> {
        let request = Self::translate_request(system_instruction, history);
        tracing::debug!(model = %self.model, turns = history.len(), "opening generation stream");

        let response = self
            .client
            .post(self.stream_url())
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::network(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::from_status(status.as_u16(), message));
        }

        let mut bytes = response.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut buf: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk =
                    chunk.map_err(|e| LlmError::network(format!("Stream interrupted: {e}")))?;
                buf.extend_from_slice(&chunk);

                while let Some(line) = take_line(&mut buf) {
                    let Some(payload) = sse_data(&line) else {
                        continue;
                    };
                    if let Some(text) = chunk_text(payload)? {
                        if !text.is_empty() {
                            yield text;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Drain the next complete line from the buffer, newline stripped.
/// Lines are only parsed once fully buffered, so multi-byte characters
/// split across network chunks never reach the UTF-8 decode.
fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = buf.drain(..=pos).collect();
    let line = String::from_utf8_lossy(&line);
    Some(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Extract the payload of an SSE data line. Blank lines, comments and
/// event-type lines carry no fragment data.
fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Parse one streamed chunk and pull out its text, if any.
fn chunk_text(payload: &str) -> Result<Option<String>, LlmError> {
    let chunk: StreamChunk = serde_json::from_str(payload)
        .map_err(|e| LlmError::malformed(format!("Failed to parse stream chunk: {e}")))?;

    let text = chunk
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|p| p.text)
                .collect::<String>()
        });

    Ok(text)
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: i32,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmErrorKind;

    #[test]
    fn take_line_handles_partial_buffers() {
        let mut buf = b"data: one\r\ndata: tw".to_vec();
        assert_eq!(take_line(&mut buf), Some("data: one".to_string()));
        assert_eq!(take_line(&mut buf), None);
        buf.extend_from_slice(b"o\n\n");
        assert_eq!(take_line(&mut buf), Some("data: two".to_string()));
        assert_eq!(take_line(&mut buf), Some(String::new()));
        assert_eq!(take_line(&mut buf), None);
    }

    #[test]
    fn sse_data_skips_non_data_lines() {
        assert_eq!(sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data(""), None);
        assert_eq!(sse_data(": keep-alive"), None);
        assert_eq!(sse_data("event: done"), None);
    }

    #[test]
    fn chunk_text_extracts_parts() {
        let payload =
            r#"{"candidates":[{"content":{"parts":[{"text":"안녕"},{"text":"하세요"}]}}]}"#;
        assert_eq!(chunk_text(payload).unwrap(), Some("안녕하세요".to_string()));
    }

    #[test]
    fn chunk_text_tolerates_empty_chunks() {
        assert_eq!(chunk_text(r#"{"candidates":[]}"#).unwrap(), None);
        assert_eq!(chunk_text(r#"{}"#).unwrap(), None);
        assert!(chunk_text("not json").is_err());
    }

    #[test]
    fn request_shape_matches_wire_format() {
        let request = GeminiClient::translate_request(
            "당신은 철학자입니다.",
            &[
                WireMessage::user("질문"),
                WireMessage::model("답변"),
                WireMessage::user("추가 질문"),
            ],
        );

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][1]["role"], "model");
        assert_eq!(value["contents"][2]["parts"][0]["text"], "추가 질문");
        assert_eq!(
            value["systemInstruction"]["parts"][0]["text"],
            "당신은 철학자입니다."
        );
        assert_eq!(
            value["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            0
        );
    }

    #[test]
    fn placeholder_credential_is_unset() {
        let config = GeminiConfig {
            api_key: None,
            ..Default::default()
        };
        assert!(config.client().is_none());
    }

    #[test]
    fn error_classification_flows_through() {
        let err = LlmError::from_status(403, "blocked");
        assert_eq!(err.kind, LlmErrorKind::Forbidden);
        assert_eq!(err.to_string(), "blocked");
    }
}
