//! Follow-up question suggestions
//!
//! After each completed model turn, one collected (non-streaming) call asks
//! the model for up to two follow-up questions a curious student might ask
//! next. Strictly best-effort: parse failures, remote errors, and timeouts
//! all degrade to an empty set and are logged, never surfaced.

use crate::conversation::MAX_SUGGESTIONS;
use crate::llm::{collect_response, ChatBackend, WireMessage};
use crate::topics::Topic;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const SUGGESTION_SYSTEM: &str =
    "You are a helpful assistant that generates suggested questions in Korean. \
     Always respond with valid JSON only.";

const SUGGESTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Questions shorter than this are assumed to be heuristic misfires.
const MIN_QUESTION_CHARS: usize = 10;

pub struct SuggestionGenerator {
    backend: Option<Arc<dyn ChatBackend>>,
}

impl SuggestionGenerator {
    pub fn new(backend: Option<Arc<dyn ChatBackend>>) -> Self {
        Self { backend }
    }

    /// Zero to two follow-up questions for the latest exchange. Never errors;
    /// an empty vec means the caller shows no suggestions.
    pub async fn suggest(&self, topic: &Topic, last_user: &str, last_model: &str) -> Vec<String> {
        let Some(backend) = &self.backend else {
            return Vec::new();
        };

        let prompt = build_prompt(topic, last_user, last_model);
        let request = [WireMessage::user(prompt)];

        let reply = match timeout(
            SUGGESTION_TIMEOUT,
            collect_response(backend.as_ref(), SUGGESTION_SYSTEM, &request),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => {
                tracing::warn!(
                    topic_id = topic.id,
                    error = %error,
                    "suggestion generation failed"
                );
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!(topic_id = topic.id, "suggestion generation timed out");
                return Vec::new();
            }
        };

        let questions = parse_questions(&reply);
        if questions.is_empty() {
            tracing::warn!(
                topic_id = topic.id,
                reply_len = reply.len(),
                "suggestion reply produced no usable questions"
            );
        }
        questions
    }
}

fn build_prompt(topic: &Topic, last_user: &str, last_model: &str) -> String {
    format!(
        "당신은 철학 교사입니다. 학생이 {philosopher}와 다음 대화를 나누었습니다:\n\n\
학생 질문: {last_user}\n\n\
{philosopher} 답변: {last_model}\n\n\
위 대화 내용을 바탕으로, 중학생 수준에서 이해할 수 있고 자연스러운 한국어로 추천 질문 2개를 생성해주세요. 각 질문은:\n\
1. 마지막 대화 내용과 관련이 있어야 합니다\n\
2. 존댓말로 끝나야 합니다 (예: \"~할까요?\", \"~인가요?\")\n\
3. 한 문장으로 간결해야 합니다\n\
4. 철학적으로 더 깊이 탐구할 수 있는 질문이어야 합니다\n\
5. **중요**: 철학자 이름이나 \"~의 말씀처럼\", \"~가 말한 것처럼\" 같은 문구를 사용하지 마세요. 직접적이고 간결한 질문만 작성하세요.\n\n\
JSON 형식으로 응답해주세요:\n{{\n  \"questions\": [\"질문1\", \"질문2\"]\n}}",
        philosopher = topic.philosopher,
    )
}

/// Extract up to two questions from a model reply. Prefers the JSON shape the
/// prompt asks for; falls back to scanning list-like lines when the model
/// ignores the format.
fn parse_questions(reply: &str) -> Vec<String> {
    if let Some(questions) = parse_structured(reply) {
        return questions;
    }
    scan_list_lines(reply)
}

#[derive(Deserialize)]
struct StructuredReply {
    #[serde(default)]
    questions: Vec<String>,
}

/// Parse the `{"questions": [...]}` shape, tolerating surrounding prose and
/// markdown code fences by slicing from the first `{` to the last `}`.
/// Fewer than two usable questions counts as a structural failure and falls
/// through to the line heuristic.
fn parse_structured(reply: &str) -> Option<Vec<String>> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: StructuredReply = serde_json::from_str(&reply[start..=end]).ok()?;

    let questions: Vec<String> = parsed
        .questions
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    if questions.len() < MAX_SUGGESTIONS {
        return None;
    }
    Some(questions.into_iter().take(MAX_SUGGESTIONS).collect())
}

/// Last-resort heuristic: pick plausibly question-shaped lines out of a
/// free-text reply (numbered, bulleted, or quoted, with a polite question
/// ending).
fn scan_list_lines(reply: &str) -> Vec<String> {
    let mut questions = Vec::new();
    for line in reply.lines() {
        let Some(candidate) = strip_list_prefix(line.trim()) else {
            continue;
        };
        let question = candidate.trim_matches(|c| c == '"' || c == '\'').trim();
        if question.chars().count() > MIN_QUESTION_CHARS && has_question_ending(question) {
            questions.push(question.to_string());
            if questions.len() == MAX_SUGGESTIONS {
                break;
            }
        }
    }
    questions
}

fn strip_list_prefix(line: &str) -> Option<&str> {
    let mut chars = line.chars();
    match chars.next()? {
        '0'..='9' => {
            let rest = chars.as_str();
            rest.strip_prefix('.').map(str::trim_start)
        }
        '-' | '•' => Some(chars.as_str().trim_start()),
        '"' | '\'' => Some(line),
        _ => None,
    }
}

fn has_question_ending(question: &str) -> bool {
    question.ends_with("까요?") || question.ends_with("인가요?") || question.ends_with("나요?")
}
