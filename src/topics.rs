//! Built-in topic catalog
//!
//! Fixed list of philosophical topics, each pairing a question with the
//! philosopher who answers it and that philosopher's canonical initial
//! answer. Loaded once at startup from the bundled JSON and validated.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One selectable topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: u32,
    pub question: String,
    pub philosopher: String,
    pub initial_answer: String,
    pub video_url: String,
    pub image_url: String,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("topic catalog did not parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate topic id {0}")]
    DuplicateId(u32),
    #[error("topic {id} has an empty {field}")]
    EmptyField { id: u32, field: &'static str },
}

/// Immutable catalog of topics, unique by id.
#[derive(Debug, Clone)]
pub struct TopicCatalog {
    topics: Vec<Topic>,
}

impl TopicCatalog {
    /// The catalog bundled with the binary. The bundled JSON is validated by
    /// a test, so failing to parse it is a build defect.
    pub fn builtin() -> Self {
        static TOPICS_JSON: &str = include_str!("../data/topics.json");
        Self::from_json(TOPICS_JSON).expect("bundled topic catalog is valid")
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let topics: Vec<Topic> = serde_json::from_str(json)?;

        let mut seen = std::collections::HashSet::new();
        for topic in &topics {
            if !seen.insert(topic.id) {
                return Err(CatalogError::DuplicateId(topic.id));
            }
            for (field, value) in [
                ("question", &topic.question),
                ("philosopher", &topic.philosopher),
                ("initialAnswer", &topic.initial_answer),
            ] {
                if value.trim().is_empty() {
                    return Err(CatalogError::EmptyField {
                        id: topic.id,
                        field,
                    });
                }
            }
        }

        Ok(Self { topics })
    }

    pub fn get(&self, id: u32) -> Option<&Topic> {
        self.topics.iter().find(|t| t.id == id)
    }

    pub fn all(&self) -> &[Topic] {
        &self.topics
    }
}
