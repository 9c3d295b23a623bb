//! OpenAI-style chat-completion request/response shapes.

use chrono::Utc;
use insight_core::types::{Citation, ComposedAnswer, Query, DEFAULT_TOP_K};
use insight_core::{Error, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHAT_MODEL: &str = "scripture-insight";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

fn default_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

impl ChatCompletionRequest {
    /// The query is the last `user` message; earlier turns are ignored.
    pub fn to_query(&self) -> Result<Query> {
        let text = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .ok_or_else(|| Error::invalid_query("no user message in chat request"))?;
        Ok(Query::new(text).with_top_k(self.top_k.unwrap_or(DEFAULT_TOP_K)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: usize,
    pub message: ChatMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub citations: Vec<Citation>,
}

impl ChatCompletionResponse {
    /// The assistant message carries the rendered answer (summary plus sources).
    pub fn from_answer(model: &str, answer: &ComposedAnswer) -> Self {
        let now = Utc::now();
        let content = answer.render();
        let digest = blake3::hash(format!("{}{content}", now.timestamp_nanos_opt().unwrap_or_default()).as_bytes());
        Self {
            id: format!("chatcmpl-{}", &digest.to_hex()[..24]),
            object: "chat.completion".to_string(),
            created: now.timestamp(),
            model: model.to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage { role: "assistant".to_string(), content },
                finish_reason: "stop".to_string(),
            }],
            citations: answer.citations.clone(),
        }
    }

    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}
