use serde::{Deserialize, Serialize};

use crate::providers::types::ChatMessage;

// --- Request types ---

#[derive(Debug, Serialize)]
pub struct OllamaChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
}

// --- Streaming types ---

/// One NDJSON event. Counters only appear on the final (`done`) event.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct OllamaStreamEvent {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub message: Option<OllamaEventMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub context: Option<Vec<i64>>,
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub load_duration: Option<u64>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub prompt_eval_duration: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub eval_duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct OllamaEventMessage {
    #[serde(default)]
    pub content: String,
}

impl OllamaStreamEvent {
    /// Text carried by this event. `/api/chat` servers put it under
    /// `message.content`, generate-style servers under `response`.
    pub fn text(&self) -> &str {
        match self.response.as_deref() {
            Some(text) if !text.is_empty() => text,
            _ => self
                .message
                .as_ref()
                .map(|m| m.content.as_str())
                .unwrap_or_default(),
        }
    }
}

// --- Model list ---

#[derive(Debug, Deserialize)]
pub struct OllamaTagList {
    #[serde(default)]
    pub models: Vec<OllamaModelTag>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct OllamaModelTag {
    pub name: String,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub digest: Option<String>,
}

// --- Error types ---

#[derive(Debug, Deserialize)]
pub struct OllamaErrorResponse {
    pub error: String,
}
