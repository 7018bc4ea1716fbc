use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::models::*;
use super::stream::{ChatStream, StatsCallback};
use crate::config;
use crate::providers::traits::ChatProvider;
use crate::providers::types::{ChatError, ChatMessage};

/// HTTP client for one Ollama server. The base URL can be swapped at runtime;
/// every request reads the current value.
pub struct OllamaClient {
    client: Client,
    base_url: RwLock<String>,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Result<Self, ChatError> {
        Ok(Self {
            client: Client::new(),
            base_url: RwLock::new(Self::normalize_base_url(base_url)?),
        })
    }

    fn normalize_base_url(raw: &str) -> Result<String, ChatError> {
        let trimmed = raw.trim();
        let url = Url::parse(trimmed)
            .map_err(|e| ChatError::InvalidRequest(format!("Invalid endpoint {:?}: {}", raw, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ChatError::InvalidRequest(format!(
                "Unsupported endpoint scheme: {}",
                url.scheme()
            )));
        }
        Ok(trimmed.trim_end_matches('/').to_string())
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self
            .base_url
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        format!("{}{}", base, path)
    }

    fn parse_error_message(status: reqwest::StatusCode, body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<OllamaErrorResponse>(body) {
            return parsed.error;
        }
        status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string()
    }

    async fn fetch_tags(&self) -> Result<reqwest::Response, ChatError> {
        let base = self.base_url();
        let response = self
            .client
            .get(self.endpoint("/api/tags"))
            .send()
            .await
            .map_err(|e| ChatError::ConnectionUnreachable {
                endpoint: base,
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::HttpStatus {
                status: status.as_u16(),
                message: Self::parse_error_message(status, &body),
            });
        }

        Ok(response)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self {
            client: Client::new(),
            base_url: RwLock::new(config::DEFAULT_ENDPOINT.to_string()),
        }
    }
}

#[async_trait]
impl ChatProvider for OllamaClient {
    async fn stream_chat(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        on_stats: Option<StatsCallback>,
    ) -> Result<ChatStream, ChatError> {
        if model.trim().is_empty() {
            return Err(ChatError::InvalidRequest("No model selected".to_string()));
        }

        let started = Instant::now();
        let base = self.base_url();
        let request = OllamaChatRequest {
            model,
            messages: &messages,
            stream: true,
        };

        tracing::debug!(
            "POST {}/api/chat model={} messages={}",
            base,
            model,
            messages.len()
        );

        let response = self
            .client
            .post(self.endpoint("/api/chat"))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::ConnectionUnreachable {
                endpoint: base,
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::HttpStatus {
                status: status.as_u16(),
                message: Self::parse_error_message(status, &body),
            });
        }

        Ok(ChatStream::from_response(response, started, on_stats))
    }

    async fn test_connection(&self) -> bool {
        match self.fetch_tags().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Ollama connection test failed: {}", e);
                false
            }
        }
    }

    async fn get_available_models(&self) -> Vec<String> {
        let response = match self.fetch_tags().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Failed to get available models: {}", e);
                return Vec::new();
            }
        };

        match response.json::<OllamaTagList>().await {
            Ok(tags) => tags.models.into_iter().map(|m| m.name).collect(),
            Err(e) => {
                tracing::warn!("Failed to parse model list: {}", e);
                Vec::new()
            }
        }
    }

    fn set_base_url(&self, url: &str) -> Result<(), ChatError> {
        let normalized = Self::normalize_base_url(url)?;
        *self
            .base_url
            .write()
            .unwrap_or_else(PoisonError::into_inner) = normalized;
        Ok(())
    }

    fn base_url(&self) -> String {
        self.base_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
