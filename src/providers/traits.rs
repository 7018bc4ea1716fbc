use async_trait::async_trait;

use super::ollama::stream::{ChatStream, StatsCallback};
use super::types::{ChatError, ChatMessage, ChatResponse};

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Open a streaming chat request. Non-2xx statuses fail here, before any
    /// fragment is produced.
    async fn stream_chat(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        on_stats: Option<StatsCallback>,
    ) -> Result<ChatStream, ChatError>;

    /// Stream and concatenate every fragment.
    async fn send_message(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<ChatResponse, ChatError> {
        let stream = self.stream_chat(model, messages, None).await?;
        stream.collect_response().await
    }

    async fn test_connection(&self) -> bool;

    async fn get_available_models(&self) -> Vec<String>;

    /// Point subsequent requests at another server.
    fn set_base_url(&self, url: &str) -> Result<(), ChatError>;

    fn base_url(&self) -> String;
}
