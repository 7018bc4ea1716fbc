//! Binds user input to the store and the streaming client.
//!
//! One stream at a time: a second `submit` while one is running fails with
//! [`ChatError::Busy`]. Every path out of a submission (completion,
//! cancellation, error, or the future being dropped) finalizes the assistant
//! placeholder exactly once.

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::config;
use crate::models::{Role, Session, StreamStats};
use crate::providers::ollama::StatsCallback;
use crate::providers::{ChatError, ChatMessage, ChatProvider, ChatRole};
use crate::services::store::ChatStore;

#[derive(Debug)]
pub enum SubmitOutcome {
    Completed {
        message_id: String,
        content: String,
        stats: Option<StreamStats>,
    },
    Cancelled {
        message_id: String,
        partial: String,
    },
    Failed {
        message_id: String,
        error: ChatError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected { models: Vec<String> },
    Disconnected { banner: String },
}

pub struct ChatController {
    store: ChatStore,
    provider: Arc<dyn ChatProvider>,
    active: Mutex<Option<CancellationToken>>,
}

/// Clears the loading flag on drop and finalizes a placeholder that was
/// never finalized explicitly.
struct StreamGuard<'a> {
    controller: &'a ChatController,
    pending: Option<(String, String)>,
    partial: String,
}

impl StreamGuard<'_> {
    fn finalize(&mut self, content: &str) {
        if let Some((session_id, message_id)) = self.pending.take() {
            self.controller
                .store
                .update_message_in(&session_id, &message_id, content, false);
        }
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        if self.pending.is_some() {
            tracing::debug!("Submission dropped mid-stream, keeping partial answer");
            let partial = std::mem::take(&mut self.partial);
            self.finalize(&partial);
        }
        *self
            .controller
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.controller.store.set_loading(false);
    }
}

impl ChatController {
    pub fn new(store: ChatStore, provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            store,
            provider,
            active: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn ChatProvider> {
        &self.provider
    }

    pub fn is_streaming(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Request cancellation of the running stream. Returns `false` if idle.
    pub fn stop(&self) -> bool {
        match self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Probe the configured endpoint and refresh the model list.
    pub async fn refresh_connection(&self) -> ConnectionStatus {
        let endpoint = self.store.settings().endpoint_url;
        let banner = || ConnectionStatus::Disconnected {
            banner: config::connection_banner(&endpoint),
        };

        if let Err(e) = self.provider.set_base_url(&endpoint) {
            tracing::warn!("{}", e);
            return banner();
        }
        if !self.provider.test_connection().await {
            return banner();
        }

        let models = self.provider.get_available_models().await;
        self.store.set_available_models(models.clone());
        ConnectionStatus::Connected { models }
    }

    pub async fn submit(&self, content: &str) -> Result<SubmitOutcome, ChatError> {
        self.submit_with(content, |_| {}).await
    }

    /// Send `content` in the active session (creating one if needed) and
    /// stream the answer into a placeholder message. `on_fragment` sees each
    /// fragment as it arrives.
    pub async fn submit_with<F>(
        &self,
        content: &str,
        mut on_fragment: F,
    ) -> Result<SubmitOutcome, ChatError>
    where
        F: FnMut(&str) + Send,
    {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::InvalidRequest("Message is empty".to_string()));
        }

        let token = self.begin()?;
        let mut guard = StreamGuard {
            controller: self,
            pending: None,
            partial: String::new(),
        };

        let settings = self.store.settings();
        self.provider.set_base_url(&settings.endpoint_url)?;

        if self.store.current_session().is_none() {
            self.store.create_session();
        }
        let session = self
            .store
            .current_session()
            .ok_or_else(|| ChatError::InvalidRequest("No active session".to_string()))?;
        let history = build_history(&settings.system_prompt, &session, content);

        self.store.append_message(content, Role::User, false);
        let message_id = self
            .store
            .append_message("", Role::Assistant, true)
            .ok_or_else(|| ChatError::InvalidRequest("No active session".to_string()))?;
        guard.pending = Some((session.id.clone(), message_id.clone()));

        let stats_store = self.store.clone();
        let on_stats: StatsCallback =
            Box::new(move |stats: StreamStats| stats_store.set_stats(stats));
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            opened = self.provider.stream_chat(&settings.current_model, history, Some(on_stats)) => {
                Some(opened)
            }
        };

        let mut stream = match opened {
            None => {
                guard.finalize("");
                return Ok(SubmitOutcome::Cancelled {
                    message_id,
                    partial: String::new(),
                });
            }
            Some(Err(error)) => {
                tracing::error!("Failed to start chat stream: {}", error);
                guard.finalize(config::FAILURE_NOTICE);
                return Ok(SubmitOutcome::Failed { message_id, error });
            }
            Some(Ok(stream)) => stream,
        };
        stream.set_cancel_token(token.clone());

        let result = loop {
            match stream.next().await {
                Some(Ok(fragment)) => {
                    guard.partial.push_str(&fragment);
                    on_fragment(&fragment);
                    self.store
                        .update_message_in(&session.id, &message_id, &guard.partial, true);
                }
                Some(Err(error)) => break Err(error),
                None => break Ok(()),
            }
        };

        let accumulated = std::mem::take(&mut guard.partial);
        match result {
            Err(error) => {
                tracing::error!("Chat stream interrupted: {}", error);
                guard.finalize(config::FAILURE_NOTICE);
                Ok(SubmitOutcome::Failed { message_id, error })
            }
            Ok(()) if token.is_cancelled() => {
                guard.finalize(&accumulated);
                Ok(SubmitOutcome::Cancelled {
                    message_id,
                    partial: accumulated,
                })
            }
            Ok(()) => {
                guard.finalize(&accumulated);
                Ok(SubmitOutcome::Completed {
                    message_id,
                    content: accumulated,
                    stats: stream.stats(),
                })
            }
        }
    }

    fn begin(&self) -> Result<CancellationToken, ChatError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.is_some() {
            return Err(ChatError::Busy);
        }
        let token = CancellationToken::new();
        *active = Some(token.clone());
        drop(active);
        self.store.set_loading(true);
        Ok(token)
    }
}

/// System prompt, then the finished turns of `session`, then the new input.
pub fn build_history(system_prompt: &str, session: &Session, content: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(session.messages.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(
        session
            .messages
            .iter()
            .filter(|m| !m.is_streaming)
            .map(|m| ChatMessage::new(ChatRole::from(m.role), m.content.clone())),
    );
    messages.push(ChatMessage::user(content));
    messages
}
