use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;

use super::database::Database;
use super::store::{ChatState, ChatStore};
use crate::models::{ConnectionSettings, Session};

pub const STORE_KEY: &str = "chat-store";

/// The single record written to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    pub sessions: Vec<Session>,
    pub current_session: Option<Session>,
    #[serde(alias = "ollamaUrl")]
    pub endpoint_url: String,
    pub available_models: Vec<String>,
    pub current_model: String,
    pub system_prompt: String,
    pub sidebar_open: bool,
}

impl Default for PersistedState {
    fn default() -> Self {
        PersistedState::from_state(&ChatState::default())
    }
}

impl PersistedState {
    pub fn from_state(state: &ChatState) -> Self {
        Self {
            sessions: state.sessions.clone(),
            current_session: state.current_session().cloned(),
            endpoint_url: state.settings.endpoint_url.clone(),
            available_models: state.settings.available_models.clone(),
            current_model: state.settings.current_model.clone(),
            system_prompt: state.settings.system_prompt.clone(),
            sidebar_open: state.sidebar_open,
        }
    }

    /// Rebuild live state. The active session is matched by id against the
    /// list, and any message still marked as streaming is finalized, since
    /// no stream survives a restart.
    pub fn into_state(self) -> ChatState {
        let mut sessions = self.sessions;
        let mut finalized = 0;
        for message in sessions.iter_mut().flat_map(|s| s.messages.iter_mut()) {
            if message.is_streaming {
                message.is_streaming = false;
                finalized += 1;
            }
        }
        if finalized > 0 {
            tracing::warn!("Finalized {} interrupted message(s) from a previous run", finalized);
        }

        let current_session_id = self
            .current_session
            .map(|s| s.id)
            .filter(|id| sessions.iter().any(|s| &s.id == id));

        ChatState {
            sessions,
            current_session_id,
            settings: ConnectionSettings {
                endpoint_url: self.endpoint_url,
                current_model: self.current_model,
                system_prompt: self.system_prompt,
                available_models: self.available_models,
            },
            sidebar_open: self.sidebar_open,
            ..ChatState::default()
        }
    }
}

pub struct PersistenceService;

impl PersistenceService {
    /// Missing or unreadable records fall back to defaults.
    pub async fn load(db: &Database) -> ChatState {
        match db.get_setting(STORE_KEY).await {
            Ok(Some(json)) => match serde_json::from_str::<PersistedState>(&json) {
                Ok(persisted) => persisted.into_state(),
                Err(e) => {
                    tracing::error!("Stored chat state is unreadable, starting fresh: {}", e);
                    ChatState::default()
                }
            },
            Ok(None) => ChatState::default(),
            Err(e) => {
                tracing::error!("Failed to load chat state: {}", e);
                ChatState::default()
            }
        }
    }

    pub async fn save(db: &Database, state: &ChatState) -> Result<()> {
        let json = serde_json::to_string(&PersistedState::from_state(state))
            .context("Failed to serialize chat state")?;
        db.set_setting(STORE_KEY, &json).await
    }
}

/// Write the store to `db` after every persisted mutation. Bursts of events
/// (one per streamed fragment) are coalesced into a single write.
pub fn spawn_autosave(store: ChatStore, db: Database) -> JoinHandle<()> {
    let mut rx = store.subscribe();
    tokio::spawn(async move {
        loop {
            let mut dirty = match rx.recv().await {
                Ok(event) => event.is_persisted(),
                Err(RecvError::Lagged(_)) => true,
                Err(RecvError::Closed) => break,
            };

            loop {
                match rx.try_recv() {
                    Ok(event) => dirty |= event.is_persisted(),
                    Err(TryRecvError::Lagged(_)) => dirty = true,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }

            if dirty {
                if let Err(e) = PersistenceService::save(&db, &store.snapshot()).await {
                    tracing::error!("Failed to save chat state: {:#}", e);
                }
            }
        }
    })
}
