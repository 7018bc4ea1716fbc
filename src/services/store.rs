//! In-memory conversation store. Single source of truth for sessions,
//! messages and connection settings.
//!
//! The active session is tracked by id into the session list, so the list and
//! the active pointer can never disagree. Every mutation takes the write lock
//! once and broadcasts a [`StoreEvent`] after releasing it.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tokio::sync::broadcast;

use crate::models::{derive_title, ConnectionSettings, Message, Role, Session, StreamStats};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    SessionsChanged,
    MessageUpdated {
        session_id: String,
        message_id: String,
    },
    SettingsChanged,
    SidebarToggled(bool),
    StatsChanged,
    LoadingChanged(bool),
}

impl StoreEvent {
    /// Whether the event touched a field that is written to storage.
    pub fn is_persisted(&self) -> bool {
        !matches!(self, StoreEvent::StatsChanged | StoreEvent::LoadingChanged(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatState {
    /// Most recent first.
    pub sessions: Vec<Session>,
    pub current_session_id: Option<String>,
    pub settings: ConnectionSettings,
    pub sidebar_open: bool,
    pub is_loading: bool,
    pub last_stats: Option<StreamStats>,
}

impl Default for ChatState {
    fn default() -> Self {
        Self {
            sessions: Vec::new(),
            current_session_id: None,
            settings: ConnectionSettings::default(),
            sidebar_open: true,
            is_loading: false,
            last_stats: None,
        }
    }
}

impl ChatState {
    pub fn current_session(&self) -> Option<&Session> {
        let id = self.current_session_id.as_deref()?;
        self.sessions.iter().find(|s| s.id == id)
    }

    fn session_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }
}

#[derive(Debug, Clone)]
pub struct ChatStore {
    state: Arc<RwLock<ChatState>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new(ChatState::default())
    }
}

impl ChatStore {
    pub fn new(state: ChatState) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(state)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn read(&self) -> RwLockReadGuard<'_, ChatState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ChatState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // --- Reads ---

    pub fn snapshot(&self) -> ChatState {
        self.read().clone()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.read().sessions.clone()
    }

    pub fn session(&self, id: &str) -> Option<Session> {
        self.read().sessions.iter().find(|s| s.id == id).cloned()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.read().current_session().cloned()
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.read().current_session_id.clone()
    }

    pub fn settings(&self) -> ConnectionSettings {
        self.read().settings.clone()
    }

    pub fn last_stats(&self) -> Option<StreamStats> {
        self.read().last_stats
    }

    pub fn is_loading(&self) -> bool {
        self.read().is_loading
    }

    pub fn sidebar_open(&self) -> bool {
        self.read().sidebar_open
    }

    // --- Sessions ---

    /// Start an empty session with the current model and system prompt and
    /// make it active. Returns its id.
    pub fn create_session(&self) -> String {
        let id = {
            let mut state = self.write();
            let session = Session::new(
                state.settings.current_model.clone(),
                state.settings.system_prompt.clone(),
            );
            let id = session.id.clone();
            state.sessions.insert(0, session);
            state.current_session_id = Some(id.clone());
            id
        };
        self.notify(StoreEvent::SessionsChanged);
        id
    }

    /// Switch the active session. Unknown ids are ignored.
    pub fn set_active_session(&self, id: &str) -> bool {
        let switched = {
            let mut state = self.write();
            if state.sessions.iter().any(|s| s.id == id) {
                state.current_session_id = Some(id.to_string());
                true
            } else {
                false
            }
        };
        if switched {
            self.notify(StoreEvent::SessionsChanged);
        }
        switched
    }

    pub fn delete_session(&self, id: &str) {
        let removed = {
            let mut state = self.write();
            let before = state.sessions.len();
            state.sessions.retain(|s| s.id != id);
            if state.current_session_id.as_deref() == Some(id) {
                state.current_session_id = None;
            }
            state.sessions.len() != before
        };
        if removed {
            self.notify(StoreEvent::SessionsChanged);
        }
    }

    /// Blank titles are ignored; others are trimmed.
    pub fn rename_session(&self, id: &str, title: &str) -> bool {
        let title = title.trim();
        if title.is_empty() {
            return false;
        }

        let renamed = {
            let mut state = self.write();
            match state.session_mut(id) {
                Some(session) => {
                    session.title = title.to_string();
                    true
                }
                None => false,
            }
        };
        if renamed {
            self.notify(StoreEvent::SessionsChanged);
        }
        renamed
    }

    pub fn clear_all_sessions(&self) {
        {
            let mut state = self.write();
            state.sessions.clear();
            state.current_session_id = None;
        }
        self.notify(StoreEvent::SessionsChanged);
    }

    // --- Messages ---

    /// Append to the active session. Returns `None` when no session is active.
    /// The first message of a session also sets its title.
    pub fn append_message(&self, content: &str, role: Role, is_streaming: bool) -> Option<String> {
        let (session_id, message_id) = {
            let mut state = self.write();
            let current = state.current_session_id.clone()?;
            let session = state.session_mut(&current)?;

            let message = Message::new(role, content, is_streaming);
            let message_id = message.id.clone();
            if session.messages.is_empty() {
                session.title = derive_title(content);
            }
            session.messages.push(message);
            session.updated_at = Utc::now();
            (current, message_id)
        };

        self.notify(StoreEvent::MessageUpdated {
            session_id,
            message_id: message_id.clone(),
        });
        Some(message_id)
    }

    /// Replace the content of a streaming message in the active session.
    /// `content` is the full text so far, not a delta.
    pub fn update_message(&self, id: &str, content: &str, is_streaming: bool) -> bool {
        match self.current_session_id() {
            Some(session_id) => self.update_message_in(&session_id, id, content, is_streaming),
            None => false,
        }
    }

    /// Same as [`ChatStore::update_message`], addressed to a specific session
    /// so a stream keeps writing to its own session after the user switches.
    /// Finalized messages (`is_streaming == false`) are never modified.
    pub fn update_message_in(
        &self,
        session_id: &str,
        id: &str,
        content: &str,
        is_streaming: bool,
    ) -> bool {
        let updated = {
            let mut state = self.write();
            let Some(session) = state.session_mut(session_id) else {
                return false;
            };
            let Some(message) = session.messages.iter_mut().find(|m| m.id == id) else {
                return false;
            };
            if !message.is_streaming {
                tracing::debug!("Ignoring update to finalized message {}", id);
                false
            } else {
                message.content = content.to_string();
                message.is_streaming = is_streaming;
                session.updated_at = Utc::now();
                true
            }
        };

        if updated {
            self.notify(StoreEvent::MessageUpdated {
                session_id: session_id.to_string(),
                message_id: id.to_string(),
            });
        }
        updated
    }

    // --- Settings ---

    pub fn set_endpoint_url(&self, url: &str) {
        self.write().settings.endpoint_url = url.trim().trim_end_matches('/').to_string();
        self.notify(StoreEvent::SettingsChanged);
    }

    pub fn set_current_model(&self, model: &str) {
        self.write().settings.current_model = model.to_string();
        self.notify(StoreEvent::SettingsChanged);
    }

    pub fn set_system_prompt(&self, prompt: &str) {
        self.write().settings.system_prompt = prompt.to_string();
        self.notify(StoreEvent::SettingsChanged);
    }

    pub fn set_available_models(&self, models: Vec<String>) {
        self.write().settings.available_models = models;
        self.notify(StoreEvent::SettingsChanged);
    }

    pub fn toggle_sidebar(&self) -> bool {
        let open = {
            let mut state = self.write();
            state.sidebar_open = !state.sidebar_open;
            state.sidebar_open
        };
        self.notify(StoreEvent::SidebarToggled(open));
        open
    }

    pub fn set_stats(&self, stats: StreamStats) {
        self.write().last_stats = Some(stats);
        self.notify(StoreEvent::StatsChanged);
    }

    pub fn set_loading(&self, loading: bool) {
        self.write().is_loading = loading;
        self.notify(StoreEvent::LoadingChanged(loading));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_session_prepends_and_activates() {
        let store = ChatStore::default();
        let first = store.create_session();
        let second = store.create_session();

        let sessions = store.sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, second);
        assert_eq!(sessions[1].id, first);
        assert_eq!(store.current_session_id().as_deref(), Some(second.as_str()));
    }

    #[test]
    fn new_session_uses_current_settings() {
        let store = ChatStore::default();
        store.set_current_model("llama3.2");
        store.set_system_prompt("Be terse.");
        store.create_session();

        let session = store.current_session().unwrap();
        assert_eq!(session.model, "llama3.2");
        assert_eq!(session.system_prompt, "Be terse.");
        assert_eq!(session.title, "New Chat");
        assert!(session.messages.is_empty());
    }

    #[test]
    fn set_active_session_ignores_unknown_id() {
        let store = ChatStore::default();
        let id = store.create_session();
        assert!(!store.set_active_session("missing"));
        assert_eq!(store.current_session_id(), Some(id));
    }

    #[test]
    fn append_without_active_session_returns_none() {
        let store = ChatStore::default();
        assert!(store.append_message("hello", Role::User, false).is_none());
    }

    #[test]
    fn first_message_sets_title() {
        let store = ChatStore::default();
        store.create_session();
        store.append_message("hello world", Role::User, false).unwrap();
        assert_eq!(store.current_session().unwrap().title, "hello world");

        store.append_message("second message", Role::User, false).unwrap();
        assert_eq!(store.current_session().unwrap().title, "hello world");
    }

    #[test]
    fn long_first_message_is_truncated_in_title() {
        let store = ChatStore::default();
        store.create_session();
        let text = "x".repeat(60);
        store.append_message(&text, Role::User, false).unwrap();
        assert_eq!(
            store.current_session().unwrap().title,
            format!("{}...", "x".repeat(50))
        );
    }

    #[test]
    fn messages_keep_insertion_order_and_bump_updated_at() {
        let store = ChatStore::default();
        store.create_session();
        let before = store.current_session().unwrap().updated_at;

        let a = store.append_message("a", Role::User, false).unwrap();
        let b = store.append_message("", Role::Assistant, true).unwrap();

        let session = store.current_session().unwrap();
        let ids: Vec<_> = session.messages.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec![a, b]);
        assert!(session.updated_at >= before);
        assert!(session.messages[1].is_streaming);
    }

    fn age_session(store: &ChatStore, id: &str) -> chrono::DateTime<Utc> {
        let old = Utc::now() - chrono::Duration::hours(1);
        store.write().session_mut(id).unwrap().updated_at = old;
        old
    }

    #[test]
    fn every_message_change_refreshes_updated_at() {
        let store = ChatStore::default();
        let session_id = store.create_session();

        let old = age_session(&store, &session_id);
        let id = store.append_message("", Role::Assistant, true).unwrap();
        assert!(store.session(&session_id).unwrap().updated_at > old);

        let old = age_session(&store, &session_id);
        assert!(store.update_message(&id, "partial", true));
        assert!(store.session(&session_id).unwrap().updated_at > old);

        let old = age_session(&store, &session_id);
        assert!(store.update_message_in(&session_id, &id, "done", false));
        assert!(store.session(&session_id).unwrap().updated_at > old);

        let old = age_session(&store, &session_id);
        assert!(!store.update_message_in(&session_id, &id, "rewritten", false));
        let session = store.session(&session_id).unwrap();
        assert_eq!(session.updated_at, old);
        assert_eq!(session.messages[0].content, "done");
    }

    #[test]
    fn update_replaces_rather_than_appends() {
        let store = ChatStore::default();
        store.create_session();
        let id = store.append_message("", Role::Assistant, true).unwrap();

        assert!(store.update_message(&id, "a", true));
        assert!(store.update_message(&id, "ab", true));

        let session = store.current_session().unwrap();
        assert_eq!(session.message(&id).unwrap().content, "ab");
    }

    #[test]
    fn finalized_message_is_immutable() {
        let store = ChatStore::default();
        store.create_session();
        let id = store.append_message("", Role::Assistant, true).unwrap();

        assert!(store.update_message(&id, "done", false));
        assert!(!store.update_message(&id, "changed", true));

        let message = store.current_session().unwrap().message(&id).cloned().unwrap();
        assert_eq!(message.content, "done");
        assert!(!message.is_streaming);
    }

    #[test]
    fn update_unknown_message_is_noop() {
        let store = ChatStore::default();
        store.create_session();
        assert!(!store.update_message("nope", "x", false));
    }

    #[test]
    fn update_in_reaches_inactive_session() {
        let store = ChatStore::default();
        let first = store.create_session();
        let id = store.append_message("", Role::Assistant, true).unwrap();
        store.create_session();

        assert!(!store.update_message(&id, "lost", false));
        assert!(store.update_message_in(&first, &id, "kept", false));
        assert_eq!(store.session(&first).unwrap().messages[0].content, "kept");
    }

    #[test]
    fn deleting_active_session_clears_pointer() {
        let store = ChatStore::default();
        let id = store.create_session();
        store.delete_session(&id);
        assert!(store.current_session_id().is_none());
        assert!(store.sessions().is_empty());
    }

    #[test]
    fn deleting_other_session_keeps_pointer() {
        let store = ChatStore::default();
        let other = store.create_session();
        let active = store.create_session();
        store.delete_session(&other);
        assert_eq!(store.current_session_id(), Some(active));
        assert_eq!(store.sessions().len(), 1);
    }

    #[test]
    fn rename_trims_and_ignores_blank() {
        let store = ChatStore::default();
        let id = store.create_session();
        assert!(store.rename_session(&id, "  My chat  "));
        assert!(!store.rename_session(&id, "   "));
        assert_eq!(store.current_session().unwrap().title, "My chat");
        assert_eq!(store.sessions()[0].title, "My chat");
    }

    #[test]
    fn renamed_title_survives_later_messages() {
        let store = ChatStore::default();
        let id = store.create_session();
        store.rename_session(&id, "Pinned name");
        store.append_message("first", Role::User, false);
        // The first message of an empty session still derives the title.
        assert_eq!(store.current_session().unwrap().title, "first");
        store.rename_session(&id, "Pinned name");
        store.append_message("second", Role::User, false);
        assert_eq!(store.current_session().unwrap().title, "Pinned name");
    }

    #[test]
    fn clear_all_sessions_resets_everything() {
        let store = ChatStore::default();
        store.create_session();
        store.create_session();
        store.clear_all_sessions();
        assert!(store.sessions().is_empty());
        assert!(store.current_session().is_none());
    }

    #[test]
    fn settings_and_stats_are_updated() {
        let store = ChatStore::default();
        store.set_endpoint_url("http://10.0.0.2:11434/");
        store.set_available_models(vec!["a".into(), "b".into()]);
        let stats = StreamStats::compute(4, std::time::Duration::from_millis(2000));
        store.set_stats(stats);

        let settings = store.settings();
        assert_eq!(settings.endpoint_url, "http://10.0.0.2:11434");
        assert_eq!(settings.available_models, vec!["a", "b"]);
        assert_eq!(store.last_stats(), Some(stats));
        assert!(store.sidebar_open());
        assert!(!store.toggle_sidebar());
    }

    #[tokio::test]
    async fn mutations_are_broadcast() {
        let store = ChatStore::default();
        let mut rx = store.subscribe();

        let session_id = store.create_session();
        let message_id = store.append_message("hi", Role::User, false).unwrap();
        store.set_loading(true);

        assert_eq!(rx.recv().await.unwrap(), StoreEvent::SessionsChanged);
        assert_eq!(
            rx.recv().await.unwrap(),
            StoreEvent::MessageUpdated {
                session_id,
                message_id
            }
        );
        let loading = rx.recv().await.unwrap();
        assert_eq!(loading, StoreEvent::LoadingChanged(true));
        assert!(!loading.is_persisted());
    }
}
