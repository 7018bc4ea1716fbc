pub mod chat;
pub mod database;
pub mod export;
pub mod persistence;
pub mod store;

pub use chat::{ChatController, ConnectionStatus, SubmitOutcome};
pub use database::Database;
pub use persistence::{spawn_autosave, PersistenceService};
pub use store::{ChatState, ChatStore, StoreEvent};
