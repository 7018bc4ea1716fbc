pub mod ollama;
pub mod traits;
pub mod types;

pub use ollama::{ChatStream, LineDecoder, OllamaClient};
pub use traits::ChatProvider;
pub use types::{ChatError, ChatMessage, ChatResponse, ChatRole};
