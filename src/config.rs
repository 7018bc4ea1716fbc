pub const APP_ID: &str = "ollama-chat";

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "deepseek-r1:1.5b";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert AI code assistant. Help users with programming questions, code review, debugging, and technical explanations. Provide clear, concise, and accurate responses.";

/// Replaces the placeholder answer when a stream fails.
pub const FAILURE_NOTICE: &str = "Sorry, I encountered an error while processing your request. Please make sure Ollama is running and the model is available.";

/// Longest line the frame decoder buffers before discarding it.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub const ENV_ENDPOINT: &str = "OLLAMA_CHAT_URL";
pub const ENV_MODEL: &str = "OLLAMA_CHAT_MODEL";
pub const ENV_DB_PATH: &str = "OLLAMA_CHAT_DB";

pub fn connection_banner(endpoint: &str) -> String {
    format!("Cannot connect to Ollama. Make sure it's running on {}", endpoint)
}

/// Environment overrides, applied on top of persisted state at startup.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub endpoint_url: Option<String>,
    pub model: Option<String>,
    pub db_path: Option<std::path::PathBuf>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let read = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            endpoint_url: read(ENV_ENDPOINT),
            model: read(ENV_MODEL),
            db_path: read(ENV_DB_PATH).map(std::path::PathBuf::from),
        }
    }
}
