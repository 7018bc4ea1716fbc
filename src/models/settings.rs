use serde::{Deserialize, Serialize};

use crate::config;

/// Connection and model settings. Read fresh on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSettings {
    pub endpoint_url: String,
    pub current_model: String,
    pub system_prompt: String,
    pub available_models: Vec<String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            endpoint_url: config::DEFAULT_ENDPOINT.to_string(),
            current_model: config::DEFAULT_MODEL.to_string(),
            system_prompt: config::DEFAULT_SYSTEM_PROMPT.to_string(),
            available_models: vec![config::DEFAULT_MODEL.to_string()],
        }
    }
}
