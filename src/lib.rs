//! Streaming chat client for a local Ollama server.
//!
//! [`providers::OllamaClient`] speaks the NDJSON chat protocol and hands out
//! [`providers::ChatStream`] cursors. [`services::ChatStore`] owns sessions and
//! messages; [`services::ChatController`] is the only code that writes streamed
//! text into it.

pub mod config;
pub mod models;
pub mod providers;
pub mod services;
