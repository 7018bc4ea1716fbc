mod client;
pub mod frame;
mod models;
pub mod stream;

pub use client::OllamaClient;
pub use frame::LineDecoder;
pub use stream::{ChatStream, StatsCallback};
