pub mod message;
pub mod session;
pub mod settings;
pub mod stats;

pub use message::{Message, Role};
pub use session::{derive_title, Session};
pub use settings::ConnectionSettings;
pub use stats::StreamStats;
