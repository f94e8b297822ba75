pub mod attachment;
pub mod config;
pub mod console;
pub mod media;
pub mod relay;
pub mod session;
pub mod types;
pub mod utils;
pub mod voice;

// Re-export main types for convenience
pub use config::ClientConfig;
pub use relay::{RelayClient, RelayHandle};
pub use session::{Command, SessionController, ViewEvent};
pub use utils::{Error, Result};
pub use voice::VoicePeerManager;
