pub mod client;
pub mod events;

pub use client::{RelayClient, RelayHandle, RelayStatus, RelayUpdate};
pub use events::{ClientEvent, ServerEvent};
