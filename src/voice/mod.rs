pub mod manager;
pub mod peer;
pub mod sinks;

pub use manager::{EngineEvent, VoicePeerManager};
pub use peer::{NegotiationRole, PeerPhase, VoicePeer};
pub use sinks::{RemoteSink, SinkKind, SinkRegistry};
