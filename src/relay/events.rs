use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{ChatEntry, ConnectionId, MessageKind};

/// Events the client emits to the relay. One JSON object per text frame,
/// `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Register { username: String },
    ChatMessage(OutgoingMessage),
    VoiceSignal(SignalOut),
}

/// Events the relay delivers to the client, in delivery order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Message(WireMessage),
    History(Vec<WireMessage>),
    UpdateUsers(Vec<WireUser>),
    UserJoined { sid: ConnectionId, username: String },
    UserLeft {
        sid: ConnectionId,
        #[serde(default)]
        username: Option<String>,
    },
    VoiceSignal(SignalIn),
}

/// Chat message as the relay broadcasts it. System notices composed by the
/// relay carry their body under `text` rather than `content`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, alias = "text", skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, rename = "fileName", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<ConnectionId>,
}

impl From<WireMessage> for ChatEntry {
    fn from(m: WireMessage) -> Self {
        ChatEntry {
            kind: m.kind,
            sender: m.sender,
            time: m.time,
            content: m.content.unwrap_or_default(),
            file_name: m.file_name,
        }
    }
}

/// Outgoing chat payload; the relay stamps sender, sid and time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutgoingMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    #[serde(default, rename = "fileName", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            content: content.into(),
            file_name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireUser {
    pub sid: ConnectionId,
    pub username: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

/// Signaling payload addressed to one peer; `payload` is passed through
/// untouched ({type, sdp} for descriptions, a candidate-init object for
/// candidates).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalOut {
    pub target: ConnectionId,
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub payload: Value,
}

impl SignalOut {
    pub fn offer(target: ConnectionId, sdp: String) -> Self {
        Self {
            target,
            kind: SignalKind::Offer,
            payload: json!({ "type": "offer", "sdp": sdp }),
        }
    }

    pub fn answer(target: ConnectionId, sdp: String) -> Self {
        Self {
            target,
            kind: SignalKind::Answer,
            payload: json!({ "type": "answer", "sdp": sdp }),
        }
    }

    pub fn candidate(target: ConnectionId, payload: Value) -> Self {
        Self {
            target,
            kind: SignalKind::IceCandidate,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalIn {
    pub sender_sid: ConnectionId,
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub payload: Value,
}

impl SignalIn {
    /// SDP body of an offer/answer payload.
    pub fn sdp(&self) -> Option<&str> {
        self.payload.get("sdp").and_then(Value::as_str)
    }
}
