// src/types.rs
use serde::{Deserialize, Serialize};

/// Relay-assigned connection identifier ("sid" on the wire).
pub type ConnectionId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    System,
}

/// One transcript entry, normalized from the wire shape. Immutable once
/// received; the transcript is the only place it lives.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEntry {
    pub kind: MessageKind,
    pub sender: Option<String>,
    pub time: Option<String>,
    pub content: String,
    pub file_name: Option<String>,
}

impl ChatEntry {
    pub fn system(content: impl Into<String>, time: Option<String>) -> Self {
        Self {
            kind: MessageKind::System,
            sender: None,
            time,
            content: content.into(),
            file_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub sid: ConnectionId,
    pub username: String,
    pub is_self: bool,
}

impl RosterEntry {
    /// Avatar initial shown next to the name.
    pub fn initial(&self) -> String {
        self.username
            .chars()
            .next()
            .map(|c| c.to_uppercase().to_string())
            .unwrap_or_default()
    }
}
