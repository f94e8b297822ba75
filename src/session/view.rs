use chrono::Local;

use crate::types::{ChatEntry, MessageKind, RosterEntry};

/// Banner printed when the transcript is redrawn from relay history.
pub const CHANNEL_BANNER: &str = "Welcome to #general! This is the start of the #general channel.";

/// Everything the renderer needs to know, already formatted. The session
/// controller emits these; the console prints them and tests assert on them.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    TranscriptReset { banner: String, lines: Vec<String> },
    MessageAppended { line: String },
    RosterReplaced { lines: Vec<String> },
    Notice { line: String },
    ControlsChanged {
        microphone_live: bool,
        deafened: bool,
        screen_sharing: bool,
    },
    TileAdded { label: String },
    TileRemoved { label: String },
    GridVisible(bool),
    Shutdown,
}

/// Text-only rendering path for remote strings: control characters (newlines,
/// ANSI escape introducers, C1 controls) are replaced so remote content can
/// never steer the terminal.
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Local time label in the relay's own format.
pub fn now_label() -> String {
    Local::now().format("%I:%M %p").to_string()
}

pub fn render_entry(index: usize, entry: &ChatEntry) -> String {
    let time = entry
        .time
        .as_deref()
        .map(|t| format!("[{}] ", sanitize(t)))
        .unwrap_or_default();
    let sender = sanitize(entry.sender.as_deref().unwrap_or("unknown"));

    match entry.kind {
        MessageKind::System => format!("• {}", sanitize(&entry.content)),
        MessageKind::Text => format!("{}{}: {}", time, sender, sanitize(&entry.content)),
        MessageKind::Image => format!(
            "{}{} sent an image (/save {} <path> to keep it)",
            time, sender, index
        ),
        MessageKind::File => format!(
            "{}{} sent a file: {} (/save {} <path> to keep it)",
            time,
            sender,
            sanitize(entry.file_name.as_deref().unwrap_or("unnamed")),
            index
        ),
    }
}

pub fn render_roster(entries: &[RosterEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let marker = if entry.is_self { " (you)" } else { "" };
            format!(
                "[{}] {}{}",
                sanitize(&entry.initial()),
                sanitize(&entry.username),
                marker
            )
        })
        .collect()
}

pub fn notice(text: impl AsRef<str>) -> ViewEvent {
    ViewEvent::Notice {
        line: format!("[{}] * {}", now_label(), text.as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_terminal_control_input() {
        let sneaky = "hi\x1b[2Jthere\r\nfriend";
        let clean = sanitize(sneaky);
        assert!(!clean.contains('\x1b'));
        assert!(!clean.contains('\r'));
        assert!(!clean.contains('\n'));
        assert_eq!(clean, "hi [2Jthere  friend");
    }

    #[test]
    fn renders_each_message_kind() {
        let text = ChatEntry {
            kind: MessageKind::Text,
            sender: Some("alice".to_string()),
            time: Some("07:45 PM".to_string()),
            content: "hello".to_string(),
            file_name: None,
        };
        assert_eq!(render_entry(0, &text), "[07:45 PM] alice: hello");

        let image = ChatEntry {
            kind: MessageKind::Image,
            sender: Some("bob".to_string()),
            time: None,
            content: "data:image/png;base64,AAAA".to_string(),
            file_name: None,
        };
        let line = render_entry(3, &image);
        assert!(line.contains("bob sent an image"));
        assert!(line.contains("/save 3"));
        // The payload itself never hits the screen.
        assert!(!line.contains("base64"));

        let system = ChatEntry::system("🟢 carol joined", Some("07:46 PM".to_string()));
        assert_eq!(render_entry(5, &system), "• 🟢 carol joined");
    }

    #[test]
    fn roster_lines_mark_the_local_user() {
        let entries = vec![
            RosterEntry {
                sid: "s1".to_string(),
                username: "alice".to_string(),
                is_self: true,
            },
            RosterEntry {
                sid: "s2".to_string(),
                username: "bob".to_string(),
                is_self: false,
            },
        ];
        assert_eq!(
            render_roster(&entries),
            vec!["[A] alice (you)".to_string(), "[B] bob".to_string()]
        );
    }
}
