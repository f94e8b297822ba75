use std::path::PathBuf;

use log::debug;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::session::{Command, ViewEvent};

const HELP: &str =
    "commands: /who /mute /deafen /share /image <path> /file <path> /save <n> <path> /quit";

/// Maps one console line to a session command. Anything that does not start
/// with `/` is sent as chat text; unknown or incomplete commands map to
/// nothing and the caller shows usage.
pub fn parse_line(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if !line.starts_with('/') {
        return Some(Command::SendText(line.to_string()));
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    match head {
        "/who" => Some(Command::ShowRoster),
        "/mute" => Some(Command::ToggleMute),
        "/deafen" => Some(Command::ToggleDeafen),
        "/share" => Some(Command::ToggleScreenShare),
        "/quit" => Some(Command::Quit),
        "/image" if !rest.is_empty() => Some(Command::SendImage(PathBuf::from(rest))),
        "/file" if !rest.is_empty() => Some(Command::SendFile(PathBuf::from(rest))),
        "/save" => {
            let (index, path) = rest.split_once(char::is_whitespace)?;
            let index = index.parse().ok()?;
            Some(Command::SaveAttachment {
                index,
                path: PathBuf::from(path.trim()),
            })
        }
        _ => None,
    }
}

/// Feeds stdin lines into the session. EOF (ctrl-d) ends the session the
/// same way `/quit` does.
pub fn spawn_input(commands: mpsc::Sender<Command>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_line(&line) {
                    Some(command) => {
                        if commands.send(command).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        if !line.trim().is_empty() {
                            println!("{}", HELP);
                        }
                    }
                },
                Ok(None) | Err(_) => {
                    let _ = commands.send(Command::Quit).await;
                    break;
                }
            }
        }
    })
}

/// Prints view events until the controller shuts down.
pub async fn render(mut view: mpsc::UnboundedReceiver<ViewEvent>) {
    while let Some(event) = view.recv().await {
        match event {
            ViewEvent::TranscriptReset { banner, lines } => {
                println!("{}", banner);
                for line in lines {
                    println!("{}", line);
                }
            }
            ViewEvent::MessageAppended { line } => println!("{}", line),
            ViewEvent::RosterReplaced { lines } => {
                println!("participants ({}):", lines.len());
                for line in lines {
                    println!("  {}", line);
                }
            }
            ViewEvent::Notice { line } => println!("{}", line),
            ViewEvent::ControlsChanged {
                microphone_live,
                deafened,
                screen_sharing,
            } => {
                println!(
                    "* mic {} | sound {} | screen {}",
                    if microphone_live { "live" } else { "muted" },
                    if deafened { "off" } else { "on" },
                    if screen_sharing { "sharing" } else { "idle" },
                );
            }
            ViewEvent::TileAdded { label } => println!("* video tile added: {}", label),
            ViewEvent::TileRemoved { label } => println!("* video tile removed: {}", label),
            ViewEvent::GridVisible(visible) => debug!("Video grid visible: {}", visible),
            ViewEvent::Shutdown => break,
        }
    }
}
