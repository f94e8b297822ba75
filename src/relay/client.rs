use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::relay::events::{ClientEvent, ServerEvent};
use crate::utils::{Error, Result};

/// Connection status surfaced alongside decoded events.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayStatus {
    /// Connection established; `reconnected` is true after a retry, in which
    /// case the session must register again.
    Connected { reconnected: bool },
    Reconnecting { attempt: u32 },
    /// Retry budget exhausted; no further events will arrive.
    Gone,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayUpdate {
    Status(RelayStatus),
    Event(ServerEvent),
}

/// WebSocket client for the chat relay. Owns the connection lifecycle,
/// including bounded reconnection; the session controller only sees
/// `RelayUpdate`s and a send handle.
pub struct RelayClient {
    url: String,
    retry_attempts: u32,
    retry_delay: Duration,
}

#[derive(Clone)]
pub struct RelayHandle {
    outgoing: mpsc::Sender<ClientEvent>,
}

impl RelayHandle {
    pub async fn send(&self, event: ClientEvent) -> Result<()> {
        self.outgoing
            .send(event)
            .await
            .map_err(|_| Error::Relay("relay task is gone".to_string()))
    }

    /// Handle wired to a bare channel, for session tests that assert on
    /// outbound traffic without a live socket.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<ClientEvent>) {
        let (outgoing, rx) = mpsc::channel(64);
        (Self { outgoing }, rx)
    }
}

impl RelayClient {
    pub fn new(url: impl Into<String>, retry_attempts: u32, retry_delay_ms: u64) -> Self {
        Self {
            url: url.into(),
            retry_attempts,
            retry_delay: Duration::from_millis(retry_delay_ms),
        }
    }

    /// Starts the relay task. Dropping the returned handle (and any clones)
    /// closes the connection; dropping the receiver abandons the session.
    pub fn spawn(self) -> (RelayHandle, mpsc::UnboundedReceiver<RelayUpdate>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(64);
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        tokio::spawn(self.run(outgoing_rx, update_tx));

        (
            RelayHandle {
                outgoing: outgoing_tx,
            },
            update_rx,
        )
    }

    async fn run(
        self,
        mut outgoing: mpsc::Receiver<ClientEvent>,
        updates: mpsc::UnboundedSender<RelayUpdate>,
    ) {
        let mut attempt: u32 = 0;
        let mut connected_before = false;

        loop {
            let ws_stream = match connect_async(&self.url).await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!("Failed to connect to relay at {}: {}", self.url, e);
                    attempt += 1;
                    if attempt > self.retry_attempts {
                        let _ = updates.send(RelayUpdate::Status(RelayStatus::Gone));
                        return;
                    }
                    let _ =
                        updates.send(RelayUpdate::Status(RelayStatus::Reconnecting { attempt }));
                    tokio::time::sleep(self.retry_delay).await;
                    continue;
                }
            };

            info!("Connected to relay at {}", self.url);
            attempt = 0;
            let _ = updates.send(RelayUpdate::Status(RelayStatus::Connected {
                reconnected: connected_before,
            }));
            connected_before = true;

            let (mut sink, mut stream) = ws_stream.split();
            let closed_locally = loop {
                tokio::select! {
                    incoming = stream.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            metrics::increment_counter!("relay.frames_received");
                            match serde_json::from_str::<ServerEvent>(&text) {
                                Ok(event) => {
                                    if updates.send(RelayUpdate::Event(event)).is_err() {
                                        break true;
                                    }
                                }
                                Err(e) => {
                                    warn!("Dropping undecodable relay frame: {}", e);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if sink.send(Message::Pong(data)).await.is_err() {
                                break false;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Relay closed the connection");
                            break false;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Relay read error: {}", e);
                            break false;
                        }
                    },
                    event = outgoing.recv() => match event {
                        Some(event) => {
                            let text = match serde_json::to_string(&event) {
                                Ok(text) => text,
                                Err(e) => {
                                    warn!("Failed to encode outgoing event: {}", e);
                                    continue;
                                }
                            };
                            debug!("-> relay: {}", text);
                            metrics::increment_counter!("relay.frames_sent");
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                warn!("Relay write error: {}", e);
                                break false;
                            }
                        }
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break true;
                        }
                    },
                }
            };

            if closed_locally {
                return;
            }

            attempt += 1;
            if attempt > self.retry_attempts {
                let _ = updates.send(RelayUpdate::Status(RelayStatus::Gone));
                return;
            }
            metrics::increment_counter!("relay.reconnects");
            let _ = updates.send(RelayUpdate::Status(RelayStatus::Reconnecting { attempt }));
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}
