use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use webrtc::track::track_local::TrackLocal;

use crate::attachment;
use crate::config::ClientConfig;
use crate::media::{LocalAudioTrack, MediaSource, MediaState, ScreenCapture};
use crate::relay::events::{ClientEvent, OutgoingMessage, ServerEvent, SignalIn, SignalKind, SignalOut};
use crate::relay::{RelayHandle, RelayStatus, RelayUpdate};
use crate::session::roster::Roster;
use crate::session::transcript::Transcript;
use crate::session::view::{self, ViewEvent, CHANNEL_BANNER};
use crate::types::{ChatEntry, MessageKind};
use crate::utils::{Error, Result};
use crate::voice::{
    EngineEvent, NegotiationRole, PeerPhase, RemoteSink, SinkKind, SinkRegistry, VoicePeerManager,
};

const LOCAL_PREVIEW_LABEL: &str = "My Screen";
const REMOTE_SCREEN_LABEL: &str = "User Screen";

/// Commands from the console (or an embedder) into the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SendText(String),
    SendImage(PathBuf),
    SendFile(PathBuf),
    SaveAttachment { index: usize, path: PathBuf },
    ToggleMute,
    ToggleDeafen,
    ToggleScreenShare,
    /// Capture ended on its own (window closed, permission revoked).
    StopScreenShare,
    ShowRoster,
    Quit,
}

/// The session loop. Everything mutable lives here and is touched from this
/// one task only: relay updates, console commands and WebRTC engine events
/// are applied strictly in arrival order, so no handler ever observes
/// another handler half-done.
pub struct SessionController {
    config: ClientConfig,
    username: String,
    relay: RelayHandle,
    relay_rx: mpsc::UnboundedReceiver<RelayUpdate>,
    commands: mpsc::Receiver<Command>,
    command_tx: mpsc::Sender<Command>,
    engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    view: mpsc::UnboundedSender<ViewEvent>,
    source: Arc<dyn MediaSource>,
    peers: VoicePeerManager,
    sinks: Arc<SinkRegistry>,
    transcript: Transcript,
    roster: Roster,
    media: MediaState,
    microphone: Option<LocalAudioTrack>,
    screen: Option<ScreenCapture>,
}

impl SessionController {
    pub fn new(
        config: ClientConfig,
        username: String,
        relay: RelayHandle,
        relay_rx: mpsc::UnboundedReceiver<RelayUpdate>,
        source: Arc<dyn MediaSource>,
    ) -> (Self, mpsc::Sender<Command>, mpsc::UnboundedReceiver<ViewEvent>) {
        let (command_tx, commands) = mpsc::channel(32);
        let (view_tx, view_rx) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let peers = VoicePeerManager::new(config.stun_server.clone(), engine_tx);

        let controller = Self {
            config,
            username,
            relay,
            relay_rx,
            commands,
            command_tx: command_tx.clone(),
            engine_rx,
            view: view_tx,
            source,
            peers,
            sinks: Arc::new(SinkRegistry::new()),
            transcript: Transcript::new(),
            roster: Roster::new(),
            media: MediaState::default(),
            microphone: None,
            screen: None,
        };

        (controller, command_tx, view_rx)
    }

    pub async fn run(mut self) -> Result<()> {
        info!("Session loop started for {}", self.username);
        loop {
            tokio::select! {
                update = self.relay_rx.recv() => match update {
                    Some(update) => {
                        if !self.handle_relay_update(update).await? {
                            break;
                        }
                    }
                    None => break,
                },
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await? {
                            break;
                        }
                    }
                    None => break,
                },
                event = self.engine_rx.recv() => match event {
                    Some(event) => self.handle_engine_event(event).await,
                    None => break,
                },
            }
        }
        self.shutdown().await;
        Ok(())
    }

    /// Returns false once the relay is gone for good.
    async fn handle_relay_update(&mut self, update: RelayUpdate) -> Result<bool> {
        match update {
            RelayUpdate::Status(RelayStatus::Connected { reconnected }) => {
                if self.microphone.is_none() {
                    match self.source.open_microphone().await {
                        Ok(mic) => {
                            mic.set_enabled(self.media.microphone_live());
                            self.microphone = Some(mic);
                        }
                        Err(e) => {
                            warn!("Microphone capture unavailable: {}", e);
                            self.emit(view::notice(
                                "microphone unavailable, joining without audio",
                            ));
                        }
                    }
                }
                self.relay
                    .send(ClientEvent::Register {
                        username: self.username.clone(),
                    })
                    .await?;
                if reconnected {
                    self.emit(view::notice("reconnected to relay"));
                }
            }
            RelayUpdate::Status(RelayStatus::Reconnecting { attempt }) => {
                self.emit(view::notice(format!(
                    "relay connection lost, retrying (attempt {})",
                    attempt
                )));
            }
            RelayUpdate::Status(RelayStatus::Gone) => {
                self.emit(view::notice("relay is unreachable, giving up"));
                return Ok(false);
            }
            RelayUpdate::Event(event) => self.handle_server_event(event).await?,
        }
        Ok(true)
    }

    async fn handle_server_event(&mut self, event: ServerEvent) -> Result<()> {
        match event {
            ServerEvent::History(messages) => {
                self.transcript
                    .reset(messages.into_iter().map(ChatEntry::from));
                let lines = self
                    .transcript
                    .entries()
                    .iter()
                    .enumerate()
                    .map(|(i, e)| view::render_entry(i, e))
                    .collect();
                self.emit(ViewEvent::TranscriptReset {
                    banner: CHANNEL_BANNER.to_string(),
                    lines,
                });
            }
            ServerEvent::Message(message) => {
                let index = self.transcript.len();
                let line = view::render_entry(index, self.transcript.append(message.into()));
                self.emit(ViewEvent::MessageAppended { line });
            }
            ServerEvent::UpdateUsers(users) => {
                self.roster.replace(users, &self.username);
                self.emit(ViewEvent::RosterReplaced {
                    lines: view::render_roster(self.roster.entries()),
                });
            }
            ServerEvent::UserJoined { sid, username } => {
                if username == self.username {
                    debug!("Ignoring our own join echo ({})", sid);
                    return Ok(());
                }
                info!("{} joined as {}, opening voice connection", username, sid);
                if let Err(e) = self.open_initiator_peer(&sid).await {
                    warn!("Could not open voice connection to {}: {}", username, e);
                }
            }
            ServerEvent::UserLeft { sid, username } => {
                info!("{} left", username.as_deref().unwrap_or(&sid));
                if self.peers.remove(&sid).await {
                    metrics::increment_counter!("session.peers_closed");
                }
                self.drop_sinks_for(&sid);
            }
            ServerEvent::VoiceSignal(signal) => {
                // A bad signal must not take the chat down with it.
                let sender = signal.sender_sid.clone();
                if let Err(e) = self.handle_voice_signal(signal).await {
                    error!("Voice signal from {} failed: {}", sender, e);
                    metrics::increment_counter!("voice.signal_failures");
                    let name = self.display_name_for(&sender);
                    self.emit(view::notice(format!("voice setup with {} failed", name)));
                }
            }
        }
        Ok(())
    }

    async fn open_initiator_peer(&mut self, sid: &str) -> Result<()> {
        let tracks = self.local_tracks();
        let (peer, created) = self
            .peers
            .ensure_peer(sid, NegotiationRole::Initiator, &tracks)
            .await?;
        if !created {
            debug!("Voice peer for {} already open, skipping offer", sid);
            return Ok(());
        }
        let sdp = peer.create_offer().await?;
        self.relay
            .send(ClientEvent::VoiceSignal(SignalOut::offer(
                sid.to_string(),
                sdp,
            )))
            .await?;
        Ok(())
    }

    async fn handle_voice_signal(&mut self, signal: SignalIn) -> Result<()> {
        let sid = signal.sender_sid.clone();
        match signal.kind {
            SignalKind::Offer => {
                let sdp = match signal.sdp() {
                    Some(sdp) => sdp.to_string(),
                    None => {
                        warn!("Offer from {} carries no SDP, dropping", sid);
                        return Ok(());
                    }
                };
                let tracks = self.local_tracks();
                let (peer, _) = self
                    .peers
                    .ensure_peer(&sid, NegotiationRole::Responder, &tracks)
                    .await?;
                let answer = peer.apply_remote_offer(sdp).await?;
                self.relay
                    .send(ClientEvent::VoiceSignal(SignalOut::answer(sid, answer)))
                    .await?;
            }
            SignalKind::Answer => {
                let sdp = match signal.sdp() {
                    Some(sdp) => sdp.to_string(),
                    None => {
                        warn!("Answer from {} carries no SDP, dropping", sid);
                        return Ok(());
                    }
                };
                match self.peers.get(&sid).await {
                    Some(peer) => peer.apply_remote_answer(sdp).await?,
                    None => warn!("Answer from {} but no open peer, dropping", sid),
                }
            }
            SignalKind::IceCandidate => {
                let tracks = self.local_tracks();
                let (peer, created) = self
                    .peers
                    .ensure_peer(&sid, NegotiationRole::Responder, &tracks)
                    .await?;
                if created {
                    debug!("Candidate from {} arrived before their offer", sid);
                }
                peer.add_remote_candidate(signal.payload).await;
            }
        }
        Ok(())
    }

    /// Returns false when the session should end.
    async fn handle_command(&mut self, command: Command) -> Result<bool> {
        match command {
            Command::SendText(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Ok(true);
                }
                self.relay
                    .send(ClientEvent::ChatMessage(OutgoingMessage::text(trimmed)))
                    .await?;
                metrics::increment_counter!("chat.messages_sent");
            }
            Command::SendImage(path) => {
                let loaded =
                    attachment::load_image(&path, self.config.max_attachment_bytes).await;
                self.send_attachment(loaded).await?;
            }
            Command::SendFile(path) => {
                let loaded = attachment::load_file(&path, self.config.max_attachment_bytes).await;
                self.send_attachment(loaded).await?;
            }
            Command::SaveAttachment { index, path } => self.save_attachment(index, &path).await,
            Command::ToggleMute => {
                self.media = self.media.toggle_microphone();
                self.apply_media_state();
            }
            Command::ToggleDeafen => {
                self.media = self.media.toggle_deafen();
                self.apply_media_state();
            }
            Command::ToggleScreenShare => {
                if self.screen.is_some() {
                    self.stop_screen_share(false);
                } else if let Err(e) = self.start_screen_share().await {
                    warn!("Screen share failed to start: {}", e);
                    self.emit(view::notice(format!("screen share unavailable: {}", e)));
                }
            }
            Command::StopScreenShare => {
                if self.screen.is_some() {
                    self.stop_screen_share(true);
                }
            }
            Command::ShowRoster => {
                self.emit(ViewEvent::RosterReplaced {
                    lines: view::render_roster(self.roster.entries()),
                });
            }
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    /// Forwards a loaded attachment, or surfaces why it never left. A
    /// rejected attachment sends nothing at all.
    async fn send_attachment(&mut self, loaded: Result<OutgoingMessage>) -> Result<()> {
        match loaded {
            Ok(message) => {
                self.relay.send(ClientEvent::ChatMessage(message)).await?;
                metrics::increment_counter!("chat.attachments_sent");
            }
            Err(e @ (Error::Attachment(_) | Error::IO(_))) => {
                warn!("Attachment not sent: {}", e);
                metrics::increment_counter!("chat.attachments_rejected");
                self.emit(view::notice(format!("attachment not sent: {}", e)));
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn save_attachment(&mut self, index: usize, path: &std::path::Path) {
        let entry = match self.transcript.get(index) {
            Some(entry) if matches!(entry.kind, MessageKind::Image | MessageKind::File) => entry,
            Some(_) => {
                self.emit(view::notice(format!(
                    "message {} is not an attachment",
                    index
                )));
                return;
            }
            None => {
                self.emit(view::notice(format!("no message at index {}", index)));
                return;
            }
        };

        match attachment::decode_data_uri(&entry.content) {
            Ok((_, bytes)) => match tokio::fs::write(path, &bytes).await {
                Ok(()) => self.emit(view::notice(format!(
                    "saved {} bytes to {}",
                    bytes.len(),
                    path.display()
                ))),
                Err(e) => self.emit(view::notice(format!(
                    "could not write {}: {}",
                    path.display(),
                    e
                ))),
            },
            Err(e) => self.emit(view::notice(format!("could not decode attachment: {}", e))),
        }
    }

    /// Projects the media state onto the microphone gate and every remote
    /// sink. Called after each toggle so the two can never drift.
    fn apply_media_state(&self) {
        if let Some(mic) = &self.microphone {
            mic.set_enabled(self.media.microphone_live());
        }
        self.sinks.set_all_muted(self.media.sinks_muted());
        self.emit_controls();
    }

    fn emit_controls(&self) {
        self.emit(ViewEvent::ControlsChanged {
            microphone_live: self.media.microphone_live(),
            deafened: self.media == MediaState::Deafened,
            screen_sharing: self.screen.is_some(),
        });
    }

    async fn start_screen_share(&mut self) -> Result<()> {
        let screen = self.source.open_screen().await?;

        let track = screen.track() as Arc<dyn TrackLocal + Send + Sync>;
        let renegotiate = self.peers.attach_track_to_all(track).await;
        for sid in renegotiate {
            if let Err(e) = self.renegotiate(&sid).await {
                warn!("Renegotiation with {} failed: {}", sid, e);
                let name = self.display_name_for(&sid);
                self.emit(view::notice(format!(
                    "could not share screen with {}",
                    name
                )));
            }
        }

        // Fold "the capture ended on its own" back into the command stream
        // so it is applied in order with everything else.
        let mut ended = screen.end_signal();
        let command_tx = self.command_tx.clone();
        tokio::spawn(async move {
            if ended.changed().await.is_ok() {
                let _ = command_tx.send(Command::StopScreenShare).await;
            }
        });

        self.screen = Some(screen);
        self.emit(ViewEvent::TileAdded {
            label: LOCAL_PREVIEW_LABEL.to_string(),
        });
        self.refresh_grid();
        self.emit_controls();
        info!("Screen share started");
        metrics::increment_counter!("media.screen_shares_started");
        Ok(())
    }

    /// Peers keep their negotiated sender; the track simply stops producing
    /// once the capture is dropped.
    fn stop_screen_share(&mut self, ended_by_source: bool) {
        if self.screen.take().is_none() {
            return;
        }
        self.emit(ViewEvent::TileRemoved {
            label: LOCAL_PREVIEW_LABEL.to_string(),
        });
        self.refresh_grid();
        self.emit_controls();
        if ended_by_source {
            self.emit(view::notice("screen share ended"));
        }
        info!("Screen share stopped");
    }

    async fn renegotiate(&self, sid: &str) -> Result<()> {
        if let Some(peer) = self.peers.get(sid).await {
            let sdp = peer.create_offer().await?;
            self.relay
                .send(ClientEvent::VoiceSignal(SignalOut::offer(
                    sid.to_string(),
                    sdp,
                )))
                .await?;
        }
        Ok(())
    }

    async fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::LocalCandidate { sid, payload } => {
                if let Err(e) = self
                    .relay
                    .send(ClientEvent::VoiceSignal(SignalOut::candidate(sid, payload)))
                    .await
                {
                    warn!("Could not forward local ICE candidate: {}", e);
                }
            }
            EngineEvent::PeerStateChanged { sid, state } => {
                let phase = PeerPhase::from(state);
                debug!("Peer {} moved to {:?} ({})", sid, phase, state);
                match phase {
                    PeerPhase::Connected => {
                        info!("Voice connected with {}", sid);
                        let name = self.display_name_for(&sid);
                        self.emit(view::notice(format!("voice connected with {}", name)));
                    }
                    PeerPhase::Closed => {
                        info!("Voice connection with {} closed", sid);
                        let name = self.display_name_for(&sid);
                        self.emit(view::notice(format!("voice with {} ended", name)));
                    }
                    _ => {}
                }
            }
            EngineEvent::RemoteTrack { sid, kind, track } => {
                let label = match kind {
                    SinkKind::Audio => String::new(),
                    SinkKind::Video => self.screen_label_for(&sid),
                };
                let sink = RemoteSink::new(sid.clone(), kind, label.clone(), track);
                sink.set_muted(self.media.sinks_muted());
                self.sinks.insert(sink);
                metrics::increment_counter!("voice.remote_tracks");
                if kind == SinkKind::Video {
                    self.emit(ViewEvent::TileAdded { label });
                    self.refresh_grid();
                }
            }
        }
    }

    fn screen_label_for(&self, sid: &str) -> String {
        self.roster
            .entries()
            .iter()
            .find(|e| e.sid == sid)
            .map(|e| format!("{}'s screen", e.username))
            .unwrap_or_else(|| REMOTE_SCREEN_LABEL.to_string())
    }

    fn display_name_for(&self, sid: &str) -> String {
        self.roster
            .entries()
            .iter()
            .find(|e| e.sid == sid)
            .map(|e| e.username.clone())
            .unwrap_or_else(|| sid.to_string())
    }

    fn drop_sinks_for(&mut self, sid: &str) {
        let mut video_gone = false;
        for sink in self.sinks.remove_for(sid) {
            if sink.kind() == SinkKind::Video {
                self.emit(ViewEvent::TileRemoved {
                    label: sink.label().to_string(),
                });
                video_gone = true;
            }
        }
        if video_gone {
            self.refresh_grid();
        }
    }

    fn refresh_grid(&self) {
        let tiles = self.sinks.video_count() + usize::from(self.screen.is_some());
        self.emit(ViewEvent::GridVisible(tiles > 0));
    }

    fn local_tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        let mut tracks: Vec<Arc<dyn TrackLocal + Send + Sync>> = Vec::new();
        if let Some(mic) = &self.microphone {
            tracks.push(mic.track() as Arc<dyn TrackLocal + Send + Sync>);
        }
        if let Some(screen) = &self.screen {
            tracks.push(screen.track() as Arc<dyn TrackLocal + Send + Sync>);
        }
        tracks
    }

    fn emit(&self, event: ViewEvent) {
        let _ = self.view.send(event);
    }

    async fn shutdown(&mut self) {
        info!("Session shutting down");
        self.peers.close_all().await;
        self.emit(ViewEvent::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::StaticMediaSource;
    use crate::relay::events::{WireMessage, WireUser};
    use serde_json::json;
    use uuid::Uuid;

    struct Harness {
        controller: SessionController,
        outbound: mpsc::Receiver<ClientEvent>,
        view: mpsc::UnboundedReceiver<ViewEvent>,
    }

    fn harness() -> Harness {
        let config = ClientConfig {
            relay_url: "ws://127.0.0.1:1".to_string(),
            username: Some("alice".to_string()),
            stun_server: "stun:stun.l.google.com:19302".to_string(),
            max_attachment_bytes: 10 * 1024 * 1024,
            retry_attempts: 0,
            retry_delay_ms: 1,
        };
        let (relay, outbound) = RelayHandle::detached();
        let (_status_tx, relay_rx) = mpsc::unbounded_channel();
        let (controller, _commands, view) = SessionController::new(
            config,
            "alice".to_string(),
            relay,
            relay_rx,
            Arc::new(StaticMediaSource),
        );
        Harness {
            controller,
            outbound,
            view,
        }
    }

    fn drain_view(rx: &mut mpsc::UnboundedReceiver<ViewEvent>) -> Vec<ViewEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn wire_text(sender: &str, content: &str) -> WireMessage {
        WireMessage {
            kind: MessageKind::Text,
            sender: Some(sender.to_string()),
            time: Some("07:45 PM".to_string()),
            content: Some(content.to_string()),
            file_name: None,
            sid: None,
        }
    }

    async fn connect(h: &mut Harness) {
        let keep_going = h
            .controller
            .handle_relay_update(RelayUpdate::Status(RelayStatus::Connected {
                reconnected: false,
            }))
            .await
            .unwrap();
        assert!(keep_going);
        match h.outbound.recv().await.unwrap() {
            ClientEvent::Register { username } => assert_eq!(username, "alice"),
            other => panic!("expected register, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn history_resets_transcript_then_messages_append_in_order() {
        let mut h = harness();

        h.controller
            .handle_server_event(ServerEvent::History(vec![
                wire_text("alice", "one"),
                wire_text("bob", "two"),
            ]))
            .await
            .unwrap();
        h.controller
            .handle_server_event(ServerEvent::Message(wire_text("bob", "three")))
            .await
            .unwrap();

        let events = drain_view(&mut h.view);
        match &events[0] {
            ViewEvent::TranscriptReset { banner, lines } => {
                assert_eq!(banner, CHANNEL_BANNER);
                assert_eq!(
                    lines,
                    &vec![
                        "[07:45 PM] alice: one".to_string(),
                        "[07:45 PM] bob: two".to_string(),
                    ]
                );
            }
            other => panic!("expected transcript reset, got {:?}", other),
        }
        assert_eq!(
            events[1],
            ViewEvent::MessageAppended {
                line: "[07:45 PM] bob: three".to_string()
            }
        );
        assert_eq!(h.controller.transcript.len(), 3);
    }

    #[tokio::test]
    async fn roster_snapshot_marks_the_local_user() {
        let mut h = harness();
        h.controller
            .handle_server_event(ServerEvent::UpdateUsers(vec![
                WireUser {
                    sid: "s1".to_string(),
                    username: "alice".to_string(),
                },
                WireUser {
                    sid: "s2".to_string(),
                    username: "bob".to_string(),
                },
            ]))
            .await
            .unwrap();

        let events = drain_view(&mut h.view);
        assert_eq!(
            events[0],
            ViewEvent::RosterReplaced {
                lines: vec!["[A] alice (you)".to_string(), "[B] bob".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn own_join_echo_opens_no_peer() {
        let mut h = harness();
        connect(&mut h).await;

        h.controller
            .handle_server_event(ServerEvent::UserJoined {
                sid: "s0".to_string(),
                username: "alice".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(h.controller.peers.peer_count().await, 0);
        assert!(h.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn join_sends_offer_and_leave_clears_peer_and_sinks() {
        let mut h = harness();
        connect(&mut h).await;

        h.controller
            .handle_server_event(ServerEvent::UserJoined {
                sid: "s1".to_string(),
                username: "bob".to_string(),
            })
            .await
            .unwrap();

        match h.outbound.recv().await.unwrap() {
            ClientEvent::VoiceSignal(signal) => {
                assert_eq!(signal.target, "s1");
                assert_eq!(signal.kind, SignalKind::Offer);
                let sdp = signal.payload["sdp"].as_str().unwrap();
                assert!(sdp.contains("m=audio"));
            }
            other => panic!("expected offer, got {:?}", other),
        }
        assert_eq!(h.controller.peers.peer_count().await, 1);

        // A second join event for the same sid must not spawn a replacement.
        h.controller
            .handle_server_event(ServerEvent::UserJoined {
                sid: "s1".to_string(),
                username: "bob".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(h.controller.peers.peer_count().await, 1);
        assert!(h.outbound.try_recv().is_err());

        h.controller.sinks.insert(RemoteSink::detached(
            "s1".to_string(),
            SinkKind::Audio,
            String::new(),
        ));
        h.controller.sinks.insert(RemoteSink::detached(
            "s1".to_string(),
            SinkKind::Video,
            "bob's screen".to_string(),
        ));
        drain_view(&mut h.view);

        h.controller
            .handle_server_event(ServerEvent::UserLeft {
                sid: "s1".to_string(),
                username: Some("bob".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(h.controller.peers.peer_count().await, 0);
        assert_eq!(h.controller.peers.phase("s1").await, PeerPhase::Absent);
        assert!(h.controller.sinks.is_empty());
        let events = drain_view(&mut h.view);
        assert!(events.contains(&ViewEvent::TileRemoved {
            label: "bob's screen".to_string()
        }));
        assert!(events.contains(&ViewEvent::GridVisible(false)));
    }

    #[tokio::test]
    async fn incoming_offer_is_answered() {
        let mut h = harness();
        connect(&mut h).await;

        // A real offer from a second, independent engine.
        let (remote_tx, _remote_rx) = mpsc::unbounded_channel();
        let remote = VoicePeerManager::new("stun:stun.l.google.com:19302", remote_tx);
        let mic = StaticMediaSource.open_microphone().await.unwrap();
        let (remote_peer, _) = remote
            .ensure_peer(
                "local",
                NegotiationRole::Initiator,
                &[mic.track() as Arc<dyn TrackLocal + Send + Sync>],
            )
            .await
            .unwrap();
        let offer_sdp = remote_peer.create_offer().await.unwrap();

        h.controller
            .handle_server_event(ServerEvent::VoiceSignal(SignalIn {
                sender_sid: "s2".to_string(),
                kind: SignalKind::Offer,
                payload: json!({ "type": "offer", "sdp": offer_sdp }),
            }))
            .await
            .unwrap();

        match h.outbound.recv().await.unwrap() {
            ClientEvent::VoiceSignal(signal) => {
                assert_eq!(signal.target, "s2");
                assert_eq!(signal.kind, SignalKind::Answer);
                assert_eq!(signal.payload["type"], "answer");
                assert!(signal.payload["sdp"].as_str().unwrap().contains("m=audio"));
            }
            other => panic!("expected answer, got {:?}", other),
        }
        assert_ne!(h.controller.peers.phase("s2").await, PeerPhase::Absent);
    }

    #[tokio::test]
    async fn small_image_sends_exactly_one_event() {
        let mut h = harness();
        connect(&mut h).await;

        let path = std::env::temp_dir().join(format!("{}-snap.png", Uuid::new_v4()));
        tokio::fs::write(&path, vec![0u8; 2 * 1024 * 1024])
            .await
            .unwrap();
        let keep_going = h
            .controller
            .handle_command(Command::SendImage(path.clone()))
            .await
            .unwrap();
        let _ = tokio::fs::remove_file(&path).await;
        assert!(keep_going);

        match h.outbound.recv().await.unwrap() {
            ClientEvent::ChatMessage(message) => {
                assert_eq!(message.kind, MessageKind::Image);
                assert!(message.content.starts_with("data:image/png;base64,"));
                assert!(message.file_name.is_none());
            }
            other => panic!("expected chat message, got {:?}", other),
        }
        assert!(h.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn oversize_file_sends_nothing_and_surfaces_a_notice() {
        let mut h = harness();
        connect(&mut h).await;
        drain_view(&mut h.view);

        let path = std::env::temp_dir().join(format!("{}-big.bin", Uuid::new_v4()));
        tokio::fs::write(&path, vec![0u8; 11 * 1024 * 1024])
            .await
            .unwrap();
        h.controller
            .handle_command(Command::SendFile(path.clone()))
            .await
            .unwrap();
        let _ = tokio::fs::remove_file(&path).await;

        assert!(h.outbound.try_recv().is_err());
        let events = drain_view(&mut h.view);
        assert!(events.iter().any(|e| matches!(
            e,
            ViewEvent::Notice { line } if line.contains("attachment not sent")
        )));
    }

    #[tokio::test]
    async fn deafen_silences_everything_and_undeafen_restores() {
        let mut h = harness();
        connect(&mut h).await;
        h.controller.sinks.insert(RemoteSink::detached(
            "s1".to_string(),
            SinkKind::Audio,
            String::new(),
        ));
        drain_view(&mut h.view);

        h.controller
            .handle_command(Command::ToggleDeafen)
            .await
            .unwrap();
        let mic = h.controller.microphone.as_ref().unwrap();
        assert!(!mic.is_enabled());
        assert!(h.controller.sinks.all_muted());
        assert!(drain_view(&mut h.view).contains(&ViewEvent::ControlsChanged {
            microphone_live: false,
            deafened: true,
            screen_sharing: false,
        }));

        h.controller
            .handle_command(Command::ToggleDeafen)
            .await
            .unwrap();
        let mic = h.controller.microphone.as_ref().unwrap();
        assert!(mic.is_enabled());
        assert!(!h.controller.sinks.all_muted());

        h.controller
            .handle_command(Command::ToggleMute)
            .await
            .unwrap();
        let mic = h.controller.microphone.as_ref().unwrap();
        assert!(!mic.is_enabled());
        // Mute only gates the microphone, never remote playback.
        assert!(!h.controller.sinks.all_muted());
    }

    #[tokio::test]
    async fn screen_share_toggles_and_stops_itself_when_capture_ends() {
        let mut h = harness();
        connect(&mut h).await;
        drain_view(&mut h.view);

        h.controller
            .handle_command(Command::ToggleScreenShare)
            .await
            .unwrap();
        assert!(h.controller.screen.is_some());
        let events = drain_view(&mut h.view);
        assert!(events.contains(&ViewEvent::TileAdded {
            label: "My Screen".to_string()
        }));
        assert!(events.contains(&ViewEvent::GridVisible(true)));

        // Source-side end arrives as a command and is applied in order.
        h.controller.screen.as_ref().unwrap().mark_ended();
        let command = h.controller.commands.recv().await.unwrap();
        assert_eq!(command, Command::StopScreenShare);
        h.controller.handle_command(command).await.unwrap();

        assert!(h.controller.screen.is_none());
        let events = drain_view(&mut h.view);
        assert!(events.contains(&ViewEvent::TileRemoved {
            label: "My Screen".to_string()
        }));
        assert!(events.contains(&ViewEvent::GridVisible(false)));
    }

    #[tokio::test]
    async fn received_attachment_can_be_saved_back_to_bytes() {
        let mut h = harness();
        let payload = WireMessage {
            kind: MessageKind::File,
            sender: Some("bob".to_string()),
            time: None,
            content: Some("data:text/plain;base64,aGVsbG8=".to_string()),
            file_name: Some("hello.txt".to_string()),
            sid: Some("s2".to_string()),
        };
        h.controller
            .handle_server_event(ServerEvent::Message(payload))
            .await
            .unwrap();

        let path = std::env::temp_dir().join(format!("{}-saved.txt", Uuid::new_v4()));
        h.controller
            .handle_command(Command::SaveAttachment {
                index: 0,
                path: path.clone(),
            })
            .await
            .unwrap();

        let saved = tokio::fs::read(&path).await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;
        assert_eq!(saved, b"hello");

        // Out-of-range and non-attachment indexes only produce notices.
        h.controller
            .handle_command(Command::SaveAttachment {
                index: 7,
                path: path.clone(),
            })
            .await
            .unwrap();
        let events = drain_view(&mut h.view);
        assert!(events.iter().any(|e| matches!(
            e,
            ViewEvent::Notice { line } if line.contains("no message at index 7")
        )));
    }

    #[tokio::test]
    async fn relay_gone_ends_the_session() {
        let mut h = harness();
        let keep_going = h
            .controller
            .handle_relay_update(RelayUpdate::Status(RelayStatus::Gone))
            .await
            .unwrap();
        assert!(!keep_going);
        let events = drain_view(&mut h.view);
        assert!(events.iter().any(|e| matches!(
            e,
            ViewEvent::Notice { line } if line.contains("relay is unreachable")
        )));
    }

    #[tokio::test]
    async fn reconnect_registers_again() {
        let mut h = harness();
        connect(&mut h).await;

        let keep_going = h
            .controller
            .handle_relay_update(RelayUpdate::Status(RelayStatus::Connected {
                reconnected: true,
            }))
            .await
            .unwrap();
        assert!(keep_going);
        match h.outbound.recv().await.unwrap() {
            ClientEvent::Register { username } => assert_eq!(username, "alice"),
            other => panic!("expected register, got {:?}", other),
        }
        let events = drain_view(&mut h.view);
        assert!(events.iter().any(|e| matches!(
            e,
            ViewEvent::Notice { line } if line.contains("reconnected")
        )));
    }

    #[tokio::test]
    async fn remote_video_track_label_comes_from_the_roster() {
        let mut h = harness();
        h.controller
            .handle_server_event(ServerEvent::UpdateUsers(vec![WireUser {
                sid: "s2".to_string(),
                username: "bob".to_string(),
            }]))
            .await
            .unwrap();

        assert_eq!(h.controller.screen_label_for("s2"), "bob's screen");
        assert_eq!(h.controller.screen_label_for("s9"), "User Screen");
    }
}
