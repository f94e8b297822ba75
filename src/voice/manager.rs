use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::types::ConnectionId;
use crate::utils::Result;
use crate::voice::peer::{NegotiationRole, PeerPhase, VoicePeer};
use crate::voice::sinks::SinkKind;

/// What WebRTC callbacks report back into the session loop. Callbacks never
/// touch session state directly; the controller applies these in order.
pub enum EngineEvent {
    LocalCandidate {
        sid: ConnectionId,
        payload: Value,
    },
    PeerStateChanged {
        sid: ConnectionId,
        state: RTCPeerConnectionState,
    },
    RemoteTrack {
        sid: ConnectionId,
        kind: SinkKind,
        track: Arc<TrackRemote>,
    },
}

/// Registry of one `VoicePeer` per remote participant, keyed by sid. Owns
/// peer-connection construction and callback wiring.
pub struct VoicePeerManager {
    peers: Arc<RwLock<HashMap<ConnectionId, Arc<VoicePeer>>>>,
    stun_server: String,
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl VoicePeerManager {
    pub fn new(stun_server: impl Into<String>, engine_tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
            stun_server: stun_server.into(),
            engine_tx,
        }
    }

    /// Returns the peer for `sid`, creating it with `local_tracks` attached
    /// if it does not exist yet. The bool reports whether a peer was
    /// created; a duplicate join reuses the existing connection instead of
    /// leaking a replacement.
    pub async fn ensure_peer(
        &self,
        sid: &str,
        role: NegotiationRole,
        local_tracks: &[Arc<dyn TrackLocal + Send + Sync>],
    ) -> Result<(Arc<VoicePeer>, bool)> {
        let mut peers = self.peers.write().await;
        if let Some(existing) = peers.get(sid) {
            debug!("Peer {} already present, reusing", sid);
            return Ok((existing.clone(), false));
        }

        let pc = self.build_peer_connection().await?;
        self.wire_callbacks(sid, &pc);

        for track in local_tracks {
            pc.add_track(track.clone()).await?;
        }

        let peer = Arc::new(VoicePeer::new(sid.to_string(), role, pc));
        peers.insert(sid.to_string(), peer.clone());
        info!("Created {:?} peer connection for {}", role, sid);
        metrics::gauge!("voice.active_peers", peers.len() as f64);
        Ok((peer, true))
    }

    async fn build_peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let api = APIBuilder::new().with_media_engine(media_engine).build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![self.stun_server.clone()],
                ..Default::default()
            }],
            ..Default::default()
        };

        Ok(Arc::new(api.new_peer_connection(config).await?))
    }

    fn wire_callbacks(&self, sid: &str, pc: &Arc<RTCPeerConnection>) {
        let candidate_tx = self.engine_tx.clone();
        let candidate_sid = sid.to_string();
        pc.on_ice_candidate(Box::new(move |c| {
            let tx = candidate_tx.clone();
            let sid = candidate_sid.clone();
            Box::pin(async move {
                if let Some(c) = c {
                    match c.to_json() {
                        Ok(init) => match serde_json::to_value(&init) {
                            Ok(payload) => {
                                let _ = tx.send(EngineEvent::LocalCandidate { sid, payload });
                            }
                            Err(e) => error!("Failed to encode ICE candidate: {}", e),
                        },
                        Err(e) => error!("Failed to convert ICE candidate: {}", e),
                    }
                }
            })
        }));

        let state_tx = self.engine_tx.clone();
        let state_sid = sid.to_string();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let tx = state_tx.clone();
            let sid = state_sid.clone();
            Box::pin(async move {
                let _ = tx.send(EngineEvent::PeerStateChanged { sid, state });
            })
        }));

        let track_tx = self.engine_tx.clone();
        let track_sid = sid.to_string();
        pc.on_track(Box::new(move |track, _, _| {
            let tx = track_tx.clone();
            let sid = track_sid.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => SinkKind::Audio,
                    RTPCodecType::Video => SinkKind::Video,
                    other => {
                        warn!("Ignoring track of unsupported kind {:?} from {}", other, sid);
                        return;
                    }
                };
                let _ = tx.send(EngineEvent::RemoteTrack { sid, kind, track });
            })
        }));
    }

    pub async fn get(&self, sid: &str) -> Option<Arc<VoicePeer>> {
        self.peers.read().await.get(sid).cloned()
    }

    pub async fn phase(&self, sid: &str) -> PeerPhase {
        match self.get(sid).await {
            Some(peer) => peer.phase(),
            None => PeerPhase::Absent,
        }
    }

    /// Closes and forgets the peer for `sid`. Returns false for unknown sids.
    pub async fn remove(&self, sid: &str) -> bool {
        let removed = self.peers.write().await.remove(sid);
        match removed {
            Some(peer) => {
                if let Err(e) = peer.close().await {
                    warn!("Error closing connection for {}: {}", sid, e);
                }
                let remaining = self.peers.read().await.len();
                info!("Removed peer {} ({} remaining)", sid, remaining);
                metrics::gauge!("voice.active_peers", remaining as f64);
                true
            }
            None => {
                debug!("Asked to remove unknown peer {}", sid);
                false
            }
        }
    }

    /// Adds `track` to every existing connection, returning the sids that
    /// now need a re-offer. Peers that reject the track are skipped.
    pub async fn attach_track_to_all(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Vec<ConnectionId> {
        let peers = self.peers.read().await;
        let mut attached = Vec::new();
        for (sid, peer) in peers.iter() {
            match peer.connection().add_track(track.clone()).await {
                Ok(_) => attached.push(sid.clone()),
                Err(e) => warn!("Could not add track for {}: {}", sid, e),
            }
        }
        attached
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn close_all(&self) {
        let mut peers = self.peers.write().await;
        for (sid, peer) in peers.drain() {
            if let Err(e) = peer.close().await {
                warn!("Error closing connection for {}: {}", sid, e);
            }
        }
        metrics::gauge!("voice.active_peers", 0.0);
    }
}
