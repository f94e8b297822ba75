use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::Mutex;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::types::ConnectionId;
use crate::utils::Result;

/// Which side started negotiation. The side that saw `user_joined` offers;
/// the side that saw the first signal answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Initiator,
    Responder,
}

/// Participant connection lifecycle as shown to the user. `Absent` is the
/// registry's answer for a sid it has never seen or has already removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPhase {
    Absent,
    Connecting,
    Connected,
    Closed,
}

impl From<RTCPeerConnectionState> for PeerPhase {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connected => PeerPhase::Connected,
            RTCPeerConnectionState::Failed
            | RTCPeerConnectionState::Disconnected
            | RTCPeerConnectionState::Closed => PeerPhase::Closed,
            _ => PeerPhase::Connecting,
        }
    }
}

/// One peer connection toward a remote participant. Remote candidates that
/// arrive before the remote description are buffered and flushed right after
/// it is applied instead of being dropped.
pub struct VoicePeer {
    sid: ConnectionId,
    role: NegotiationRole,
    pc: Arc<RTCPeerConnection>,
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
}

impl VoicePeer {
    pub fn new(sid: ConnectionId, role: NegotiationRole, pc: Arc<RTCPeerConnection>) -> Self {
        Self {
            sid,
            role,
            pc,
            pending_candidates: Mutex::new(Vec::new()),
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn phase(&self) -> PeerPhase {
        PeerPhase::from(self.pc.connection_state())
    }

    pub fn connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    /// Creates an offer, sets it locally, returns its SDP. Also used to
    /// re-offer after a track is added to an established connection.
    pub async fn create_offer(&self) -> Result<String> {
        debug!("Creating offer for peer {}", self.sid);
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(offer.sdp)
    }

    /// Responder path: apply the remote offer, answer it, return the answer
    /// SDP to forward back.
    pub async fn apply_remote_offer(&self, sdp: String) -> Result<String> {
        debug!("Setting remote offer for peer {}", self.sid);
        let offer = RTCSessionDescription::offer(sdp)?;
        self.pc.set_remote_description(offer).await?;
        self.flush_pending_candidates().await;

        debug!("Creating answer for peer {}", self.sid);
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(answer.sdp)
    }

    pub async fn apply_remote_answer(&self, sdp: String) -> Result<()> {
        debug!("Setting remote answer for peer {}", self.sid);
        let answer = RTCSessionDescription::answer(sdp)?;
        self.pc.set_remote_description(answer).await?;
        self.flush_pending_candidates().await;
        Ok(())
    }

    /// Applies a remote candidate, or buffers it while the remote
    /// description is still pending. A candidate that fails to parse or to
    /// apply is logged and skipped; one bad candidate never kills the peer.
    pub async fn add_remote_candidate(&self, payload: Value) {
        let candidate: RTCIceCandidateInit = match serde_json::from_value(payload) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("Failed to parse ICE candidate from {}: {}", self.sid, e);
                return;
            }
        };

        if self.pc.remote_description().await.is_none() {
            debug!("Buffering early ICE candidate from {}", self.sid);
            self.pending_candidates.lock().await.push(candidate);
            return;
        }

        if let Err(e) = self.pc.add_ice_candidate(candidate).await {
            warn!("Could not add ICE candidate from {}: {}", self.sid, e);
        }
    }

    async fn flush_pending_candidates(&self) {
        let pending: Vec<RTCIceCandidateInit> =
            self.pending_candidates.lock().await.drain(..).collect();
        if pending.is_empty() {
            return;
        }
        debug!(
            "Flushing {} buffered ICE candidate(s) for peer {}",
            pending.len(),
            self.sid
        );
        for candidate in pending {
            if let Err(e) = self.pc.add_ice_candidate(candidate).await {
                warn!("Could not add buffered ICE candidate from {}: {}", self.sid, e);
            }
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}
