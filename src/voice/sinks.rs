use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::MarshalSize;

use crate::types::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Audio,
    Video,
}

/// Playback endpoint for one remote track: a hidden auto-playing audio sink
/// or a labeled video tile. Holds the drain task that keeps the track
/// flowing; dropping the sink stops it.
pub struct RemoteSink {
    sid: ConnectionId,
    kind: SinkKind,
    label: String,
    muted: Arc<AtomicBool>,
    drain: Option<JoinHandle<()>>,
}

impl RemoteSink {
    pub fn new(sid: ConnectionId, kind: SinkKind, label: String, track: Arc<TrackRemote>) -> Self {
        let drain = tokio::spawn(Self::drain_track(track));
        Self {
            sid,
            kind,
            label,
            muted: Arc::new(AtomicBool::new(false)),
            drain: Some(drain),
        }
    }

    /// Registry bookkeeping tests have no negotiated track to drain.
    #[cfg(test)]
    pub(crate) fn detached(sid: ConnectionId, kind: SinkKind, label: String) -> Self {
        Self {
            sid,
            kind,
            label,
            muted: Arc::new(AtomicBool::new(false)),
            drain: None,
        }
    }

    /// Playback itself is the embedder's concern; the sink still has to keep
    /// reading so RTCP feedback flows and track end is observed.
    async fn drain_track(track: Arc<TrackRemote>) {
        let mut buf = vec![0u8; 1500];
        while let Ok((pkt, _)) = track.read(&mut buf).await {
            metrics::counter!("voice.remote_bytes_received", pkt.marshal_size() as u64);
        }
        debug!("Remote track {} ended", track.id());
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn kind(&self) -> SinkKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }
}

impl Drop for RemoteSink {
    fn drop(&mut self) {
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
    }
}

/// All live remote sinks, in arrival order. Mutated only by the session
/// controller; deafen toggles hit every entry at once.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: Mutex<Vec<RemoteSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, sink: RemoteSink) {
        self.sinks.lock().push(sink);
    }

    pub fn set_all_muted(&self, muted: bool) {
        for sink in self.sinks.lock().iter() {
            sink.set_muted(muted);
        }
    }

    /// Removes every sink belonging to `sid`, returning them so the caller
    /// can report the torn-down tiles before they drop.
    pub fn remove_for(&self, sid: &str) -> Vec<RemoteSink> {
        let mut sinks = self.sinks.lock();
        let mut removed = Vec::new();
        let mut i = 0;
        while i < sinks.len() {
            if sinks[i].sid() == sid {
                removed.push(sinks.remove(i));
            } else {
                i += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.lock().is_empty()
    }

    pub fn video_count(&self) -> usize {
        self.sinks
            .lock()
            .iter()
            .filter(|s| s.kind() == SinkKind::Video)
            .count()
    }

    pub fn count_for(&self, sid: &str) -> usize {
        self.sinks.lock().iter().filter(|s| s.sid() == sid).count()
    }

    /// True when every sink is muted; vacuously true when empty.
    pub fn all_muted(&self) -> bool {
        self.sinks.lock().iter().all(|s| s.is_muted())
    }
}
