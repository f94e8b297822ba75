use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::utils::Result;

/// Where local media comes from. The library negotiates tracks but does not
/// own platform capture; an embedder supplies a source and feeds samples
/// into the returned tracks.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn open_microphone(&self) -> Result<LocalAudioTrack>;
    async fn open_screen(&self) -> Result<ScreenCapture>;
}

/// Local microphone track with an enabled gate. Disabling the gate drops
/// samples before they reach the track, which is what peers hear as mute.
#[derive(Clone)]
pub struct LocalAudioTrack {
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
}

impl LocalAudioTrack {
    pub fn new(track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            track,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.track.write_sample(sample).await?;
        Ok(())
    }
}

/// An active screen capture. Dropping it stops the share; `mark_ended` is
/// how a source reports that the capture ended on its own (window closed,
/// permission revoked), which the session turns into an automatic stop.
pub struct ScreenCapture {
    track: Arc<TrackLocalStaticSample>,
    ended: watch::Sender<bool>,
}

impl ScreenCapture {
    pub fn new(track: Arc<TrackLocalStaticSample>) -> Self {
        let (ended, _) = watch::channel(false);
        Self { track, ended }
    }

    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    pub fn end_signal(&self) -> watch::Receiver<bool> {
        self.ended.subscribe()
    }

    pub fn mark_ended(&self) {
        let _ = self.ended.send(true);
    }
}

/// Source whose tracks are fed by the embedder (or by nothing, for a
/// receive-only session). Always grants capture.
#[derive(Default)]
pub struct StaticMediaSource;

#[async_trait]
impl MediaSource for StaticMediaSource {
    async fn open_microphone(&self) -> Result<LocalAudioTrack> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            format!("mic-{}", Uuid::new_v4()),
            format!("stream-{}", Uuid::new_v4()),
        ));
        Ok(LocalAudioTrack::new(track))
    }

    async fn open_screen(&self) -> Result<ScreenCapture> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
            format!("screen-{}", Uuid::new_v4()),
            format!("stream-{}", Uuid::new_v4()),
        ));
        Ok(ScreenCapture::new(track))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    #[tokio::test]
    async fn microphone_gate_swallows_samples_when_disabled() {
        let source = StaticMediaSource;
        let mic = source.open_microphone().await.unwrap();
        assert!(mic.is_enabled());

        let sample = Sample {
            data: Bytes::from_static(&[0u8; 4]),
            duration: Duration::from_millis(20),
            ..Default::default()
        };

        mic.set_enabled(false);
        assert!(!mic.is_enabled());
        // Disabled writes are accepted and discarded, not errors.
        mic.write_sample(&sample).await.unwrap();

        mic.set_enabled(true);
        mic.write_sample(&sample).await.unwrap();
    }

    #[tokio::test]
    async fn screen_capture_end_signal_fires_once_marked() {
        let source = StaticMediaSource;
        let screen = source.open_screen().await.unwrap();
        let mut signal = screen.end_signal();
        assert!(!*signal.borrow());

        screen.mark_ended();
        signal.changed().await.unwrap();
        assert!(*signal.borrow());
    }

    #[tokio::test]
    async fn dropping_capture_closes_the_end_signal() {
        let source = StaticMediaSource;
        let screen = source.open_screen().await.unwrap();
        let mut signal = screen.end_signal();
        drop(screen);
        assert!(signal.changed().await.is_err());
    }
}
