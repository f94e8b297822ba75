pub mod capture;
pub mod controls;

pub use capture::{LocalAudioTrack, MediaSource, ScreenCapture, StaticMediaSource};
pub use controls::MediaState;
