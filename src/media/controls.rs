/// Local media state. Deafened implies the microphone is off; the
/// microphone-live and sinks-muted observables are derived from the state,
/// never stored separately, so the two can't drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    Normal,
    Muted,
    Deafened,
}

impl MediaState {
    pub fn microphone_live(self) -> bool {
        matches!(self, MediaState::Normal)
    }

    pub fn sinks_muted(self) -> bool {
        matches!(self, MediaState::Deafened)
    }

    /// Mute toggle. While deafened this leaves deafen but keeps the
    /// microphone off, so the user lands in a predictable state.
    pub fn toggle_microphone(self) -> MediaState {
        match self {
            MediaState::Normal => MediaState::Muted,
            MediaState::Muted => MediaState::Normal,
            MediaState::Deafened => MediaState::Muted,
        }
    }

    /// Deafen toggle. Turning deafen on silences every remote sink and
    /// forces the microphone off; turning it off restores both.
    pub fn toggle_deafen(self) -> MediaState {
        match self {
            MediaState::Normal | MediaState::Muted => MediaState::Deafened,
            MediaState::Deafened => MediaState::Normal,
        }
    }
}

impl Default for MediaState {
    fn default() -> Self {
        MediaState::Normal
    }
}
