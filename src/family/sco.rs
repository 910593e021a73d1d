//! SCO audio link state.

use crate::notify::{DecodeError, Decoder, Flags, Notification};

use super::state_codes;

pub const ACTION_SCO_AUDIO_STATE_UPDATED: &str = "android.media.ACTION_SCO_AUDIO_STATE_UPDATED";
pub const EXTRA_SCO_AUDIO_STATE: &str = "android.media.extra.SCO_AUDIO_STATE";

pub const STATE_CONNECTED: Flags = Flags::from_bits(1);
pub const STATE_DISCONNECTED: Flags = Flags::from_bits(1 << 1);

state_codes! {
    /// State reported by SCO audio updates.
    pub enum ScoAudioState {
        Error = -1,
        Disconnected = 0,
        Connected = 1,
        Connecting = 2,
    }
}

impl ScoAudioState {
    /// `Connecting` carries no flag of its own.
    pub const fn flag(self) -> Option<Flags> {
        match self {
            Self::Connected => Some(STATE_CONNECTED),
            Self::Disconnected => Some(STATE_DISCONNECTED),
            Self::Connecting | Self::Error => None,
        }
    }
}

/// SCO updates are global; the audio manager has only one link.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoDecoder;

const TOPICS: [&str; 1] = [ACTION_SCO_AUDIO_STATE_UPDATED];

impl Decoder for ScoDecoder {
    fn topics(&self) -> &[&'static str] {
        &TOPICS
    }

    fn correlates(&self, _notification: &Notification) -> bool {
        true
    }

    fn decode(&self, n: &Notification) -> Result<Option<Flags>, DecodeError> {
        // An absent state reads as an error report.
        let raw = n
            .extras
            .int(EXTRA_SCO_AUDIO_STATE)
            .unwrap_or(ScoAudioState::Error.code());
        match ScoAudioState::from_code(raw) {
            Some(ScoAudioState::Error) => Err(DecodeError::new("sco audio reported error")),
            Some(state) => Ok(state.flag()),
            None => Err(DecodeError::out_of_range(EXTRA_SCO_AUDIO_STATE, raw)),
        }
    }
}
