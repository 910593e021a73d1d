//! Local adapter: radio power, scan mode and discovery.

use crate::notify::{DecodeError, Decoder, Flags, Notification};

use super::{discriminant, state_codes};

pub const ACTION_STATE_CHANGED: &str = "android.bluetooth.adapter.action.STATE_CHANGED";
pub const ACTION_SCAN_MODE_CHANGED: &str = "android.bluetooth.adapter.action.SCAN_MODE_CHANGED";
pub const ACTION_DISCOVERY_STARTED: &str = "android.bluetooth.adapter.action.DISCOVERY_STARTED";
pub const ACTION_DISCOVERY_FINISHED: &str = "android.bluetooth.adapter.action.DISCOVERY_FINISHED";

pub const EXTRA_STATE: &str = "android.bluetooth.adapter.extra.STATE";
pub const EXTRA_SCAN_MODE: &str = "android.bluetooth.adapter.extra.SCAN_MODE";

/// Status code returned by a successful `set_scan_mode`.
pub const STATUS_SUCCESS: i32 = 0;

pub const DISCOVERY_STARTED: Flags = Flags::from_bits(1);
pub const DISCOVERY_FINISHED: Flags = Flags::from_bits(1 << 1);
pub const SCAN_MODE_NONE: Flags = Flags::from_bits(1 << 2);
pub const SCAN_MODE_CONNECTABLE: Flags = Flags::from_bits(1 << 3);
pub const SCAN_MODE_CONNECTABLE_DISCOVERABLE: Flags = Flags::from_bits(1 << 4);
pub const STATE_OFF: Flags = Flags::from_bits(1 << 5);
pub const STATE_TURNING_ON: Flags = Flags::from_bits(1 << 6);
pub const STATE_ON: Flags = Flags::from_bits(1 << 7);
pub const STATE_TURNING_OFF: Flags = Flags::from_bits(1 << 8);

state_codes! {
    /// Radio power state.
    pub enum AdapterState {
        Off = 10,
        TurningOn = 11,
        On = 12,
        TurningOff = 13,
    }
}

state_codes! {
    /// Inquiry/page scan mode.
    pub enum ScanMode {
        None = 20,
        Connectable = 21,
        ConnectableDiscoverable = 23,
    }
}

impl AdapterState {
    /// Flag fired when the adapter reports this state.
    pub const fn flag(self) -> Flags {
        match self {
            Self::Off => STATE_OFF,
            Self::TurningOn => STATE_TURNING_ON,
            Self::On => STATE_ON,
            Self::TurningOff => STATE_TURNING_OFF,
        }
    }
}

impl ScanMode {
    /// Flag fired when the adapter switches to this mode.
    pub const fn flag(self) -> Flags {
        match self {
            Self::None => SCAN_MODE_NONE,
            Self::Connectable => SCAN_MODE_CONNECTABLE,
            Self::ConnectableDiscoverable => SCAN_MODE_CONNECTABLE_DISCOVERABLE,
        }
    }
}

/// Adapter notifications are global; every one correlates.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdapterDecoder;

const TOPICS: [&str; 4] = [
    ACTION_DISCOVERY_FINISHED,
    ACTION_DISCOVERY_STARTED,
    ACTION_SCAN_MODE_CHANGED,
    ACTION_STATE_CHANGED,
];

impl Decoder for AdapterDecoder {
    fn topics(&self) -> &[&'static str] {
        &TOPICS
    }

    fn correlates(&self, _notification: &Notification) -> bool {
        true
    }

    fn decode(&self, n: &Notification) -> Result<Option<Flags>, DecodeError> {
        let flag = match n.topic.as_str() {
            ACTION_DISCOVERY_STARTED => DISCOVERY_STARTED,
            ACTION_DISCOVERY_FINISHED => DISCOVERY_FINISHED,
            ACTION_SCAN_MODE_CHANGED => discriminant(n, EXTRA_SCAN_MODE, ScanMode::from_code)?.flag(),
            ACTION_STATE_CHANGED => discriminant(n, EXTRA_STATE, AdapterState::from_code)?.flag(),
            _ => return Ok(None),
        };
        Ok(Some(flag))
    }
}
