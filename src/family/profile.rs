//! Profile connections, including the role-aware PAN variant.

use crate::notify::{CorrelationKey, DecodeError, Decoder, Flags, Notification, PeerAddress};

use super::bond::EXTRA_DEVICE;
use super::{discriminant, state_codes};

pub const ACTION_HEADSET_CONNECTION_STATE_CHANGED: &str =
    "android.bluetooth.headset.profile.action.CONNECTION_STATE_CHANGED";
pub const ACTION_A2DP_CONNECTION_STATE_CHANGED: &str =
    "android.bluetooth.a2dp.profile.action.CONNECTION_STATE_CHANGED";
pub const ACTION_HID_HOST_CONNECTION_STATE_CHANGED: &str =
    "android.bluetooth.input.profile.action.CONNECTION_STATE_CHANGED";
pub const ACTION_PAN_CONNECTION_STATE_CHANGED: &str =
    "android.bluetooth.pan.profile.action.CONNECTION_STATE_CHANGED";
pub const ACTION_MAP_CLIENT_CONNECTION_STATE_CHANGED: &str =
    "android.bluetooth.mapmce.profile.action.CONNECTION_STATE_CHANGED";

pub const EXTRA_STATE: &str = "android.bluetooth.profile.extra.STATE";
pub const EXTRA_LOCAL_ROLE: &str = "android.bluetooth.pan.extra.LOCAL_ROLE";

pub const STATE_DISCONNECTED: Flags = Flags::from_bits(1);
pub const STATE_CONNECTING: Flags = Flags::from_bits(1 << 1);
pub const STATE_CONNECTED: Flags = Flags::from_bits(1 << 2);
pub const STATE_DISCONNECTING: Flags = Flags::from_bits(1 << 3);

state_codes! {
    /// Profiles the harness can connect.
    pub enum Profile {
        Headset = 1,
        A2dp = 2,
        HidHost = 4,
        Pan = 5,
        MapClient = 18,
    }
}

state_codes! {
    /// Per-profile connection state.
    pub enum ConnectionState {
        Disconnected = 0,
        Connecting = 1,
        Connected = 2,
        Disconnecting = 3,
    }
}

state_codes! {
    /// Local PAN role.
    pub enum PanRole {
        Nap = 1,
        Panu = 2,
    }
}

impl Profile {
    /// Short name used in method strings and diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Headset => "headset",
            Self::A2dp => "a2dp",
            Self::HidHost => "hid_host",
            Self::Pan => "pan",
            Self::MapClient => "map_client",
        }
    }

    /// Topic carrying this profile's connection-state changes.
    pub const fn connection_topic(self) -> &'static str {
        match self {
            Self::Headset => ACTION_HEADSET_CONNECTION_STATE_CHANGED,
            Self::A2dp => ACTION_A2DP_CONNECTION_STATE_CHANGED,
            Self::HidHost => ACTION_HID_HOST_CONNECTION_STATE_CHANGED,
            Self::Pan => ACTION_PAN_CONNECTION_STATE_CHANGED,
            Self::MapClient => ACTION_MAP_CLIENT_CONNECTION_STATE_CHANGED,
        }
    }
}

impl ConnectionState {
    /// Flag fired when the profile reports this state.
    pub const fn flag(self) -> Flags {
        match self {
            Self::Disconnected => STATE_DISCONNECTED,
            Self::Connecting => STATE_CONNECTING,
            Self::Connected => STATE_CONNECTED,
            Self::Disconnecting => STATE_DISCONNECTING,
        }
    }
}

/// Decodes connection-state changes of one profile for one peer.
#[derive(Debug, Clone)]
pub struct ProfileDecoder {
    topic: [&'static str; 1],
    key: CorrelationKey,
}

impl ProfileDecoder {
    /// Decoder for `profile` updates about `peer`.
    pub fn new(profile: Profile, peer: PeerAddress) -> Self {
        Self {
            topic: [profile.connection_topic()],
            key: CorrelationKey::peer(peer),
        }
    }
}

impl Decoder for ProfileDecoder {
    fn topics(&self) -> &[&'static str] {
        &self.topic
    }

    fn correlates(&self, n: &Notification) -> bool {
        self.key.peer.is_some() && n.extras.peer(EXTRA_DEVICE) == self.key.peer
    }

    fn decode(&self, n: &Notification) -> Result<Option<Flags>, DecodeError> {
        let state = discriminant(n, EXTRA_STATE, ConnectionState::from_code)?;
        Ok(Some(state.flag()))
    }
}

/// PAN decoder: the local role must match before the peer is even looked at.
#[derive(Debug, Clone)]
pub struct PanDecoder {
    inner: ProfileDecoder,
    role: PanRole,
}

impl PanDecoder {
    /// Decoder for PAN updates about `peer` in local `role`.
    pub fn new(peer: PeerAddress, role: PanRole) -> Self {
        let mut inner = ProfileDecoder::new(Profile::Pan, peer);
        inner.key = inner.key.with_role(role.code());
        Self { inner, role }
    }

    /// Local role notifications must carry.
    pub fn role(&self) -> PanRole {
        self.role
    }
}

impl Decoder for PanDecoder {
    fn topics(&self) -> &[&'static str] {
        self.inner.topics()
    }

    fn correlates(&self, n: &Notification) -> bool {
        n.extras.int(EXTRA_LOCAL_ROLE) == self.inner.key.role && self.inner.correlates(n)
    }

    fn decode(&self, n: &Notification) -> Result<Option<Flags>, DecodeError> {
        self.inner.decode(n)
    }
}
