//! Bonding with a remote peer.

use std::sync::Arc;

use crate::api::RemoteDevice;
use crate::notify::{DecodeError, Decoder, Flags, Notification, PeerAddress};

use super::{discriminant, state_codes};

pub const ACTION_BOND_STATE_CHANGED: &str = "android.bluetooth.device.action.BOND_STATE_CHANGED";
pub const ACTION_PAIRING_REQUEST: &str = "android.bluetooth.device.action.PAIRING_REQUEST";

pub const EXTRA_DEVICE: &str = "android.bluetooth.device.extra.DEVICE";
pub const EXTRA_BOND_STATE: &str = "android.bluetooth.device.extra.BOND_STATE";
pub const EXTRA_PAIRING_VARIANT: &str = "android.bluetooth.device.extra.PAIRING_VARIANT";

pub const STATE_BONDED: Flags = Flags::from_bits(1);
pub const STATE_BONDING: Flags = Flags::from_bits(1 << 1);
pub const STATE_NONE: Flags = Flags::from_bits(1 << 2);

state_codes! {
    /// Bond state of a remote device.
    pub enum BondState {
        None = 10,
        Bonding = 11,
        Bonded = 12,
    }
}

state_codes! {
    /// How the remote side asked to authenticate.
    pub enum PairingVariant {
        Pin = 0,
        Passkey = 1,
        PasskeyConfirmation = 2,
        Consent = 3,
        DisplayPasskey = 4,
        DisplayPin = 5,
        OobConsent = 6,
        Pin16Digits = 7,
    }
}

impl BondState {
    /// Flag fired when the peer reports this bond state.
    pub const fn flag(self) -> Flags {
        match self {
            Self::None => STATE_NONE,
            Self::Bonding => STATE_BONDING,
            Self::Bonded => STATE_BONDED,
        }
    }
}

/// Answers pairing requests on behalf of the local side.
#[derive(Clone)]
pub struct PairingResponder {
    device: Arc<dyn RemoteDevice>,
    pin: Vec<u8>,
}

impl PairingResponder {
    /// Responder replying to `device` with `pin` or a confirmation.
    pub fn new(device: Arc<dyn RemoteDevice>, pin: &[u8]) -> Self {
        Self {
            device,
            pin: pin.to_vec(),
        }
    }

    fn respond(&self, variant: PairingVariant) {
        let accepted = match variant {
            PairingVariant::Pin | PairingVariant::Pin16Digits => self.device.set_pin(&self.pin),
            PairingVariant::PasskeyConfirmation | PairingVariant::Consent => {
                self.device.set_pairing_confirmation(true)
            }
            PairingVariant::Passkey
            | PairingVariant::DisplayPasskey
            | PairingVariant::DisplayPin
            | PairingVariant::OobConsent => return,
        };
        if !accepted {
            warn!("pairing reply for {:?} rejected by {}", variant, self.device.address());
        }
    }
}

/// Decodes bond-state changes for one peer and answers its pairing requests.
#[derive(Clone)]
pub struct BondDecoder {
    peer: PeerAddress,
    responder: Option<PairingResponder>,
}

impl BondDecoder {
    /// Decoder that only observes bond state.
    pub fn new(peer: PeerAddress) -> Self {
        Self {
            peer,
            responder: None,
        }
    }

    /// Decoder that also replies to pairing requests.
    pub fn with_responder(peer: PeerAddress, responder: PairingResponder) -> Self {
        Self {
            peer,
            responder: Some(responder),
        }
    }
}

const TOPICS: [&str; 2] = [ACTION_PAIRING_REQUEST, ACTION_BOND_STATE_CHANGED];

impl Decoder for BondDecoder {
    fn topics(&self) -> &[&'static str] {
        &TOPICS
    }

    fn correlates(&self, n: &Notification) -> bool {
        n.extras.peer(EXTRA_DEVICE) == Some(self.peer)
    }

    fn decode(&self, n: &Notification) -> Result<Option<Flags>, DecodeError> {
        match n.topic.as_str() {
            ACTION_PAIRING_REQUEST => {
                let variant = discriminant(n, EXTRA_PAIRING_VARIANT, PairingVariant::from_code)?;
                if let Some(responder) = &self.responder {
                    responder.respond(variant);
                }
                Ok(None)
            }
            ACTION_BOND_STATE_CHANGED => {
                let state = discriminant(n, EXTRA_BOND_STATE, BondState::from_code)?;
                Ok(Some(state.flag()))
            }
            _ => Ok(None),
        }
    }
}
