//! Per-family notification vocabularies.
//!
//! Each operation family (radio power and discoverability, bonding, profile
//! connection, SCO audio, message status) contributes:
//!
//! - the state codes its polled query returns, as a typed enum;
//! - its flag vocabulary, as single-bit [`Flags`](crate::notify::Flags) constants;
//! - the topics and attribute keys its notifications use;
//! - a [`Decoder`] implementing correlation and decode for those topics.
//!
//! [`FamilyDecoder`] tags one decoder per family so the harness can drive
//! every operation through a single router type.

/// Declares a state enum backed by the device API's integer codes.
macro_rules! state_codes {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $code:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $code,)+
        }

        impl $name {
            /// Decodes a raw code, or `None` if it is outside the vocabulary.
            pub const fn from_code(code: i32) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Raw code as used on the wire.
            pub const fn code(self) -> i32 {
                self as i32
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Debug::fmt(self, f)
            }
        }
    };
}
pub(crate) use state_codes;

pub mod adapter;
pub mod bond;
pub mod message;
pub mod profile;
pub mod sco;

use crate::notify::{DecodeError, Decoder, Flags, Notification};

pub use adapter::{AdapterDecoder, AdapterState, ScanMode};
pub use bond::{BondDecoder, BondState, PairingResponder, PairingVariant};
pub use message::{MessageDecoder, MessageHandleSlot, MessageStatus};
pub use profile::{ConnectionState, PanDecoder, PanRole, Profile, ProfileDecoder};
pub use sco::{ScoAudioState, ScoDecoder};

/// Reads an integer discriminant and maps it through `from_code`.
pub(crate) fn discriminant<T>(
    notification: &Notification,
    key: &str,
    from_code: impl FnOnce(i32) -> Option<T>,
) -> Result<T, DecodeError> {
    let value = notification
        .extras
        .int(key)
        .ok_or_else(|| DecodeError::missing(key))?;
    from_code(value).ok_or_else(|| DecodeError::out_of_range(key, value))
}

/// Decoder selected by operation family.
pub enum FamilyDecoder {
    Adapter(AdapterDecoder),
    Bond(BondDecoder),
    Profile(ProfileDecoder),
    Pan(PanDecoder),
    Sco(ScoDecoder),
    Message(MessageDecoder),
    /// No notification confirms the operation; polling alone decides.
    Silent,
}

impl FamilyDecoder {
    fn inner(&self) -> Option<&dyn Decoder> {
        match self {
            Self::Adapter(d) => Some(d as &dyn Decoder),
            Self::Bond(d) => Some(d as &dyn Decoder),
            Self::Profile(d) => Some(d as &dyn Decoder),
            Self::Pan(d) => Some(d as &dyn Decoder),
            Self::Sco(d) => Some(d as &dyn Decoder),
            Self::Message(d) => Some(d as &dyn Decoder),
            Self::Silent => None,
        }
    }
}

impl Decoder for FamilyDecoder {
    fn topics(&self) -> &[&'static str] {
        match self.inner() {
            Some(d) => d.topics(),
            None => &[],
        }
    }

    fn correlates(&self, notification: &Notification) -> bool {
        self.inner().is_some_and(|d| d.correlates(notification))
    }

    fn decode(&self, notification: &Notification) -> Result<Option<Flags>, DecodeError> {
        match self.inner() {
            Some(d) => d.decode(notification),
            None => Ok(None),
        }
    }
}

impl From<AdapterDecoder> for FamilyDecoder {
    fn from(d: AdapterDecoder) -> Self {
        Self::Adapter(d)
    }
}

impl From<BondDecoder> for FamilyDecoder {
    fn from(d: BondDecoder) -> Self {
        Self::Bond(d)
    }
}

impl From<ProfileDecoder> for FamilyDecoder {
    fn from(d: ProfileDecoder) -> Self {
        Self::Profile(d)
    }
}

impl From<PanDecoder> for FamilyDecoder {
    fn from(d: PanDecoder) -> Self {
        Self::Pan(d)
    }
}

impl From<ScoDecoder> for FamilyDecoder {
    fn from(d: ScoDecoder) -> Self {
        Self::Sco(d)
    }
}

impl From<MessageDecoder> for FamilyDecoder {
    fn from(d: MessageDecoder) -> Self {
        Self::Message(d)
    }
}
