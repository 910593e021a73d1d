//! Notification payloads as delivered by the notification bus.

use std::collections::BTreeMap;
use core::fmt;
use core::str::FromStr;

/// Hardware address of a remote peer, used as the primary correlation key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerAddress(pub [u8; 6]);

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerAddress({self})")
    }
}

/// Error returned when a string is not a colon-separated 6-octet address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid peer address: {0:?}")]
pub struct ParsePeerAddressError(String);

impl FromStr for PeerAddress {
    type Err = ParsePeerAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| ParsePeerAddressError(s.into()))?;
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParsePeerAddressError(s.into()))?;
        }
        if parts.next().is_some() {
            return Err(ParsePeerAddressError(s.into()));
        }
        Ok(Self(octets))
    }
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extra {
    Int(i32),
    Str(String),
    Peer(PeerAddress),
}

/// Opaque attribute bag carried by a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeBag(BTreeMap<String, Extra>);

impl AttributeBag {
    /// Empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: Extra) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets `key`, replacing any previous value.
    pub fn insert(&mut self, key: &str, value: Extra) {
        self.0.insert(key.into(), value);
    }

    /// Raw value of `key`.
    pub fn get(&self, key: &str) -> Option<&Extra> {
        self.0.get(key)
    }

    /// Integer attribute, or `None` if absent or of another type.
    pub fn int(&self, key: &str) -> Option<i32> {
        match self.0.get(key)? {
            Extra::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// String attribute, or `None` if absent or of another type.
    pub fn string(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            Extra::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Peer attribute, or `None` if absent or of another type.
    pub fn peer(&self, key: &str) -> Option<PeerAddress> {
        match self.0.get(key)? {
            Extra::Peer(v) => Some(*v),
            _ => None,
        }
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the bag holds no attribute.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One message delivered on the bus: a topic plus its attribute bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub topic: String,
    pub extras: AttributeBag,
}

impl Notification {
    /// Notification on `topic` with no attributes.
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.into(),
            extras: AttributeBag::new(),
        }
    }

    /// Attaches an integer attribute.
    pub fn with_int(mut self, key: &str, value: i32) -> Self {
        self.extras.insert(key, Extra::Int(value));
        self
    }

    /// Attaches a string attribute.
    pub fn with_str(mut self, key: &str, value: &str) -> Self {
        self.extras.insert(key, Extra::Str(value.into()));
        self
    }

    /// Attaches a peer attribute.
    pub fn with_peer(mut self, key: &str, value: PeerAddress) -> Self {
        self.extras.insert(key, Extra::Peer(value));
        self
    }
}
