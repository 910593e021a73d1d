//! Notification routing for a single in-flight operation.
//!
//! A [`NotificationRouter`] owns the operation's [`FlagAccumulator`] and a
//! family [`Decoder`]. Every inbound notification is first checked against
//! the decoder's correlation rule and silently dropped if it belongs to some
//! other peer or role; otherwise it is decoded into at most one flag.
//!
//! Delivery happens on a thread the caller does not control, so a malformed
//! payload cannot fail the operation directly. The router stores the first
//! protocol violation it sees and the poll loop picks it up via
//! [`NotificationRouter::check`].

use std::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use arrayvec::ArrayVec;
use spin::Mutex;

use crate::error::{ConvergeError, ConvergeResult};

use super::{
    FlagAccumulator, Flags, Notification, NotificationBus, NotificationHandler, PeerAddress,
    Subscription,
};

/// Most topics a single router listens on.
pub const MAX_ROUTER_TOPICS: usize = 4;

/// Identity a router uses to reject notifications of unrelated operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelationKey {
    /// Remote peer the operation targets, if any.
    pub peer: Option<PeerAddress>,
    /// Role discriminator for multi-role profiles.
    pub role: Option<i32>,
}

impl CorrelationKey {
    /// Matches every notification.
    pub const ANY: Self = Self {
        peer: None,
        role: None,
    };

    /// Key bound to a remote peer.
    pub const fn peer(peer: PeerAddress) -> Self {
        Self {
            peer: Some(peer),
            role: None,
        }
    }

    /// Adds a role discriminator.
    pub const fn with_role(mut self, role: i32) -> Self {
        self.role = Some(role);
        self
    }
}

/// Reason a notification could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError(pub String);

impl DecodeError {
    /// Free-form decode failure.
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }

    /// The discriminant attribute was missing or not an integer.
    pub fn missing(key: &str) -> Self {
        Self(format!("missing {key}"))
    }

    /// The discriminant attribute held a value outside the vocabulary.
    pub fn out_of_range(key: &str, value: i32) -> Self {
        Self(format!("{key}={value} out of range"))
    }
}

/// Per-family decode and correlation rules.
pub trait Decoder: Send + Sync + 'static {
    /// Topics this family listens on.
    fn topics(&self) -> &[&'static str];

    /// Returns `true` if `notification` belongs to the operation in progress.
    fn correlates(&self, notification: &Notification) -> bool;

    /// Maps a correlated notification to at most one flag.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the payload's discriminant is absent or
    /// out of range.
    fn decode(&self, notification: &Notification) -> Result<Option<Flags>, DecodeError>;
}

/// Delivery counters, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Notifications that reached the decoder.
    pub accepted: u64,
    /// Notifications dropped by topic or correlation filtering.
    pub discarded: u64,
}

struct RouterShared<D> {
    method: String,
    decoder: D,
    topics: ArrayVec<&'static str, MAX_ROUTER_TOPICS>,
    accumulator: FlagAccumulator,
    violation: Mutex<Option<ConvergeError>>,
    accepted: AtomicU64,
    discarded: AtomicU64,
}

impl<D: Decoder> RouterShared<D> {
    fn handle(&self, notification: &Notification) {
        if !self.topics.iter().any(|t| *t == notification.topic) {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if !self.decoder.correlates(notification) {
            trace!("{}: uncorrelated {} dropped", self.method, notification.topic);
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.accepted.fetch_add(1, Ordering::Relaxed);

        match self.decoder.decode(notification) {
            Ok(Some(flag)) => {
                let previous = self.accumulator.record_flag(flag);
                trace!(
                    "{}: {} -> flag {} (fired {} -> {})",
                    self.method,
                    notification.topic,
                    flag,
                    previous,
                    previous | flag
                );
            }
            Ok(None) => {}
            Err(DecodeError(detail)) => {
                warn!("{}: malformed {}: {}", self.method, notification.topic, detail);
                let mut slot = self.violation.lock();
                if slot.is_none() {
                    *slot = Some(ConvergeError::Protocol {
                        method: self.method.clone(),
                        topic: notification.topic.clone(),
                        detail,
                    });
                }
            }
        }
    }
}

/// Converts a notification stream into flag updates for one operation.
pub struct NotificationRouter<D> {
    shared: Arc<RouterShared<D>>,
}

impl<D: Decoder> NotificationRouter<D> {
    /// Creates a router for `method` expecting `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError::TooManyTopics`] if the decoder names more
    /// than [`MAX_ROUTER_TOPICS`] topics.
    pub fn new(method: &str, decoder: D, expected: Flags) -> ConvergeResult<Self> {
        let mut topics: ArrayVec<&'static str, MAX_ROUTER_TOPICS> = ArrayVec::new();
        for topic in decoder.topics() {
            topics.try_push(*topic).map_err(|_| ConvergeError::TooManyTopics {
                method: method.into(),
                topics: decoder.topics().len(),
                max: MAX_ROUTER_TOPICS,
            })?;
        }
        Ok(Self {
            shared: Arc::new(RouterShared {
                method: method.into(),
                decoder,
                topics,
                accumulator: FlagAccumulator::new(expected),
                violation: Mutex::new(None),
                accepted: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        })
    }

    /// Feeds one notification through filter, decode and record.
    pub fn handle(&self, notification: &Notification) {
        self.shared.handle(notification);
    }

    /// Bus callback that forwards into this router.
    pub fn handler(&self) -> NotificationHandler {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |n: &Notification| shared.handle(n))
    }

    /// Subscribes this router to its topics on `bus`.
    pub fn attach<'b>(&self, bus: &'b dyn NotificationBus) -> Subscription<'b> {
        let sub = Subscription::new(bus, &self.shared.topics, self.handler());
        debug!(
            "{}: listening on {:?} as {:?}",
            self.shared.method,
            self.shared.topics.as_slice(),
            sub.id()
        );
        sub
    }

    /// Topics the router is subscribed to.
    pub fn topics(&self) -> &[&'static str] {
        &self.shared.topics
    }

    /// The family decoder.
    pub fn decoder(&self) -> &D {
        &self.shared.decoder
    }

    /// Flags recorded for this operation.
    pub fn accumulator(&self) -> &FlagAccumulator {
        &self.shared.accumulator
    }

    /// Fails with the first protocol violation seen, if any.
    pub fn check(&self) -> ConvergeResult {
        match self.shared.violation.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Delivery counters so far.
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            accepted: self.shared.accepted.load(Ordering::Relaxed),
            discarded: self.shared.discarded.load(Ordering::Relaxed),
        }
    }
}
