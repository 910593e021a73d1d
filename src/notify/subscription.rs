//! Scoped bus subscription.
//!
//! A [`Subscription`] unsubscribes when it is dropped, so a waiter that exits
//! through `?`, an early return or a panic never leaves a stale handler
//! behind to corrupt a later operation's flags.

use crate::error::ConvergeResult;

use super::{NotificationBus, NotificationHandler, SubscriptionId};

/// Live registration on a [`NotificationBus`], released on drop.
pub struct Subscription<'a> {
    bus: &'a dyn NotificationBus,
    id: Option<SubscriptionId>,
}

impl<'a> Subscription<'a> {
    /// Subscribes `handler` to `topics` on `bus`.
    ///
    /// An empty topic list registers nothing; the returned guard is inert.
    pub fn new(bus: &'a dyn NotificationBus, topics: &[&str], handler: NotificationHandler) -> Self {
        let id = (!topics.is_empty()).then(|| bus.subscribe(topics, handler));
        Self { bus, id }
    }

    /// Bus handle, or `None` for an inert guard.
    pub fn id(&self) -> Option<SubscriptionId> {
        self.id
    }

    /// Returns `true` while the guard still holds a registration.
    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }

    /// Unsubscribes now and reports the bus's answer.
    pub fn release(mut self) -> ConvergeResult {
        match self.id.take() {
            Some(id) => self.bus.unsubscribe(id),
            None => Ok(()),
        }
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if let Err(err) = self.bus.unsubscribe(id) {
                warn!("failed to release subscription {:?}: {}", id, err);
            }
        }
    }
}

impl core::fmt::Debug for Subscription<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
