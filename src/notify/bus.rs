//! Publish/subscribe seam between the harness and the device's notification
//! stream.
//!
//! The harness only needs `subscribe`/`unsubscribe`; the device side owns
//! delivery. [`LocalBus`] is an in-process implementation that delivers on the
//! publishing thread, used by test doubles and by embedders that bridge an
//! external stream into the harness.

use std::collections::BTreeMap;
use std::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::RwLock;

use crate::error::{ConvergeError, ConvergeResult};

use super::Notification;

/// Callback invoked for every notification on a subscribed topic.
///
/// Runs on whatever thread the bus delivers from.
pub type NotificationHandler = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Handle identifying one subscription on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Notification delivery mechanism keyed by topic name.
pub trait NotificationBus: Send + Sync {
    /// Registers `handler` for every topic in `topics`.
    fn subscribe(&self, topics: &[&str], handler: NotificationHandler) -> SubscriptionId;

    /// Removes a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError::NotSubscribed`] if `id` is unknown.
    fn unsubscribe(&self, id: SubscriptionId) -> ConvergeResult;
}

struct Registration {
    topics: Vec<String>,
    handler: NotificationHandler,
}

/// In-process bus delivering synchronously on the publisher's thread.
pub struct LocalBus {
    subscriptions: RwLock<BTreeMap<SubscriptionId, Registration>>,
    next_id: AtomicU64,
}

impl LocalBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Delivers `notification` to every subscriber of its topic.
    ///
    /// Handlers are called after the registry lock is released, so a handler
    /// may itself subscribe or unsubscribe. Returns the number of handlers
    /// invoked.
    pub fn publish(&self, notification: &Notification) -> usize {
        let handlers: Vec<NotificationHandler> = self
            .subscriptions
            .read()
            .values()
            .filter(|reg| reg.topics.iter().any(|t| *t == notification.topic))
            .map(|reg| Arc::clone(&reg.handler))
            .collect();

        trace!(
            "publishing {} to {} subscriber(s)",
            notification.topic,
            handlers.len()
        );
        for handler in &handlers {
            handler(notification);
        }
        handlers.len()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Returns `true` if the subscription is still registered.
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.read().contains_key(&id)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus for LocalBus {
    fn subscribe(&self, topics: &[&str], handler: NotificationHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let registration = Registration {
            topics: topics.iter().map(|t| String::from(*t)).collect(),
            handler,
        };
        self.subscriptions.write().insert(id, registration);
        debug!("bus: subscribed {:?} to {:?}", id, topics);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> ConvergeResult {
        if self.subscriptions.write().remove(&id).is_none() {
            return Err(ConvergeError::NotSubscribed(id));
        }
        debug!("bus: unsubscribed {:?}", id);
        Ok(())
    }
}
