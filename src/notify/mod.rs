//! Notification side of the convergence protocol.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ NotificationBus  │ Device-side publish/subscribe, keyed by topic
//! └────────┬─────────┘
//!          │ (topic, attribute bag), on a delivery thread
//!          ▼
//! ┌──────────────────────┐
//! │ NotificationRouter   │ Topic filter → correlation filter → Decoder
//! │  - Decoder (family)  │
//! └────────┬─────────────┘
//!          │ record_flag(flag)
//!          ▼
//! ┌──────────────────────┐
//! │ FlagAccumulator      │ Fired mask + completion timestamp, behind one lock
//! └────────┬─────────────┘
//!          │ snapshot()
//!          ▼
//! ┌──────────────────────┐
//! │ ConvergenceWaiter    │ Poll loop on the caller's thread
//! └──────────────────────┘
//! ```
//!
//! One router, one accumulator and one [`Subscription`] exist per waiter
//! invocation. The subscription is a drop guard, so it is released on every
//! exit path of the wait.

mod accumulator;
mod bus;
mod flags;
mod payload;
mod router;
mod subscription;

pub use accumulator::{FlagAccumulator, FlagSnapshot};
pub use bus::{LocalBus, NotificationBus, NotificationHandler, SubscriptionId};
pub use flags::Flags;
pub use payload::{AttributeBag, Extra, Notification, ParsePeerAddressError, PeerAddress};
pub use router::{
    CorrelationKey, DecodeError, Decoder, NotificationRouter, RouterStats, MAX_ROUTER_TOPICS,
};
pub use subscription::Subscription;
