//! # Bluetooth Convergence Waiter
//!
//! This crate drives a Bluetooth subsystem through named state transitions
//! (power, discoverability, discovery, bonding, profile connections, SCO
//! audio, message access) and waits until each one has converged.
//!
//! A transition has converged when two independent views agree: the polled
//! state equals the goal, **and** every expected asynchronous notification
//! for that transition has been observed. Either view alone is not enough.
//!
//! ## Architecture
//!
//! ### Core Infrastructure
//! - [`ConvergenceWaiter`]: Pre-check, subscribe, trigger, poll, verify
//! - [`WaitLifecycle`]: CAS state machine for one wait (Triggered/Polling/Converged/...)
//! - [`Deadline`]: Monotonic deadline and bounded poll sleeps
//! - [`WaitConfig`]: Per-family timeouts and poll interval
//!
//! ### Notification Plumbing
//! - [`notify::NotificationBus`]: Topic-keyed publish/subscribe seam
//! - [`notify::NotificationRouter`]: Topic and correlation filtering, then decode
//! - [`notify::FlagAccumulator`]: Fired flag mask and completion timestamp
//! - [`notify::Subscription`]: Drop guard that always unsubscribes
//!
//! ### High-Level API
//! - [`ConformanceHarness`]: Named operations over one test session
//! - [`ProxyRegistry`]: Cached profile proxies, released once on close
//! - [`OutputSink`]: Completion and timing lines, to the log and a file
//!
//! ## Operation Families
//!
//! | Family        | Query               | Flags                                  |
//! |---------------|---------------------|----------------------------------------|
//! | Radio power   | adapter state       | `STATE_TURNING_ON`, `STATE_ON`, ...    |
//! | Scan mode     | scan mode           | `SCAN_MODE_CONNECTABLE[_DISCOVERABLE]` |
//! | Discovery     | `is_discovering`    | `DISCOVERY_STARTED`, `DISCOVERY_FINISHED` |
//! | Bonding       | bond state          | `STATE_BONDING`, `STATE_BONDED`, `STATE_NONE` |
//! | Profile / PAN | connection state    | `STATE_CONNECTING`, `STATE_CONNECTED`, ... |
//! | SCO audio     | `is_sco_on`         | `STATE_CONNECTED`, `STATE_DISCONNECTED` |
//! | Message (MCE) | connection state    | `MESSAGE_RECEIVED`, `STATUS_CHANGED`   |
//! | Tethering     | `is_tethering_on`   | none                                   |
//!
//! ## Examples
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use btconverge::{ConformanceHarness, OutputSink, WaitConfig};
//! use btconverge::notify::LocalBus;
//!
//! let bus = Arc::new(LocalBus::new());
//! let harness = ConformanceHarness::new(adapter, bus, OutputSink::with_file("bt", "/tmp/bt.txt"))
//!     .with_config(WaitConfig::default());
//!
//! harness.enable()?;
//! harness.pair(&device, b"1234")?;
//! harness.connect_profile(device.address(), Profile::A2dp)?;
//!
//! // Timeouts carry what was observed and which flags never fired.
//! if let Err(e) = harness.start_scan() {
//!     if let Some(diag) = e.as_timeout() {
//!         println!("missing flags {}", diag.unfired());
//!     }
//! }
//!
//! harness.close();
//! ```

#[macro_use]
extern crate log;

mod api;
mod clock;
mod config;
mod error;
mod harness;
mod lifecycle;
mod output;
mod registry;
mod waiter;

pub mod family;
pub mod notify;

pub use api::{
    Adapter, AudioManager, MapClientProxy, PanProxy, ProfileProxy, RemoteDevice, ServiceListener,
    TetheringRequest,
};
pub use clock::Deadline;
pub use config::{OperationFamily, WaitConfig};
pub use error::{ConvergeError, ConvergeResult, TimeoutDiagnostic};
pub use harness::ConformanceHarness;
pub use lifecycle::{WaitLifecycle, WaitPhase};
pub use output::OutputSink;
pub use registry::ProxyRegistry;
pub use waiter::{ConvergenceWaiter, Entry, Observed, Wait, WaitReport};

// Re-export the typed vocabularies most callers need
pub use family::{
    AdapterState, BondState, ConnectionState, MessageStatus, PanRole, PairingVariant, Profile,
    ScanMode, ScoAudioState,
};
pub use notify::{Flags, PeerAddress};
