//! Session-scoped cache of profile proxies.
//!
//! Profile operations need a proxy object that the adapter hands out
//! asynchronously through a [`ServiceListener`]. The registry is that
//! listener: [`ProxyRegistry::connect`] requests a proxy once, polls until it
//! is delivered, and caches it for the rest of the session. A
//! service-disconnected callback evicts the entry so the next operation
//! requests a fresh one.
//!
//! # Lifecycle
//!
//! - `connect()`: cached, or requested and awaited up to the proxy timeout
//! - `on_service_disconnected()`: evicts
//! - `release_all()`: returns every cached proxy to the adapter, exactly once

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::RwLock;

use crate::api::{Adapter, ProfileProxy, ServiceListener};
use crate::clock::Deadline;
use crate::error::{ConvergeError, ConvergeResult};
use crate::family::Profile;

/// Profile proxy cache and service listener.
///
/// # Concurrency
///
/// The listener callbacks run on the adapter's delivery thread while
/// `connect` polls on the caller's thread; the cache is behind a read-write
/// lock and no lock is held while calling into the adapter.
pub struct ProxyRegistry {
    /// Keyed by profile code.
    proxies: RwLock<BTreeMap<i32, Arc<dyn ProfileProxy>>>,
    released: AtomicBool,
}

impl ProxyRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            proxies: RwLock::new(BTreeMap::new()),
            released: AtomicBool::new(false),
        }
    }

    /// Cached proxy for `profile`, if delivered.
    pub fn get(&self, profile: Profile) -> Option<Arc<dyn ProfileProxy>> {
        self.proxies.read().get(&profile.code()).cloned()
    }

    /// Number of cached proxies.
    pub fn len(&self) -> usize {
        self.proxies.read().len()
    }

    /// Returns `true` if no proxy is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once [`ProxyRegistry::release_all`] has run.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Returns the proxy for `profile`, requesting it from `adapter` if it is
    /// not cached yet.
    ///
    /// # Arguments
    ///
    /// * `timeout` - How long to wait for the listener to deliver the proxy.
    /// * `poll` - Interval between cache checks.
    ///
    /// # Errors
    ///
    /// - [`ConvergeError::Closed`] after [`ProxyRegistry::release_all`].
    /// - [`ConvergeError::ProxyUnavailable`] if the adapter refuses the
    ///   request or the proxy is not delivered in time.
    pub fn connect(
        self: &Arc<Self>,
        adapter: &dyn Adapter,
        profile: Profile,
        timeout: Duration,
        poll: Duration,
    ) -> ConvergeResult<Arc<dyn ProfileProxy>> {
        if self.is_released() {
            return Err(ConvergeError::Closed);
        }
        if let Some(proxy) = self.get(profile) {
            return Ok(proxy);
        }

        let unavailable = || ConvergeError::ProxyUnavailable {
            profile: profile.name(),
        };
        let listener: Arc<dyn ServiceListener> = Arc::clone(self) as Arc<dyn ServiceListener>;
        if !adapter.get_profile_proxy(profile, listener) {
            warn!("{} proxy request refused", profile.name());
            return Err(unavailable());
        }
        debug!("{} proxy requested", profile.name());

        let deadline = Deadline::after(timeout);
        loop {
            if let Some(proxy) = self.get(profile) {
                return Ok(proxy);
            }
            if deadline.is_expired_at(std::time::Instant::now()) {
                warn!(
                    "{} proxy not delivered within {} ms",
                    profile.name(),
                    timeout.as_millis()
                );
                return Err(unavailable());
            }
            deadline.sleep_poll(poll);
        }
    }

    /// Closes every cached proxy. Later calls do nothing.
    ///
    /// Returns the number of proxies closed.
    pub fn release_all(&self, adapter: &dyn Adapter) -> usize {
        if self.released.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let drained = core::mem::take(&mut *self.proxies.write());
        let count = drained.len();
        for (code, proxy) in drained {
            if let Some(profile) = Profile::from_code(code) {
                debug!("closing {} proxy", profile.name());
                adapter.close_profile_proxy(profile, proxy);
            }
        }
        count
    }
}

impl Default for ProxyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceListener for ProxyRegistry {
    fn on_service_connected(&self, profile: Profile, proxy: Arc<dyn ProfileProxy>) {
        if self.is_released() {
            debug!("{} proxy delivered after release, ignored", profile.name());
            return;
        }
        debug!("{} proxy connected", profile.name());
        self.proxies.write().insert(profile.code(), proxy);
    }

    fn on_service_disconnected(&self, profile: Profile) {
        if self.proxies.write().remove(&profile.code()).is_some() {
            debug!("{} proxy disconnected", profile.name());
        }
    }
}

impl core::fmt::Debug for ProxyRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProxyRegistry")
            .field("cached", &self.len())
            .field("released", &self.is_released())
            .finish()
    }
}
