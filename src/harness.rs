//! Named conformance operations built on the convergence wait.
//!
//! A [`ConformanceHarness`] owns one test session: the device API handles,
//! the notification bus, the proxy registry, the record sink and the last
//! received message handle. Each operation checks its preconditions, builds a
//! [`Wait`] describing its goal, flags, entry classification and trigger, and
//! runs it. Converged waits write `"{method} completed in N ms"` (or
//! `"{method} completed"` when no trigger time applies) to the sink;
//! already-satisfied waits write nothing.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spin::Mutex;

use crate::api::{Adapter, AudioManager, MapClientProxy, PanProxy, ProfileProxy, RemoteDevice, TetheringRequest};
use crate::config::{OperationFamily, WaitConfig};
use crate::error::{ConvergeError, ConvergeResult};
use crate::family::{
    adapter, bond, message, profile, sco, AdapterDecoder, AdapterState, BondDecoder, BondState,
    ConnectionState, FamilyDecoder, MessageDecoder, MessageHandleSlot, MessageStatus, PairingResponder,
    PanDecoder, PanRole, Profile, ProfileDecoder, ScanMode, ScoDecoder,
};
use crate::lifecycle::WaitPhase;
use crate::notify::{Flags, NotificationBus, PeerAddress};
use crate::output::OutputSink;
use crate::registry::ProxyRegistry;
use crate::waiter::{ConvergenceWaiter, Entry, Observed, Wait, WaitReport};

/// One conformance test session.
pub struct ConformanceHarness {
    adapter: Arc<dyn Adapter>,
    audio: Option<Arc<dyn AudioManager>>,
    bus: Arc<dyn NotificationBus>,
    config: WaitConfig,
    proxies: Arc<ProxyRegistry>,
    sink: OutputSink,
    message_handle: MessageHandleSlot,
    tethering: Mutex<Option<Box<dyn TetheringRequest>>>,
    closed: AtomicBool,
}

/// Parameters of a profile connect or disconnect.
struct Link<'p> {
    method: &'p str,
    proxy: &'p dyn ProfileProxy,
    peer: PeerAddress,
    decoder: FamilyDecoder,
    goal: ConnectionState,
    expected: Flags,
    initiate: bool,
}

impl ConformanceHarness {
    /// Creates a session with default timeouts and no audio manager.
    pub fn new(adapter: Arc<dyn Adapter>, bus: Arc<dyn NotificationBus>, sink: OutputSink) -> Self {
        Self {
            adapter,
            audio: None,
            bus,
            config: WaitConfig::default(),
            proxies: Arc::new(ProxyRegistry::new()),
            sink,
            message_handle: MessageHandleSlot::default(),
            tethering: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Replaces the timeouts and poll interval.
    pub fn with_config(mut self, config: WaitConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables the SCO operations.
    pub fn with_audio_manager(mut self, audio: Arc<dyn AudioManager>) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Timeouts in effect.
    pub fn config(&self) -> &WaitConfig {
        &self.config
    }

    /// Profile proxies cached by this session.
    pub fn proxies(&self) -> &ProxyRegistry {
        &self.proxies
    }

    /// Handle stored by the last successful [`Self::mce_get_unread_message`].
    pub fn message_handle(&self) -> Option<String> {
        self.message_handle.lock().clone()
    }

    /// Returns `true` once [`Self::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ---- radio power -------------------------------------------------------

    /// Turns the radio on.
    pub fn enable(&self) -> ConvergeResult<WaitReport> {
        self.ensure_open()?;
        self.write_output("Enabling Bluetooth adapter.");
        self.power("enable()", AdapterState::On, AdapterState::TurningOn, || self.adapter.enable())
    }

    /// Turns the radio off.
    pub fn disable(&self) -> ConvergeResult<WaitReport> {
        self.ensure_open()?;
        self.write_output("Disabling Bluetooth adapter.");
        self.power("disable()", AdapterState::Off, AdapterState::TurningOff, || self.adapter.disable())
    }

    fn power(
        &self,
        method: &str,
        goal: AdapterState,
        in_flight: AdapterState,
        trigger: impl Fn() -> bool,
    ) -> ConvergeResult<WaitReport> {
        let adapter = &*self.adapter;
        let wait = Wait::new(method, goal, self.config.timeout(OperationFamily::EnableDisable), || {
            Observed::from_code(adapter.state(), AdapterState::from_code)
        })
        .listen(AdapterDecoder, in_flight.flag() | goal.flag())
        .on_entry(move |s| Ok(if s == in_flight { Entry::MidTransition } else { Entry::Trigger }))
        .trigger(trigger);
        self.run(wait)
    }

    // ---- scan mode and discovery ------------------------------------------

    /// Makes the adapter connectable and discoverable.
    pub fn discoverable(&self) -> ConvergeResult<WaitReport> {
        self.scan_mode("discoverable()", ScanMode::ConnectableDiscoverable)
    }

    /// Makes the adapter connectable only.
    pub fn undiscoverable(&self) -> ConvergeResult<WaitReport> {
        self.scan_mode("undiscoverable()", ScanMode::Connectable)
    }

    fn scan_mode(&self, method: &str, goal: ScanMode) -> ConvergeResult<WaitReport> {
        self.ensure_open()?;
        self.require_enabled(method)?;
        let adapter = &*self.adapter;
        let wait = Wait::new(method, goal, self.config.timeout(OperationFamily::Discoverable), || {
            Observed::from_code(adapter.scan_mode(), ScanMode::from_code)
        })
        .listen(AdapterDecoder, goal.flag())
        .trigger(|| adapter.set_scan_mode(goal.code()) == adapter::STATUS_SUCCESS);
        self.run(wait)
    }

    /// Starts device discovery.
    pub fn start_scan(&self) -> ConvergeResult<WaitReport> {
        self.discovery("start_scan()", true, adapter::DISCOVERY_STARTED, || {
            self.adapter.start_discovery()
        })
    }

    /// Cancels device discovery.
    pub fn stop_scan(&self) -> ConvergeResult<WaitReport> {
        self.discovery("stop_scan()", false, adapter::DISCOVERY_FINISHED, || {
            self.adapter.cancel_discovery()
        })
    }

    fn discovery(
        &self,
        method: &str,
        goal: bool,
        expected: Flags,
        trigger: impl Fn() -> bool,
    ) -> ConvergeResult<WaitReport> {
        self.ensure_open()?;
        self.require_enabled(method)?;
        let adapter = &*self.adapter;
        let timeout = self.config.timeout(OperationFamily::Scan);
        let wait = Wait::new(method, goal, timeout, || Observed::Known(adapter.is_discovering()))
            .listen(AdapterDecoder, expected)
            .trigger(trigger);
        self.run(wait)
    }

    // ---- PAN tethering -----------------------------------------------------

    /// Requests the tethered interface and waits for tethering to turn on.
    pub fn enable_pan(&self) -> ConvergeResult<WaitReport> {
        self.ensure_open()?;
        let proxy = self.proxy(Profile::Pan)?;
        let pan = pan_of(&*proxy)?;
        let wait = Wait::new("enable_pan()", true, self.config.timeout(OperationFamily::Tethering), || {
            Observed::Known(pan.is_tethering_on())
        })
        .trigger(|| match pan.request_tethered_interface() {
            Some(request) => {
                if let Some(stale) = self.tethering.lock().replace(request) {
                    stale.release();
                }
                true
            }
            None => false,
        });
        self.run(wait)
    }

    /// Releases the tethered interface and waits for tethering to turn off.
    pub fn disable_pan(&self) -> ConvergeResult<WaitReport> {
        self.ensure_open()?;
        let proxy = self.proxy(Profile::Pan)?;
        let pan = pan_of(&*proxy)?;
        let wait = Wait::new("disable_pan()", false, self.config.timeout(OperationFamily::Tethering), || {
            Observed::Known(pan.is_tethering_on())
        })
        .trigger(|| {
            let request = self.tethering.lock().take();
            if let Some(request) = request {
                request.release();
            }
            true
        });
        self.run(wait)
    }

    // ---- bonding -----------------------------------------------------------

    /// Initiates bonding with `device`, answering its pairing requests with
    /// `pin` or a confirmation.
    pub fn pair(&self, device: &Arc<dyn RemoteDevice>, pin: &[u8]) -> ConvergeResult<WaitReport> {
        self.pair_or_accept(device, pin, true)
    }

    /// Waits for `device` to bond with us, answering its pairing requests.
    pub fn accept_pair(&self, device: &Arc<dyn RemoteDevice>, pin: &[u8]) -> ConvergeResult<WaitReport> {
        self.pair_or_accept(device, pin, false)
    }

    fn pair_or_accept(
        &self,
        device: &Arc<dyn RemoteDevice>,
        pin: &[u8],
        initiate: bool,
    ) -> ConvergeResult<WaitReport> {
        self.ensure_open()?;
        let peer = device.address();
        let method = format!("{}(device={peer})", if initiate { "pair" } else { "accept_pair" });
        self.require_enabled(&method)?;

        let responder = PairingResponder::new(Arc::clone(device), pin);
        let timeout = self.config.timeout(OperationFamily::PairUnpair);
        let wait = Wait::new(&method, BondState::Bonded, timeout, || {
            Observed::from_code(device.bond_state(), BondState::from_code)
        })
        .listen(
            BondDecoder::with_responder(peer, responder),
            bond::STATE_BONDING | bond::STATE_BONDED,
        )
        .on_entry(|s| match s {
            BondState::Bonding => Ok(Entry::MidTransition),
            _ if self.is_bonded(peer) => Err(ConvergeError::inconsistent(
                &method,
                "not bonded but listed in bonded set",
            )),
            _ if initiate => Ok(Entry::Trigger),
            _ => Ok(Entry::Observe),
        })
        .trigger(|| device.create_bond())
        .verify(|| self.expect_bonded(&method, peer, true));
        self.run(wait)
    }

    /// Removes the bond with `device`.
    pub fn unpair(&self, device: &dyn RemoteDevice) -> ConvergeResult<WaitReport> {
        self.ensure_open()?;
        let peer = device.address();
        let method = format!("unpair(device={peer})");
        self.require_enabled(&method)?;

        let timeout = self.config.timeout(OperationFamily::PairUnpair);
        let wait = Wait::new(&method, BondState::None, timeout, || {
            Observed::from_code(device.bond_state(), BondState::from_code)
        })
        .listen(BondDecoder::new(peer), bond::STATE_NONE)
        .on_entry(|s| match s {
            BondState::Bonded => self.expect_bonded(&method, peer, true).map(|()| Entry::Trigger),
            _ => Ok(Entry::Trigger),
        })
        .trigger(|| device.remove_bond())
        .verify(|| self.expect_bonded(&method, peer, false));
        self.run(wait)
    }

    /// Unpairs every device in the bonded set, stopping at the first failure.
    pub fn unpair_all(&self) -> ConvergeResult<Vec<WaitReport>> {
        self.ensure_open()?;
        self.adapter
            .bonded_devices()
            .iter()
            .map(|device| self.unpair(&**device))
            .collect()
    }

    // ---- profile connections -----------------------------------------------

    /// Connects `profile` to `peer`. PAN is driven in the PANU role.
    pub fn connect_profile(&self, peer: PeerAddress, profile: Profile) -> ConvergeResult<WaitReport> {
        let method = format!("connect_profile(profile={}, device={peer})", profile.name());
        self.profile_link(&method, peer, profile, ConnectionState::Connected)
    }

    /// Disconnects `profile` from `peer`.
    pub fn disconnect_profile(&self, peer: PeerAddress, profile: Profile) -> ConvergeResult<WaitReport> {
        let method = format!("disconnect_profile(profile={}, device={peer})", profile.name());
        self.profile_link(&method, peer, profile, ConnectionState::Disconnected)
    }

    fn profile_link(
        &self,
        method: &str,
        peer: PeerAddress,
        profile: Profile,
        goal: ConnectionState,
    ) -> ConvergeResult<WaitReport> {
        let expected = match goal {
            ConnectionState::Connected => profile::STATE_CONNECTING | profile::STATE_CONNECTED,
            _ => profile::STATE_DISCONNECTING | profile::STATE_DISCONNECTED,
        };
        // PAN updates carry a local role; a generic link takes the PANU side.
        if profile == Profile::Pan {
            return self.pan_link(method.to_owned(), peer, goal, PanRole::Panu, expected);
        }
        self.ensure_open()?;
        self.require_enabled(method)?;
        self.require_bonded(method, peer)?;
        let proxy = self.proxy(profile)?;
        self.link(Link {
            method,
            proxy: &*proxy,
            peer,
            decoder: ProfileDecoder::new(profile, peer).into(),
            goal,
            expected,
            initiate: true,
        })
    }

    /// Connects PAN to `peer` in the PANU role.
    pub fn connect_pan(&self, peer: PeerAddress) -> ConvergeResult<WaitReport> {
        self.pan_link(
            format!("connect_pan(device={peer})"),
            peer,
            ConnectionState::Connected,
            PanRole::Panu,
            profile::STATE_CONNECTING | profile::STATE_CONNECTED,
        )
    }

    /// Waits for `peer` to connect to us as NAP.
    pub fn incoming_pan_connection(&self, peer: PeerAddress) -> ConvergeResult<WaitReport> {
        self.pan_link(
            format!("incoming_pan_connection(device={peer})"),
            peer,
            ConnectionState::Connected,
            PanRole::Nap,
            profile::STATE_CONNECTED,
        )
    }

    /// Disconnects our PANU link to `peer`.
    pub fn disconnect_pan(&self, peer: PeerAddress) -> ConvergeResult<WaitReport> {
        self.pan_link(
            format!("disconnect_pan(device={peer})"),
            peer,
            ConnectionState::Disconnected,
            PanRole::Panu,
            profile::STATE_DISCONNECTING | profile::STATE_DISCONNECTED,
        )
    }

    /// Waits for `peer` to drop its connection to our NAP.
    pub fn incoming_pan_disconnection(&self, peer: PeerAddress) -> ConvergeResult<WaitReport> {
        self.pan_link(
            format!("incoming_pan_disconnection(device={peer})"),
            peer,
            ConnectionState::Disconnected,
            PanRole::Nap,
            profile::STATE_DISCONNECTED,
        )
    }

    fn pan_link(
        &self,
        method: String,
        peer: PeerAddress,
        goal: ConnectionState,
        role: PanRole,
        expected: Flags,
    ) -> ConvergeResult<WaitReport> {
        self.ensure_open()?;
        self.require_enabled(&method)?;
        self.require_bonded(&method, peer)?;
        let proxy = self.proxy(Profile::Pan)?;
        self.link(Link {
            method: &method,
            proxy: &*proxy,
            peer,
            decoder: PanDecoder::new(peer, role).into(),
            goal,
            expected,
            initiate: role == PanRole::Panu,
        })
    }

    fn link(&self, link: Link<'_>) -> ConvergeResult<WaitReport> {
        let Link {
            method,
            proxy,
            peer,
            decoder,
            goal,
            expected,
            initiate,
        } = link;
        let connecting = goal == ConnectionState::Connected;
        let in_flight = if connecting {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnecting
        };
        let wait = Wait::new(method, goal, self.config.timeout(OperationFamily::ConnectProfile), || {
            Observed::from_code(proxy.connection_state(peer), ConnectionState::from_code)
        })
        .listen(decoder, expected)
        .on_entry(move |s| {
            Ok(if s == in_flight {
                Entry::MidTransition
            } else if initiate {
                Entry::Trigger
            } else {
                Entry::Observe
            })
        })
        .trigger(move || if connecting { proxy.connect(peer) } else { proxy.disconnect(peer) });
        self.run(wait)
    }

    // ---- SCO audio ---------------------------------------------------------

    /// Opens the SCO audio link.
    pub fn start_sco(&self, peer: PeerAddress) -> ConvergeResult<WaitReport> {
        self.sco(format!("start_sco(device={peer})"), peer, true)
    }

    /// Closes the SCO audio link.
    pub fn stop_sco(&self, peer: PeerAddress) -> ConvergeResult<WaitReport> {
        self.sco(format!("stop_sco(device={peer})"), peer, false)
    }

    fn sco(&self, method: String, peer: PeerAddress, on: bool) -> ConvergeResult<WaitReport> {
        self.ensure_open()?;
        self.require_enabled(&method)?;
        self.require_bonded(&method, peer)?;
        let audio = self
            .audio
            .as_deref()
            .ok_or_else(|| ConvergeError::precondition(&method, "audio manager unavailable"))?;
        if !audio.is_sco_available_off_call() {
            return Err(ConvergeError::precondition(&method, "device does not support SCO"));
        }

        let expected = if on { sco::STATE_CONNECTED } else { sco::STATE_DISCONNECTED };
        let timeout = self.config.timeout(OperationFamily::Sco);
        let wait = Wait::new(&method, on, timeout, || Observed::Known(audio.is_sco_on()))
            .listen(ScoDecoder, expected)
            .trigger(|| {
                if on {
                    audio.start_sco();
                } else {
                    audio.stop_sco();
                }
                true
            });
        self.run(wait)
    }

    // ---- message access ----------------------------------------------------

    /// Fetches unread messages and waits for one to arrive; its handle is
    /// kept for [`Self::mce_set_message_status`].
    pub fn mce_get_unread_message(&self, peer: PeerAddress) -> ConvergeResult<WaitReport> {
        let method = format!("get_unread_message(device={peer})");
        let proxy = self.map_client(&method, peer)?;
        let map = map_of(&*proxy)?;

        *self.message_handle.lock() = None;
        let wait = self
            .message_wait(&method, &*proxy, peer, message::MESSAGE_RECEIVED, OperationFamily::GetUnreadMessage)
            .trigger(|| map.get_unread_messages(peer));
        self.run(wait)
    }

    /// Moves the stored message to `status`.
    pub fn mce_set_message_status(&self, peer: PeerAddress, status: MessageStatus) -> ConvergeResult<WaitReport> {
        let method = format!("set_message_status(device={peer}, status={status})");
        let proxy = self.map_client(&method, peer)?;
        let map = map_of(&*proxy)?;

        let handle = self
            .message_handle()
            .ok_or_else(|| ConvergeError::precondition(&method, "no message handle"))?;
        let wait = self
            .message_wait(&method, &*proxy, peer, message::STATUS_CHANGED, OperationFamily::SetMessageStatus)
            .trigger(|| map.set_message_status(peer, &handle, status));
        self.run(wait)
    }

    /// Preconditions shared by the message operations.
    fn map_client(&self, method: &str, peer: PeerAddress) -> ConvergeResult<Arc<dyn ProfileProxy>> {
        self.ensure_open()?;
        self.require_enabled(method)?;
        self.require_bonded(method, peer)?;
        let proxy = self.proxy(Profile::MapClient)?;
        if proxy.connection_state(peer) != ConnectionState::Connected.code() {
            return Err(ConvergeError::precondition(method, "device is not connected"));
        }
        Ok(proxy)
    }

    fn message_wait<'a>(
        &self,
        method: &str,
        proxy: &'a dyn ProfileProxy,
        peer: PeerAddress,
        expected: Flags,
        family: OperationFamily,
    ) -> Wait<'a, ConnectionState> {
        let timeout = self.config.timeout(family);
        Wait::new(method, ConnectionState::Connected, timeout, move || {
            Observed::from_code(proxy.connection_state(peer), ConnectionState::from_code)
        })
        .listen(MessageDecoder::new(peer, Arc::clone(&self.message_handle)), expected)
        .always_trigger()
    }

    // ---- session -----------------------------------------------------------

    /// Writes `line` to the record sink.
    pub fn write_output(&self, line: &str) {
        self.sink.write_line(line);
    }

    /// Ends the session: closes every cached proxy and the output file.
    /// Later calls do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let released = self.proxies.release_all(&*self.adapter);
        debug!("session closed, {released} proxies released");
        self.sink.close();
    }

    // ---- helpers -----------------------------------------------------------

    fn run<T>(&self, wait: Wait<'_, T>) -> ConvergeResult<WaitReport>
    where
        T: Copy + PartialEq + fmt::Display,
    {
        let report = ConvergenceWaiter::new(&*self.bus, self.config.poll_interval).run(wait)?;
        if report.phase == WaitPhase::Converged {
            self.sink.write_line(&report.summary());
        } else {
            debug!("{} already satisfied", report.method);
        }
        Ok(report)
    }

    fn ensure_open(&self) -> ConvergeResult {
        if self.is_closed() {
            return Err(ConvergeError::Closed);
        }
        Ok(())
    }

    fn require_enabled(&self, method: &str) -> ConvergeResult {
        if !self.adapter.is_enabled() {
            return Err(ConvergeError::precondition(method, "bluetooth not enabled"));
        }
        Ok(())
    }

    fn is_bonded(&self, peer: PeerAddress) -> bool {
        self.adapter
            .bonded_devices()
            .iter()
            .any(|d| d.address() == peer)
    }

    fn require_bonded(&self, method: &str, peer: PeerAddress) -> ConvergeResult {
        if !self.is_bonded(peer) {
            return Err(ConvergeError::precondition(method, "device not paired"));
        }
        Ok(())
    }

    /// Fails unless bonded-set membership of `peer` equals `listed`.
    fn expect_bonded(&self, method: &str, peer: PeerAddress, listed: bool) -> ConvergeResult {
        if self.is_bonded(peer) == listed {
            return Ok(());
        }
        let detail = if listed {
            "bonded but missing from bonded set"
        } else {
            "unbonded but still in bonded set"
        };
        Err(ConvergeError::inconsistent(method, detail))
    }

    fn proxy(&self, profile: Profile) -> ConvergeResult<Arc<dyn ProfileProxy>> {
        self.proxies.connect(
            &*self.adapter,
            profile,
            self.config.timeout(OperationFamily::ConnectProxy),
            self.config.poll_interval,
        )
    }
}

impl Drop for ConformanceHarness {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ConformanceHarness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConformanceHarness")
            .field("proxies", &self.proxies)
            .field("sink", &self.sink)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn pan_of(proxy: &dyn ProfileProxy) -> ConvergeResult<&dyn PanProxy> {
    proxy.as_pan().ok_or(ConvergeError::ProxyUnavailable {
        profile: Profile::Pan.name(),
    })
}

fn map_of(proxy: &dyn ProfileProxy) -> ConvergeResult<&dyn MapClientProxy> {
    proxy.as_map_client().ok_or(ConvergeError::ProxyUnavailable {
        profile: Profile::MapClient.name(),
    })
}
