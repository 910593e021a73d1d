use btconverge::family::{adapter, bond, message, profile, sco};
use btconverge::notify::{LocalBus, Notification};
use btconverge::{
    Adapter, AdapterState, AudioManager, BondState, ConformanceHarness, ConnectionState,
    ConvergeError, Flags, MapClientProxy, MessageStatus, OutputSink, PanProxy, PanRole,
    PeerAddress, Profile, ProfileProxy, RemoteDevice, ScanMode, ServiceListener, TetheringRequest,
    WaitConfig, WaitPhase,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const PEER: PeerAddress = PeerAddress([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

fn config() -> WaitConfig {
    WaitConfig::uniform(Duration::from_millis(500)).with_poll_interval(Duration::from_millis(1))
}

fn short_config() -> WaitConfig {
    WaitConfig::uniform(Duration::from_millis(40)).with_poll_interval(Duration::from_millis(1))
}

// ---- simulated stack ---------------------------------------------------------

struct SimDevice {
    address: PeerAddress,
    bus: Arc<LocalBus>,
    bond: AtomicI32,
    pins: Mutex<Vec<Vec<u8>>>,
    confirmations: AtomicU32,
}

impl SimDevice {
    fn new(address: PeerAddress, bus: Arc<LocalBus>) -> Self {
        Self {
            address,
            bus,
            bond: AtomicI32::new(BondState::None.code()),
            pins: Mutex::new(Vec::new()),
            confirmations: AtomicU32::new(0),
        }
    }

    fn set_bond(&self, state: BondState) {
        self.bond.store(state.code(), Ordering::SeqCst);
        self.bus.publish(
            &Notification::new(bond::ACTION_BOND_STATE_CHANGED)
                .with_peer(bond::EXTRA_DEVICE, self.address)
                .with_int(bond::EXTRA_BOND_STATE, state.code()),
        );
    }

    /// Bonding as seen from our side, whichever end started it.
    fn run_bonding(&self) {
        self.set_bond(BondState::Bonding);
        self.bus.publish(
            &Notification::new(bond::ACTION_PAIRING_REQUEST)
                .with_peer(bond::EXTRA_DEVICE, self.address)
                .with_int(bond::EXTRA_PAIRING_VARIANT, 0),
        );
        self.set_bond(BondState::Bonded);
    }

    fn pins(&self) -> Vec<Vec<u8>> {
        self.pins.lock().unwrap().clone()
    }
}

impl RemoteDevice for SimDevice {
    fn address(&self) -> PeerAddress {
        self.address
    }

    fn bond_state(&self) -> i32 {
        self.bond.load(Ordering::SeqCst)
    }

    fn create_bond(&self) -> bool {
        self.run_bonding();
        true
    }

    fn remove_bond(&self) -> bool {
        self.set_bond(BondState::None);
        true
    }

    fn set_pin(&self, pin: &[u8]) -> bool {
        self.pins.lock().unwrap().push(pin.to_vec());
        true
    }

    fn set_pairing_confirmation(&self, _confirm: bool) -> bool {
        self.confirmations.fetch_add(1, Ordering::SeqCst);
        true
    }
}

struct SimAdapter {
    bus: Arc<LocalBus>,
    state: AtomicI32,
    scan_mode: AtomicI32,
    discovering: AtomicBool,
    /// Changes state without publishing anything.
    quiet: AtomicBool,
    /// Leaves bonded devices out of the bonded set.
    hide_bonded: AtomicBool,
    devices: Mutex<Vec<Arc<SimDevice>>>,
    proxies: Mutex<Vec<(Profile, Arc<dyn ProfileProxy>)>>,
    closed: Mutex<Vec<Profile>>,
}

impl SimAdapter {
    fn new(bus: Arc<LocalBus>) -> Self {
        Self {
            bus,
            state: AtomicI32::new(AdapterState::Off.code()),
            scan_mode: AtomicI32::new(ScanMode::Connectable.code()),
            discovering: AtomicBool::new(false),
            quiet: AtomicBool::new(false),
            hide_bonded: AtomicBool::new(false),
            devices: Mutex::new(Vec::new()),
            proxies: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        }
    }

    fn set_state(&self, state: AdapterState) {
        self.state.store(state.code(), Ordering::SeqCst);
        if !self.quiet.load(Ordering::SeqCst) {
            self.bus.publish(
                &Notification::new(adapter::ACTION_STATE_CHANGED)
                    .with_int(adapter::EXTRA_STATE, state.code()),
            );
        }
    }

    fn closed(&self) -> Vec<Profile> {
        self.closed.lock().unwrap().clone()
    }
}

impl Adapter for SimAdapter {
    fn is_enabled(&self) -> bool {
        self.state.load(Ordering::SeqCst) == AdapterState::On.code()
    }

    fn state(&self) -> i32 {
        self.state.load(Ordering::SeqCst)
    }

    fn enable(&self) -> bool {
        self.set_state(AdapterState::TurningOn);
        self.set_state(AdapterState::On);
        true
    }

    fn disable(&self) -> bool {
        self.set_state(AdapterState::TurningOff);
        self.set_state(AdapterState::Off);
        true
    }

    fn scan_mode(&self) -> i32 {
        self.scan_mode.load(Ordering::SeqCst)
    }

    fn set_scan_mode(&self, mode: i32) -> i32 {
        self.scan_mode.store(mode, Ordering::SeqCst);
        self.bus.publish(
            &Notification::new(adapter::ACTION_SCAN_MODE_CHANGED).with_int(adapter::EXTRA_SCAN_MODE, mode),
        );
        adapter::STATUS_SUCCESS
    }

    fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    fn start_discovery(&self) -> bool {
        self.discovering.store(true, Ordering::SeqCst);
        self.bus.publish(&Notification::new(adapter::ACTION_DISCOVERY_STARTED));
        true
    }

    fn cancel_discovery(&self) -> bool {
        self.discovering.store(false, Ordering::SeqCst);
        self.bus.publish(&Notification::new(adapter::ACTION_DISCOVERY_FINISHED));
        true
    }

    fn bonded_devices(&self) -> Vec<Arc<dyn RemoteDevice>> {
        if self.hide_bonded.load(Ordering::SeqCst) {
            return Vec::new();
        }
        self.devices
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.bond_state() == BondState::Bonded.code())
            .map(|d| Arc::clone(d) as Arc<dyn RemoteDevice>)
            .collect()
    }

    fn get_profile_proxy(&self, profile: Profile, listener: Arc<dyn ServiceListener>) -> bool {
        let proxy = self
            .proxies
            .lock()
            .unwrap()
            .iter()
            .find(|(p, _)| *p == profile)
            .map(|(_, proxy)| Arc::clone(proxy));
        match proxy {
            Some(proxy) => {
                listener.on_service_connected(profile, proxy);
                true
            }
            None => false,
        }
    }

    fn close_profile_proxy(&self, profile: Profile, _proxy: Arc<dyn ProfileProxy>) {
        self.closed.lock().unwrap().push(profile);
    }
}

struct SimTethering(Arc<AtomicBool>);

impl TetheringRequest for SimTethering {
    fn release(self: Box<Self>) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct SimProfile {
    profile: Profile,
    bus: Arc<LocalBus>,
    states: Mutex<BTreeMap<PeerAddress, i32>>,
    tethering: Arc<AtomicBool>,
    status_requests: Mutex<Vec<(String, MessageStatus)>>,
    /// Links this stack drives report the NAP role instead of PANU.
    nap_side: AtomicBool,
}

impl SimProfile {
    fn new(profile: Profile, bus: Arc<LocalBus>) -> Self {
        Self {
            profile,
            bus,
            states: Mutex::new(BTreeMap::new()),
            tethering: Arc::new(AtomicBool::new(false)),
            status_requests: Mutex::new(Vec::new()),
            nap_side: AtomicBool::new(false),
        }
    }

    fn link_role(&self) -> PanRole {
        if self.nap_side.load(Ordering::SeqCst) { PanRole::Nap } else { PanRole::Panu }
    }

    /// Records `state` for `peer` without publishing.
    fn force_state(&self, peer: PeerAddress, state: ConnectionState) {
        self.states.lock().unwrap().insert(peer, state.code());
    }

    fn set_state(&self, peer: PeerAddress, state: ConnectionState, role: PanRole) {
        self.force_state(peer, state);
        let mut n = Notification::new(self.profile.connection_topic())
            .with_peer(bond::EXTRA_DEVICE, peer)
            .with_int(profile::EXTRA_STATE, state.code());
        if self.profile == Profile::Pan {
            n = n.with_int(profile::EXTRA_LOCAL_ROLE, role.code());
        }
        self.bus.publish(&n);
    }
}

impl ProfileProxy for SimProfile {
    fn connection_state(&self, device: PeerAddress) -> i32 {
        self.states
            .lock()
            .unwrap()
            .get(&device)
            .copied()
            .unwrap_or(ConnectionState::Disconnected.code())
    }

    fn connect(&self, device: PeerAddress) -> bool {
        let role = self.link_role();
        self.set_state(device, ConnectionState::Connecting, role);
        self.set_state(device, ConnectionState::Connected, role);
        true
    }

    fn disconnect(&self, device: PeerAddress) -> bool {
        let role = self.link_role();
        self.set_state(device, ConnectionState::Disconnecting, role);
        self.set_state(device, ConnectionState::Disconnected, role);
        true
    }

    fn as_pan(&self) -> Option<&dyn PanProxy> {
        (self.profile == Profile::Pan).then_some(self as &dyn PanProxy)
    }

    fn as_map_client(&self) -> Option<&dyn MapClientProxy> {
        (self.profile == Profile::MapClient).then_some(self as &dyn MapClientProxy)
    }
}

impl PanProxy for SimProfile {
    fn is_tethering_on(&self) -> bool {
        self.tethering.load(Ordering::SeqCst)
    }

    fn request_tethered_interface(&self) -> Option<Box<dyn TetheringRequest>> {
        self.tethering.store(true, Ordering::SeqCst);
        Some(Box::new(SimTethering(Arc::clone(&self.tethering))))
    }
}

impl MapClientProxy for SimProfile {
    fn get_unread_messages(&self, device: PeerAddress) -> bool {
        self.bus.publish(
            &Notification::new(message::ACTION_MESSAGE_RECEIVED)
                .with_peer(bond::EXTRA_DEVICE, device)
                .with_str(message::EXTRA_MESSAGE_HANDLE, "msg-0001"),
        );
        true
    }

    fn set_message_status(&self, device: PeerAddress, handle: &str, status: MessageStatus) -> bool {
        self.status_requests
            .lock()
            .unwrap()
            .push((handle.to_owned(), status));
        self.bus.publish(
            &Notification::new(message::ACTION_MESSAGE_READ_STATUS_CHANGED)
                .with_peer(bond::EXTRA_DEVICE, device)
                .with_int(message::EXTRA_RESULT_CODE, message::RESULT_SUCCESS),
        );
        true
    }
}

struct SimAudio {
    bus: Arc<LocalBus>,
    available: bool,
    on: AtomicBool,
}

impl SimAudio {
    fn publish(&self, state: i32) {
        self.bus.publish(
            &Notification::new(sco::ACTION_SCO_AUDIO_STATE_UPDATED).with_int(sco::EXTRA_SCO_AUDIO_STATE, state),
        );
    }
}

impl AudioManager for SimAudio {
    fn is_sco_available_off_call(&self) -> bool {
        self.available
    }

    fn is_sco_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    fn start_sco(&self) {
        self.on.store(true, Ordering::SeqCst);
        self.publish(2);
        self.publish(1);
    }

    fn stop_sco(&self) {
        self.on.store(false, Ordering::SeqCst);
        self.publish(0);
    }
}

struct Fixture {
    bus: Arc<LocalBus>,
    adapter: Arc<SimAdapter>,
    device: Arc<SimDevice>,
    pan: Arc<SimProfile>,
    map: Arc<SimProfile>,
    harness: ConformanceHarness,
}

impl Fixture {
    fn new(config: WaitConfig) -> Self {
        Self::with_sink(config, OutputSink::log_only("test"), true)
    }

    fn with_sink(config: WaitConfig, sink: OutputSink, sco_available: bool) -> Self {
        let bus = Arc::new(LocalBus::new());
        let adapter = Arc::new(SimAdapter::new(Arc::clone(&bus)));
        let device = Arc::new(SimDevice::new(PEER, Arc::clone(&bus)));
        adapter.devices.lock().unwrap().push(Arc::clone(&device));

        let a2dp = Arc::new(SimProfile::new(Profile::A2dp, Arc::clone(&bus)));
        let pan = Arc::new(SimProfile::new(Profile::Pan, Arc::clone(&bus)));
        let map = Arc::new(SimProfile::new(Profile::MapClient, Arc::clone(&bus)));
        {
            let mut proxies = adapter.proxies.lock().unwrap();
            proxies.push((Profile::A2dp, a2dp as Arc<dyn ProfileProxy>));
            proxies.push((Profile::Pan, Arc::clone(&pan) as Arc<dyn ProfileProxy>));
            proxies.push((Profile::MapClient, Arc::clone(&map) as Arc<dyn ProfileProxy>));
        }

        let audio = Arc::new(SimAudio {
            bus: Arc::clone(&bus),
            available: sco_available,
            on: AtomicBool::new(false),
        });
        let harness = ConformanceHarness::new(adapter.clone(), bus.clone(), sink)
            .with_config(config)
            .with_audio_manager(audio);

        Self {
            bus,
            adapter,
            device,
            pan,
            map,
            harness,
        }
    }

    fn remote(&self) -> Arc<dyn RemoteDevice> {
        Arc::clone(&self.device) as Arc<dyn RemoteDevice>
    }

    /// Enabled adapter with `PEER` bonded.
    fn bonded(config: WaitConfig) -> Self {
        let fx = Self::new(config);
        fx.harness.enable().unwrap();
        fx.harness.pair(&fx.remote(), b"0000").unwrap();
        fx
    }

    fn assert_no_leaks(&self) {
        assert_eq!(self.bus.subscription_count(), 0, "subscription leaked");
    }
}

fn scratch_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("btconverge-it-{}-{name}", std::process::id()))
}

fn precondition_reason(err: ConvergeError) -> String {
    match err {
        ConvergeError::Precondition { reason, .. } => reason,
        other => panic!("expected precondition failure, got {other:?}"),
    }
}

// ---- radio power -------------------------------------------------------------

#[test]
fn test_enable_converges_and_records() {
    let path = scratch_path("enable.txt");
    let _ = std::fs::remove_file(&path);
    let fx = Fixture::with_sink(config(), OutputSink::with_file("test", &path), true);

    let report = fx.harness.enable().unwrap();
    assert_eq!(report.phase, WaitPhase::Converged);
    assert_eq!(report.fired, adapter::STATE_TURNING_ON | adapter::STATE_ON);
    assert!(report.elapsed.is_some());

    // Already on: a log line from enable(), but no completion record.
    let again = fx.harness.enable().unwrap();
    assert_eq!(again.phase, WaitPhase::AlreadySatisfied);
    fx.harness.close();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "Enabling Bluetooth adapter.");
    assert!(lines[1].starts_with("enable() completed in "));
    assert!(lines[1].ends_with(" ms"));
    assert_eq!(lines[2], "Enabling Bluetooth adapter.");
    fx.assert_no_leaks();
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_enable_mid_transition_has_no_timing() {
    let fx = Fixture::new(config());
    fx.adapter
        .state
        .store(AdapterState::TurningOn.code(), Ordering::SeqCst);

    let adapter = Arc::clone(&fx.adapter);
    let finisher = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        adapter.set_state(AdapterState::On);
    });

    let report = fx.harness.enable().unwrap();
    finisher.join().unwrap();

    assert_eq!(report.phase, WaitPhase::Converged);
    assert_eq!(report.elapsed, None);
    assert_eq!(report.summary(), "enable() completed");
    fx.assert_no_leaks();
}

#[test]
fn test_state_without_notifications_times_out() {
    let fx = Fixture::new(short_config());
    fx.adapter.quiet.store(true, Ordering::SeqCst);

    let err = fx.harness.enable().unwrap_err();
    let diag = err.as_timeout().expect("timeout");
    assert_eq!(diag.observed, "On");
    assert_eq!(diag.goal, "On");
    assert_eq!(diag.unfired(), adapter::STATE_TURNING_ON | adapter::STATE_ON);
    assert_eq!(diag.timeout, Duration::from_millis(40));
    fx.assert_no_leaks();
}

#[test]
fn test_disable_round_trip() {
    let fx = Fixture::new(config());
    fx.harness.enable().unwrap();
    let report = fx.harness.disable().unwrap();
    assert_eq!(report.phase, WaitPhase::Converged);
    assert_eq!(report.fired, adapter::STATE_TURNING_OFF | adapter::STATE_OFF);
    assert!(!fx.adapter.is_enabled());
    fx.assert_no_leaks();
}

// ---- scan mode and discovery -------------------------------------------------

#[test]
fn test_discoverable_requires_enabled() {
    let fx = Fixture::new(config());
    let err = fx.harness.discoverable().unwrap_err();
    assert_eq!(precondition_reason(err), "bluetooth not enabled");

    let err = fx.harness.start_scan().unwrap_err();
    assert_eq!(precondition_reason(err), "bluetooth not enabled");
    fx.assert_no_leaks();
}

#[test]
fn test_scan_mode_and_discovery() {
    let fx = Fixture::new(config());
    fx.harness.enable().unwrap();

    let report = fx.harness.discoverable().unwrap();
    assert_eq!(report.phase, WaitPhase::Converged);
    assert_eq!(fx.adapter.scan_mode(), ScanMode::ConnectableDiscoverable.code());

    let report = fx.harness.undiscoverable().unwrap();
    assert_eq!(report.fired, adapter::SCAN_MODE_CONNECTABLE);

    assert_eq!(fx.harness.start_scan().unwrap().fired, adapter::DISCOVERY_STARTED);
    assert!(fx.adapter.is_discovering());
    assert_eq!(fx.harness.stop_scan().unwrap().fired, adapter::DISCOVERY_FINISHED);
    assert_eq!(
        fx.harness.stop_scan().unwrap().phase,
        WaitPhase::AlreadySatisfied
    );
    fx.assert_no_leaks();
}

// ---- bonding -----------------------------------------------------------------

#[test]
fn test_pair_answers_pin_request() {
    let fx = Fixture::new(config());
    fx.harness.enable().unwrap();

    let report = fx.harness.pair(&fx.remote(), b"1234").unwrap();
    assert_eq!(report.phase, WaitPhase::Converged);
    assert_eq!(report.fired, bond::STATE_BONDING | bond::STATE_BONDED);
    assert_eq!(fx.device.pins(), vec![b"1234".to_vec()]);
    assert_eq!(fx.adapter.bonded_devices().len(), 1);

    let again = fx.harness.pair(&fx.remote(), b"1234").unwrap();
    assert_eq!(again.phase, WaitPhase::AlreadySatisfied);
    fx.assert_no_leaks();
}

#[test]
fn test_accept_pair_waits_for_remote() {
    let fx = Fixture::new(config());
    fx.harness.enable().unwrap();

    let device = Arc::clone(&fx.device);
    let remote = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        device.run_bonding();
    });

    let report = fx.harness.accept_pair(&fx.remote(), b"9999").unwrap();
    remote.join().unwrap();

    assert_eq!(report.phase, WaitPhase::Converged);
    assert_eq!(fx.device.pins(), vec![b"9999".to_vec()]);
    fx.assert_no_leaks();
}

#[test]
fn test_pair_detects_missing_bonded_entry() {
    let fx = Fixture::new(config());
    fx.harness.enable().unwrap();
    fx.adapter.hide_bonded.store(true, Ordering::SeqCst);

    let err = fx.harness.pair(&fx.remote(), b"1234").unwrap_err();
    assert!(matches!(err, ConvergeError::Inconsistent { .. }), "{err:?}");
    fx.assert_no_leaks();
}

#[test]
fn test_unpair_all() {
    let fx = Fixture::bonded(config());

    let reports = fx.harness.unpair_all().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].fired, bond::STATE_NONE);
    assert_eq!(fx.device.bond_state(), BondState::None.code());
    assert!(fx.adapter.bonded_devices().is_empty());

    assert!(fx.harness.unpair_all().unwrap().is_empty());
    fx.assert_no_leaks();
}

// ---- profile connections -----------------------------------------------------

#[test]
fn test_connect_profile_requires_bond() {
    let fx = Fixture::new(config());
    fx.harness.enable().unwrap();

    let err = fx.harness.connect_profile(PEER, Profile::A2dp).unwrap_err();
    assert_eq!(precondition_reason(err), "device not paired");
    assert!(fx.harness.proxies().is_empty());
}

#[test]
fn test_connect_and_disconnect_profile() {
    let fx = Fixture::bonded(config());

    let report = fx.harness.connect_profile(PEER, Profile::A2dp).unwrap();
    assert_eq!(report.phase, WaitPhase::Converged);
    assert_eq!(report.fired, profile::STATE_CONNECTING | profile::STATE_CONNECTED);
    assert!(report.method.starts_with("connect_profile(profile=a2dp, device="));

    let report = fx.harness.disconnect_profile(PEER, Profile::A2dp).unwrap();
    assert_eq!(report.fired, profile::STATE_DISCONNECTING | profile::STATE_DISCONNECTED);
    assert_eq!(fx.harness.proxies().len(), 1);
    fx.assert_no_leaks();
}

#[test]
fn test_missing_proxy_is_unavailable() {
    let fx = Fixture::bonded(config());
    let err = fx.harness.connect_profile(PEER, Profile::HidHost).unwrap_err();
    assert_eq!(err, ConvergeError::ProxyUnavailable { profile: "hid_host" });
}

#[test]
fn test_pan_roles() {
    let fx = Fixture::bonded(config());

    fx.harness.connect_pan(PEER).unwrap();
    fx.harness.disconnect_pan(PEER).unwrap();

    // The remote connects to our NAP; PANU-role updates must not count.
    let pan = Arc::clone(&fx.pan);
    let remote = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        pan.set_state(PEER, ConnectionState::Connected, PanRole::Panu);
        thread::sleep(Duration::from_millis(20));
        pan.set_state(PEER, ConnectionState::Connected, PanRole::Nap);
    });
    let report = fx.harness.incoming_pan_connection(PEER).unwrap();
    remote.join().unwrap();

    assert_eq!(report.phase, WaitPhase::Converged);
    assert_eq!(report.fired, profile::STATE_CONNECTED);
    assert!(report.stats.discarded >= 1);

    let pan = Arc::clone(&fx.pan);
    let remote = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        pan.set_state(PEER, ConnectionState::Disconnected, PanRole::Nap);
    });
    let report = fx.harness.incoming_pan_disconnection(PEER).unwrap();
    remote.join().unwrap();
    assert_eq!(report.fired, profile::STATE_DISCONNECTED);
    fx.assert_no_leaks();
}

#[test]
fn test_connect_profile_pan_takes_panu_role() {
    let fx = Fixture::bonded(config());

    let report = fx.harness.connect_profile(PEER, Profile::Pan).unwrap();
    assert_eq!(report.phase, WaitPhase::Converged);
    assert_eq!(report.fired, profile::STATE_CONNECTING | profile::STATE_CONNECTED);
    let report = fx.harness.disconnect_profile(PEER, Profile::Pan).unwrap();
    assert_eq!(report.fired, profile::STATE_DISCONNECTING | profile::STATE_DISCONNECTED);
    assert_eq!(fx.harness.proxies().len(), 1);
    fx.assert_no_leaks();
}

#[test]
fn test_connect_profile_pan_ignores_nap_updates() {
    let fx = Fixture::bonded(short_config());
    fx.pan.nap_side.store(true, Ordering::SeqCst);

    let err = fx.harness.connect_profile(PEER, Profile::Pan).unwrap_err();
    let diag = err.as_timeout().expect("timeout");
    assert_eq!(diag.observed, "Connected");
    assert_eq!(diag.fired, Flags::EMPTY);
    assert_eq!(diag.unfired(), profile::STATE_CONNECTING | profile::STATE_CONNECTED);
    fx.assert_no_leaks();
}

#[test]
fn test_tethering() {
    let fx = Fixture::new(config());
    fx.harness.enable().unwrap();

    assert_eq!(fx.harness.enable_pan().unwrap().phase, WaitPhase::Converged);
    assert!(fx.pan.is_tethering_on());
    assert_eq!(fx.harness.disable_pan().unwrap().phase, WaitPhase::Converged);
    assert!(!fx.pan.is_tethering_on());
    fx.assert_no_leaks();
}

// ---- SCO audio ---------------------------------------------------------------

#[test]
fn test_sco_start_stop() {
    let fx = Fixture::bonded(config());

    let report = fx.harness.start_sco(PEER).unwrap();
    assert_eq!(report.phase, WaitPhase::Converged);
    assert_eq!(report.fired, sco::STATE_CONNECTED);

    let report = fx.harness.stop_sco(PEER).unwrap();
    assert_eq!(report.fired, sco::STATE_DISCONNECTED);
    fx.assert_no_leaks();
}

#[test]
fn test_sco_unsupported() {
    let fx = Fixture::with_sink(config(), OutputSink::log_only("test"), false);
    fx.harness.enable().unwrap();
    fx.harness.pair(&fx.remote(), b"0000").unwrap();

    let err = fx.harness.start_sco(PEER).unwrap_err();
    assert_eq!(precondition_reason(err), "device does not support SCO");
}

// ---- message access ----------------------------------------------------------

#[test]
fn test_mce_requires_connection() {
    let fx = Fixture::bonded(config());
    let err = fx.harness.mce_get_unread_message(PEER).unwrap_err();
    assert_eq!(precondition_reason(err), "device is not connected");
}

#[test]
fn test_mce_message_flow() {
    let fx = Fixture::bonded(config());
    fx.map.force_state(PEER, ConnectionState::Connected);

    let err = fx
        .harness
        .mce_set_message_status(PEER, MessageStatus::Read)
        .unwrap_err();
    assert_eq!(precondition_reason(err), "no message handle");

    // The link is already connected; the fetch still runs.
    let report = fx.harness.mce_get_unread_message(PEER).unwrap();
    assert_eq!(report.phase, WaitPhase::Converged);
    assert_eq!(report.fired, message::MESSAGE_RECEIVED);
    assert_eq!(fx.harness.message_handle().as_deref(), Some("msg-0001"));

    let report = fx
        .harness
        .mce_set_message_status(PEER, MessageStatus::Read)
        .unwrap();
    assert_eq!(report.fired, message::STATUS_CHANGED);
    assert_eq!(
        *fx.map.status_requests.lock().unwrap(),
        vec![("msg-0001".to_owned(), MessageStatus::Read)]
    );
    fx.assert_no_leaks();
}

// ---- session -----------------------------------------------------------------

#[test]
fn test_close_releases_proxies_once() {
    let fx = Fixture::bonded(config());
    fx.harness.connect_profile(PEER, Profile::A2dp).unwrap();
    fx.harness.enable_pan().unwrap();

    fx.harness.close();
    fx.harness.close();
    let mut closed = fx.adapter.closed();
    closed.sort_by_key(|p| p.code());
    assert_eq!(closed, vec![Profile::A2dp, Profile::Pan]);

    assert_eq!(fx.harness.enable().unwrap_err(), ConvergeError::Closed);
    assert!(fx.harness.is_closed());

    let Fixture { adapter, harness, .. } = fx;
    drop(harness);
    assert_eq!(adapter.closed().len(), 2);
}
