//! Device-control API the harness drives.
//!
//! These traits are implemented by the embedding test environment. Every
//! state query returns the raw integer code of the underlying stack; the
//! harness maps codes through the typed enums in [`crate::family`] and treats
//! a code outside the vocabulary as an unexpected state.
//!
//! Trigger methods return `true` when the request was *accepted* for
//! asynchronous processing. Acceptance says nothing about the outcome.

use std::sync::Arc;

use crate::family::{MessageStatus, Profile};
use crate::notify::PeerAddress;

/// Local adapter.
pub trait Adapter: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Raw adapter state code.
    fn state(&self) -> i32;

    fn enable(&self) -> bool;

    fn disable(&self) -> bool;

    /// Raw scan mode code.
    fn scan_mode(&self) -> i32;

    /// Returns a status code, `0` on success.
    fn set_scan_mode(&self, mode: i32) -> i32;

    fn is_discovering(&self) -> bool;

    fn start_discovery(&self) -> bool;

    fn cancel_discovery(&self) -> bool;

    /// Devices currently in the bonded set.
    fn bonded_devices(&self) -> Vec<Arc<dyn RemoteDevice>>;

    /// Requests a profile proxy. The proxy is delivered later through
    /// `listener`, on a thread of the adapter's choosing.
    fn get_profile_proxy(&self, profile: Profile, listener: Arc<dyn ServiceListener>) -> bool;

    /// Returns a proxy obtained from [`Adapter::get_profile_proxy`].
    fn close_profile_proxy(&self, profile: Profile, proxy: Arc<dyn ProfileProxy>);
}

/// Remote peer.
pub trait RemoteDevice: Send + Sync {
    fn address(&self) -> PeerAddress;

    /// Raw bond state code.
    fn bond_state(&self) -> i32;

    fn create_bond(&self) -> bool;

    fn remove_bond(&self) -> bool;

    fn set_pin(&self, pin: &[u8]) -> bool;

    fn set_pairing_confirmation(&self, confirm: bool) -> bool;
}

/// Connection handle for one profile.
pub trait ProfileProxy: Send + Sync {
    /// Raw connection state code for `device`.
    fn connection_state(&self, device: PeerAddress) -> i32;

    fn connect(&self, device: PeerAddress) -> bool;

    fn disconnect(&self, device: PeerAddress) -> bool;

    /// PAN-specific surface, if this is a PAN proxy.
    fn as_pan(&self) -> Option<&dyn PanProxy> {
        None
    }

    /// MAP client surface, if this is a MAP client proxy.
    fn as_map_client(&self) -> Option<&dyn MapClientProxy> {
        None
    }
}

/// PAN tethering control.
pub trait PanProxy: Send + Sync {
    fn is_tethering_on(&self) -> bool;

    /// Requests the tethered interface. Tethering stays on while the returned
    /// request is held.
    fn request_tethered_interface(&self) -> Option<Box<dyn TetheringRequest>>;
}

/// Outstanding tethered-interface request.
pub trait TetheringRequest: Send {
    fn release(self: Box<Self>);
}

/// MAP client message operations.
pub trait MapClientProxy: Send + Sync {
    fn get_unread_messages(&self, device: PeerAddress) -> bool;

    fn set_message_status(&self, device: PeerAddress, handle: &str, status: MessageStatus) -> bool;
}

/// Audio manager: the SCO side of the stack.
pub trait AudioManager: Send + Sync {
    fn is_sco_available_off_call(&self) -> bool;

    fn is_sco_on(&self) -> bool;

    fn start_sco(&self);

    fn stop_sco(&self);
}

/// Receives profile proxies requested through [`Adapter::get_profile_proxy`].
pub trait ServiceListener: Send + Sync {
    fn on_service_connected(&self, profile: Profile, proxy: Arc<dyn ProfileProxy>);

    fn on_service_disconnected(&self, profile: Profile);
}
