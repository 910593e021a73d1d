//! Message access (MAP client): unread fetch and status updates.

use std::sync::Arc;

use spin::Mutex;

use crate::notify::{DecodeError, Decoder, Flags, Notification, PeerAddress};

use super::bond::EXTRA_DEVICE;
use super::state_codes;

pub const ACTION_MESSAGE_RECEIVED: &str = "android.bluetooth.mapmce.profile.action.MESSAGE_RECEIVED";
pub const ACTION_MESSAGE_READ_STATUS_CHANGED: &str =
    "android.bluetooth.mapmce.profile.action.MESSAGE_READ_STATUS_CHANGED";
pub const ACTION_MESSAGE_DELETED_STATUS_CHANGED: &str =
    "android.bluetooth.mapmce.profile.action.MESSAGE_DELETED_STATUS_CHANGED";

pub const EXTRA_MESSAGE_HANDLE: &str = "android.bluetooth.mapmce.profile.extra.MESSAGE_HANDLE";
pub const EXTRA_RESULT_CODE: &str = "android.bluetooth.device.extra.RESULT_CODE";

pub const RESULT_FAILURE: i32 = 0;
pub const RESULT_SUCCESS: i32 = 1;

pub const MESSAGE_RECEIVED: Flags = Flags::from_bits(1);
pub const STATUS_CHANGED: Flags = Flags::from_bits(1 << 1);

state_codes! {
    /// Status a message can be moved to.
    pub enum MessageStatus {
        Unread = 0,
        Read = 1,
        Undeleted = 2,
        Deleted = 3,
    }
}

/// Handle of the most recently received message, shared with the harness.
pub type MessageHandleSlot = Arc<Mutex<Option<String>>>;

/// Decodes message-received and status-changed notifications.
#[derive(Clone)]
pub struct MessageDecoder {
    peer: PeerAddress,
    handle: MessageHandleSlot,
}

impl MessageDecoder {
    /// Decoder for `peer` storing received handles in `handle`.
    pub fn new(peer: PeerAddress, handle: MessageHandleSlot) -> Self {
        Self { peer, handle }
    }
}

const TOPICS: [&str; 3] = [
    ACTION_MESSAGE_RECEIVED,
    ACTION_MESSAGE_READ_STATUS_CHANGED,
    ACTION_MESSAGE_DELETED_STATUS_CHANGED,
];

impl Decoder for MessageDecoder {
    fn topics(&self) -> &[&'static str] {
        &TOPICS
    }

    /// Notifications that do not name a device are accepted.
    fn correlates(&self, n: &Notification) -> bool {
        n.extras.peer(EXTRA_DEVICE).is_none_or(|p| p == self.peer)
    }

    fn decode(&self, n: &Notification) -> Result<Option<Flags>, DecodeError> {
        match n.topic.as_str() {
            ACTION_MESSAGE_RECEIVED => {
                let handle = n
                    .extras
                    .string(EXTRA_MESSAGE_HANDLE)
                    .ok_or_else(|| DecodeError::missing(EXTRA_MESSAGE_HANDLE))?;
                *self.handle.lock() = Some(handle.to_owned());
                Ok(Some(MESSAGE_RECEIVED))
            }
            ACTION_MESSAGE_READ_STATUS_CHANGED | ACTION_MESSAGE_DELETED_STATUS_CHANGED => {
                let result = n.extras.int(EXTRA_RESULT_CODE).unwrap_or(RESULT_FAILURE);
                if result != RESULT_SUCCESS {
                    return Err(DecodeError::new(format!("status change failed: result={result}")));
                }
                Ok(Some(STATUS_CHANGED))
            }
            _ => Ok(None),
        }
    }
}
