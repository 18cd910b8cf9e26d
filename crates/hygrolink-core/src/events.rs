//! Event system for discovery, connection and telemetry notifications.
//!
//! The core reports everything the display layer needs through
//! [`DeviceEvent`]s sent on a broadcast channel. Sending never blocks and
//! never fails; events are simply dropped when nobody is listening.

use serde::Serialize;
use tokio::sync::broadcast;

use hygrolink_types::{BleAddress, Telemetry};

/// Events emitted by the core.
///
/// All events are serializable for logging and JSON output.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DeviceEvent {
    /// A device was seen for the first time during scanning.
    Discovered {
        index: u32,
        name: String,
        address: BleAddress,
    },
    /// A connection was established.
    Connected { address: BleAddress },
    /// A connection was released.
    Disconnected {
        address: BleAddress,
        reason: DisconnectReason,
    },
    /// Notifications were enabled on the telemetry characteristic.
    Subscribed {
        address: BleAddress,
        service: u16,
        characteristic: u16,
    },
    /// A notification was decoded.
    Telemetry {
        address: BleAddress,
        reading: Telemetry,
    },
    /// A notification could not be decoded. The subscription continues.
    DecodeFailed {
        address: BleAddress,
        raw: Vec<u8>,
        error: String,
    },
}

/// Reason for disconnection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    /// The subscription was ended by the operator.
    Unsubscribed,
    /// Subscription setup failed and the connection was released.
    SubscribeFailed,
    /// Explicit disconnect requested by the caller.
    UserRequested,
}

/// Sender for device events.
pub type EventSender = broadcast::Sender<DeviceEvent>;

/// Receiver for device events.
pub type EventReceiver = broadcast::Receiver<DeviceEvent>;

/// Fans [`DeviceEvent`]s out to every subscribed receiver.
///
/// Clones share one channel. A receiver that falls more than `capacity`
/// events behind sees [`broadcast::error::RecvError::Lagged`].
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Buffered events per receiver used by [`Default`].
    pub const DEFAULT_CAPACITY: usize = 100;

    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity).0,
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Publish `event`. Returns how many receivers it reached; 0 when
    /// nobody is subscribed, in which case the event is dropped.
    pub fn send(&self, event: DeviceEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
