//! Abstraction over the Bluetooth stack.
//!
//! The core never talks to a radio directly. Everything it needs from the
//! platform goes through [`BleStack`]: scanning, connecting, GATT discovery,
//! enabling notifications and receiving notification payloads.
//!
//! Push-style deliveries (advertisements and notifications) cross into the
//! core over channels handed to the adapter, so the adapter never touches
//! core state from its own callbacks.
//!
//! Implementations:
//! - [`crate::bluetooth::BtleplugStack`] for real hardware
//! - [`crate::mock::MockStack`] for tests

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use hygrolink_types::BleAddress;

use crate::error::{GattStatus, PlatformError};

/// A single advertisement observed while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Address of the advertising peripheral.
    pub address: BleAddress,
    /// Local name, if the advertisement carried one.
    pub name: Option<String>,
    /// Signal strength in dBm, if reported.
    pub rssi: Option<i16>,
}

impl Advertisement {
    /// Create an advertisement without RSSI information.
    pub fn new(address: impl Into<BleAddress>, name: Option<&str>) -> Self {
        Self {
            address: address.into(),
            name: name.map(str::to_string),
            rssi: None,
        }
    }
}

/// Sender half used by adapters to deliver advertisements.
pub type AdvertisementSender = mpsc::UnboundedSender<Advertisement>;

/// Sender half used by adapters to deliver notification payloads.
pub type NotificationSender = mpsc::Sender<Vec<u8>>;

/// Operations the core needs from a Bluetooth stack.
///
/// Every `async` method is awaited to completion by the caller before the
/// next step starts. Implementations must catch their own platform faults
/// and return them as values.
#[async_trait]
pub trait BleStack: Send + Sync + 'static {
    /// Handle for a connected peripheral.
    type Device: Send + Sync + 'static;
    /// Handle for a discovered GATT service.
    type Service: Send + Sync + 'static;
    /// Handle for a discovered GATT characteristic.
    type Characteristic: Clone + Send + Sync + 'static;

    /// Start scanning and deliver every advertisement to `events`.
    ///
    /// `active` requests active scanning (scan requests are sent so scan
    /// responses, which usually carry the local name, are received).
    async fn start_scan(
        &self,
        active: bool,
        events: AdvertisementSender,
    ) -> Result<(), PlatformError>;

    /// Stop scanning. Stopping a stack that is not scanning is not an error.
    async fn stop_scan(&self) -> Result<(), PlatformError>;

    /// Connect to the peripheral at `address`.
    ///
    /// `Ok(None)` means the stack resolved the attempt without a device.
    async fn connect(&self, address: BleAddress) -> Result<Option<Self::Device>, PlatformError>;

    /// Release a connection.
    async fn disconnect(&self, device: &Self::Device) -> Result<(), PlatformError>;

    /// Discover the services of `device` matching `uuid`.
    async fn discover_services(
        &self,
        device: &Self::Device,
        uuid: Uuid,
    ) -> Result<Vec<Self::Service>, GattStatus>;

    /// Discover the characteristics of `service` matching `uuid`.
    async fn discover_characteristics(
        &self,
        service: &Self::Service,
        uuid: Uuid,
    ) -> Result<Vec<Self::Characteristic>, GattStatus>;

    /// Write the client characteristic configuration descriptor to enable notify.
    async fn write_notify_descriptor(
        &self,
        device: &Self::Device,
        characteristic: &Self::Characteristic,
    ) -> Result<(), GattStatus>;

    /// Deliver every value change of `characteristic` to `values`.
    async fn on_value_changed(
        &self,
        device: &Self::Device,
        characteristic: &Self::Characteristic,
        values: NotificationSender,
    ) -> Result<(), PlatformError>;

    /// Stop delivering value changes registered with [`on_value_changed`](Self::on_value_changed).
    ///
    /// Must succeed when nothing is registered.
    async fn remove_value_changed(
        &self,
        device: &Self::Device,
        characteristic: &Self::Characteristic,
    ) -> Result<(), PlatformError>;
}
