//! In-memory Bluetooth stack for testing.
//!
//! [`MockStack`] implements [`BleStack`] without any radio, so the scan,
//! connect and subscribe flows can be exercised in unit and integration
//! tests.
//!
//! # Features
//!
//! - **Scripted peripherals**: describe each device's GATT layout with
//!   [`MockPeripheral`] and [`MockService`]
//! - **Failure injection**: fail scanning, connecting, discovery or the
//!   notify write on demand
//! - **Call counting**: assert how many times each stack operation ran
//! - **Push delivery**: feed advertisements and notifications as the
//!   platform would

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use hygrolink_types::BleAddress;
use hygrolink_types::uuid::{TELEMETRY_CHARACTERISTIC_SHORT, VENDOR_SERVICE_SHORT, from_short_id};

use crate::error::{GattStatus, PlatformError};
use crate::stack::{Advertisement, AdvertisementSender, BleStack, NotificationSender};

/// GATT layout and behaviour of one scripted service.
#[derive(Debug, Clone)]
pub struct MockService {
    uuid: Uuid,
    characteristics: Vec<Uuid>,
    characteristic_status: Option<GattStatus>,
}

impl MockService {
    /// A service with no characteristics.
    pub fn new(short_id: u16) -> Self {
        Self {
            uuid: from_short_id(short_id),
            characteristics: Vec::new(),
            characteristic_status: None,
        }
    }

    /// Add a characteristic.
    #[must_use]
    pub fn with_characteristic(mut self, short_id: u16) -> Self {
        self.characteristics.push(from_short_id(short_id));
        self
    }

    /// Make characteristic discovery on this service fail with `status`.
    #[must_use]
    pub fn characteristic_status(mut self, status: GattStatus) -> Self {
        self.characteristic_status = Some(status);
        self
    }
}

/// GATT layout and behaviour of one scripted peripheral.
#[derive(Debug, Clone, Default)]
pub struct MockPeripheral {
    services: Vec<MockService>,
    service_status: Option<GattStatus>,
    notify_status: Option<GattStatus>,
}

impl MockPeripheral {
    /// A peripheral exposing no services.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A thermo-hygrometer: the vendor service with the telemetry characteristic.
    pub fn sensor() -> Self {
        Self::empty().with_service(
            MockService::new(VENDOR_SERVICE_SHORT).with_characteristic(TELEMETRY_CHARACTERISTIC_SHORT),
        )
    }

    /// Add a service.
    #[must_use]
    pub fn with_service(mut self, service: MockService) -> Self {
        self.services.push(service);
        self
    }

    /// Make service discovery fail with `status`.
    #[must_use]
    pub fn service_status(mut self, status: GattStatus) -> Self {
        self.service_status = Some(status);
        self
    }

    /// Make the notify descriptor write fail with `status`.
    #[must_use]
    pub fn notify_status(mut self, status: GattStatus) -> Self {
        self.notify_status = Some(status);
        self
    }
}

/// Connected-device handle produced by [`MockStack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDeviceHandle {
    address: BleAddress,
}

impl MockDeviceHandle {
    /// Address of the device.
    pub fn address(&self) -> BleAddress {
        self.address
    }
}

/// Service handle produced by [`MockStack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockServiceHandle {
    address: BleAddress,
    position: usize,
    uuid: Uuid,
}

impl MockServiceHandle {
    /// Position of the service in the peripheral's layout.
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Characteristic handle produced by [`MockStack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCharacteristicHandle {
    address: BleAddress,
    service_position: usize,
    uuid: Uuid,
}

impl MockCharacteristicHandle {
    /// Position of the owning service in the peripheral's layout.
    pub fn service_position(&self) -> usize {
        self.service_position
    }

    /// UUID of the characteristic.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

#[derive(Default)]
struct MockState {
    peripherals: HashMap<BleAddress, MockPeripheral>,
    connect_failures: HashMap<BleAddress, PlatformError>,
    connected: HashSet<BleAddress>,
    scan_events: Option<AdvertisementSender>,
    last_scan_active: Option<bool>,
    value_handlers: HashMap<(BleAddress, Uuid), NotificationSender>,
}

/// A Bluetooth stack that exists only in memory.
pub struct MockStack {
    state: Mutex<MockState>,
    fail_scan: AtomicBool,
    /// Number of upcoming connects that fail before connecting works again.
    remaining_connect_failures: AtomicU32,
    stop_scan_count: AtomicU32,
    connect_count: AtomicU32,
    disconnect_count: AtomicU32,
    discover_services_count: AtomicU32,
    discover_characteristics_count: AtomicU32,
    write_notify_count: AtomicU32,
    on_value_changed_count: AtomicU32,
    remove_value_changed_count: AtomicU32,
}

impl std::fmt::Debug for MockStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MockStack")
            .field("peripherals", &state.peripherals.len())
            .field("connected", &state.connected.len())
            .field("scanning", &state.scan_events.is_some())
            .finish()
    }
}

impl Default for MockStack {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStack {
    /// Create a stack with no peripherals.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            fail_scan: AtomicBool::new(false),
            remaining_connect_failures: AtomicU32::new(0),
            stop_scan_count: AtomicU32::new(0),
            connect_count: AtomicU32::new(0),
            disconnect_count: AtomicU32::new(0),
            discover_services_count: AtomicU32::new(0),
            discover_characteristics_count: AtomicU32::new(0),
            write_notify_count: AtomicU32::new(0),
            on_value_changed_count: AtomicU32::new(0),
            remove_value_changed_count: AtomicU32::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Scripting ====================

    /// Add a connectable thermo-hygrometer at `address`.
    pub fn add_device(&self, address: BleAddress) {
        self.add_peripheral(address, MockPeripheral::sensor());
    }

    /// Add a connectable peripheral with a custom GATT layout.
    pub fn add_peripheral(&self, address: BleAddress, peripheral: MockPeripheral) {
        self.state().peripherals.insert(address, peripheral);
    }

    /// Make every connect to `address` fail with `error`.
    pub fn fail_connect(&self, address: BleAddress, error: PlatformError) {
        self.state().connect_failures.insert(address, error);
    }

    /// Make the next `count` connects fail, whatever the address.
    pub fn fail_next_connects(&self, count: u32) {
        self.remaining_connect_failures.store(count, Ordering::SeqCst);
    }

    /// Make `start_scan` fail.
    pub fn fail_scan(&self, fail: bool) {
        self.fail_scan.store(fail, Ordering::SeqCst);
    }

    /// Deliver an advertisement, as the radio would.
    ///
    /// Returns `false` if the stack is not scanning.
    pub fn advertise(&self, advertisement: Advertisement) -> bool {
        match &self.state().scan_events {
            Some(events) => events.send(advertisement).is_ok(),
            None => false,
        }
    }

    /// Deliver a notification payload to every handler registered on `address`.
    ///
    /// Returns `false` if nothing received it.
    pub async fn notify(&self, address: BleAddress, payload: Vec<u8>) -> bool {
        let handlers: Vec<NotificationSender> = self
            .state()
            .value_handlers
            .iter()
            .filter(|((handler_address, _), _)| *handler_address == address)
            .map(|(_, sender)| sender.clone())
            .collect();

        let mut delivered = false;
        for handler in handlers {
            delivered |= handler.send(payload.clone()).await.is_ok();
        }
        delivered
    }

    /// Simulate the peripheral going out of range: the link drops and any
    /// notification channels close.
    pub fn drop_connection(&self, address: BleAddress) {
        let mut state = self.state();
        state.connected.remove(&address);
        state.value_handlers.retain(|(a, _), _| *a != address);
    }

    // ==================== Inspection ====================

    /// Whether a scan is in progress.
    pub fn is_scanning(&self) -> bool {
        self.state().scan_events.is_some()
    }

    /// The `active` flag of the most recent `start_scan`.
    pub fn last_scan_active(&self) -> Option<bool> {
        self.state().last_scan_active
    }

    /// Whether `address` is connected.
    pub fn is_connected(&self, address: BleAddress) -> bool {
        self.state().connected.contains(&address)
    }

    /// Whether a value-changed handler is registered on `address`.
    pub fn has_value_handler(&self, address: BleAddress) -> bool {
        self.state()
            .value_handlers
            .keys()
            .any(|(handler_address, _)| *handler_address == address)
    }

    /// Number of `stop_scan` calls.
    pub fn stop_scan_count(&self) -> u32 {
        self.stop_scan_count.load(Ordering::SeqCst)
    }

    /// Number of `connect` calls.
    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls.
    pub fn disconnect_count(&self) -> u32 {
        self.disconnect_count.load(Ordering::SeqCst)
    }

    /// Number of `discover_services` calls.
    pub fn discover_services_count(&self) -> u32 {
        self.discover_services_count.load(Ordering::SeqCst)
    }

    /// Number of `discover_characteristics` calls.
    pub fn discover_characteristics_count(&self) -> u32 {
        self.discover_characteristics_count.load(Ordering::SeqCst)
    }

    /// Number of `write_notify_descriptor` calls.
    pub fn write_notify_count(&self) -> u32 {
        self.write_notify_count.load(Ordering::SeqCst)
    }

    /// Number of `on_value_changed` calls.
    pub fn on_value_changed_count(&self) -> u32 {
        self.on_value_changed_count.load(Ordering::SeqCst)
    }

    /// Number of `remove_value_changed` calls.
    pub fn remove_value_changed_count(&self) -> u32 {
        self.remove_value_changed_count.load(Ordering::SeqCst)
    }

    fn take_connect_failure(&self) -> bool {
        self.remaining_connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BleStack for MockStack {
    type Device = MockDeviceHandle;
    type Service = MockServiceHandle;
    type Characteristic = MockCharacteristicHandle;

    async fn start_scan(
        &self,
        active: bool,
        events: AdvertisementSender,
    ) -> Result<(), PlatformError> {
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(PlatformError::AdapterUnavailable);
        }
        let mut state = self.state();
        state.last_scan_active = Some(active);
        state.scan_events = Some(events);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), PlatformError> {
        self.stop_scan_count.fetch_add(1, Ordering::SeqCst);
        // Dropping the sender closes the advertisement channel.
        self.state().scan_events = None;
        Ok(())
    }

    async fn connect(&self, address: BleAddress) -> Result<Option<Self::Device>, PlatformError> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);

        if self.take_connect_failure() {
            return Err(PlatformError::Stack("Mock failure".to_string()));
        }

        let mut state = self.state();
        if let Some(error) = state.connect_failures.get(&address) {
            return Err(error.clone());
        }
        if !state.peripherals.contains_key(&address) {
            return Ok(None);
        }
        state.connected.insert(address);
        Ok(Some(MockDeviceHandle { address }))
    }

    async fn disconnect(&self, device: &Self::Device) -> Result<(), PlatformError> {
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        state.value_handlers.retain(|(a, _), _| *a != device.address);
        if state.connected.remove(&device.address) {
            Ok(())
        } else {
            Err(PlatformError::Stack("not connected".to_string()))
        }
    }

    async fn discover_services(
        &self,
        device: &Self::Device,
        uuid: Uuid,
    ) -> Result<Vec<Self::Service>, GattStatus> {
        self.discover_services_count.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if !state.connected.contains(&device.address) {
            return Err(GattStatus::Unreachable);
        }
        let peripheral = state
            .peripherals
            .get(&device.address)
            .ok_or(GattStatus::Unreachable)?;
        if let Some(status) = &peripheral.service_status {
            return Err(status.clone());
        }

        Ok(peripheral
            .services
            .iter()
            .enumerate()
            .filter(|(_, service)| service.uuid == uuid)
            .map(|(position, service)| MockServiceHandle {
                address: device.address,
                position,
                uuid: service.uuid,
            })
            .collect())
    }

    async fn discover_characteristics(
        &self,
        service: &Self::Service,
        uuid: Uuid,
    ) -> Result<Vec<Self::Characteristic>, GattStatus> {
        self.discover_characteristics_count
            .fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        let layout = state
            .peripherals
            .get(&service.address)
            .and_then(|p| p.services.get(service.position))
            .filter(|s| s.uuid == service.uuid)
            .ok_or(GattStatus::Unreachable)?;
        if let Some(status) = &layout.characteristic_status {
            return Err(status.clone());
        }

        Ok(layout
            .characteristics
            .iter()
            .filter(|c| **c == uuid)
            .map(|c| MockCharacteristicHandle {
                address: service.address,
                service_position: service.position,
                uuid: *c,
            })
            .collect())
    }

    async fn write_notify_descriptor(
        &self,
        device: &Self::Device,
        _characteristic: &Self::Characteristic,
    ) -> Result<(), GattStatus> {
        self.write_notify_count.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if !state.connected.contains(&device.address) {
            return Err(GattStatus::Unreachable);
        }
        match state
            .peripherals
            .get(&device.address)
            .and_then(|p| p.notify_status.clone())
        {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    async fn on_value_changed(
        &self,
        device: &Self::Device,
        characteristic: &Self::Characteristic,
        values: NotificationSender,
    ) -> Result<(), PlatformError> {
        self.on_value_changed_count.fetch_add(1, Ordering::SeqCst);
        self.state()
            .value_handlers
            .insert((device.address, characteristic.uuid), values);
        Ok(())
    }

    async fn remove_value_changed(
        &self,
        device: &Self::Device,
        characteristic: &Self::Characteristic,
    ) -> Result<(), PlatformError> {
        self.remove_value_changed_count
            .fetch_add(1, Ordering::SeqCst);
        self.state()
            .value_handlers
            .remove(&(device.address, characteristic.uuid));
        Ok(())
    }
}
