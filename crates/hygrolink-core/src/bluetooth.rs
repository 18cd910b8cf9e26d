//! [`BleStack`] implementation backed by btleplug.
//!
//! btleplug delivers advertisements and notifications as async streams. The
//! adapter drains each stream in its own task and forwards into the channels
//! the core handed over, so no core state is touched from btleplug's side.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    Service,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use hygrolink_types::BleAddress;

use crate::error::{GattStatus, PlatformError};
use crate::stack::{Advertisement, AdvertisementSender, BleStack, NotificationSender};

/// Default timeout for BLE connection operations.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for descriptor writes.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeouts applied to btleplug calls.
///
/// btleplug can hang indefinitely on an unresponsive peripheral, so every
/// connection-level call is bounded.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for establishing a BLE connection.
    pub connection_timeout: Duration,
    /// Timeout for service discovery.
    pub discovery_timeout: Duration,
    /// Timeout for the notify descriptor write.
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Create a new connection config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the descriptor write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// A peripheral connected through btleplug.
#[derive(Debug, Clone)]
pub struct BtleplugDevice {
    peripheral: Peripheral,
    address: BleAddress,
}

impl BtleplugDevice {
    /// Address of the peripheral.
    pub fn address(&self) -> BleAddress {
        self.address
    }

    /// The underlying btleplug peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }
}

/// Bluetooth stack on the host's first adapter.
pub struct BtleplugStack {
    adapter: Adapter,
    config: ConnectionConfig,
    scan_token: Mutex<Option<CancellationToken>>,
    notification_tasks: Mutex<HashMap<(PeripheralId, Uuid), JoinHandle<()>>>,
}

impl std::fmt::Debug for BtleplugStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugStack")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BtleplugStack {
    /// Open the first Bluetooth adapter with default timeouts.
    ///
    /// # Errors
    ///
    /// [`PlatformError::AdapterUnavailable`] if the host has no adapter.
    pub async fn new() -> Result<Self, PlatformError> {
        Self::with_config(ConnectionConfig::default()).await
    }

    /// Open the first Bluetooth adapter with custom timeouts.
    pub async fn with_config(config: ConnectionConfig) -> Result<Self, PlatformError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(PlatformError::AdapterUnavailable)?;

        match adapter.adapter_info().await {
            Ok(info) => debug!("Using Bluetooth adapter: {}", info),
            Err(e) => debug!("Could not read adapter info: {}", e),
        }

        Ok(Self {
            adapter,
            config,
            scan_token: Mutex::new(None),
            notification_tasks: Mutex::new(HashMap::new()),
        })
    }

    /// The active timeouts.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn scan_token(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.scan_token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notification_tasks(&self) -> MutexGuard<'_, HashMap<(PeripheralId, Uuid), JoinHandle<()>>> {
        self.notification_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn find_peripheral(&self, address: BleAddress) -> Result<Option<Peripheral>, PlatformError> {
        let wanted = BDAddr::from(address.to_bytes());
        Ok(self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.address() == wanted))
    }
}

impl Drop for BtleplugStack {
    fn drop(&mut self) {
        if let Some(token) = self.scan_token().take() {
            token.cancel();
        }
        for (_, task) in self.notification_tasks().drain() {
            task.abort();
        }
    }
}

async fn advertisement_for(adapter: &Adapter, id: &PeripheralId) -> Option<Advertisement> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;
    if properties.address == BDAddr::default() {
        // CoreBluetooth hides hardware addresses.
        trace!("Ignoring advertisement without an address from {:?}", id);
        return None;
    }
    Some(Advertisement {
        address: BleAddress::from(properties.address.into_inner()),
        name: properties.local_name,
        rssi: properties.rssi,
    })
}

#[async_trait]
impl BleStack for BtleplugStack {
    type Device = BtleplugDevice;
    type Service = Service;
    type Characteristic = Characteristic;

    async fn start_scan(
        &self,
        active: bool,
        events: AdvertisementSender,
    ) -> Result<(), PlatformError> {
        if active {
            debug!("btleplug does not expose the scan mode; using the platform default");
        }

        let mut central_events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let token = CancellationToken::new();
        if let Some(previous) = self.scan_token().replace(token.clone()) {
            previous.cancel();
        }

        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = central_events.next() => match event {
                        Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) => {
                            if let Some(adv) = advertisement_for(&adapter, &id).await
                                && events.send(adv).is_err()
                            {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => {
                            debug!("Adapter event stream ended");
                            break;
                        }
                    },
                }
            }
        });

        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), PlatformError> {
        if let Some(token) = self.scan_token().take() {
            token.cancel();
        }
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, address: BleAddress) -> Result<Option<Self::Device>, PlatformError> {
        let Some(peripheral) = self.find_peripheral(address).await? else {
            warn!("No peripheral with address {} known to the adapter", address);
            return Ok(None);
        };

        timeout(self.config.connection_timeout, peripheral.connect())
            .await
            .map_err(|_| PlatformError::timeout("connect to device", self.config.connection_timeout))??;

        Ok(Some(BtleplugDevice {
            peripheral,
            address,
        }))
    }

    async fn disconnect(&self, device: &Self::Device) -> Result<(), PlatformError> {
        let id = device.peripheral.id();
        self.notification_tasks().retain(|(peripheral_id, _), task| {
            if *peripheral_id == id {
                task.abort();
                false
            } else {
                true
            }
        });
        device.peripheral.disconnect().await?;
        Ok(())
    }

    async fn discover_services(
        &self,
        device: &Self::Device,
        uuid: Uuid,
    ) -> Result<Vec<Self::Service>, GattStatus> {
        timeout(
            self.config.discovery_timeout,
            device.peripheral.discover_services(),
        )
        .await
        .map_err(|_| {
            GattStatus::from(PlatformError::timeout(
                "discover services",
                self.config.discovery_timeout,
            ))
        })??;

        let services = device.peripheral.services();
        debug!("Found {} services", services.len());
        Ok(services.into_iter().filter(|s| s.uuid == uuid).collect())
    }

    async fn discover_characteristics(
        &self,
        service: &Self::Service,
        uuid: Uuid,
    ) -> Result<Vec<Self::Characteristic>, GattStatus> {
        Ok(service
            .characteristics
            .iter()
            .filter(|c| c.uuid == uuid)
            .cloned()
            .collect())
    }

    async fn write_notify_descriptor(
        &self,
        device: &Self::Device,
        characteristic: &Self::Characteristic,
    ) -> Result<(), GattStatus> {
        // btleplug writes the client characteristic configuration descriptor.
        timeout(
            self.config.write_timeout,
            device.peripheral.subscribe(characteristic),
        )
        .await
        .map_err(|_| {
            GattStatus::from(PlatformError::timeout(
                "enable notifications",
                self.config.write_timeout,
            ))
        })??;
        Ok(())
    }

    async fn on_value_changed(
        &self,
        device: &Self::Device,
        characteristic: &Self::Characteristic,
        values: NotificationSender,
    ) -> Result<(), PlatformError> {
        let mut stream = device.peripheral.notifications().await?;
        let char_uuid = characteristic.uuid;

        let task = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid == char_uuid && values.send(notification.value).await.is_err() {
                    break;
                }
            }
        });

        info!("Listening for notifications on {}", char_uuid);
        if let Some(previous) = self
            .notification_tasks()
            .insert((device.peripheral.id(), char_uuid), task)
        {
            previous.abort();
        }
        Ok(())
    }

    async fn remove_value_changed(
        &self,
        device: &Self::Device,
        characteristic: &Self::Characteristic,
    ) -> Result<(), PlatformError> {
        let task = self
            .notification_tasks()
            .remove(&(device.peripheral.id(), characteristic.uuid));
        let Some(task) = task else {
            return Ok(());
        };
        task.abort();

        if let Err(e) = device.peripheral.unsubscribe(characteristic).await {
            debug!("Failed to disable notifications on {}: {}", characteristic.uuid, e);
        }
        Ok(())
    }
}
