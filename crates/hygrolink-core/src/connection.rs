//! Connection establishment.
//!
//! [`ConnectionManager::connect`] performs exactly one connect attempt and
//! either hands back an owned [`ConnectionHandle`] or a [`ConnectError`].
//! Retrying is left to the caller (see [`crate::retry`]).

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use hygrolink_types::BleAddress;

use crate::error::{ConnectError, Error, PlatformError};
use crate::events::{DeviceEvent, DisconnectReason, EventDispatcher};
use crate::registry::DeviceRegistry;
use crate::stack::BleStack;

/// An owned, live connection to one device.
///
/// The handle is consumed by
/// [`GattSubscriptionManager::subscribe_temperature_humidity`](crate::GattSubscriptionManager::subscribe_temperature_humidity),
/// or released with [`ConnectionManager::disconnect`].
pub struct ConnectionHandle<S: BleStack> {
    address: BleAddress,
    device: S::Device,
}

impl<S: BleStack> ConnectionHandle<S> {
    /// Address of the connected device.
    pub fn address(&self) -> BleAddress {
        self.address
    }

    /// The stack's device handle.
    pub fn device(&self) -> &S::Device {
        &self.device
    }

    pub(crate) fn into_parts(self) -> (BleAddress, S::Device) {
        (self.address, self.device)
    }
}

impl<S: BleStack> fmt::Debug for ConnectionHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Connects to devices through a [`BleStack`].
pub struct ConnectionManager<S: BleStack> {
    stack: Arc<S>,
    events: EventDispatcher,
}

impl<S: BleStack> ConnectionManager<S> {
    /// Create a connection manager.
    pub fn new(stack: Arc<S>, events: EventDispatcher) -> Self {
        Self { stack, events }
    }

    /// Make a single connect attempt to `address`.
    ///
    /// # Errors
    ///
    /// [`ConnectError::NoDevice`] if the stack produced no device,
    /// [`ConnectError::Platform`] if it raised a fault. Nothing is retained
    /// on failure.
    #[tracing::instrument(level = "info", skip(self), fields(address = %address))]
    pub async fn connect(&self, address: BleAddress) -> Result<ConnectionHandle<S>, ConnectError> {
        info!("Connecting to device...");
        match self.stack.connect(address).await {
            Ok(Some(device)) => {
                info!("Connected to device: {}", address);
                self.events.send(DeviceEvent::Connected { address });
                Ok(ConnectionHandle { address, device })
            }
            Ok(None) => {
                warn!("Failed to connect to device: stack returned no device");
                Err(ConnectError::NoDevice { address })
            }
            Err(cause) => {
                warn!("Failed to connect to device: {}", cause);
                Err(ConnectError::Platform { address, cause })
            }
        }
    }

    /// Resolve an operator-selected index and connect to it.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownIndex`] if `index` was never assigned (no connect is
    /// attempted), otherwise the errors of [`connect`](Self::connect).
    pub async fn connect_index(
        &self,
        registry: &DeviceRegistry,
        index: u32,
    ) -> Result<ConnectionHandle<S>, Error> {
        let address = registry.resolve(index).ok_or(Error::UnknownIndex(index))?;
        Ok(self.connect(address).await?)
    }

    /// Release a connection that was never handed to a subscription.
    pub async fn disconnect(&self, handle: ConnectionHandle<S>) -> Result<(), PlatformError> {
        let (address, device) = handle.into_parts();
        info!("Disconnecting from {}", address);
        let result = self.stack.disconnect(&device).await;
        self.events.send(DeviceEvent::Disconnected {
            address,
            reason: DisconnectReason::UserRequested,
        });
        result
    }
}
