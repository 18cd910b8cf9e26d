//! GATT discovery and telemetry subscription.
//!
//! Subscribing is a fixed sequence where each step feeds the next:
//!
//! 1. discover the vendor service on the connected device
//! 2. discover the telemetry characteristic on the first matching service
//! 3. register for value changes (payloads arrive on a channel)
//! 4. write the client characteristic configuration descriptor to enable notify
//!
//! A failure in steps 1 to 3 releases the connection. Once the handler is
//! registered the [`Subscription`] exists and owns the connection, even when
//! step 4 fails; see [`SubscribeFailure`]. A background task decodes every
//! payload and publishes it as a [`DeviceEvent`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hygrolink_types::uuid::from_short_id;
use hygrolink_types::{BleAddress, decode, hex_dump};

use crate::connection::ConnectionHandle;
use crate::error::SubscribeError;
use crate::events::{DeviceEvent, DisconnectReason, EventDispatcher};
use crate::stack::BleStack;

/// Options for telemetry subscriptions.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Capacity of the notification channel between the stack and the decoder.
    /// Default: 32 payloads. Never less than 1.
    pub buffer_size: usize,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self { buffer_size: 32 }
    }
}

impl SubscribeOptions {
    /// Set the notification buffer size. 0 is raised to 1.
    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }
}

/// A failed [`GattSubscriptionManager::subscribe_temperature_humidity`].
#[non_exhaustive]
pub enum SubscribeFailure<S: BleStack> {
    /// Setup stopped before the value-changed handler was registered. The
    /// connection has already been released.
    Released(SubscribeError),
    /// Notifications could not be enabled. The value-changed handler stays
    /// registered and `subscription` still owns the connection; release it
    /// with [`Subscription::unsubscribe`].
    NotifyWriteFailed {
        error: SubscribeError,
        subscription: Subscription<S>,
    },
}

impl<S: BleStack> SubscribeFailure<S> {
    pub fn error(&self) -> &SubscribeError {
        match self {
            SubscribeFailure::Released(error) | SubscribeFailure::NotifyWriteFailed { error, .. } => {
                error
            }
        }
    }

    /// The subscription left behind by a failed notify write.
    pub fn into_subscription(self) -> Option<Subscription<S>> {
        match self {
            SubscribeFailure::Released(_) => None,
            SubscribeFailure::NotifyWriteFailed { subscription, .. } => Some(subscription),
        }
    }

    /// Unsubscribe whatever is left and return the underlying error.
    pub async fn release(self) -> SubscribeError {
        match self {
            SubscribeFailure::Released(error) => error,
            SubscribeFailure::NotifyWriteFailed {
                error,
                subscription,
            } => {
                subscription.unsubscribe().await;
                error
            }
        }
    }
}

impl<S: BleStack> From<SubscribeError> for SubscribeFailure<S> {
    fn from(error: SubscribeError) -> Self {
        SubscribeFailure::Released(error)
    }
}

impl<S: BleStack> fmt::Debug for SubscribeFailure<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscribeFailure::Released(error) => f.debug_tuple("Released").field(error).finish(),
            SubscribeFailure::NotifyWriteFailed {
                error,
                subscription,
            } => f
                .debug_struct("NotifyWriteFailed")
                .field("error", error)
                .field("subscription", subscription)
                .finish(),
        }
    }
}

impl<S: BleStack> fmt::Display for SubscribeFailure<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.error(), f)
    }
}

impl<S: BleStack> std::error::Error for SubscribeFailure<S> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error())
    }
}

/// Sets up telemetry subscriptions on connected devices.
pub struct GattSubscriptionManager<S: BleStack> {
    stack: Arc<S>,
    events: EventDispatcher,
    options: SubscribeOptions,
}

impl<S: BleStack> GattSubscriptionManager<S> {
    /// Create a manager with default options.
    pub fn new(stack: Arc<S>, events: EventDispatcher) -> Self {
        Self::with_options(stack, events, SubscribeOptions::default())
    }

    /// Create a manager with custom options.
    pub fn with_options(stack: Arc<S>, events: EventDispatcher, options: SubscribeOptions) -> Self {
        Self {
            stack,
            events,
            options,
        }
    }

    /// Discover `service_id`/`characteristic_id` and subscribe to its notifications.
    ///
    /// Takes ownership of the connection. When several services or
    /// characteristics match, the first one reported by the stack is used.
    ///
    /// # Errors
    ///
    /// [`SubscribeFailure::Released`], with the connection already released:
    ///
    /// - [`SubscribeError::ServiceNotFound`]: discovery failed or matched nothing
    /// - [`SubscribeError::CharacteristicNotFound`]: likewise for the characteristic
    /// - [`SubscribeError::Platform`]: the value-changed handler could not be registered
    ///
    /// [`SubscribeFailure::NotifyWriteFailed`] when notifications could not
    /// be enabled. The handler stays registered and the returned subscription
    /// still owns the connection.
    #[tracing::instrument(
        level = "info",
        skip(self, handle),
        fields(address = %handle.address(), service = %format_args!("0x{:04X}", service_id), characteristic = %format_args!("0x{:04X}", characteristic_id))
    )]
    pub async fn subscribe_temperature_humidity(
        &self,
        handle: ConnectionHandle<S>,
        service_id: u16,
        characteristic_id: u16,
    ) -> Result<Subscription<S>, SubscribeFailure<S>> {
        let (address, device) = handle.into_parts();

        let (service, characteristic) =
            match self.discover(&device, service_id, characteristic_id).await {
                Ok(found) => found,
                Err(e) => {
                    warn!("{}", e);
                    self.release(address, &device).await;
                    return Err(e.into());
                }
            };

        let (tx, rx) = mpsc::channel(self.options.buffer_size.max(1));
        if let Err(e) = self
            .stack
            .on_value_changed(&device, &characteristic, tx)
            .await
        {
            warn!("Failed to register notification handler: {}", e);
            self.release(address, &device).await;
            return Err(SubscribeError::Platform(e).into());
        }

        let subscription = Subscription::start(
            Arc::clone(&self.stack),
            self.events.clone(),
            address,
            device,
            service,
            characteristic,
            service_id,
            characteristic_id,
            rx,
        );

        if let Err(status) = self
            .stack
            .write_notify_descriptor(&subscription.device, &subscription.characteristic)
            .await
        {
            warn!("Failed to subscribe to telemetry notifications: {}", status);
            return Err(SubscribeFailure::NotifyWriteFailed {
                error: SubscribeError::NotifyWriteFailed {
                    uuid: characteristic_id,
                    status,
                },
                subscription,
            });
        }

        info!("Subscribed to temperature and humidity notifications");
        self.events.send(DeviceEvent::Subscribed {
            address,
            service: service_id,
            characteristic: characteristic_id,
        });
        Ok(subscription)
    }

    async fn discover(
        &self,
        device: &S::Device,
        service_id: u16,
        characteristic_id: u16,
    ) -> Result<(S::Service, S::Characteristic), SubscribeError> {
        let services = self
            .stack
            .discover_services(device, from_short_id(service_id))
            .await
            .map_err(|status| SubscribeError::ServiceNotFound {
                uuid: service_id,
                status: Some(status),
            })?;
        debug!("Found {} matching service(s)", services.len());
        let service = services
            .into_iter()
            .next()
            .ok_or(SubscribeError::ServiceNotFound {
                uuid: service_id,
                status: None,
            })?;

        let characteristics = self
            .stack
            .discover_characteristics(&service, from_short_id(characteristic_id))
            .await
            .map_err(|status| SubscribeError::CharacteristicNotFound {
                uuid: characteristic_id,
                status: Some(status),
            })?;
        debug!("Found {} matching characteristic(s)", characteristics.len());
        let characteristic =
            characteristics
                .into_iter()
                .next()
                .ok_or(SubscribeError::CharacteristicNotFound {
                    uuid: characteristic_id,
                    status: None,
                })?;

        Ok((service, characteristic))
    }

    async fn release(&self, address: BleAddress, device: &S::Device) {
        if let Err(e) = self.stack.disconnect(device).await {
            warn!("Failed to disconnect from {}: {}", address, e);
        }
        self.events.send(DeviceEvent::Disconnected {
            address,
            reason: DisconnectReason::SubscribeFailed,
        });
    }
}

/// A live telemetry subscription.
///
/// Owns the connection until [`unsubscribe`](Self::unsubscribe) is called.
/// The running flag goes from `true` to `false` exactly once, via
/// [`cancel`](Self::cancel), the [`cancellation_token`](Self::cancellation_token)
/// or `unsubscribe`.
pub struct Subscription<S: BleStack> {
    stack: Arc<S>,
    events: EventDispatcher,
    address: BleAddress,
    device: S::Device,
    service: S::Service,
    characteristic: S::Characteristic,
    service_id: u16,
    characteristic_id: u16,
    running: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    torn_down: AtomicBool,
}

impl<S: BleStack> fmt::Debug for Subscription<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("address", &self.address)
            .field("service_id", &self.service_id)
            .field("characteristic_id", &self.characteristic_id)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl<S: BleStack> Subscription<S> {
    #[allow(clippy::too_many_arguments)]
    fn start(
        stack: Arc<S>,
        events: EventDispatcher,
        address: BleAddress,
        device: S::Device,
        service: S::Service,
        characteristic: S::Characteristic,
        service_id: u16,
        characteristic_id: u16,
        rx: mpsc::Receiver<Vec<u8>>,
    ) -> Self {
        let running = CancellationToken::new();
        let task = tokio::spawn(forward_notifications(
            rx,
            address,
            events.clone(),
            running.clone(),
        ));

        Self {
            stack,
            events,
            address,
            device,
            service,
            characteristic,
            service_id,
            characteristic_id,
            running,
            task: Mutex::new(Some(task)),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Address of the subscribed device.
    pub fn address(&self) -> BleAddress {
        self.address
    }

    /// Short UUID of the subscribed service.
    pub fn service_id(&self) -> u16 {
        self.service_id
    }

    /// Short UUID of the subscribed characteristic.
    pub fn characteristic_id(&self) -> u16 {
        self.characteristic_id
    }

    /// The discovered service handle.
    pub fn service(&self) -> &S::Service {
        &self.service
    }

    /// The discovered characteristic handle.
    pub fn characteristic(&self) -> &S::Characteristic {
        &self.characteristic
    }

    /// Whether the running flag is still set.
    pub fn is_running(&self) -> bool {
        !self.running.is_cancelled()
    }

    /// Clear the running flag.
    ///
    /// Returns `false` if it was already cleared, in which case nothing
    /// happens. Safe to call from any thread.
    pub fn cancel(&self) -> bool {
        if self.running.is_cancelled() {
            return false;
        }
        debug!("Subscription cancelled");
        self.running.cancel();
        true
    }

    /// The running flag as a token. Cancelling it is the same as
    /// [`cancel`](Self::cancel).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.running.clone()
    }

    /// Wait while notifications arrive, until the subscription is cancelled.
    ///
    /// There is no timeout; cancellation is the only way out.
    pub async fn hold(&self) {
        self.running.cancelled().await;
    }

    /// Remove the notification handler and release the connection.
    ///
    /// Idempotent: calls after the first do nothing. Failures from the stack
    /// are logged, never returned, since the connection is being discarded.
    pub async fn unsubscribe(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel();

        if let Err(e) = self
            .stack
            .remove_value_changed(&self.device, &self.characteristic)
            .await
        {
            warn!("Failed to remove notification handler: {}", e);
        }
        if let Some(task) = self.take_task() {
            task.abort();
        }
        if let Err(e) = self.stack.disconnect(&self.device).await {
            warn!("Failed to disconnect from {}: {}", self.address, e);
        }

        info!("Unsubscribed from {}", self.address);
        self.events.send(DeviceEvent::Disconnected {
            address: self.address,
            reason: DisconnectReason::Unsubscribed,
        });
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl<S: BleStack> Drop for Subscription<S> {
    fn drop(&mut self) {
        if !self.torn_down.load(Ordering::SeqCst) {
            warn!(
                "Subscription for {} dropped without unsubscribe; connection not released",
                self.address
            );
        }
        self.running.cancel();
        if let Some(task) = self.take_task() {
            task.abort();
        }
    }
}

async fn forward_notifications(
    mut rx: mpsc::Receiver<Vec<u8>>,
    address: BleAddress,
    events: EventDispatcher,
    running: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = running.cancelled() => break,
            payload = rx.recv() => match payload {
                Some(payload) => publish(&events, address, payload),
                None => {
                    debug!("Notification channel closed");
                    break;
                }
            },
        }
    }
}

fn publish(events: &EventDispatcher, address: BleAddress, payload: Vec<u8>) {
    match decode(&payload) {
        Ok(reading) => {
            debug!(
                raw = %reading.hex_dump(),
                "Temperature: {:.1}°C, humidity: {:.1}%",
                reading.temperature_celsius,
                reading.humidity_percent
            );
            let reading = reading.with_received_at(time::OffsetDateTime::now_utc());
            events.send(DeviceEvent::Telemetry { address, reading });
        }
        Err(e) => {
            warn!("Dropping notification [{}]: {}", hex_dump(&payload), e);
            events.send(DeviceEvent::DecodeFailed {
                address,
                raw: payload,
                error: e.to_string(),
            });
        }
    }
}
