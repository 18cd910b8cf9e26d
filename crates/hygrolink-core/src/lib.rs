//! Discovery, connection and GATT subscription core for BLE
//! temperature/humidity sensors.
//!
//! The crate drives one device from advertisement to streaming telemetry:
//!
//! - **Discovery**: a [`ScanSession`] records advertisements in a
//!   [`DeviceRegistry`] that hands out stable, 1-based indices
//! - **Connection**: [`ConnectionManager`] makes a single connect attempt to
//!   an address and returns an owned [`ConnectionHandle`]
//! - **Subscription**: [`GattSubscriptionManager`] discovers the vendor
//!   service and telemetry characteristic, enables notifications and decodes
//!   every payload into a [`Telemetry`] reading
//! - **Events**: progress and readings are published as [`DeviceEvent`]s
//!   on an [`EventDispatcher`]
//!
//! The radio is reached through the [`BleStack`] trait.
//! [`BtleplugStack`] talks to real hardware; [`MockStack`] is for tests.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use hygrolink_core::{
//!     BtleplugStack, ConnectionManager, DeviceEvent, EventDispatcher, GattSubscriptionManager,
//!     ScanSession,
//! };
//! use hygrolink_core::uuids::{TELEMETRY_CHARACTERISTIC_SHORT, VENDOR_SERVICE_SHORT};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stack = Arc::new(BtleplugStack::new().await?);
//!     let events = EventDispatcher::default();
//!
//!     let session = ScanSession::new(Arc::clone(&stack), events.clone());
//!     session.run_for(Duration::from_secs(10)).await?;
//!
//!     let connections = ConnectionManager::new(Arc::clone(&stack), events.clone());
//!     let handle = connections.connect_index(&session.registry(), 1).await?;
//!
//!     let mut rx = events.subscribe();
//!     let subscriptions = GattSubscriptionManager::new(stack, events);
//!     let subscription = subscriptions
//!         .subscribe_temperature_humidity(handle, VENDOR_SERVICE_SHORT, TELEMETRY_CHARACTERISTIC_SHORT)
//!         .await?;
//!
//!     while let Ok(event) = rx.recv().await {
//!         if let DeviceEvent::Telemetry { reading, .. } = event {
//!             println!("{:.1}°C {:.1}%", reading.temperature_celsius, reading.humidity_percent);
//!             break;
//!         }
//!     }
//!
//!     subscription.unsubscribe().await;
//!     Ok(())
//! }
//! ```

pub mod bluetooth;
pub mod connection;
pub mod error;
pub mod events;
pub mod mock;
pub mod registry;
pub mod retry;
pub mod scan;
pub mod stack;
pub mod subscription;

// Core exports
pub use bluetooth::{BtleplugDevice, BtleplugStack, ConnectionConfig};
pub use connection::{ConnectionHandle, ConnectionManager};
pub use error::{ConnectError, Error, GattStatus, PlatformError, Result, SubscribeError};
pub use events::{DeviceEvent, DisconnectReason, EventDispatcher, EventReceiver, EventSender};
pub use mock::{MockPeripheral, MockService, MockStack};
pub use registry::{DeviceRecord, DeviceRegistry, UNKNOWN_DEVICE_NAME};
pub use retry::{RetryConfig, Retryable, with_retry};
pub use scan::{ScanSession, ScanState};
pub use stack::{Advertisement, AdvertisementSender, BleStack, NotificationSender};
pub use subscription::{GattSubscriptionManager, SubscribeFailure, SubscribeOptions, Subscription};

// Re-export from hygrolink-types
pub use hygrolink_types::uuid as uuids;
pub use hygrolink_types::{
    BleAddress, DecodeError, Telemetry, TemperatureUnit, decode, hex_dump, parse_hex,
};
