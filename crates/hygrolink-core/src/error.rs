//! Error types for hygrolink-core.
//!
//! Failures are split by the stage that produced them:
//!
//! | Error | Produced by | Recovery |
//! |-------|-------------|----------|
//! | [`PlatformError`] | the Bluetooth stack adapter | surfaced inside the stage errors below |
//! | [`GattStatus`] | GATT discovery/write calls | surfaced inside [`SubscribeError`] |
//! | [`ConnectError`] | [`crate::ConnectionManager::connect`] | caller may retry; no handle is kept |
//! | [`SubscribeError`] | [`crate::GattSubscriptionManager`] | released before the handler is registered; afterwards the caller keeps the [`crate::Subscription`] |
//! | [`DecodeError`](crate::DecodeError) | the telemetry decoder | reported per notification, subscription continues |
//!
//! Nothing here is fatal to the process. Adapters convert every platform
//! fault into one of these values before it reaches the core.

use std::time::Duration;

use thiserror::Error;

use hygrolink_types::BleAddress;

/// A fault raised by the Bluetooth stack adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PlatformError {
    /// No Bluetooth adapter is present or it is powered off.
    #[error("Bluetooth adapter unavailable")]
    AdapterUnavailable,

    /// The operating system refused Bluetooth access.
    #[error("Bluetooth permission denied")]
    PermissionDenied,

    /// A stack operation did not complete in time.
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Any other stack failure, with the stack's own description.
    #[error("{0}")]
    Stack(String),
}

impl PlatformError {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }
}

impl From<btleplug::Error> for PlatformError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::PermissionDenied => PlatformError::PermissionDenied,
            btleplug::Error::TimedOut(duration) => PlatformError::Timeout {
                operation: "bluetooth".to_string(),
                duration,
            },
            other => PlatformError::Stack(other.to_string()),
        }
    }
}

/// Non-success status of a GATT operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum GattStatus {
    /// The peripheral could not be reached.
    #[error("unreachable")]
    Unreachable,

    /// The peripheral denied access to the attribute.
    #[error("access denied")]
    AccessDenied,

    /// The GATT exchange failed at the protocol level.
    #[error("protocol error: {0}")]
    ProtocolError(String),
}

impl From<btleplug::Error> for GattStatus {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::NotConnected | btleplug::Error::DeviceNotFound => {
                GattStatus::Unreachable
            }
            btleplug::Error::PermissionDenied => GattStatus::AccessDenied,
            other => GattStatus::ProtocolError(other.to_string()),
        }
    }
}

impl From<PlatformError> for GattStatus {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::PermissionDenied => GattStatus::AccessDenied,
            PlatformError::AdapterUnavailable => GattStatus::Unreachable,
            other => GattStatus::ProtocolError(other.to_string()),
        }
    }
}

/// Failure to establish a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConnectError {
    /// The stack resolved the attempt without producing a device.
    #[error("Failed to connect to {address}: device not available")]
    NoDevice {
        /// The address that was tried.
        address: BleAddress,
    },

    /// The stack raised a fault during the attempt.
    #[error("Failed to connect to {address}: {cause}")]
    Platform {
        /// The address that was tried.
        address: BleAddress,
        /// The underlying stack fault.
        cause: PlatformError,
    },
}

impl ConnectError {
    /// The address the failed attempt targeted.
    pub fn address(&self) -> BleAddress {
        match self {
            ConnectError::NoDevice { address } | ConnectError::Platform { address, .. } => {
                *address
            }
        }
    }
}

/// Failure while setting up the telemetry subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SubscribeError {
    /// Service discovery failed or returned no matching service.
    #[error("Service 0x{uuid:04X} not found{}", status_suffix(.status))]
    ServiceNotFound {
        /// Short UUID of the requested service.
        uuid: u16,
        /// The GATT status, if discovery itself failed.
        status: Option<GattStatus>,
    },

    /// Characteristic discovery failed or returned no matching characteristic.
    #[error("Characteristic 0x{uuid:04X} not found{}", status_suffix(.status))]
    CharacteristicNotFound {
        /// Short UUID of the requested characteristic.
        uuid: u16,
        /// The GATT status, if discovery itself failed.
        status: Option<GattStatus>,
    },

    /// Writing the client characteristic configuration descriptor failed.
    #[error("Failed to enable notifications on 0x{uuid:04X}: {status}")]
    NotifyWriteFailed {
        /// Short UUID of the characteristic.
        uuid: u16,
        /// The GATT status returned by the write.
        status: GattStatus,
    },

    /// Registering the notification callback failed.
    #[error("Failed to register notification handler: {0}")]
    Platform(PlatformError),
}

fn status_suffix(status: &Option<GattStatus>) -> String {
    status
        .as_ref()
        .map(|s| format!(" ({})", s))
        .unwrap_or_default()
}

/// Errors that can occur in hygrolink-core.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Connection attempt failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The stack adapter reported a fault.
    #[error("Bluetooth stack error: {0}")]
    Platform(#[from] PlatformError),

    /// An operation was attempted in a state that does not allow it.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// The attempted operation.
        operation: &'static str,
        /// The current state.
        state: String,
    },

    /// The operator selected an index that was never assigned.
    #[error("Invalid index selected: {0}")]
    UnknownIndex(u32),
}

impl Error {
    /// Create an invalid-state error.
    pub fn invalid_state(operation: &'static str, state: impl ToString) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }
}

/// Result type alias using hygrolink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_display() {
        let address = BleAddress::new(0xAABB_CCDD_EEFF);
        let err = ConnectError::NoDevice { address };
        assert_eq!(
            err.to_string(),
            "Failed to connect to AA:BB:CC:DD:EE:FF: device not available"
        );
        assert_eq!(err.address(), address);

        let err = ConnectError::Platform {
            address,
            cause: PlatformError::Stack("radio off".to_string()),
        };
        assert!(err.to_string().ends_with("radio off"));
    }

    #[test]
    fn test_subscribe_error_display() {
        let err = SubscribeError::ServiceNotFound {
            uuid: 0xFFE5,
            status: None,
        };
        assert_eq!(err.to_string(), "Service 0xFFE5 not found");

        let err = SubscribeError::CharacteristicNotFound {
            uuid: 0xFFE8,
            status: Some(GattStatus::Unreachable),
        };
        assert_eq!(err.to_string(), "Characteristic 0xFFE8 not found (unreachable)");

        let err = SubscribeError::NotifyWriteFailed {
            uuid: 0xFFE8,
            status: GattStatus::AccessDenied,
        };
        assert!(err.to_string().contains("access denied"));
    }

    #[test]
    fn test_timeout_display() {
        let err = PlatformError::timeout("connect", Duration::from_secs(15));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("15s"));
    }

    #[test]
    fn test_error_from_stage_errors() {
        let err: Error = ConnectError::NoDevice {
            address: BleAddress::new(1),
        }
        .into();
        assert!(matches!(err, Error::Connect(_)));

        let err: Error = PlatformError::AdapterUnavailable.into();
        assert_eq!(err.to_string(), "Bluetooth stack error: Bluetooth adapter unavailable");

        let err = Error::UnknownIndex(7);
        assert_eq!(err.to_string(), "Invalid index selected: 7");
    }

    #[test]
    fn test_invalid_state_display() {
        let err = Error::invalid_state("start scanning", "Stopped");
        assert_eq!(err.to_string(), "Cannot start scanning while Stopped");
    }

    #[test]
    fn test_platform_error_to_gatt_status() {
        assert_eq!(
            GattStatus::from(PlatformError::PermissionDenied),
            GattStatus::AccessDenied
        );
        assert_eq!(
            GattStatus::from(PlatformError::AdapterUnavailable),
            GattStatus::Unreachable
        );
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<PlatformError>();
        _assert_from_impl::<GattStatus>();
    }
}
