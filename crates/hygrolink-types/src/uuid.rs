//! Bluetooth UUIDs used by the telemetry protocol.
//!
//! The sensor exposes a vendor service and characteristic identified by
//! 16-bit short UUIDs. Short ids are expanded against the Bluetooth base UUID
//! `0000xxxx-0000-1000-8000-00805f9b34fb`.

use uuid::{Uuid, uuid};

/// The Bluetooth SIG base UUID that short ids are expanded against.
pub const BLUETOOTH_BASE_UUID: Uuid = uuid!("00000000-0000-1000-8000-00805f9b34fb");

/// Short id of the vendor service carrying the telemetry characteristic.
pub const VENDOR_SERVICE_SHORT: u16 = 0xFFE5;

/// Short id of the temperature/humidity telemetry characteristic.
pub const TELEMETRY_CHARACTERISTIC_SHORT: u16 = 0xFFE8;

/// Vendor service UUID (expanded form of [`VENDOR_SERVICE_SHORT`]).
pub const VENDOR_SERVICE: Uuid = from_short_id(VENDOR_SERVICE_SHORT);

/// Telemetry characteristic UUID (expanded form of [`TELEMETRY_CHARACTERISTIC_SHORT`]).
pub const TELEMETRY_CHARACTERISTIC: Uuid = from_short_id(TELEMETRY_CHARACTERISTIC_SHORT);

/// Client Characteristic Configuration Descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = from_short_id(0x2902);

/// Expand a 16-bit short id into a full 128-bit UUID.
///
/// ```
/// use hygrolink_types::uuid::from_short_id;
///
/// assert_eq!(
///     from_short_id(0xFFE5).to_string(),
///     "0000ffe5-0000-1000-8000-00805f9b34fb"
/// );
/// ```
#[must_use]
pub const fn from_short_id(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID.as_u128() | ((short as u128) << 96))
}

/// Recover the short id from a UUID built on the Bluetooth base.
///
/// Returns `None` for vendor UUIDs that do not share the base.
#[must_use]
pub fn to_short_id(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let base_mask = !(0xFFFF_FFFFu128 << 96);
    if value & base_mask != BLUETOOTH_BASE_UUID.as_u128() || value >> 112 != 0 {
        return None;
    }
    Some((value >> 96) as u16)
}

/// Format a short id the way it is usually written, e.g. `0xFFE8`.
#[must_use]
pub fn format_short_id(short: u16) -> String {
    format!("0x{:04X}", short)
}
