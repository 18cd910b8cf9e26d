//! Platform-agnostic types for BLE temperature/humidity telemetry.
//!
//! This crate holds everything about the sensor protocol that does not need a
//! Bluetooth stack: device addresses, the telemetry frame decoder, display
//! units and the protocol's short UUIDs.
//!
//! # Example
//!
//! ```
//! use hygrolink_types::{decode, TemperatureUnit};
//!
//! let reading = decode(&[0xAA, 0xAA, 0xA2, 0x00, 0x06, 0x00, 0xFA, 0x00, 0x32]).unwrap();
//! assert_eq!(reading.temperature_in(TemperatureUnit::Fahrenheit), 77.0);
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{DecodeError, DecodeResult};
pub use types::{
    AddressParseError, BleAddress, MIN_TELEMETRY_FRAME_BYTES, Telemetry, TemperatureUnit, decode,
    hex_dump, parse_hex,
};
pub use uuid as uuids;

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Decoding arbitrary bytes never panics and only fails on short input.
        #[test]
        fn decode_never_panics(data: Vec<u8>) {
            match decode(&data) {
                Ok(reading) => {
                    prop_assert!(data.len() >= MIN_TELEMETRY_FRAME_BYTES);
                    prop_assert_eq!(reading.raw, data);
                }
                Err(DecodeError::FrameTooShort { actual, .. }) => {
                    prop_assert_eq!(actual, data.len());
                    prop_assert!(data.len() < MIN_TELEMETRY_FRAME_BYTES);
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }

        /// Decoded values match the big-endian words at offsets 5 and 7.
        #[test]
        fn decode_matches_layout(data in proptest::collection::vec(any::<u8>(), 9..32)) {
            let reading = decode(&data).unwrap();
            let temp_raw = u16::from_be_bytes([data[5], data[6]]);
            let hum_raw = u16::from_be_bytes([data[7], data[8]]);
            prop_assert_eq!(reading.temperature_celsius, f32::from(temp_raw) / 10.0);
            prop_assert_eq!(reading.humidity_percent, f32::from(hum_raw) / 10.0);
        }

        /// Any frame survives a hex dump and parse back unchanged.
        #[test]
        fn hex_dump_parses_back(data: Vec<u8>) {
            prop_assert_eq!(parse_hex(&hex_dump(&data)).unwrap(), data);
        }

        /// Addresses survive display and parse.
        #[test]
        fn address_display_parses_back(raw in 0u64..=0xFFFF_FFFF_FFFF) {
            let address = BleAddress::new(raw);
            prop_assert_eq!(address.to_string().parse::<BleAddress>().unwrap(), address);
        }
    }
}
