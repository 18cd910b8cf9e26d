//! Core types for BLE temperature/humidity telemetry.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::DecodeError;

/// Mask selecting the 48 significant bits of a Bluetooth device address.
const ADDRESS_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// A 48-bit Bluetooth device address.
///
/// Addresses are reported by the Bluetooth stack as integers and displayed in
/// the usual colon-separated form (`AA:BB:CC:DD:EE:FF`).
///
/// ```
/// use hygrolink_types::BleAddress;
///
/// let address: BleAddress = "c4:7c:8d:6a:12:34".parse().unwrap();
/// assert_eq!(address.as_u64(), 0xC47C_8D6A_1234);
/// assert_eq!(address.to_string(), "C4:7C:8D:6A:12:34");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(into = "String", try_from = "String")
)]
pub struct BleAddress(u64);

impl BleAddress {
    /// Create an address from its integer form. Bits above 48 are discarded.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw & ADDRESS_MASK)
    }

    /// The address as a 48-bit integer.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The address as six bytes, most significant first.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 6] {
        let be = self.0.to_be_bytes();
        [be[2], be[3], be[4], be[5], be[6], be[7]]
    }
}

impl From<u64> for BleAddress {
    fn from(raw: u64) -> Self {
        Self::new(raw)
    }
}

impl From<[u8; 6]> for BleAddress {
    fn from(bytes: [u8; 6]) -> Self {
        let raw = bytes
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
        Self(raw)
    }
}

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.to_bytes();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Error returned when a string is not a valid Bluetooth address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid Bluetooth address '{0}': expected AA:BB:CC:DD:EE:FF")]
pub struct AddressParseError(pub String);

impl FromStr for BleAddress {
    type Err = AddressParseError;

    /// Parse `AA:BB:CC:DD:EE:FF`, `AA-BB-CC-DD-EE-FF` or `AABBCCDDEEFF`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();
        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressParseError(s.to_string()));
        }
        u64::from_str_radix(&digits, 16)
            .map(Self::new)
            .map_err(|_| AddressParseError(s.to_string()))
    }
}

impl From<BleAddress> for String {
    fn from(address: BleAddress) -> Self {
        address.to_string()
    }
}

impl TryFrom<String> for BleAddress {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Temperature display unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TemperatureUnit {
    /// Degrees Celsius (the unit the sensor reports).
    #[default]
    Celsius,
    /// Degrees Fahrenheit.
    Fahrenheit,
}

impl TemperatureUnit {
    /// Convert a Celsius value into this unit.
    #[must_use]
    pub fn from_celsius(self, celsius: f32) -> f32 {
        match self {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        }
    }

    /// Unit symbol for display.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Minimum number of bytes in a telemetry frame.
pub const MIN_TELEMETRY_FRAME_BYTES: usize = 9;

/// Offset of the big-endian temperature word (tenths of a degree Celsius).
pub const TEMPERATURE_OFFSET: usize = 5;

/// Offset of the big-endian humidity word (tenths of a percent).
pub const HUMIDITY_OFFSET: usize = 7;

/// One decoded temperature/humidity notification.
///
/// The raw frame is kept unmodified next to the decoded values so it can be
/// shown as a hex dump.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Telemetry {
    /// The notification payload as received.
    pub raw: Vec<u8>,
    /// Temperature in degrees Celsius.
    pub temperature_celsius: f32,
    /// Relative humidity in percent.
    pub humidity_percent: f32,
    /// When the notification was received (set by the subscription, not the decoder).
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub received_at: Option<time::OffsetDateTime>,
}

impl Telemetry {
    /// Decode a telemetry frame.
    ///
    /// The frame layout is
    /// `aa aa a2 00 06 [T_hi] [T_lo] [H_hi] [H_lo] 01 00 [checksum] 55`.
    /// Only bytes 5..=8 are interpreted; anything after byte 8 is kept in
    /// [`raw`](Self::raw) but otherwise ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::FrameTooShort`] if `data` contains fewer than
    /// [`MIN_TELEMETRY_FRAME_BYTES`] bytes.
    ///
    /// ```
    /// use hygrolink_types::Telemetry;
    ///
    /// let frame = [0xAA, 0xAA, 0xA2, 0x00, 0x06, 0x00, 0xFA, 0x00, 0x32];
    /// let reading = Telemetry::from_bytes(&frame).unwrap();
    /// assert_eq!(reading.temperature_celsius, 25.0);
    /// assert_eq!(reading.temperature_fahrenheit(), 77.0);
    /// assert_eq!(reading.humidity_percent, 5.0);
    /// ```
    #[must_use = "decoding returns a Result that should be handled"]
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        use bytes::Buf;

        if data.len() < MIN_TELEMETRY_FRAME_BYTES {
            return Err(DecodeError::FrameTooShort {
                expected: MIN_TELEMETRY_FRAME_BYTES,
                actual: data.len(),
            });
        }

        let mut buf = &data[TEMPERATURE_OFFSET..];
        let temperature_raw = buf.get_u16();
        let humidity_raw = buf.get_u16();

        Ok(Self {
            raw: data.to_vec(),
            temperature_celsius: f32::from(temperature_raw) / 10.0,
            humidity_percent: f32::from(humidity_raw) / 10.0,
            received_at: None,
        })
    }

    /// Attach the time the notification arrived.
    #[must_use]
    pub fn with_received_at(mut self, at: time::OffsetDateTime) -> Self {
        self.received_at = Some(at);
        self
    }

    /// Temperature in degrees Fahrenheit.
    #[must_use]
    pub fn temperature_fahrenheit(&self) -> f32 {
        TemperatureUnit::Fahrenheit.from_celsius(self.temperature_celsius)
    }

    /// Temperature in the requested unit.
    #[must_use]
    pub fn temperature_in(&self, unit: TemperatureUnit) -> f32 {
        unit.from_celsius(self.temperature_celsius)
    }

    /// The raw frame as lowercase, space-separated hex (`aa aa a2 ...`).
    #[must_use]
    pub fn hex_dump(&self) -> String {
        hex_dump(&self.raw)
    }
}

/// Decode a telemetry frame. Shorthand for [`Telemetry::from_bytes`].
pub fn decode(data: &[u8]) -> Result<Telemetry, DecodeError> {
    Telemetry::from_bytes(data)
}

/// Format bytes as lowercase, space-separated hex.
#[must_use]
pub fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a textual frame such as `"aa aa a2 00 06 00 fa 00 32"`.
///
/// Bytes may be separated by whitespace, commas or colons, may carry a `0x`
/// prefix, or may be written as one contiguous run of hex digits.
///
/// # Errors
///
/// Returns [`DecodeError::InvalidHex`] for non-hex characters or an odd
/// number of digits.
pub fn parse_hex(input: &str) -> Result<Vec<u8>, DecodeError> {
    let digits: String = input
        .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token)
        })
        .collect();

    if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(DecodeError::InvalidHex(format!(
            "unexpected character '{}'",
            bad
        )));
    }
    if digits.len() % 2 != 0 {
        return Err(DecodeError::InvalidHex(format!(
            "odd number of hex digits ({})",
            digits.len()
        )));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| DecodeError::InvalidHex(e.to_string()))
        })
        .collect()
}
