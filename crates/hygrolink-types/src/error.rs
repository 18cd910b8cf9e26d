//! Error types for telemetry decoding in hygrolink-types.

use thiserror::Error;

/// Errors that can occur when decoding a telemetry frame.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in hygrolink-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The frame is shorter than the fixed layout requires.
    #[error("Telemetry frame too short: requires {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes received.
        actual: usize,
    },

    /// A textual frame could not be parsed as hexadecimal bytes.
    #[error("Invalid hex frame: {0}")]
    InvalidHex(String),
}

/// Result type alias using hygrolink-types' DecodeError type.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
