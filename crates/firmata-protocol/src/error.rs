//! Firmata Error Types

use ring_buffer::RingBufferError;
use thiserror::Error;

/// Errors surfaced to callers of the Firmata protocol stack
#[derive(Debug, Error)]
pub enum FirmataError {
    /// No device answered the handshake at any of the tried baud rates
    #[error("No Firmata device responded on any tried baud rate")]
    DeviceNotFound,

    /// A device answered with a protocol version below the supported minimum
    #[error("Unsupported Firmata protocol version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },

    /// Timeout waiting for a correlated response
    #[error("Timeout waiting for Firmata response after {0}ms")]
    Timeout(u64),

    /// Reply arrived but could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Caller passed an argument outside the accepted domain
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Ring buffer misuse
    #[error("Buffer error: {0}")]
    Buffer(#[from] RingBufferError),

    /// Serial port or transport I/O error
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Operation requires an open connection
    #[error("Connection is not open")]
    NotOpen,

    /// The engine or request table went away before a response arrived
    #[error("Connection closed")]
    Closed,

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for FirmataError {
    fn from(err: std::io::Error) -> Self {
        FirmataError::Serial(err.to_string())
    }
}

impl From<tokio_serial::Error> for FirmataError {
    fn from(err: tokio_serial::Error) -> Self {
        FirmataError::Serial(err.to_string())
    }
}

/// Malformed input detected while decoding a frame
///
/// Never returned to callers of the engine: the decode pump logs it, drops
/// the partial frame and carries on with the next byte.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// 7-bit pair payload with an odd number of bytes
    #[error("Odd-length 7-bit payload ({0} bytes)")]
    OddPayload(usize),

    /// String payload did not decode to UTF-8
    #[error("String payload is not valid UTF-8")]
    InvalidUtf8,

    /// Firmware report shorter than its fixed header
    #[error("Firmware report too short ({0} bytes)")]
    ShortFirmwareReport(usize),
}
