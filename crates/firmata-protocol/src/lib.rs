//! Firmata Protocol Implementation
//!
//! This crate provides the Firmata 2.4 wire format: the stream decoder, the
//! mirror-image encoder, the decoded message model and the serial transport
//! used to talk to Arduino-class boards.

mod decoder;
mod error;
mod message;
mod transport;

pub mod encoder;

pub use decoder::{Decoded, DecoderConfig, FrameDecoder, Role, DEFAULT_MAX_SYSEX_BYTES};
pub use error::{DecodeError, FirmataError};
pub use message::{
    decode_two_byte_string, DecodedMessage, FirmwareReport, ProtocolVersion,
    FIRMWARE_RESPONSE_PREFIX, VERSION_RESPONSE_PREFIX,
};
pub use transport::{SerialTransport, Transport};

/// Protocol version this stack speaks
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion { major: 2, minor: 4 };

/// Command bytes (high bit set)
///
/// Values below `START_SYSEX` carry a channel/port number in the low nibble.
pub mod command {
    /// Digital port value, low nibble is the port
    pub const DIGITAL_MESSAGE: u8 = 0x90;
    /// Enable/disable analog reporting, low nibble is the channel
    pub const REPORT_ANALOG: u8 = 0xC0;
    /// Enable/disable digital port reporting, low nibble is the port
    pub const REPORT_DIGITAL: u8 = 0xD0;
    /// Analog/PWM value, low nibble is the channel
    pub const ANALOG_MESSAGE: u8 = 0xE0;
    /// Start of a sysex frame
    pub const START_SYSEX: u8 = 0xF0;
    /// Set a pin's mode
    pub const SET_PIN_MODE: u8 = 0xF4;
    /// Set a single digital pin
    pub const SET_DIGITAL_PIN_VALUE: u8 = 0xF5;
    /// End of a sysex frame
    pub const END_SYSEX: u8 = 0xF7;
    /// Protocol version query/reply
    pub const REPORT_VERSION: u8 = 0xF9;
    /// Reset the peer
    pub const SYSTEM_RESET: u8 = 0xFF;
}

/// Sysex sub-commands (first byte after `START_SYSEX`)
///
/// `command::REPORT_VERSION` is also accepted as a sub-command and asks for
/// the full firmware report.
pub mod sysex {
    /// UTF-8 text, two 7-bit bytes per UTF-8 byte
    pub const STRING_DATA: u8 = 0x71;
    /// Firmware name and version
    pub const REPORT_FIRMWARE: u8 = 0x79;
}

/// Pin modes used with `SET_PIN_MODE`
pub mod pin_mode {
    pub const INPUT: u8 = 0x00;
    pub const OUTPUT: u8 = 0x01;
    pub const ANALOG: u8 = 0x02;
    pub const PWM: u8 = 0x03;
    pub const SERVO: u8 = 0x04;
    pub const I2C: u8 = 0x06;
    pub const INPUT_PULLUP: u8 = 0x0B;
}
