//! Decoded Firmata Messages
//!
//! The logical messages the stream decoder produces, and the small payload
//! parsers shared by the decoder and the engine.

use crate::command::{REPORT_VERSION, START_SYSEX};
use crate::error::DecodeError;
use crate::sysex::REPORT_FIRMWARE;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Leading bytes of a protocol version reply
pub const VERSION_RESPONSE_PREFIX: &[u8] = &[REPORT_VERSION];

/// Leading bytes of a firmware report reply
pub const FIRMWARE_RESPONSE_PREFIX: &[u8] = &[START_SYSEX, REPORT_FIRMWARE];

/// Firmata protocol version, ordered by (major, minor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    /// Create a version
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Parse a `[REPORT_VERSION, major, minor]` reply
    pub fn from_reply(reply: &[u8]) -> Option<Self> {
        match reply {
            [REPORT_VERSION, major, minor, ..] => Some(Self::new(*major, *minor)),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Firmware identification carried by a `REPORT_FIRMWARE` sysex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareReport {
    /// Protocol major version implemented by the firmware
    pub protocol_major: u8,
    /// Protocol minor version implemented by the firmware
    pub protocol_minor: u8,
    /// Application major version
    pub app_major: u8,
    /// Application minor version
    pub app_minor: u8,
    /// Firmware name
    pub name: String,
}

impl FirmwareReport {
    /// Parse the payload following the `REPORT_FIRMWARE` sub-command
    ///
    /// Layout: protocol major, protocol minor, app major, app minor, then the
    /// name as two 7-bit bytes per UTF-8 byte.
    pub fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        match payload {
            [protocol_major, protocol_minor, app_major, app_minor, name @ ..] => Ok(Self {
                protocol_major: *protocol_major,
                protocol_minor: *protocol_minor,
                app_major: *app_major,
                app_minor: *app_minor,
                name: decode_two_byte_string(name)?,
            }),
            _ => Err(DecodeError::ShortFirmwareReport(payload.len())),
        }
    }

    /// Protocol version part of the report
    pub fn protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::new(self.protocol_major, self.protocol_minor)
    }
}

impl Default for FirmwareReport {
    fn default() -> Self {
        Self {
            protocol_major: crate::PROTOCOL_VERSION.major,
            protocol_minor: crate::PROTOCOL_VERSION.minor,
            app_major: 1,
            app_minor: 0,
            name: "firmata-engine".to_string(),
        }
    }
}

/// A complete message reconstructed from the byte stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecodedMessage {
    /// 14-bit analog value for a channel
    AnalogValue { channel: u8, value: u16 },
    /// 14-bit bitmask for a digital port
    DigitalPortValue { port: u8, value: u16 },
    /// Peer set a pin mode
    PinModeSet { pin: u8, mode: u8 },
    /// Peer asked to enable/disable analog reporting
    ReportAnalogRequest { channel: u8, enable: bool },
    /// Peer asked to enable/disable digital port reporting
    ReportDigitalRequest { port: u8, enable: bool },
    /// Protocol version reply
    ProtocolVersion { major: u8, minor: u8 },
    /// Firmware name and version reply
    FirmwareReport(FirmwareReport),
    /// `STRING_DATA` text
    StringMessage { text: String },
    /// Any other sysex sub-command, payload still 7-bit encoded
    ExtendedMessage { command: u8, payload: Vec<u8> },
}

/// Decode a two-bytes-per-byte 7-bit payload into text
///
/// Each pair is (low 7 bits, high bit) of one UTF-8 byte.
pub fn decode_two_byte_string(payload: &[u8]) -> Result<String, DecodeError> {
    if payload.len() % 2 != 0 {
        return Err(DecodeError::OddPayload(payload.len()));
    }
    let bytes: Vec<u8> = payload
        .chunks_exact(2)
        .map(|pair| (pair[0] & 0x7F) | (pair[1] << 7))
        .collect();
    String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
}
