//! Firmata Frame Encoder
//!
//! Stateless serializers producing the exact byte sequences the decoder
//! consumes. 14-bit integers go out as two 7-bit bytes, low bits first.

use crate::command::{
    END_SYSEX, REPORT_VERSION, SET_DIGITAL_PIN_VALUE, SET_PIN_MODE, START_SYSEX, SYSTEM_RESET,
};
use crate::sysex::REPORT_FIRMWARE;

/// Largest value a two-byte field can carry
pub const MAX_14_BIT: u16 = 0x3FFF;

/// Channel/port command with a 14-bit value
///
/// `[code | channel, value & 0x7F, (value >> 7) & 0x7F]`
pub fn encode_channel_value(code: u8, channel: u8, value: u16) -> [u8; 3] {
    [
        code | (channel & 0x0F),
        (value & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
    ]
}

/// Enable/disable reporting for a channel or port
pub fn encode_report(code: u8, channel: u8, enable: bool) -> [u8; 2] {
    [code | (channel & 0x0F), u8::from(enable)]
}

/// `SET_PIN_MODE` for one pin
pub fn encode_set_pin_mode(pin: u8, mode: u8) -> [u8; 3] {
    [SET_PIN_MODE, pin & 0x7F, mode & 0x7F]
}

/// `SET_DIGITAL_PIN_VALUE` for one pin
pub fn encode_digital_pin_value(pin: u8, high: bool) -> [u8; 3] {
    [SET_DIGITAL_PIN_VALUE, pin & 0x7F, u8::from(high)]
}

/// Bare `SYSTEM_RESET`
pub fn encode_system_reset() -> [u8; 1] {
    [SYSTEM_RESET]
}

/// Bare `REPORT_VERSION` query
pub fn encode_version_query() -> [u8; 1] {
    [REPORT_VERSION]
}

/// `REPORT_VERSION` reply carrying a protocol version
pub fn encode_protocol_version(major: u8, minor: u8) -> [u8; 3] {
    [REPORT_VERSION, major & 0x7F, minor & 0x7F]
}

/// Empty `REPORT_FIRMWARE` sysex asking for the firmware report
pub fn encode_firmware_query() -> Vec<u8> {
    encode_sysex(REPORT_FIRMWARE, &[])
}

/// Wrap a payload in a sysex frame
///
/// The payload must already be 7-bit clean.
pub fn encode_sysex(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(START_SYSEX);
    frame.push(command);
    frame.extend_from_slice(payload);
    frame.push(END_SYSEX);
    frame
}

/// Spread every byte of `data` over two 7-bit bytes
pub fn encode_two_byte(data: &[u8]) -> Vec<u8> {
    data.iter().flat_map(|b| [b & 0x7F, b >> 7]).collect()
}

/// Text as a sysex frame, two 7-bit bytes per UTF-8 byte
pub fn encode_string(command: u8, text: &str) -> Vec<u8> {
    encode_sysex(command, &encode_two_byte(text.as_bytes()))
}

/// `REPORT_FIRMWARE` sysex with versions and name
pub fn encode_version_report(
    protocol_major: u8,
    protocol_minor: u8,
    app_major: u8,
    app_minor: u8,
    app_name: &str,
) -> Vec<u8> {
    let mut payload = vec![
        protocol_major & 0x7F,
        protocol_minor & 0x7F,
        app_major & 0x7F,
        app_minor & 0x7F,
    ];
    payload.extend(encode_two_byte(app_name.as_bytes()));
    encode_sysex(REPORT_FIRMWARE, &payload)
}
