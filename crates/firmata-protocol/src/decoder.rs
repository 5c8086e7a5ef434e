//! Firmata Stream Decoder
//!
//! Byte-at-a-time state machine turning the serial stream into logical
//! messages. Malformed input never stops the decoder: a command byte always
//! resynchronises it, and payload errors are returned for the caller to log.

use crate::command::{
    ANALOG_MESSAGE, DIGITAL_MESSAGE, END_SYSEX, REPORT_ANALOG, REPORT_DIGITAL, REPORT_VERSION,
    SET_PIN_MODE, START_SYSEX, SYSTEM_RESET,
};
use crate::encoder;
use crate::error::DecodeError;
use crate::message::{
    decode_two_byte_string, DecodedMessage, FirmwareReport, FIRMWARE_RESPONSE_PREFIX,
    VERSION_RESPONSE_PREFIX,
};
use crate::sysex::{REPORT_FIRMWARE, STRING_DATA};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Default sysex accumulator capacity
pub const DEFAULT_MAX_SYSEX_BYTES: usize = 1024;

/// Which side of the link the decoder runs on
///
/// Only the bare `REPORT_VERSION` command and the empty firmware query are
/// interpreted differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Host talking to a board: a bare `REPORT_VERSION` is the board's
    /// version reply and carries two data bytes
    #[default]
    Host,
    /// Board-side firmware engine: a bare `REPORT_VERSION` is a query and is
    /// answered immediately with the local protocol version
    Device,
}

/// Decoder configuration
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Side of the link
    pub role: Role,
    /// Sysex bytes kept per frame, excess bytes are dropped
    pub max_sysex_bytes: usize,
    /// Identity used when the peer asks for our version
    pub firmware: FirmwareReport,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            role: Role::Host,
            max_sysex_bytes: DEFAULT_MAX_SYSEX_BYTES,
            firmware: FirmwareReport::default(),
        }
    }
}

/// Output of the decoder for one completed unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Message for the board sink
    Message(DecodedMessage),
    /// Reply to a request we may be waiting on, also delivered to the sink
    Response {
        /// Correlation prefix of the reply
        prefix: &'static [u8],
        /// Raw reply bytes handed to the waiting caller
        data: Vec<u8>,
        /// Decoded form for the sink, or why the payload did not parse
        message: Result<DecodedMessage, DecodeError>,
    },
    /// Peer sent `SYSTEM_RESET`
    Reset,
    /// Bytes that must be written back to the peer
    Reply(Vec<u8>),
}

/// Two-byte style message whose data bytes are still outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    Analog,
    Digital,
    PinMode,
    ReportAnalog,
    ReportDigital,
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    AwaitingData {
        kind: Awaiting,
        channel: u8,
        needed: usize,
        received: usize,
        data: [u8; 2],
    },
    Sysex,
}

/// Stateful Firmata stream parser
///
/// Owned by a single consumer; not synchronised.
#[derive(Debug)]
pub struct FrameDecoder {
    config: DecoderConfig,
    state: State,
    /// Sub-command followed by payload of the sysex in progress
    sysex: Vec<u8>,
    /// Bytes dropped from the current sysex for lack of room
    dropped: usize,
}

impl FrameDecoder {
    /// Create a decoder in the idle state
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            sysex: Vec::with_capacity(config.max_sysex_bytes.min(DEFAULT_MAX_SYSEX_BYTES)),
            config,
            state: State::Idle,
            dropped: 0,
        }
    }

    /// Decoder configuration
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// True when no frame is in progress
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    /// Discard any partial frame
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.sysex.clear();
        self.dropped = 0;
    }

    /// Feed one byte
    ///
    /// Returns `Ok(Some(_))` when the byte completes a unit, `Ok(None)` while
    /// more bytes are needed, and `Err` when a completed frame carried a
    /// malformed payload. In every case the decoder is ready for the next byte.
    pub fn push(&mut self, byte: u8) -> Result<Option<Decoded>, DecodeError> {
        match self.state {
            State::AwaitingData {
                kind,
                channel,
                needed,
                received,
                mut data,
            } if byte < 0x80 => {
                data[received] = byte;
                if received + 1 < needed {
                    self.state = State::AwaitingData {
                        kind,
                        channel,
                        needed,
                        received: received + 1,
                        data,
                    };
                    return Ok(None);
                }
                self.state = State::Idle;
                Ok(Some(Self::finish_data(kind, channel, data)))
            }
            State::AwaitingData { kind, .. } => {
                trace!("Abandoning partial {:?} message at byte {:02X}", kind, byte);
                self.state = State::Idle;
                self.dispatch_command(byte)
            }
            State::Sysex => self.push_sysex(byte),
            State::Idle => self.dispatch_command(byte),
        }
    }

    /// Interpret a byte seen while no frame is in progress
    fn dispatch_command(&mut self, byte: u8) -> Result<Option<Decoded>, DecodeError> {
        let (command, channel) = if byte < START_SYSEX {
            (byte & 0xF0, byte & 0x0F)
        } else {
            (byte, 0)
        };

        match command {
            ANALOG_MESSAGE => self.await_data(Awaiting::Analog, channel, 2),
            DIGITAL_MESSAGE => self.await_data(Awaiting::Digital, channel, 2),
            SET_PIN_MODE => self.await_data(Awaiting::PinMode, channel, 2),
            REPORT_ANALOG => self.await_data(Awaiting::ReportAnalog, channel, 1),
            REPORT_DIGITAL => self.await_data(Awaiting::ReportDigital, channel, 1),
            START_SYSEX => {
                self.sysex.clear();
                self.dropped = 0;
                self.state = State::Sysex;
                Ok(None)
            }
            SYSTEM_RESET => {
                debug!("System reset received");
                self.reset();
                Ok(Some(Decoded::Reset))
            }
            REPORT_VERSION => match self.config.role {
                Role::Host => self.await_data(Awaiting::Version, 0, 2),
                Role::Device => {
                    let local = self.config.firmware.protocol_version();
                    Ok(Some(Decoded::Reply(
                        encoder::encode_protocol_version(local.major, local.minor).to_vec(),
                    )))
                }
            },
            _ => {
                trace!("Ignoring byte {:02X}", byte);
                Ok(None)
            }
        }
    }

    fn await_data(
        &mut self,
        kind: Awaiting,
        channel: u8,
        needed: usize,
    ) -> Result<Option<Decoded>, DecodeError> {
        self.state = State::AwaitingData {
            kind,
            channel,
            needed,
            received: 0,
            data: [0; 2],
        };
        Ok(None)
    }

    fn finish_data(kind: Awaiting, channel: u8, data: [u8; 2]) -> Decoded {
        let value = u16::from(data[0]) | (u16::from(data[1]) << 7);
        let message = match kind {
            Awaiting::Analog => DecodedMessage::AnalogValue { channel, value },
            Awaiting::Digital => DecodedMessage::DigitalPortValue {
                port: channel,
                value,
            },
            Awaiting::PinMode => DecodedMessage::PinModeSet {
                pin: data[0],
                mode: data[1],
            },
            Awaiting::ReportAnalog => DecodedMessage::ReportAnalogRequest {
                channel,
                enable: data[0] != 0,
            },
            Awaiting::ReportDigital => DecodedMessage::ReportDigitalRequest {
                port: channel,
                enable: data[0] != 0,
            },
            Awaiting::Version => {
                return Decoded::Response {
                    prefix: VERSION_RESPONSE_PREFIX,
                    data: vec![REPORT_VERSION, data[0], data[1]],
                    message: Ok(DecodedMessage::ProtocolVersion {
                        major: data[0],
                        minor: data[1],
                    }),
                }
            }
        };
        Decoded::Message(message)
    }

    fn push_sysex(&mut self, byte: u8) -> Result<Option<Decoded>, DecodeError> {
        if byte == END_SYSEX {
            self.state = State::Idle;
            return self.finish_sysex();
        }

        // REPORT_VERSION is the only sub-command with the high bit set
        if byte < 0x80 || (byte == REPORT_VERSION && self.sysex.is_empty()) {
            if self.sysex.len() < self.config.max_sysex_bytes {
                self.sysex.push(byte);
            } else {
                self.dropped += 1;
            }
            return Ok(None);
        }

        trace!(
            "Abandoning sysex after {} bytes at byte {:02X}",
            self.sysex.len(),
            byte
        );
        self.sysex.clear();
        self.state = State::Idle;
        self.dispatch_command(byte)
    }

    fn finish_sysex(&mut self) -> Result<Option<Decoded>, DecodeError> {
        let frame = std::mem::take(&mut self.sysex);
        let dropped = std::mem::take(&mut self.dropped);
        let Some((&command, payload)) = frame.split_first() else {
            return Ok(None);
        };
        if dropped > 0 {
            debug!(
                "Sysex {:02X} exceeded {} bytes, dropped {}",
                command, self.config.max_sysex_bytes, dropped
            );
        }

        let decoded = match command {
            REPORT_VERSION => Decoded::Reply(self.local_firmware_report()),
            REPORT_FIRMWARE if payload.is_empty() && self.config.role == Role::Device => {
                Decoded::Reply(self.local_firmware_report())
            }
            // The waiter is completed even when the payload is malformed
            REPORT_FIRMWARE => Decoded::Response {
                prefix: FIRMWARE_RESPONSE_PREFIX,
                message: FirmwareReport::parse(payload).map(DecodedMessage::FirmwareReport),
                data: frame,
            },
            STRING_DATA => Decoded::Message(DecodedMessage::StringMessage {
                text: decode_two_byte_string(payload)?,
            }),
            _ => Decoded::Message(DecodedMessage::ExtendedMessage {
                command,
                payload: payload.to_vec(),
            }),
        };
        Ok(Some(decoded))
    }

    fn local_firmware_report(&self) -> Vec<u8> {
        let firmware = &self.config.firmware;
        encoder::encode_version_report(
            firmware.protocol_major,
            firmware.protocol_minor,
            firmware.app_major,
            firmware.app_minor,
            &firmware.name,
        )
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{encode_channel_value, encode_string, encode_sysex, encode_version_report};

    fn feed(decoder: &mut FrameDecoder, bytes: &[u8]) -> Vec<Decoded> {
        bytes
            .iter()
            .filter_map(|&b| decoder.push(b).ok().flatten())
            .collect()
    }

    fn device() -> FrameDecoder {
        FrameDecoder::new(DecoderConfig {
            role: Role::Device,
            ..Default::default()
        })
    }

    #[test]
    fn test_analog_message() {
        let mut decoder = FrameDecoder::default();
        assert_eq!(decoder.push(0xE5), Ok(None));
        assert_eq!(decoder.push(0x7F), Ok(None));
        assert_eq!(
            decoder.push(0x01),
            Ok(Some(Decoded::Message(DecodedMessage::AnalogValue {
                channel: 5,
                value: 0xFF
            })))
        );
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_digital_pin_mode_and_reports() {
        let mut decoder = FrameDecoder::default();
        let decoded = feed(
            &mut decoder,
            &[0x92, 0x05, 0x00, 0xF4, 13, 1, 0xC3, 1, 0xD1, 0],
        );
        assert_eq!(
            decoded,
            vec![
                Decoded::Message(DecodedMessage::DigitalPortValue { port: 2, value: 5 }),
                Decoded::Message(DecodedMessage::PinModeSet { pin: 13, mode: 1 }),
                Decoded::Message(DecodedMessage::ReportAnalogRequest {
                    channel: 3,
                    enable: true
                }),
                Decoded::Message(DecodedMessage::ReportDigitalRequest {
                    port: 1,
                    enable: false
                }),
            ]
        );
    }

    #[test]
    fn test_host_reads_version_reply() {
        let mut decoder = FrameDecoder::default();
        assert_eq!(
            feed(&mut decoder, &[0xF9, 2, 5]),
            vec![Decoded::Response {
                prefix: VERSION_RESPONSE_PREFIX,
                data: vec![0xF9, 2, 5],
                message: Ok(DecodedMessage::ProtocolVersion { major: 2, minor: 5 }),
            }]
        );
    }

    #[test]
    fn test_device_answers_bare_version_query() {
        let mut decoder = device();
        assert_eq!(
            decoder.push(0xF9),
            Ok(Some(Decoded::Reply(vec![0xF9, 2, 4])))
        );
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_sysex_version_request_replies_with_firmware_report() {
        for mut decoder in [FrameDecoder::default(), device()] {
            let expected = encode_version_report(2, 4, 1, 0, "firmata-engine");
            assert_eq!(
                feed(&mut decoder, &[0xF0, 0xF9, 0xF7]),
                vec![Decoded::Reply(expected)]
            );
        }
    }

    #[test]
    fn test_firmware_report_response() {
        let mut decoder = FrameDecoder::default();
        let frame = encode_version_report(2, 5, 3, 1, "Board");
        let decoded = feed(&mut decoder, &frame);
        assert_eq!(decoded.len(), 1);
        match &decoded[0] {
            Decoded::Response {
                prefix,
                data,
                message: Ok(DecodedMessage::FirmwareReport(report)),
            } => {
                assert_eq!(*prefix, FIRMWARE_RESPONSE_PREFIX);
                assert_eq!(data.as_slice(), &frame[1..frame.len() - 1]);
                assert_eq!(report.name, "Board");
                assert_eq!((report.app_major, report.app_minor), (3, 1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_firmware_report_still_correlates() {
        let mut decoder = FrameDecoder::default();
        // name byte 0xFF is not valid UTF-8
        let frame = [0xF0, 0x79, 2, 5, 1, 0, 0x7F, 0x01, 0xF7];
        assert_eq!(
            feed(&mut decoder, &frame),
            vec![Decoded::Response {
                prefix: FIRMWARE_RESPONSE_PREFIX,
                data: vec![0x79, 2, 5, 1, 0, 0x7F, 0x01],
                message: Err(DecodeError::InvalidUtf8),
            }]
        );

        // odd-length name
        let frame = [0xF0, 0x79, 2, 5, 1, 0, b'A', 0xF7];
        assert!(matches!(
            feed(&mut decoder, &frame).as_slice(),
            [Decoded::Response {
                message: Err(DecodeError::OddPayload(1)),
                ..
            }]
        ));
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_firmware_query_by_role() {
        let query = crate::encoder::encode_firmware_query();
        let mut host = FrameDecoder::default();
        // an empty report is malformed for a host but still correlates
        assert_eq!(
            feed(&mut host, &query),
            vec![Decoded::Response {
                prefix: FIRMWARE_RESPONSE_PREFIX,
                data: vec![0x79],
                message: Err(DecodeError::ShortFirmwareReport(0)),
            }]
        );
        assert!(host.is_idle());

        let mut device = device();
        assert!(matches!(
            feed(&mut device, &query).as_slice(),
            [Decoded::Reply(_)]
        ));
    }

    #[test]
    fn test_string_message() {
        let mut decoder = FrameDecoder::default();
        assert_eq!(
            feed(&mut decoder, &encode_string(STRING_DATA, "hello")),
            vec![Decoded::Message(DecodedMessage::StringMessage {
                text: "hello".to_string()
            })]
        );
    }

    #[test]
    fn test_extended_message_passthrough() {
        let mut decoder = FrameDecoder::default();
        assert_eq!(
            feed(&mut decoder, &encode_sysex(0x10, &[1, 2, 3])),
            vec![Decoded::Message(DecodedMessage::ExtendedMessage {
                command: 0x10,
                payload: vec![1, 2, 3]
            })]
        );
        assert!(feed(&mut decoder, &[0xF0, 0xF7]).is_empty());
    }

    #[test]
    fn test_reset_mid_sysex() {
        let mut decoder = FrameDecoder::default();
        let mut stream = vec![0xF0, 0x01, 0xFF];
        stream.extend(encode_channel_value(ANALOG_MESSAGE, 2, 1000));
        assert_eq!(
            feed(&mut decoder, &stream),
            vec![
                Decoded::Reset,
                Decoded::Message(DecodedMessage::AnalogValue {
                    channel: 2,
                    value: 1000
                }),
            ]
        );
    }

    #[test]
    fn test_command_byte_abandons_partial_message() {
        let mut decoder = FrameDecoder::default();
        assert_eq!(
            feed(&mut decoder, &[0xE0, 0x10, 0x90, 0x01, 0x00]),
            vec![Decoded::Message(DecodedMessage::DigitalPortValue {
                port: 0,
                value: 1
            })]
        );
    }

    #[test]
    fn test_command_byte_abandons_sysex() {
        let mut decoder = FrameDecoder::default();
        assert_eq!(
            feed(&mut decoder, &[0xF0, 0x10, 0x05, 0xE1, 0x02, 0x00]),
            vec![Decoded::Message(DecodedMessage::AnalogValue {
                channel: 1,
                value: 2
            })]
        );
    }

    #[test]
    fn test_unknown_commands_ignored() {
        let mut decoder = FrameDecoder::default();
        let mut stream = vec![0xA3, 0x11, 0x22, 0xF1, 0x05, 0xFD];
        stream.extend(encode_channel_value(ANALOG_MESSAGE, 0, 7));
        assert_eq!(
            feed(&mut decoder, &stream),
            vec![Decoded::Message(DecodedMessage::AnalogValue {
                channel: 0,
                value: 7
            })]
        );
    }

    #[test]
    fn test_sysex_truncated_to_capacity() {
        let mut decoder = FrameDecoder::new(DecoderConfig {
            max_sysex_bytes: 8,
            ..Default::default()
        });
        let payload: Vec<u8> = (0..20).collect();
        assert_eq!(
            feed(&mut decoder, &encode_sysex(0x10, &payload)),
            vec![Decoded::Message(DecodedMessage::ExtendedMessage {
                command: 0x10,
                payload: (0..7).collect()
            })]
        );
    }

    #[test]
    fn test_malformed_string_then_recovers() {
        let mut decoder = FrameDecoder::default();
        let results: Vec<_> = [0xF0, 0x71, 0x7F, 0x01, 0xF7]
            .iter()
            .map(|&b| decoder.push(b))
            .collect();
        assert_eq!(results.last(), Some(&Err(DecodeError::InvalidUtf8)));
        assert_eq!(
            feed(&mut decoder, &[0xE0, 1, 0]),
            vec![Decoded::Message(DecodedMessage::AnalogValue {
                channel: 0,
                value: 1
            })]
        );
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::encoder::{encode_channel_value, encode_string};
    use proptest::prelude::*;

    fn decode_all(decoder: &mut FrameDecoder, bytes: &[u8]) -> Vec<Decoded> {
        bytes
            .iter()
            .filter_map(|&b| decoder.push(b).ok().flatten())
            .collect()
    }

    proptest! {
        #[test]
        fn test_analog_round_trip(channel in 0u8..16, value in 0u16..=0x3FFF) {
            let mut decoder = FrameDecoder::default();
            let decoded = decode_all(&mut decoder, &encode_channel_value(ANALOG_MESSAGE, channel, value));
            prop_assert_eq!(
                decoded,
                vec![Decoded::Message(DecodedMessage::AnalogValue { channel, value })]
            );
        }

        #[test]
        fn test_digital_round_trip(port in 0u8..16, value in 0u16..=0x3FFF) {
            let mut decoder = FrameDecoder::default();
            let decoded = decode_all(&mut decoder, &encode_channel_value(DIGITAL_MESSAGE, port, value));
            prop_assert_eq!(
                decoded,
                vec![Decoded::Message(DecodedMessage::DigitalPortValue { port, value })]
            );
        }

        #[test]
        fn test_string_round_trip(text in "\\PC{0,100}") {
            let mut decoder = FrameDecoder::default();
            let decoded = decode_all(&mut decoder, &encode_string(STRING_DATA, &text));
            prop_assert_eq!(
                decoded,
                vec![Decoded::Message(DecodedMessage::StringMessage { text })]
            );
        }

        #[test]
        fn test_noise_never_blocks_next_frame(
            noise in prop::collection::vec(any::<u8>(), 10_000),
            channel in 0u8..16,
            value in 0u16..=0x3FFF,
            role in prop_oneof![Just(Role::Host), Just(Role::Device)],
        ) {
            let mut decoder = FrameDecoder::new(DecoderConfig { role, ..Default::default() });
            for byte in noise {
                // errors are absorbed, as the pump does
                let _ = decoder.push(byte);
            }
            let decoded = decode_all(&mut decoder, &encode_channel_value(ANALOG_MESSAGE, channel, value));
            prop_assert_eq!(
                decoded,
                vec![Decoded::Message(DecodedMessage::AnalogValue { channel, value })]
            );
        }
    }
}
