//! Board Sink
//!
//! Receiver for everything the decode pump reconstructs from the stream.

use firmata_protocol::{DecodedMessage, FirmwareReport};
use tokio::sync::mpsc;

/// Consumer of decoded board traffic
///
/// Hooks run on the decode pump task, in arrival order. They must not block.
pub trait BoardSink: Send + 'static {
    /// 14-bit analog value for a channel
    fn analog_message(&mut self, channel: u8, value: u16);

    /// 14-bit bitmask for a digital port
    fn digital_message(&mut self, port: u8, value: u16);

    /// `STRING_DATA` text
    fn string_message(&mut self, text: &str);

    /// Unrecognised sysex sub-command with its raw payload
    fn extended_message(&mut self, command: u8, payload: &[u8]);

    /// Peer sent `SYSTEM_RESET`
    fn reset(&mut self);

    fn pin_mode_set(&mut self, _pin: u8, _mode: u8) {}

    fn report_analog_request(&mut self, _channel: u8, _enable: bool) {}

    fn report_digital_request(&mut self, _port: u8, _enable: bool) {}

    fn protocol_version(&mut self, _major: u8, _minor: u8) {}

    fn firmware_report(&mut self, _report: &FirmwareReport) {}

    /// Route a decoded message to its hook
    fn on_message(&mut self, message: &DecodedMessage) {
        match message {
            DecodedMessage::AnalogValue { channel, value } => self.analog_message(*channel, *value),
            DecodedMessage::DigitalPortValue { port, value } => {
                self.digital_message(*port, *value)
            }
            DecodedMessage::PinModeSet { pin, mode } => self.pin_mode_set(*pin, *mode),
            DecodedMessage::ReportAnalogRequest { channel, enable } => {
                self.report_analog_request(*channel, *enable)
            }
            DecodedMessage::ReportDigitalRequest { port, enable } => {
                self.report_digital_request(*port, *enable)
            }
            DecodedMessage::ProtocolVersion { major, minor } => {
                self.protocol_version(*major, *minor)
            }
            DecodedMessage::FirmwareReport(report) => self.firmware_report(report),
            DecodedMessage::StringMessage { text } => self.string_message(text),
            DecodedMessage::ExtendedMessage { command, payload } => {
                self.extended_message(*command, payload)
            }
        }
    }
}

/// Event forwarded by [`ChannelSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Message(DecodedMessage),
    Reset,
}

/// Sink forwarding every event over an unbounded channel
///
/// Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver for its events
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, message: DecodedMessage) {
        let _ = self.tx.send(SinkEvent::Message(message));
    }
}

impl BoardSink for ChannelSink {
    fn analog_message(&mut self, channel: u8, value: u16) {
        self.forward(DecodedMessage::AnalogValue { channel, value });
    }

    fn digital_message(&mut self, port: u8, value: u16) {
        self.forward(DecodedMessage::DigitalPortValue { port, value });
    }

    fn string_message(&mut self, text: &str) {
        self.forward(DecodedMessage::StringMessage {
            text: text.to_string(),
        });
    }

    fn extended_message(&mut self, command: u8, payload: &[u8]) {
        self.forward(DecodedMessage::ExtendedMessage {
            command,
            payload: payload.to_vec(),
        });
    }

    fn reset(&mut self) {
        let _ = self.tx.send(SinkEvent::Reset);
    }

    // Everything else is forwarded whole
    fn on_message(&mut self, message: &DecodedMessage) {
        self.forward(message.clone());
    }
}
