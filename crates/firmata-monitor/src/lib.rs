//! Firmata Board Monitor
//!
//! Logging setup, monitor configuration and a board sink that logs every
//! decoded message as JSON.

use anyhow::{anyhow, Context};
use firmata_engine::{load_config, BoardSink, EngineConfig};
use firmata_protocol::DecodedMessage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Configuration file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "firmata.toml";

/// Keys read from the environment as comma-separated lists
const LIST_KEYS: &[&str] = &["engine.baud_rates", "analog_channels", "digital_ports"];

/// Monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Maximum log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of plain text
    pub json_logs: bool,
    /// Analog channels to enable reporting for after the handshake
    pub analog_channels: Vec<u8>,
    /// Digital ports to enable reporting for after the handshake
    pub digital_ports: Vec<u8>,
    /// Engine settings, `[engine]` table
    pub engine: EngineConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            analog_channels: Vec::new(),
            digital_ports: Vec::new(),
            engine: EngineConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load from `path`, or from `firmata.toml` when present, plus
    /// `FIRMATA_*` environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let fallback = Path::new(DEFAULT_CONFIG_FILE);
        let path = path.or_else(|| fallback.exists().then_some(fallback));
        let config: Self =
            load_config(path, LIST_KEYS).context("loading monitor configuration")?;
        config.engine.validate()?;
        Ok(config)
    }
}

/// Install the global tracing subscriber
pub fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let level: Level = level
        .parse()
        .map_err(|_| anyhow!("unknown log level {:?}", level))?;
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let installed = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.context("installing tracing subscriber")
}

/// Board sink logging each message as one JSON object
#[derive(Debug, Default)]
pub struct LoggingSink {
    received: u64,
}

impl LoggingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages seen so far
    pub fn received(&self) -> u64 {
        self.received
    }

    fn log(&mut self, message: &DecodedMessage) {
        self.received += 1;
        match serde_json::to_string(message) {
            Ok(json) => info!(target: "board", "{}", json),
            Err(e) => warn!("Cannot serialise {:?}: {}", message, e),
        }
    }
}

impl BoardSink for LoggingSink {
    fn analog_message(&mut self, channel: u8, value: u16) {
        self.log(&DecodedMessage::AnalogValue { channel, value });
    }

    fn digital_message(&mut self, port: u8, value: u16) {
        self.log(&DecodedMessage::DigitalPortValue { port, value });
    }

    fn string_message(&mut self, text: &str) {
        self.log(&DecodedMessage::StringMessage {
            text: text.to_string(),
        });
    }

    fn extended_message(&mut self, command: u8, payload: &[u8]) {
        self.log(&DecodedMessage::ExtendedMessage {
            command,
            payload: payload.to_vec(),
        });
    }

    fn reset(&mut self) {
        warn!(target: "board", "Board requested a system reset");
    }

    fn on_message(&mut self, message: &DecodedMessage) {
        self.log(message);
    }
}
