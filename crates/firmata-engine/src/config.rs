//! Engine Configuration
//!
//! Defaults cover a stock StandardFirmata board. Values can be overridden
//! from a TOML file and `FIRMATA_*` environment variables.

use firmata_protocol::{
    DecoderConfig, FirmataError, FirmwareReport, ProtocolVersion, Role, DEFAULT_MAX_SYSEX_BYTES,
    PROTOCOL_VERSION,
};
use ring_buffer::DEFAULT_CAPACITY;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Baud rates tried during the handshake, fastest first
pub const DEFAULT_BAUD_RATES: [u32; 5] = [115_200, 57_600, 38_400, 19_200, 9_600];

/// Configuration for the protocol engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Serial port device path
    pub port: String,
    /// Baud rates tried in order by `probe_and_open`
    pub baud_rates: Vec<u32>,
    /// Oldest protocol version accepted during the handshake
    pub minimum_version: ProtocolVersion,
    /// Wait for the version reply at each baud rate (ms)
    pub probe_timeout_ms: u64,
    /// Default wait for request/response calls (ms)
    pub request_timeout_ms: u64,
    /// `SYSTEM_RESET` bytes sent before each handshake attempt
    pub reset_count: usize,
    /// Initial inbound ring buffer capacity in bytes
    pub buffer_capacity: usize,
    /// Ring buffer growth: new = old * multiplier + constant
    pub growth_multiplier: usize,
    pub growth_constant: usize,
    /// Sysex accumulator capacity
    pub max_sysex_bytes: usize,
    /// Side of the link this engine runs on
    pub role: Role,
    /// Identity reported when the peer queries us
    pub firmware: FirmwareReport,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rates: DEFAULT_BAUD_RATES.to_vec(),
            minimum_version: PROTOCOL_VERSION,
            probe_timeout_ms: 1000,
            request_timeout_ms: 1000,
            reset_count: 3,
            buffer_capacity: DEFAULT_CAPACITY,
            growth_multiplier: 2,
            growth_constant: 0,
            max_sysex_bytes: DEFAULT_MAX_SYSEX_BYTES,
            role: Role::Host,
            firmware: FirmwareReport::default(),
        }
    }
}

impl EngineConfig {
    /// Load from an optional TOML file, then `FIRMATA_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, FirmataError> {
        let config: Self = load_config(path, ENGINE_LIST_KEYS)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), FirmataError> {
        if self.baud_rates.is_empty() {
            return Err(FirmataError::Config("baud_rates is empty".to_string()));
        }
        if self.baud_rates.contains(&0) {
            return Err(FirmataError::Config("baud rate of 0".to_string()));
        }
        if self.buffer_capacity == 0 {
            return Err(FirmataError::Config("buffer_capacity must be > 0".to_string()));
        }
        if self.growth_multiplier == 0 || (self.growth_multiplier == 1 && self.growth_constant == 0)
        {
            return Err(FirmataError::Config(format!(
                "growth {}x+{} never enlarges the buffer",
                self.growth_multiplier, self.growth_constant
            )));
        }
        if self.max_sysex_bytes == 0 {
            return Err(FirmataError::Config("max_sysex_bytes must be > 0".to_string()));
        }
        Ok(())
    }

    /// Decoder settings derived from this configuration
    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            role: self.role,
            max_sysex_bytes: self.max_sysex_bytes,
            firmware: self.firmware.clone(),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Keys of `EngineConfig` read from the environment as comma-separated lists
pub const ENGINE_LIST_KEYS: &[&str] = &["baud_rates"];

/// Layer an optional TOML file and `FIRMATA_*` variables over `T::default()`
///
/// Nested keys use a double underscore: `FIRMATA_FIRMWARE__NAME`. Variables
/// whose dotted key is in `list_keys` are split on commas, so nested lists
/// must be given with their full path (`engine.baud_rates`).
pub fn load_config<T: DeserializeOwned>(
    path: Option<&Path>,
    list_keys: &[&str],
) -> Result<T, FirmataError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }
    let environment = list_keys.iter().fold(
        config::Environment::with_prefix("FIRMATA")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(","),
        |environment, key| environment.with_list_parse_key(key),
    );
    builder
        .add_source(environment)
        .build()
        .and_then(|settings| settings.try_deserialize())
        .map_err(|e| FirmataError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Loading reads process-wide environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.baud_rates, vec![115_200, 57_600, 38_400, 19_200, 9_600]);
        assert_eq!(config.minimum_version, ProtocolVersion::new(2, 4));
        assert_eq!(config.reset_count, 3);
        assert_eq!(config.probe_timeout(), Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let empty = EngineConfig {
            baud_rates: vec![],
            ..Default::default()
        };
        assert!(matches!(empty.validate(), Err(FirmataError::Config(_))));

        let stuck = EngineConfig {
            growth_multiplier: 1,
            growth_constant: 0,
            ..Default::default()
        };
        assert!(matches!(stuck.validate(), Err(FirmataError::Config(_))));

        let linear = EngineConfig {
            growth_multiplier: 1,
            growth_constant: 64,
            ..Default::default()
        };
        assert!(linear.validate().is_ok());
    }

    #[test]
    fn test_decoder_config_follows_engine_config() {
        let config = EngineConfig {
            role: Role::Device,
            max_sysex_bytes: 64,
            ..Default::default()
        };
        let decoder = config.decoder_config();
        assert_eq!(decoder.role, Role::Device);
        assert_eq!(decoder.max_sysex_bytes, 64);
        assert_eq!(decoder.firmware, FirmwareReport::default());
    }

    #[test]
    fn test_load_from_file() {
        let _env = ENV_LOCK.lock().unwrap();
        let path = std::env::temp_dir().join(format!("firmata-engine-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "port = \"/dev/ttyUSB3\"\nbaud_rates = [57600]\nprobe_timeout_ms = 250\n\
             [minimum_version]\nmajor = 2\nminor = 3\n[firmware]\nname = \"bench\""
        )
        .unwrap();
        drop(file);

        let config = EngineConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.port, "/dev/ttyUSB3");
        assert_eq!(config.baud_rates, vec![57_600]);
        assert_eq!(config.probe_timeout(), Duration::from_millis(250));
        assert_eq!(config.minimum_version, ProtocolVersion::new(2, 3));
        assert_eq!(config.firmware.name, "bench");
        // untouched keys keep their defaults
        assert_eq!(config.reset_count, 3);
        assert_eq!(config.firmware.protocol_major, 2);
    }

    #[test]
    fn test_environment_lists() {
        let _env = ENV_LOCK.lock().unwrap();
        std::env::set_var("FIRMATA_BAUD_RATES", "57600,9600");
        let config = EngineConfig::load(None);
        std::env::remove_var("FIRMATA_BAUD_RATES");
        assert_eq!(config.unwrap().baud_rates, vec![57_600, 9_600]);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let _env = ENV_LOCK.lock().unwrap();
        let path =
            std::env::temp_dir().join(format!("firmata-engine-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "baud_rates = []\n").unwrap();
        let result = EngineConfig::load(Some(&path));
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(FirmataError::Config(_))));
    }
}
