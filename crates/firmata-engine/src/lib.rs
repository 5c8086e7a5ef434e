//! Firmata Protocol Engine
//!
//! Runs the decode pump over a byte transport, correlates replies with
//! outstanding requests and finds the baud rate a board answers on.

mod config;
mod engine;
mod pending;
mod sink;

pub use config::{load_config, EngineConfig, DEFAULT_BAUD_RATES, ENGINE_LIST_KEYS};
pub use engine::{ConnectionState, FirmataEngine};
pub use pending::{compute_key, PendingRequestTable, PendingResponse};
pub use sink::{BoardSink, ChannelSink, SinkEvent};
