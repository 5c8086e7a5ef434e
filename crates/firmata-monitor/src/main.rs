//! Firmata Monitor - Main Entry Point
//!
//! Usage: `firmata-monitor [config.toml]`

use anyhow::Context;
use firmata_engine::FirmataEngine;
use firmata_monitor::{init_logging, LoggingSink, MonitorConfig};
use firmata_protocol::SerialTransport;
use std::path::PathBuf;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = MonitorConfig::load(path.as_deref())?;
    init_logging(&config.log_level, config.json_logs)?;

    info!("=== Firmata Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    let transport = SerialTransport::new(config.engine.port.clone());
    info!("Looking for a board on {}", transport.path());
    let engine = FirmataEngine::new(transport, LoggingSink::new(), config.engine)?;

    let version = engine
        .probe_and_open()
        .await
        .context("probing for a Firmata board")?;
    info!(
        "Firmata {} board at {} baud",
        version,
        engine.baud_rate()
    );

    match engine.get_full_firmware_version().await {
        Ok(report) => info!(
            "Firmware {} {}.{} (protocol {})",
            report.name,
            report.app_major,
            report.app_minor,
            report.protocol_version()
        ),
        Err(e) => warn!("Firmware query failed: {}", e),
    }

    for &channel in &config.analog_channels {
        engine.report_analog(channel, true).await?;
    }
    for &port in &config.digital_ports {
        engine.report_digital(port, true).await?;
    }

    info!("Monitoring, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    engine.close().await;
    Ok(())
}
