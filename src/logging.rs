//! Packet logging and subscriber setup

use tracing::debug;

use crate::config::FrameMode;

/// Format raw bytes as spaced uppercase hex for packet logging
pub fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log a frame with its direction (`TX`/`RX`) and encoding
pub fn log_packet(direction: &str, mode: FrameMode, data: &[u8]) {
    debug!("[MODBUS-{}] {} {}", mode.tag(), direction, format_hex_packet(data));
}

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` (e.g. `info`) applies.
#[cfg(feature = "cli")]
pub fn init_tracing(default_level: &str) -> crate::ModbusResult<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::ModbusError::configuration(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| crate::ModbusError::configuration(format!("Logging already initialised: {}", e)))
}
