//! Serial port transport
//!
//! Opens a real serial device with `tokio-serial` (8 data bits, no parity,
//! one stop bit) after applying the board's line settings.

use tokio_serial::SerialStream;
use tracing::info;

use crate::config::SerialConfig;
use crate::device::{apply_line_settings, LineControl};
use crate::error::{ModbusError, ModbusResult};

/// Open the serial port described by `config`.
///
/// Line settings go through `line` first; the port settings are fixed for
/// the lifetime of the returned stream.
pub fn open_serial(config: &SerialConfig, line: &dyn LineControl) -> ModbusResult<SerialStream> {
    config.validate()?;
    apply_line_settings(line, config.serial_mode, config.termination)?;

    let builder = tokio_serial::new(&config.port, config.baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .stop_bits(tokio_serial::StopBits::One)
        .parity(tokio_serial::Parity::None)
        .flow_control(tokio_serial::FlowControl::None);

    let stream = SerialStream::open(&builder).map_err(|e| {
        ModbusError::connection(format!(
            "Failed to open serial port {}: {}",
            config.port, e
        ))
    })?;

    info!(
        "Opened serial port {} @ {} baud ({:?}, {})",
        config.port, config.baud_rate, config.serial_mode, config.frame_mode
    );
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NoLineControl;

    #[tokio::test]
    async fn test_open_missing_port_is_connection_error() {
        let config = SerialConfig::new("/dev/does-not-exist-modbus", 9600);
        match open_serial(&config, &NoLineControl) {
            Err(ModbusError::Connection { message }) => {
                assert!(message.contains("/dev/does-not-exist-modbus"))
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_config_rejected_before_open() {
        let config = SerialConfig::new("", 9600);
        assert!(matches!(
            open_serial(&config, &NoLineControl),
            Err(ModbusError::Configuration { .. })
        ));
    }
}
