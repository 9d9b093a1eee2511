//! Serial Slave Example
//!
//! Serves a small register map on a serial port until Ctrl-C, then prints
//! what the master wrote.
//!
//! # Register Map
//!
//! | Class | Address | Values |
//! |-------|---------|--------|
//! | Coil | 0x0000 | 1, 0, 0, 1 |
//! | Holding | 0x00A0 | 1, 2, 3, 4 |
//! | Input | 0xE4B2 | 0xFFFF |
//!
//! # Running this example
//!
//! ```bash
//! SERIAL_PORT_DEVICE=/dev/ttyUSB1 MODBUS_SLAVE_ADDR=1 cargo run --example slave_server --features serial
//! ```

use std::sync::Arc;

use voltage_serial_modbus::{
    InMemoryState, ModbusLink, ModbusResult, ModbusSlave, ModbusState, NoLineControl,
    RegisterClass, SerialConfig,
};

#[tokio::main]
async fn main() -> ModbusResult<()> {
    let config = SerialConfig::from_env()?;

    let state = ModbusState::new()
        .with_element(RegisterClass::Coil, 0x0000, vec![1, 0, 0, 1])
        .with_element(RegisterClass::Holding, 0x00A0, vec![1, 2, 3, 4])
        .with_element(RegisterClass::Input, 0xE4B2, vec![0xFFFF]);
    let provider = Arc::new(InMemoryState::shared(state));

    let link = ModbusLink::open(&config, &NoLineControl)?;
    let handle = ModbusSlave::new(link, config.slave_address, provider.clone()).spawn();
    println!(
        "Slave {} serving on {} ({}), Ctrl-C to stop",
        config.slave_address, config.port, config.frame_mode
    );

    let stop = handle.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });
    handle.join().await?;

    println!("Final state: {}", provider.writable().to_json()?);
    Ok(())
}
