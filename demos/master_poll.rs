//! Serial Master Polling Example
//!
//! Polls a block of holding registers from one slave once a second and
//! reports link health through a [`Notifier`].
//!
//! The port is configured from the environment:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `SERIAL_PORT_DEVICE` | `/dev/ttyS2` | Serial device |
//! | `SERIAL_BAUD_RATE` | `9600` | Baud rate |
//! | `MODBUS_MODE` | `1` | 0 = ASCII, 1 = RTU |
//! | `MODBUS_SLAVE_ADDR` | `1` | Slave to poll |
//! | `MODBUS_RESPONSE_TIMEOUT` | `5` | Seconds per request |
//!
//! # Running this example
//!
//! ```bash
//! SERIAL_PORT_DEVICE=/dev/ttyUSB0 cargo run --example master_poll --features serial
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use voltage_serial_modbus::{
    ModbusClient, ModbusLink, ModbusMaster, ModbusResult, NoLineControl, Notifier, SerialConfig,
};

/// Register block to poll
const START_ADDRESS: u16 = 0x00A0;
const QUANTITY: u16 = 4;
const POLLS: usize = 10;

/// Counts indications instead of driving LEDs
#[derive(Default)]
struct CountingNotifier {
    activity: AtomicUsize,
    exceptions: AtomicUsize,
}

impl Notifier for CountingNotifier {
    fn activity(&self) {
        self.activity.fetch_add(1, Ordering::Relaxed);
    }

    fn exception(&self) {
        self.exceptions.fetch_add(1, Ordering::Relaxed);
    }
}

#[tokio::main]
async fn main() -> ModbusResult<()> {
    let config = SerialConfig::from_env()?;
    println!(
        "Polling slave {} on {} @ {} baud ({})",
        config.slave_address, config.port, config.baud_rate, config.frame_mode
    );

    let notifier = Arc::new(CountingNotifier::default());
    let link = ModbusLink::open(&config, &NoLineControl)?.with_notifier(notifier.clone());
    let mut master = ModbusMaster::new(link).with_response_timeout(config.response_timeout);
    master.start()?;

    for poll in 1..=POLLS {
        match master
            .read_holding_registers(config.slave_address, START_ADDRESS, QUANTITY)
            .await
        {
            Ok(values) => println!("[{:>2}] 0x{:04X}: {:?}", poll, START_ADDRESS, values),
            Err(e) => println!("[{:>2}] failed: {}", poll, e),
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    master.stop().await?;
    println!(
        "Done: {} activity indications, {} unanswered requests",
        notifier.activity.load(Ordering::Relaxed),
        notifier.exceptions.load(Ordering::Relaxed)
    );
    Ok(())
}
