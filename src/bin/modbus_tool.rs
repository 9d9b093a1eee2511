//! Modbus serial tool
//!
//! Runs a master, slave or bus trace on a serial port, or sends a burst of
//! test frames covering every RTU frame shape.
//!
//! Usage:
//!   modbus-tool --port /dev/ttyUSB0 --mode 1 master --address 1 --function 3 --data 00A00002
//!   modbus-tool slave --address 1 --state state.json
//!   modbus-tool trace --idle 30
//!   modbus-tool burst --count 1000 --delay-ms 100

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use voltage_serial_modbus::logging::init_tracing;
use voltage_serial_modbus::{
    FrameMode, InMemoryState, Message, ModbusError, ModbusLink, ModbusMaster, ModbusResult,
    ModbusSlave, ModbusState, ModbusTrace, NoLineControl, SerialConfig, SerialMode,
};

#[derive(Debug, Parser)]
#[clap(author, version, about = "Modbus ASCII/RTU serial tool")]
struct Args {
    /// Serial device
    #[clap(short, long, env = "SERIAL_PORT_DEVICE", default_value = "/dev/ttyS2")]
    port: String,

    /// Baud rate
    #[clap(short, long, env = "SERIAL_BAUD_RATE", default_value_t = 9600)]
    baud: u32,

    /// Modbus mode: 0 = ASCII, 1 = RTU
    #[clap(short, long, env = "MODBUS_MODE", default_value_t = 1)]
    mode: u8,

    /// Serial mode: 0 = RS-232, 1 = RS-485 half duplex, 2 = RS-485 full duplex
    #[clap(long, env = "SERIAL_MODE", default_value_t = 0)]
    serial_mode: u8,

    /// Bus termination: 0 = off, 1 = on
    #[clap(long, env = "SERIAL_TERM", default_value_t = 0)]
    term: u8,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[clap(short = 'l', long, default_value = "info")]
    log_level: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one request and print the response
    Master {
        /// Request as JSON: {"address": 1, "function": 3, "data": [0, 160, 0, 2]}
        #[clap(long, conflicts_with_all = ["address", "function", "data"])]
        request: Option<String>,

        /// Slave address
        #[clap(short, long)]
        address: Option<u8>,

        /// Function code
        #[clap(short, long)]
        function: Option<u8>,

        /// Request data as hex, e.g. 00A00002
        #[clap(short, long, default_value = "")]
        data: String,

        /// Response timeout in seconds
        #[clap(short, long, env = "MODBUS_RESPONSE_TIMEOUT", default_value_t = 5)]
        timeout: u64,
    },

    /// Answer requests from a JSON state file
    Slave {
        /// Slave address
        #[clap(short, long, env = "MODBUS_SLAVE_ADDR", default_value_t = 1)]
        address: u8,

        /// State document ({"coil": {...}, "holding": {...}, ...})
        #[clap(short, long)]
        state: PathBuf,
    },

    /// Print every message seen on the bus
    Trace {
        /// Stop after this many idle seconds (runs until Ctrl-C otherwise)
        #[clap(short, long)]
        idle: Option<u64>,
    },

    /// Send test frames of every RTU shape
    Burst {
        /// Number of frames
        #[clap(short, long, default_value_t = 1000)]
        count: usize,

        /// Delay between frames in milliseconds
        #[clap(short, long, default_value_t = 1000)]
        delay_ms: u64,
    },
}

impl Args {
    fn serial_config(&self) -> ModbusResult<SerialConfig> {
        let config = SerialConfig::new(&self.port, self.baud)
            .with_frame_mode(FrameMode::from_u8(self.mode)?)
            .with_serial_mode(SerialMode::from_u8(self.serial_mode)?)
            .with_termination(self.term != 0);
        config.validate()?;
        Ok(config)
    }
}

/// One message of every RTU frame shape
fn burst_messages() -> Vec<Message> {
    vec![
        Message::new(1, 0x01, vec![1, 2, 3, 4]),
        Message::new(2, 0x03, vec![8, 1, 2, 3, 4, 5, 6, 7, 8]),
        Message::new(3, 0x11, vec![]),
        Message::new(
            4,
            0x10,
            vec![1, 2, 3, 4, 16, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
        ),
        Message::new(5, 0x07, vec![0xDD]),
        Message::new(6, 0x18, vec![0xAA]),
        Message::new(7, 0x08, vec![0, 0, 0]),
        Message::new(8, 0x16, vec![10, 11, 12, 13, 14, 15]),
        Message::new(
            4,
            0x17,
            vec![1, 2, 3, 4, 5, 6, 7, 8, 8, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8],
        ),
    ]
}

fn parse_hex(text: &str) -> ModbusResult<Vec<u8>> {
    let text = text.trim();
    if !text.is_ascii() || text.len() % 2 != 0 {
        return Err(ModbusError::invalid_data(
            "Hex data must be ASCII with an even length",
        ));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&text[i..i + 2], 16)
                .map_err(|_| ModbusError::invalid_data(format!("Invalid hex data: {}", text)))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;
    let config = args.serial_config()?;
    let link = ModbusLink::open(&config, &NoLineControl)?;

    match args.command {
        Command::Master {
            request,
            address,
            function,
            data,
            timeout,
        } => {
            let request = match request {
                Some(json) => Message::from_json(&json)?,
                None => {
                    let address = address.ok_or("--address is required")?;
                    let function = function.ok_or("--function is required")?;
                    Message::new(address, function, parse_hex(&data)?)
                }
            };

            let mut master = ModbusMaster::new(link);
            master.start()?;
            let response = master
                .send_and_await(&request, Duration::from_secs(timeout))
                .await;
            master.stop().await?;

            match response? {
                Some(response) => println!("{}", response.to_json()?),
                None => {
                    eprintln!("No response within {}s", timeout);
                    std::process::exit(1);
                }
            }
        }

        Command::Slave { address, state } => {
            let document = ModbusState::from_json(&std::fs::read_to_string(&state)?)?;
            let provider = Arc::new(InMemoryState::shared(document));
            let handle = ModbusSlave::new(link, address, provider).spawn();

            let stop = handle.stop_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    stop.stop();
                }
            });
            handle.join().await?;
        }

        Command::Trace { idle } => {
            let mut trace = ModbusTrace::new(link, |msg: &Message| match msg.to_json() {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("{}", e),
            });

            let stop = trace.stop_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    stop.stop();
                }
            });

            let count = match idle {
                Some(secs) => trace.run_until_idle(Duration::from_secs(secs)).await?,
                None => trace.run().await?,
            };
            info!("Trace complete, received {} messages", count);
        }

        Command::Burst { count, delay_ms } => {
            let mut link = link;
            let messages = burst_messages();
            for (i, msg) in messages.iter().cycle().take(count).enumerate() {
                link.send_message(msg).await?;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                if i % 100 == 0 {
                    info!("...Sent {} messages", i);
                }
            }
            info!("Burst complete, sent {} messages", count);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("00A00002").unwrap(), vec![0x00, 0xA0, 0x00, 0x02]);
        assert_eq!(parse_hex("").unwrap(), Vec::<u8>::new());
        assert!(parse_hex("0A0").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "modbus-tool",
            "--port",
            "/dev/ttyUSB1",
            "--mode",
            "0",
            "master",
            "--address",
            "1",
            "--function",
            "3",
            "--data",
            "00A00002",
        ])
        .unwrap();
        let config = args.serial_config().unwrap();
        assert_eq!(config.port, "/dev/ttyUSB1");
        assert_eq!(config.frame_mode, FrameMode::Ascii);
        assert!(matches!(args.command, Command::Master { address: Some(1), .. }));
    }
}
