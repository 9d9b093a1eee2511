//! # Link Configuration
//!
//! Typed configuration for a serial Modbus link and its byte framer.
//!
//! Values can be built in code with the `with_*` methods or loaded from the
//! environment:
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `SERIAL_PORT_DEVICE` | Serial device path | `/dev/ttyS2` |
//! | `SERIAL_BAUD_RATE` | Baud rate | `9600` |
//! | `MODBUS_MODE` | `0` ASCII, `1` RTU | `1` |
//! | `SERIAL_MODE` | `0` RS-232, `1` RS-485 half duplex, `2` RS-485 full duplex | `0` |
//! | `SERIAL_TERM` | `1` enables bus termination | `0` |
//! | `MODBUS_RESPONSE_TIMEOUT` | Master response timeout, seconds | `5` |
//! | `MODBUS_SLAVE_ADDR` | Slave address | `1` |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_INTER_BYTE_TIMEOUT_MS, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_READ_BUFFER_SIZE, DEFAULT_RESPONSE_TIMEOUT_MS, DEFAULT_SERIAL_PORT,
    DEFAULT_SLAVE_ADDRESS,
};
use crate::error::{ModbusError, ModbusResult};
use crate::message::SlaveId;

/// Wire encoding of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameMode {
    Ascii,
    #[default]
    Rtu,
}

impl FrameMode {
    /// Map the numeric setting (`0` ASCII, `1` RTU)
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0 => Ok(Self::Ascii),
            1 => Ok(Self::Rtu),
            other => Err(ModbusError::configuration(format!(
                "Invalid Modbus mode {} (0 = ASCII, 1 = RTU)",
                other
            ))),
        }
    }

    /// Tag used in packet logs
    pub fn tag(self) -> &'static str {
        match self {
            Self::Ascii => "ASCII",
            Self::Rtu => "RTU",
        }
    }
}

impl fmt::Display for FrameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Electrical interface / direction control of the serial port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerialMode {
    #[default]
    Rs232,
    Rs485HalfDuplex,
    Rs485FullDuplex,
}

impl SerialMode {
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0 => Ok(Self::Rs232),
            1 => Ok(Self::Rs485HalfDuplex),
            2 => Ok(Self::Rs485FullDuplex),
            other => Err(ModbusError::configuration(format!(
                "Invalid serial mode {} (0 = RS-232, 1 = RS-485 HD, 2 = RS-485 FD)",
                other
            ))),
        }
    }
}

/// What the framer's reader does when the chunk queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait for queue space; stopping still cancels the wait
    #[default]
    Block,
    /// Terminate the reader with a queue-full fault
    Fault,
}

/// Byte framer timing and queue settings.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use voltage_serial_modbus::{FramerConfig, OverflowPolicy};
///
/// let config = FramerConfig::new()
///     .with_inter_byte_timeout(Duration::from_millis(20))
///     .with_overflow(OverflowPolicy::Fault);
///
/// assert_eq!(config.queue_capacity, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramerConfig {
    /// Wait for the first byte of a chunk; `None` waits indefinitely
    pub initial_timeout: Option<Duration>,
    /// Silence that ends a chunk
    pub inter_byte_timeout: Duration,
    /// Largest chunk a single read call can produce
    pub read_buffer_size: usize,
    /// Bound of the chunk queue
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            initial_timeout: None,
            inter_byte_timeout: Duration::from_millis(DEFAULT_INTER_BYTE_TIMEOUT_MS),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::Block,
        }
    }
}

impl FramerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.initial_timeout = timeout;
        self
    }

    pub fn with_inter_byte_timeout(mut self, timeout: Duration) -> Self {
        self.inter_byte_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_overflow(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    /// Reject settings the framer cannot run with.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.read_buffer_size == 0 {
            return Err(ModbusError::configuration("Read buffer size must be non-zero"));
        }
        if self.queue_capacity == 0 {
            return Err(ModbusError::configuration("Queue capacity must be non-zero"));
        }
        if self.inter_byte_timeout.is_zero() {
            return Err(ModbusError::configuration(
                "Inter-byte timeout must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Serial link settings, fixed when the link opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub frame_mode: FrameMode,
    pub serial_mode: SerialMode,
    /// Enable RS-485 bus termination
    pub termination: bool,
    /// Default timeout for master convenience calls
    pub response_timeout: Duration,
    /// Address answered by a slave on this link
    pub slave_address: SlaveId,
    pub framer: FramerConfig,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            frame_mode: FrameMode::default(),
            serial_mode: SerialMode::default(),
            termination: false,
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
            slave_address: DEFAULT_SLAVE_ADDRESS,
            framer: FramerConfig::default(),
        }
    }
}

impl SerialConfig {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Self::default()
        }
    }

    pub fn with_frame_mode(mut self, mode: FrameMode) -> Self {
        self.frame_mode = mode;
        self
    }

    pub fn with_serial_mode(mut self, mode: SerialMode) -> Self {
        self.serial_mode = mode;
        self
    }

    pub fn with_termination(mut self, termination: bool) -> Self {
        self.termination = termination;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_slave_address(mut self, address: SlaveId) -> Self {
        self.slave_address = address;
        self
    }

    pub fn with_framer(mut self, framer: FramerConfig) -> Self {
        self.framer = framer;
        self
    }

    /// Load settings from the process environment, falling back to defaults.
    pub fn from_env() -> ModbusResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through `lookup`, falling back to defaults for unset names.
    pub fn from_lookup<F>(lookup: F) -> ModbusResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let port = lookup("SERIAL_PORT_DEVICE").unwrap_or(defaults.port);
        let baud_rate = parse_var(&lookup, "SERIAL_BAUD_RATE", defaults.baud_rate)?;
        let frame_mode = FrameMode::from_u8(parse_var(&lookup, "MODBUS_MODE", 1u8)?)?;
        let serial_mode = SerialMode::from_u8(parse_var(&lookup, "SERIAL_MODE", 0u8)?)?;
        let termination = parse_var(&lookup, "SERIAL_TERM", 0u8)? != 0;
        let timeout_secs = parse_var(
            &lookup,
            "MODBUS_RESPONSE_TIMEOUT",
            defaults.response_timeout.as_secs(),
        )?;
        let slave_address = parse_var(&lookup, "MODBUS_SLAVE_ADDR", defaults.slave_address)?;

        Ok(Self {
            port,
            baud_rate,
            frame_mode,
            serial_mode,
            termination,
            response_timeout: Duration::from_secs(timeout_secs),
            slave_address,
            framer: defaults.framer,
        })
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.port.is_empty() {
            return Err(ModbusError::configuration("Serial port must not be empty"));
        }
        if self.baud_rate == 0 {
            return Err(ModbusError::configuration("Baud rate must be non-zero"));
        }
        self.framer.validate()
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> ModbusResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ModbusError::configuration(format!("Invalid value for {}: '{}'", name, raw))
        }),
        None => Ok(default),
    }
}
