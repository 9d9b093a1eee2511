//! # Voltage Serial Modbus - Modbus ASCII/RTU over serial lines
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **License:** MIT
//!
//! An async Modbus stack for RS-232/RS-485 serial links. It frames messages in
//! either serial encoding and runs one of three roles on a link:
//!
//! - **Master**: send a request, wait for the correlated response
//! - **Slave**: answer requests from register state owned by the application
//! - **Trace**: passively forward every message seen on the bus
//!
//! ## Features
//!
//! - **Both encodings**: ASCII (`:` + hex + LRC + `CRLF`) and RTU (binary + CRC-16)
//! - **Timing-based framing**: bytes are grouped by line silence, RTU frames
//!   are disambiguated without length prefixes
//! - **Bounded waits**: every blocking call outside a role's run loop takes a timeout
//! - **Pluggable state**: slave registers live behind [`StateProvider`]
//!
//! | Cargo feature | Enables |
//! |---------------|---------|
//! | `serial` | [`ModbusLink::open`] on real serial ports via `tokio-serial` |
//! | `cli` | the `modbus-tool` binary |
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Master | Slave |
//! |------|----------|--------|-------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//! | 0x16 | Mask Write Register | ✅ | ✅ |
//!
//! The trace role and [`ModbusMaster::send_and_await`] carry any function code.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voltage_serial_modbus::{
//!     FrameMode, FramerConfig, InMemoryState, ModbusLink, ModbusResult, ModbusSlave,
//!     ModbusState, RegisterClass,
//! };
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let (_bus, line) = tokio::io::duplex(1024);
//!     let link = ModbusLink::new(line, FrameMode::Rtu, FramerConfig::default());
//!
//!     let state = ModbusState::new().with_element(RegisterClass::Holding, 0xA0, vec![1, 2, 3, 4]);
//!     let slave = ModbusSlave::new(link, 1, Arc::new(InMemoryState::shared(state)));
//!
//!     let handle = slave.spawn();
//!     // ...
//!     handle.shutdown().await
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus serial line constants
pub mod constants;

/// Message model
pub mod message;

/// ASCII/RTU frame codec and checksums
pub mod frame;

/// Request payload builder and bit/word helpers
pub mod payload;

// ============================================================================
// Link layer
// ============================================================================

/// Link and framer configuration
pub mod config;

/// Timeout-driven byte framer
pub mod framer;

/// Chunk decoders
pub mod decoder;

/// Framer + decoder pairing shared by all roles
pub mod link;

/// Notification and line-control hooks
pub mod device;

/// Packet logging
pub mod logging;

/// Serial port transport
#[cfg(feature = "serial")]
pub mod transport;

// ============================================================================
// Roles
// ============================================================================

/// Master role
pub mod master;

/// Slave role
pub mod slave;

/// Slave register state
pub mod state;

/// Trace role
pub mod trace;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use voltage_serial_modbus::tokio) ===
pub use tokio;

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Core types ===
pub use message::{ExceptionCode, Message, SlaveId};
pub use payload::PayloadBuilder;

// === Link ===
pub use config::{FrameMode, FramerConfig, OverflowPolicy, SerialConfig, SerialMode};
pub use decoder::{AsciiDecoder, Decoder, ModbusDecoder, RtuDecoder};
pub use framer::{ByteFramer, FramerStats, StopHandle};
pub use link::{ModbusLink, RoleHandle};

// === Roles ===
pub use master::{ModbusClient, ModbusMaster, PendingRequest};
pub use slave::{ModbusSlave, SlaveHandler};
pub use state::{InMemoryState, ModbusState, RegisterClass, StateProvider};
pub use trace::ModbusTrace;

// === Device hooks ===
pub use device::{LineControl, NoLineControl, NoopNotifier, Notifier};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "Voltage Serial Modbus v{} - Modbus ASCII/RTU stack by Evan Liu",
        VERSION
    )
}
