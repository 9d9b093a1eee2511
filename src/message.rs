//! Modbus message model
//!
//! A [`Message`] is one Modbus application data unit without its framing:
//! slave address, function code and data bytes. The same type carries
//! requests, normal responses and exception responses, so the trace role can
//! forward whatever it sees on the bus.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    EXCEPTION_FLAG, EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_DATA_VALUE,
    EXCEPTION_ILLEGAL_FUNCTION, EXCEPTION_SERVER_DEVICE_FAILURE,
};

/// Modbus slave address (0 = broadcast, 1-247 = unicast)
pub type SlaveId = u8;

/// One decoded or locally built Modbus message.
///
/// Equality compares address, function and data only; `received_at` is
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub address: SlaveId,
    pub function: u8,
    #[serde(default)]
    pub data: Vec<u8>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl Message {
    pub fn new(address: SlaveId, function: u8, data: Vec<u8>) -> Self {
        Self {
            address,
            function,
            data,
            received_at: Utc::now(),
        }
    }

    /// Exception response for `function` carrying a single exception code.
    pub fn exception(address: SlaveId, function: u8, code: ExceptionCode) -> Self {
        Self::new(address, function | EXCEPTION_FLAG, vec![code.to_u8()])
    }

    /// Whether bit 7 of the function code is set
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function & EXCEPTION_FLAG != 0
    }

    /// Function code with the exception bit masked off
    #[inline]
    pub fn base_function(&self) -> u8 {
        self.function & !EXCEPTION_FLAG
    }

    /// Exception code of an exception response
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.data.first().copied()
        } else {
            None
        }
    }

    /// Parse a message from its JSON object form.
    pub fn from_json(text: &str) -> crate::ModbusResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// JSON object form of the message.
    pub fn to_json(&self) -> crate::ModbusResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Get human-readable function code description
    pub fn function_code_description(fc: u8) -> &'static str {
        match fc & !EXCEPTION_FLAG {
            0x01 => "Read Coils",
            0x02 => "Read Discrete Inputs",
            0x03 => "Read Holding Registers",
            0x04 => "Read Input Registers",
            0x05 => "Write Single Coil",
            0x06 => "Write Single Register",
            0x07 => "Read Exception Status",
            0x08 => "Diagnostics",
            0x0B => "Get Comm Event Counter",
            0x0C => "Get Comm Event Log",
            0x0F => "Write Multiple Coils",
            0x10 => "Write Multiple Registers",
            0x11 => "Report Slave ID",
            0x14 => "Read File Record",
            0x15 => "Write File Record",
            0x16 => "Mask Write Register",
            0x17 => "Read/Write Multiple Registers",
            0x18 => "Read FIFO Queue",
            _ => "Unknown Function",
        }
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.function == other.function && self.data == other.data
    }
}

impl Eq for Message {}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "address={}, function=0x{:02X} ({}), data={:02X?}",
            self.address,
            self.function,
            Self::function_code_description(self.function),
            self.data
        )
    }
}

/// Exception codes a slave can return.
///
/// This stack emits `IllegalFunction` and `IllegalDataAddress`; the others
/// are recognised when decoding responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
}

impl ExceptionCode {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::IllegalFunction => EXCEPTION_ILLEGAL_FUNCTION,
            Self::IllegalDataAddress => EXCEPTION_ILLEGAL_DATA_ADDRESS,
            Self::IllegalDataValue => EXCEPTION_ILLEGAL_DATA_VALUE,
            Self::ServerDeviceFailure => EXCEPTION_SERVER_DEVICE_FAILURE,
        }
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            EXCEPTION_ILLEGAL_FUNCTION => Some(Self::IllegalFunction),
            EXCEPTION_ILLEGAL_DATA_ADDRESS => Some(Self::IllegalDataAddress),
            EXCEPTION_ILLEGAL_DATA_VALUE => Some(Self::IllegalDataValue),
            EXCEPTION_SERVER_DEVICE_FAILURE => Some(Self::ServerDeviceFailure),
            _ => None,
        }
    }

    pub fn describe(code: u8) -> &'static str {
        match Self::from_u8(code) {
            Some(Self::IllegalFunction) => "Illegal Function",
            Some(Self::IllegalDataAddress) => "Illegal Data Address",
            Some(Self::IllegalDataValue) => "Illegal Data Value",
            Some(Self::ServerDeviceFailure) => "Server Device Failure",
            None => "Unknown Exception",
        }
    }
}
