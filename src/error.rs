//! Error types for the serial Modbus stack
//!
//! A single [`ModbusError`] covers transport faults, framing problems,
//! protocol exceptions reported by a remote slave, and configuration mistakes.
//! Checksum failures are not errors: decoders drop bad frames and log them.

use thiserror::Error;

/// Result alias used across the crate.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors raised by the serial Modbus stack.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// Read or write failure on the underlying byte stream
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Failure opening or configuring the serial port
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// No response within the allotted time
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Malformed or unexpected protocol data
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Function code not supported by the operation
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Argument outside the range the protocol allows
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Exception response returned by the remote slave
    #[error("Modbus exception: function=0x{function:02X}, code=0x{code:02X} ({message})")]
    Exception {
        function: u8,
        code: u8,
        message: String,
    },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Reader outpaced the consumer under the `Fault` overflow policy
    #[error("Receive queue full ({capacity} chunks)")]
    QueueFull { capacity: usize },

    /// The link was stopped while an operation was waiting on it
    #[error("Link stopped")]
    Stopped,
}

impl ModbusError {
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Build an exception error from an exception response's function and code.
    pub fn exception(function: u8, code: u8) -> Self {
        Self::Exception {
            function: function & 0x7F,
            code,
            message: crate::message::ExceptionCode::describe(code).to_string(),
        }
    }

    /// Whether the owning role can keep using the link after this error.
    ///
    /// Transport faults and a stopped link are fatal: no further framing is
    /// possible on that link.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Io { .. } | Self::Connection { .. } | Self::QueueFull { .. } | Self::Stopped
        )
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_data(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModbusError::timeout("await response", 5000);
        assert_eq!(err.to_string(), "Timeout after 5000ms: await response");

        let err = ModbusError::invalid_function(0x2B);
        assert_eq!(err.to_string(), "Invalid function code: 0x2B");
    }

    #[test]
    fn test_exception_masks_high_bit() {
        let err = ModbusError::exception(0x83, 0x02);
        match err {
            ModbusError::Exception { function, code, .. } => {
                assert_eq!(function, 0x03);
                assert_eq!(code, 0x02);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(ModbusError::timeout("x", 1).is_recoverable());
        assert!(ModbusError::exception(0x81, 1).is_recoverable());
        assert!(!ModbusError::io("device disappeared").is_recoverable());
        assert!(!ModbusError::Stopped.is_recoverable());
        assert!(!ModbusError::QueueFull { capacity: 4 }.is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: ModbusError = io.into();
        assert!(matches!(err, ModbusError::Io { .. }));
    }
}
