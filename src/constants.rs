//! Modbus serial line constants
//!
//! Frame limits follow the Modbus over Serial Line specification:
//! - RTU ADU: at most 256 bytes (address + PDU + CRC)
//! - ASCII ADU: at most 513 characters between `:` and `CRLF`

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum message data length (PDU without the function code)
///
/// = 253 (PDU) - 1 (function code) = 252 bytes
pub const MAX_DATA_LEN: usize = MAX_PDU_SIZE - 1;

/// Minimum RTU frame: Address(1) + Function(1) + CRC(2)
pub const MIN_RTU_FRAME_SIZE: usize = 4;

/// ASCII frame start character
pub const ASCII_START: u8 = b':';

/// ASCII frame terminator
pub const ASCII_END: &[u8; 2] = b"\r\n";

/// Longest legal ASCII frame: ':' + 2 × (Address + PDU + LRC) hex digits + CRLF
///
/// = 1 + 2 × (1 + 253 + 1) + 2 = 513 bytes
pub const MAX_ASCII_FRAME_SIZE: usize = 1 + 2 * (1 + MAX_PDU_SIZE + 1) + 2;

/// Remainder bound for the ASCII decoder (a full frame plus a CRLF of slack)
pub const MAX_ASCII_REMAINDER: usize = MAX_ASCII_FRAME_SIZE + 2;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03/FC04 (Read Holding/Input Registers)
///
/// - Total: 1 + 1 + (N × 2) ≤ 253
/// - Therefore: N ≤ 125 registers
pub const MAX_READ_REGISTERS: usize = 125;

/// Maximum number of registers for FC16 (Write Multiple Registers)
///
/// - Total: 1 + 2 + 2 + 1 + (N × 2) ≤ 253
/// - Therefore: N ≤ 123 registers
pub const MAX_WRITE_REGISTERS: usize = 123;

/// Maximum number of coils for FC01/FC02 (Read Coils/Discrete Inputs)
pub const MAX_READ_COILS: usize = 2000;

/// Maximum number of coils for FC15 (Write Multiple Coils)
pub const MAX_WRITE_COILS: usize = 1968;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Discrete Inputs (FC02)
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Coils (FC15)
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Mask Write Register (FC22)
pub const FC_MASK_WRITE_REGISTER: u8 = 0x16;

/// Bit set in the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

// ============================================================================
// Link Defaults
// ============================================================================

/// Default inter-byte timeout used to delimit received chunks (100 ms)
pub const DEFAULT_INTER_BYTE_TIMEOUT_MS: u64 = 100;

/// Default size of one reader call's buffer
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Default capacity of the received chunk queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default master response timeout (5 seconds)
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5000;

/// Default serial device
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyS2";

/// Default baud rate
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default slave address
pub const DEFAULT_SLAVE_ADDRESS: u8 = 1;
