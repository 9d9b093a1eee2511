//! Message payload construction and parsing
//!
//! Builders for request payloads and helpers for the two data encodings the
//! register functions use: packed bits (LSB first within each byte) and
//! MSB-first 16-bit words.

use tracing::debug;

use crate::constants::{
    FC_MASK_WRITE_REGISTER, FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER, MAX_DATA_LEN, MAX_READ_COILS,
    MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
use crate::error::{ModbusError, ModbusResult};
use crate::message::{Message, SlaveId};

/// Payload builder - fluent API
#[derive(Debug, Default)]
pub struct PayloadBuilder {
    data: Vec<u8>,
}

impl PayloadBuilder {
    /// Create a new builder
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a byte
    #[inline]
    pub fn byte(mut self, b: u8) -> ModbusResult<Self> {
        self.reserve(1)?;
        self.data.push(b);
        Ok(self)
    }

    /// Add a 16-bit value, MSB first (addresses, quantities, register values)
    #[inline]
    pub fn word(mut self, value: u16) -> ModbusResult<Self> {
        self.reserve(2)?;
        self.data.extend_from_slice(&value.to_be_bytes());
        Ok(self)
    }

    /// Add raw data
    #[inline]
    pub fn data(mut self, data: &[u8]) -> ModbusResult<Self> {
        self.reserve(data.len())?;
        self.data.extend_from_slice(data);
        Ok(self)
    }

    fn reserve(&self, extra: usize) -> ModbusResult<()> {
        if self.data.len() + extra > MAX_DATA_LEN {
            return Err(ModbusError::invalid_data(format!(
                "Payload would exceed max size: {} + {} > {}",
                self.data.len(),
                extra,
                MAX_DATA_LEN
            )));
        }
        Ok(())
    }

    /// Finish and return the payload bytes
    #[inline]
    pub fn build(self) -> Vec<u8> {
        self.data
    }

    /// Finish into a message for `address` and `function`
    pub fn into_message(self, address: SlaveId, function: u8) -> Message {
        debug!(
            "Payload built: slave={}, FC={:02X} ({}), len={}",
            address,
            function,
            Message::function_code_description(function),
            self.data.len()
        );
        Message::new(address, function, self.data)
    }

    /// Build a read request for FC01-04
    ///
    /// # Arguments
    /// * `slave_id` - Target slave address
    /// * `fc` - Function code (1, 2, 3, or 4)
    /// * `start_address` - Starting address for the read operation
    /// * `quantity` - Number of coils (FC01/02) or registers (FC03/04) to read
    pub fn build_read_request(
        slave_id: SlaveId,
        fc: u8,
        start_address: u16,
        quantity: u16,
    ) -> ModbusResult<Message> {
        let limit = match fc {
            0x01 | 0x02 => MAX_READ_COILS,
            0x03 | 0x04 => MAX_READ_REGISTERS,
            _ => return Err(ModbusError::invalid_function(fc)),
        };
        if quantity == 0 || quantity as usize > limit {
            return Err(ModbusError::invalid_data(format!(
                "Invalid quantity {} (1-{})",
                quantity, limit
            )));
        }
        Ok(PayloadBuilder::new()
            .word(start_address)?
            .word(quantity)?
            .into_message(slave_id, fc))
    }

    /// Build a write single coil request (FC05)
    pub fn build_write_single_coil(
        slave_id: SlaveId,
        address: u16,
        value: bool,
    ) -> ModbusResult<Message> {
        let coil_value: u16 = if value { 0xFF00 } else { 0x0000 };
        Ok(PayloadBuilder::new()
            .word(address)?
            .word(coil_value)?
            .into_message(slave_id, FC_WRITE_SINGLE_COIL))
    }

    /// Build a write single register request (FC06)
    pub fn build_write_single_register(
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> ModbusResult<Message> {
        Ok(PayloadBuilder::new()
            .word(address)?
            .word(value)?
            .into_message(slave_id, FC_WRITE_SINGLE_REGISTER))
    }

    /// Build a write multiple coils request (FC15)
    pub fn build_write_multiple_coils(
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> ModbusResult<Message> {
        if values.is_empty() || values.len() > MAX_WRITE_COILS {
            return Err(ModbusError::invalid_data("Invalid quantity"));
        }
        let coil_bytes = pack_bits(values);

        Ok(PayloadBuilder::new()
            .word(address)?
            .word(values.len() as u16)?
            .byte(coil_bytes.len() as u8)?
            .data(&coil_bytes)?
            .into_message(slave_id, FC_WRITE_MULTIPLE_COILS))
    }

    /// Build a write multiple registers request (FC16)
    pub fn build_write_multiple_registers(
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> ModbusResult<Message> {
        if values.is_empty() || values.len() > MAX_WRITE_REGISTERS {
            return Err(ModbusError::invalid_data("Invalid quantity"));
        }

        Ok(PayloadBuilder::new()
            .word(address)?
            .word(values.len() as u16)?
            .byte((values.len() * 2) as u8)?
            .data(&words_to_bytes(values))?
            .into_message(slave_id, FC_WRITE_MULTIPLE_REGISTERS))
    }

    /// Build a mask write register request (FC22)
    pub fn build_mask_write_register(
        slave_id: SlaveId,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> ModbusResult<Message> {
        Ok(PayloadBuilder::new()
            .word(address)?
            .word(and_mask)?
            .word(or_mask)?
            .into_message(slave_id, FC_MASK_WRITE_REGISTER))
    }
}

/// Read a big-endian u16 at `offset`
#[inline]
pub fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Pack bits into bytes, LSB first within each byte
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpack `count` bits from packed bytes, LSB first within each byte
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| bytes.get(i / 8).is_some_and(|b| (b >> (i % 8)) & 0x01 != 0))
        .collect()
}

/// Encode words MSB first
pub fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

/// Decode MSB-first words; the byte length must be even
pub fn bytes_to_words(bytes: &[u8]) -> ModbusResult<Vec<u16>> {
    if bytes.len() % 2 != 0 {
        return Err(ModbusError::protocol(format!(
            "Odd register byte length: {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

/// Parse a byte-count-prefixed bit response (FC01/FC02), keeping `quantity` bits
pub fn parse_bits_response(data: &[u8], quantity: usize) -> ModbusResult<Vec<bool>> {
    let payload = counted_payload(data)?;
    if payload.len() * 8 < quantity {
        return Err(ModbusError::protocol(format!(
            "Bit response too short: {} bytes for {} bits",
            payload.len(),
            quantity
        )));
    }
    Ok(unpack_bits(payload, quantity))
}

/// Parse a byte-count-prefixed register response (FC03/FC04)
pub fn parse_registers_response(data: &[u8]) -> ModbusResult<Vec<u16>> {
    bytes_to_words(counted_payload(data)?)
}

fn counted_payload(data: &[u8]) -> ModbusResult<&[u8]> {
    let (&count, rest) = data
        .split_first()
        .ok_or_else(|| ModbusError::protocol("Empty read response"))?;
    if rest.len() != count as usize {
        return Err(ModbusError::protocol(format!(
            "Byte count mismatch: header says {}, payload has {}",
            count,
            rest.len()
        )));
    }
    Ok(rest)
}
