//! Slave register state
//!
//! The slave never owns register data. An external [`StateProvider`] hands it
//! snapshots shaped like
//!
//! ```json
//! {
//!     "coil":     { "0": [1, 0, 0, 1], "a0": [0, 0, 0, 0] },
//!     "discrete": { "f0": [0, 0] },
//!     "holding":  { "a000": [255, 128, 7, 4] },
//!     "input":    { "e4b2": [65535] }
//! }
//! ```
//!
//! Each element maps a starting address (lowercase hex, no leading zeros) to
//! consecutive values. Elements never overlap, and a request must fit inside a
//! single element. Writes produce a sparse delta of the same shape which is
//! handed back through [`StateProvider::set_write`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::payload::{pack_bits, read_u16, words_to_bytes};

/// Starting address (hex string) → consecutive values
pub type RegisterTable = BTreeMap<String, Vec<u16>>;

/// The four Modbus register classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    /// Writable bit
    Coil,
    /// Read-only bit
    Discrete,
    /// Writable word
    Holding,
    /// Read-only word
    Input,
}

impl RegisterClass {
    pub fn key(self) -> &'static str {
        match self {
            Self::Coil => "coil",
            Self::Discrete => "discrete",
            Self::Holding => "holding",
            Self::Input => "input",
        }
    }
}

impl fmt::Display for RegisterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Register state document, also used for sparse deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModbusState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coil: Option<RegisterTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discrete: Option<RegisterTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holding: Option<RegisterTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<RegisterTable>,
}

impl ModbusState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a state document from JSON
    pub fn from_json(text: &str) -> crate::ModbusResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> crate::ModbusResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Add (or replace) an element at `address`, returning `self` for chaining
    pub fn with_element(mut self, class: RegisterClass, address: u16, values: Vec<u16>) -> Self {
        self.table_mut(class).insert(normalize_address(address), values);
        self
    }

    pub fn table(&self, class: RegisterClass) -> Option<&RegisterTable> {
        match class {
            RegisterClass::Coil => self.coil.as_ref(),
            RegisterClass::Discrete => self.discrete.as_ref(),
            RegisterClass::Holding => self.holding.as_ref(),
            RegisterClass::Input => self.input.as_ref(),
        }
    }

    pub fn table_mut(&mut self, class: RegisterClass) -> &mut RegisterTable {
        let slot = match class {
            RegisterClass::Coil => &mut self.coil,
            RegisterClass::Discrete => &mut self.discrete,
            RegisterClass::Holding => &mut self.holding,
            RegisterClass::Input => &mut self.input,
        };
        slot.get_or_insert_with(RegisterTable::new)
    }

    /// Replace every element named in `delta`
    pub fn apply(&mut self, delta: &ModbusState) {
        for class in [
            RegisterClass::Coil,
            RegisterClass::Discrete,
            RegisterClass::Holding,
            RegisterClass::Input,
        ] {
            if let Some(changes) = delta.table(class) {
                let table = self.table_mut(class);
                for (key, values) in changes {
                    table.insert(key.clone(), values.clone());
                }
            }
        }
    }

    /// Delta holding one changed element
    pub fn delta(class: RegisterClass, key: &str, values: Vec<u16>) -> Self {
        let mut delta = Self::default();
        delta.table_mut(class).insert(key.to_string(), values);
        delta
    }
}

/// Format an address the way state keys are written: lowercase hex, no leading zeros
pub fn normalize_address(address: u16) -> String {
    format!("{:x}", address)
}

/// External owner of the slave's register data.
///
/// Both getters are called fresh on every request; `set_write` receives only
/// the changed elements. The implementation owns locking and consistency.
pub trait StateProvider: Send + Sync {
    /// Readable state (`coil`, `discrete`, `holding`, `input`)
    fn get_read(&self) -> Option<ModbusState>;

    /// Writable state (`coil`, `holding`); must not be modified by this call
    fn get_write(&self) -> Option<ModbusState>;

    /// Apply a sparse update to the writable state
    fn set_write(&self, delta: ModbusState);
}

/// An element located for a request: its key, values and the request offset
#[derive(Debug, Clone, Copy)]
pub struct Element<'a> {
    pub key: &'a str,
    pub values: &'a [u16],
    pub offset: usize,
}

/// Find the element that fully contains `[address, address + len)`.
///
/// `len` must be non-zero.
pub fn locate(table: &RegisterTable, address: u16, len: usize) -> Option<Element<'_>> {
    if len == 0 {
        return None;
    }
    let address = address as usize;
    for (key, values) in table {
        let start = match u16::from_str_radix(key, 16) {
            Ok(start) => start as usize,
            Err(_) => {
                warn!("Skipping state element with invalid address key '{}'", key);
                continue;
            }
        };
        let end = start + values.len();
        if address >= start && address < end && address + len <= end {
            debug!("Found element {} for address {}, len {}", key, address, len);
            return Some(Element {
                key,
                values,
                offset: address - start,
            });
        }
    }
    debug!("Element for address {}, len {} not found", address, len);
    None
}

/// Read registers as a response payload: byte count + MSB-first words.
///
/// `None` when no element holds the range or the byte count would not fit
/// in one byte.
pub fn read_registers(table: &RegisterTable, address: u16, quantity: usize) -> Option<Vec<u8>> {
    let byte_count = u8::try_from(quantity.checked_mul(2)?).ok()?;
    let el = locate(table, address, quantity)?;
    let words = &el.values[el.offset..el.offset + quantity];
    let mut payload = Vec::with_capacity(1 + byte_count as usize);
    payload.push(byte_count);
    payload.extend(words_to_bytes(words));
    Some(payload)
}

/// Read bits as a response payload: byte count + packed bits.
///
/// `None` when no element holds the range or the byte count would not fit
/// in one byte.
pub fn read_bits(table: &RegisterTable, address: u16, quantity: usize) -> Option<Vec<u8>> {
    let byte_count = u8::try_from(quantity.div_ceil(8)).ok()?;
    let el = locate(table, address, quantity)?;
    let bits: Vec<bool> = el.values[el.offset..el.offset + quantity]
        .iter()
        .map(|&v| v > 0)
        .collect();
    let packed = pack_bits(&bits);
    let mut payload = Vec::with_capacity(1 + packed.len());
    payload.push(byte_count);
    payload.extend(packed);
    Some(payload)
}

/// Splice MSB-first register bytes into the containing element.
///
/// Returns the element key and its full replacement values.
pub fn write_registers(
    table: &RegisterTable,
    address: u16,
    new_data: &[u8],
) -> Option<(String, Vec<u16>)> {
    if new_data.len() % 2 != 0 {
        return None;
    }
    let el = locate(table, address, new_data.len() / 2)?;
    let mut values = el.values.to_vec();
    for (i, chunk) in new_data.chunks_exact(2).enumerate() {
        values[el.offset + i] = u16::from_be_bytes([chunk[0], chunk[1]]);
    }
    Some((el.key.to_string(), values))
}

/// Splice `count` packed bits into the containing element.
pub fn write_bits(
    table: &RegisterTable,
    address: u16,
    packed: &[u8],
    count: usize,
) -> Option<(String, Vec<u16>)> {
    if packed.len() * 8 < count {
        return None;
    }
    let el = locate(table, address, count)?;
    let mut values = el.values.to_vec();
    for i in 0..count {
        values[el.offset + i] = u16::from((packed[i / 8] >> (i % 8)) & 0x01);
    }
    Some((el.key.to_string(), values))
}

/// Mask write one register: `(current & and) | (or & !and)`.
///
/// `masks` holds the MSB-first AND mask followed by the OR mask.
pub fn mask_write_register(
    table: &RegisterTable,
    address: u16,
    masks: &[u8],
) -> Option<(String, Vec<u16>)> {
    let and_mask = read_u16(masks, 0)?;
    let or_mask = read_u16(masks, 2)?;
    let el = locate(table, address, 1)?;
    let mut values = el.values.to_vec();
    let current = values[el.offset];
    values[el.offset] = (current & and_mask) | (or_mask & !and_mask);
    Some((el.key.to_string(), values))
}

/// In-memory [`StateProvider`].
///
/// Created with [`InMemoryState::new`] it keeps separate readable and
/// writable documents (writes do not show up in reads). Created with
/// [`InMemoryState::shared`] both views are one document.
#[derive(Debug, Default)]
pub struct InMemoryState {
    readable: RwLock<ModbusState>,
    writable: RwLock<ModbusState>,
    shared: bool,
}

impl InMemoryState {
    pub fn new(readable: ModbusState, writable: ModbusState) -> Self {
        Self {
            readable: RwLock::new(readable),
            writable: RwLock::new(writable),
            shared: false,
        }
    }

    pub fn shared(state: ModbusState) -> Self {
        Self {
            readable: RwLock::new(state),
            writable: RwLock::new(ModbusState::default()),
            shared: true,
        }
    }

    fn write_doc(&self) -> &RwLock<ModbusState> {
        if self.shared {
            &self.readable
        } else {
            &self.writable
        }
    }

    /// Snapshot of the readable document
    pub fn readable(&self) -> ModbusState {
        self.readable.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Snapshot of the writable document
    pub fn writable(&self) -> ModbusState {
        self.write_doc()
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

impl StateProvider for InMemoryState {
    fn get_read(&self) -> Option<ModbusState> {
        self.readable.read().ok().map(|s| s.clone())
    }

    fn get_write(&self) -> Option<ModbusState> {
        self.write_doc().read().ok().map(|s| s.clone())
    }

    fn set_write(&self, delta: ModbusState) {
        match self.write_doc().write() {
            Ok(mut state) => state.apply(&delta),
            Err(_) => warn!("State lock poisoned, delta dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holding() -> RegisterTable {
        let mut table = RegisterTable::new();
        table.insert("a0".to_string(), vec![1, 2, 3, 4]);
        table.insert("10".to_string(), vec![0xFFFF]);
        table
    }

    #[test]
    fn test_locate_contained() {
        let table = holding();
        let el = locate(&table, 0xA1, 3).unwrap();
        assert_eq!(el.key, "a0");
        assert_eq!(el.offset, 1);
    }

    #[test]
    fn test_locate_rejects_overrun_and_gaps() {
        let table = holding();
        assert!(locate(&table, 0xA2, 3).is_none());
        assert!(locate(&table, 0x9F, 1).is_none());
        assert!(locate(&table, 0xA0, 0).is_none());
        // Split across two elements is never served
        assert!(locate(&table, 0x10, 2).is_none());
    }

    #[test]
    fn test_locate_accepts_uppercase_keys() {
        let mut table = RegisterTable::new();
        table.insert("A000".to_string(), vec![7]);
        table.insert("zz".to_string(), vec![1]);
        assert_eq!(locate(&table, 0xA000, 1).unwrap().key, "A000");
    }

    #[test]
    fn test_read_registers_payload() {
        let table = holding();
        assert_eq!(read_registers(&table, 0xA0, 2), Some(vec![4, 0, 1, 0, 2]));
        assert_eq!(read_registers(&table, 0x10, 1), Some(vec![2, 0xFF, 0xFF]));
        assert_eq!(read_registers(&table, 0x11, 1), None);
    }

    #[test]
    fn test_read_bits_payload() {
        let mut table = RegisterTable::new();
        table.insert("0".to_string(), vec![1, 0, 0, 1, 0, 0, 0, 0, 5]);
        assert_eq!(read_bits(&table, 0, 9), Some(vec![2, 0x09, 0x01]));
        assert_eq!(read_bits(&table, 3, 1), Some(vec![1, 0x01]));
    }

    #[test]
    fn test_reads_reject_byte_count_overflow() {
        let mut table = RegisterTable::new();
        table.insert("0".to_string(), vec![1; 4096]);

        assert_eq!(read_registers(&table, 0, 127).map(|p| p[0]), Some(254));
        assert_eq!(read_registers(&table, 0, 128), None);
        assert_eq!(read_bits(&table, 0, 2040).map(|p| p[0]), Some(255));
        assert_eq!(read_bits(&table, 0, 2041), None);
    }

    #[test]
    fn test_write_registers_delta() {
        let table = holding();
        let (key, values) = write_registers(&table, 0xA0, &[0x00, 0xFF]).unwrap();
        assert_eq!(key, "a0");
        assert_eq!(values, vec![255, 2, 3, 4]);

        let (_, values) = write_registers(&table, 0xA2, &[0x12, 0x34, 0x56, 0x78]).unwrap();
        assert_eq!(values, vec![1, 2, 0x1234, 0x5678]);

        assert!(write_registers(&table, 0xA3, &[0, 1, 0, 2]).is_none());
        assert!(write_registers(&table, 0xA0, &[0, 1, 0]).is_none());
    }

    #[test]
    fn test_write_bits_delta() {
        let mut table = RegisterTable::new();
        table.insert("0".to_string(), vec![0; 10]);
        let (_, values) = write_bits(&table, 1, &[0xCD, 0x01], 9).unwrap();
        assert_eq!(values, vec![0, 1, 0, 1, 1, 0, 0, 1, 1, 1]);
        assert!(write_bits(&table, 0, &[0xFF], 9).is_none());
    }

    #[test]
    fn test_mask_write_register() {
        let mut table = RegisterTable::new();
        table.insert("4".to_string(), vec![0x0012]);
        let (_, values) =
            mask_write_register(&table, 4, &[0x00, 0xF2, 0x00, 0x25]).unwrap();
        assert_eq!(values, vec![0x0017]);
    }

    #[test]
    fn test_state_json_shape() {
        let state = ModbusState::from_json(r#"{"holding": {"a0": [1, 2, 3, 4]}}"#).unwrap();
        assert!(state.coil.is_none());
        assert_eq!(state.table(RegisterClass::Holding).unwrap()["a0"], vec![1, 2, 3, 4]);
        assert_eq!(state.to_json().unwrap(), r#"{"holding":{"a0":[1,2,3,4]}}"#);
    }

    #[test]
    fn test_apply_delta() {
        let mut state = ModbusState::new()
            .with_element(RegisterClass::Holding, 0xA0, vec![1, 2, 3, 4])
            .with_element(RegisterClass::Coil, 0, vec![0, 0]);
        state.apply(&ModbusState::delta(RegisterClass::Holding, "a0", vec![9, 9, 9, 9]));
        assert_eq!(state.holding.as_ref().unwrap()["a0"], vec![9, 9, 9, 9]);
        assert_eq!(state.coil.as_ref().unwrap()["0"], vec![0, 0]);
    }

    #[test]
    fn test_in_memory_separate_documents() {
        let read = ModbusState::new().with_element(RegisterClass::Holding, 0, vec![1]);
        let write = ModbusState::new().with_element(RegisterClass::Holding, 0, vec![1]);
        let provider = InMemoryState::new(read, write);

        provider.set_write(ModbusState::delta(RegisterClass::Holding, "0", vec![5]));
        assert_eq!(provider.writable().holding.unwrap()["0"], vec![5]);
        assert_eq!(provider.readable().holding.unwrap()["0"], vec![1]);
    }

    #[test]
    fn test_in_memory_shared_document() {
        let state = ModbusState::new().with_element(RegisterClass::Holding, 0, vec![1]);
        let provider = InMemoryState::shared(state);

        provider.set_write(ModbusState::delta(RegisterClass::Holding, "0", vec![5]));
        assert_eq!(provider.get_read().unwrap().holding.unwrap()["0"], vec![5]);
    }
}
