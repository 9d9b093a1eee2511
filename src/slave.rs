//! Modbus slave (server) role
//!
//! ```text
//! WAIT ──► address matches? ──► DISPATCH ──► RESPOND ──► WAIT
//!               │ no
//!               └──────────────────────────────────────► WAIT
//! ```
//!
//! Register data lives behind a [`StateProvider`]. Each request reads a fresh
//! snapshot; writes hand a delta back to the provider before the request is
//! echoed.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{error, info, warn};

use crate::constants::{
    FC_MASK_WRITE_REGISTER, FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS,
    FC_READ_INPUT_REGISTERS, FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER, MAX_READ_COILS, MAX_READ_REGISTERS,
    MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
use crate::error::{ModbusError, ModbusResult};
use crate::framer::StopHandle;
use crate::link::{ModbusLink, RoleHandle};
use crate::message::{ExceptionCode, Message, SlaveId};
use crate::payload::read_u16;
use crate::state::{self, ModbusState, RegisterClass, RegisterTable, StateProvider};

type Dispatch = Result<Vec<u8>, ExceptionCode>;

/// Request dispatcher for one slave address.
///
/// Independent of any link, so it can be driven directly.
pub struct SlaveHandler {
    address: SlaveId,
    provider: Arc<dyn StateProvider>,
}

impl SlaveHandler {
    pub fn new(address: SlaveId, provider: Arc<dyn StateProvider>) -> Self {
        Self { address, provider }
    }

    pub fn address(&self) -> SlaveId {
        self.address
    }

    /// Answer `request`, or `None` when it is addressed to another slave.
    pub fn respond_to(&self, request: &Message) -> Option<Message> {
        if request.address != self.address {
            info!(
                "Ignoring request for slave {} (this is slave {})",
                request.address, self.address
            );
            return None;
        }
        Some(self.handle_request(request))
    }

    /// Dispatch a request addressed to this slave and build the response.
    pub fn handle_request(&self, request: &Message) -> Message {
        info!("Handling request: {}", request);
        match self.dispatch(request) {
            Ok(data) => Message::new(self.address, request.function, data),
            Err(code) => {
                info!(
                    "Exception {:?} for function 0x{:02X}",
                    code, request.function
                );
                Message::exception(self.address, request.function, code)
            }
        }
    }

    fn dispatch(&self, request: &Message) -> Dispatch {
        let data = request.data.as_slice();
        match request.function {
            FC_READ_COILS => self.read(RegisterClass::Coil, data),
            FC_READ_DISCRETE_INPUTS => self.read(RegisterClass::Discrete, data),
            FC_READ_HOLDING_REGISTERS => self.read(RegisterClass::Holding, data),
            FC_READ_INPUT_REGISTERS => self.read(RegisterClass::Input, data),
            FC_WRITE_SINGLE_COIL => self.write_single_coil(data),
            FC_WRITE_SINGLE_REGISTER => self.write_single_register(data),
            FC_WRITE_MULTIPLE_COILS => self.write_multiple_coils(data),
            FC_WRITE_MULTIPLE_REGISTERS => self.write_multiple_registers(data),
            FC_MASK_WRITE_REGISTER => self.mask_write_register(data),
            other => {
                info!("Unsupported function 0x{:02X}", other);
                Err(ExceptionCode::IllegalFunction)
            }
        }
    }

    fn read(&self, class: RegisterClass, data: &[u8]) -> Dispatch {
        let (address, quantity) = address_and_word(data, 4)?;
        let limit = match class {
            RegisterClass::Coil | RegisterClass::Discrete => MAX_READ_COILS,
            RegisterClass::Holding | RegisterClass::Input => MAX_READ_REGISTERS,
        };
        check_quantity(quantity, limit)?;

        let snapshot = self.snapshot(self.provider.get_read(), "read")?;
        let table = class_table(&snapshot, class)?;
        let payload = match class {
            RegisterClass::Coil | RegisterClass::Discrete => {
                state::read_bits(table, address, quantity as usize)
            }
            RegisterClass::Holding | RegisterClass::Input => {
                state::read_registers(table, address, quantity as usize)
            }
        };
        payload.ok_or(ExceptionCode::IllegalDataAddress)
    }

    fn write_single_coil(&self, data: &[u8]) -> Dispatch {
        let (address, _) = address_and_word(data, 4)?;
        let bit = data[2] & 0x01;
        self.commit(RegisterClass::Coil, |table| {
            state::write_bits(table, address, &[bit], 1)
        })?;
        Ok(data.to_vec())
    }

    fn write_single_register(&self, data: &[u8]) -> Dispatch {
        let (address, _) = address_and_word(data, 4)?;
        self.commit(RegisterClass::Holding, |table| {
            state::write_registers(table, address, &data[2..4])
        })?;
        Ok(data.to_vec())
    }

    fn write_multiple_coils(&self, data: &[u8]) -> Dispatch {
        let (address, quantity, values) = multiple_write(data)?;
        check_quantity(quantity, MAX_WRITE_COILS)?;
        if values.len() < (quantity as usize).div_ceil(8) {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        self.commit(RegisterClass::Coil, |table| {
            state::write_bits(table, address, values, quantity as usize)
        })?;
        Ok(data[..4].to_vec())
    }

    fn write_multiple_registers(&self, data: &[u8]) -> Dispatch {
        let (address, quantity, values) = multiple_write(data)?;
        check_quantity(quantity, MAX_WRITE_REGISTERS)?;
        if values.len() != quantity as usize * 2 {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        self.commit(RegisterClass::Holding, |table| {
            state::write_registers(table, address, values)
        })?;
        Ok(data[..4].to_vec())
    }

    fn mask_write_register(&self, data: &[u8]) -> Dispatch {
        let (address, _) = address_and_word(data, 6)?;
        self.commit(RegisterClass::Holding, |table| {
            state::mask_write_register(table, address, &data[2..6])
        })?;
        Ok(data.to_vec())
    }

    /// Compute a delta against the writable snapshot and hand it to the provider
    fn commit<F>(&self, class: RegisterClass, splice: F) -> Result<(), ExceptionCode>
    where
        F: FnOnce(&RegisterTable) -> Option<(String, Vec<u16>)>,
    {
        let snapshot = self.snapshot(self.provider.get_write(), "write")?;
        let table = class_table(&snapshot, class)?;
        let (key, values) = splice(table).ok_or(ExceptionCode::IllegalDataAddress)?;
        self.provider
            .set_write(ModbusState::delta(class, &key, values));
        Ok(())
    }

    fn snapshot(&self, state: Option<ModbusState>, kind: &str) -> Result<ModbusState, ExceptionCode> {
        state.ok_or_else(|| {
            warn!("No {} state available for slave {}", kind, self.address);
            ExceptionCode::IllegalDataAddress
        })
    }
}

fn class_table(state: &ModbusState, class: RegisterClass) -> Result<&RegisterTable, ExceptionCode> {
    state.table(class).ok_or_else(|| {
        warn!("State has no '{}' registers", class);
        ExceptionCode::IllegalDataAddress
    })
}

/// Address and second word of a fixed-length payload
fn address_and_word(data: &[u8], expected_len: usize) -> Result<(u16, u16), ExceptionCode> {
    if data.len() != expected_len {
        return Err(ExceptionCode::IllegalFunction);
    }
    match (read_u16(data, 0), read_u16(data, 2)) {
        (Some(address), Some(word)) => Ok((address, word)),
        _ => Err(ExceptionCode::IllegalFunction),
    }
}

/// Address, quantity and values of a write-multiple payload
fn multiple_write(data: &[u8]) -> Result<(u16, u16, &[u8]), ExceptionCode> {
    if data.len() < 5 {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    let (address, quantity) = match (read_u16(data, 0), read_u16(data, 2)) {
        (Some(address), Some(quantity)) => (address, quantity),
        _ => return Err(ExceptionCode::IllegalDataAddress),
    };
    let values = &data[5..];
    if data[4] as usize != values.len() {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok((address, quantity, values))
}

fn check_quantity(quantity: u16, limit: usize) -> Result<(), ExceptionCode> {
    if quantity == 0 || quantity as usize > limit {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(())
}

/// Serial Modbus slave over one link.
pub struct ModbusSlave<T> {
    link: ModbusLink<T>,
    handler: SlaveHandler,
}

impl<T> ModbusSlave<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(link: ModbusLink<T>, address: SlaveId, provider: Arc<dyn StateProvider>) -> Self {
        Self {
            link,
            handler: SlaveHandler::new(address, provider),
        }
    }

    pub fn handler(&self) -> &SlaveHandler {
        &self.handler
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.link.stop_handle()
    }

    /// Start the link and serve requests until stopped.
    ///
    /// Returns `Ok(())` when stopped through a [`StopHandle`], or the
    /// transport fault that ended the link.
    pub async fn run(&mut self) -> ModbusResult<()> {
        self.link.start()?;
        info!(
            "Modbus slave {} listening ({})",
            self.handler.address, self.link.mode()
        );

        let result = self.serve().await;
        let stopped = self.link.stop().await;
        match result {
            Err(ModbusError::Stopped) => {
                info!("Modbus slave {} stopped", self.handler.address);
                stopped
            }
            Err(e) => {
                error!("Modbus slave {} failed: {}", self.handler.address, e);
                Err(e)
            }
            Ok(()) => stopped,
        }
    }

    async fn serve(&mut self) -> ModbusResult<()> {
        loop {
            let Some(messages) = self.link.await_messages(None).await? else {
                continue;
            };
            // One request per bus turn
            let Some(request) = messages.into_iter().next() else {
                continue;
            };
            if let Some(response) = self.handler.respond_to(&request) {
                self.link.send_message(&response).await?;
            }
        }
    }

    /// Run the slave on its own task
    pub fn spawn(mut self) -> RoleHandle<()> {
        let stop = self.stop_handle();
        let join = tokio::spawn(async move { self.run().await });
        RoleHandle::new(stop, join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryState;

    fn provider() -> Arc<InMemoryState> {
        let read = ModbusState::new()
            .with_element(RegisterClass::Holding, 0xA0, vec![1, 2, 3, 4])
            .with_element(RegisterClass::Input, 0x10, vec![0xFFFF, 0x0102])
            .with_element(RegisterClass::Coil, 0, vec![1, 0, 0, 1, 0, 0, 0, 0, 1])
            .with_element(RegisterClass::Discrete, 0x20, vec![0, 1]);
        let write = ModbusState::new()
            .with_element(RegisterClass::Holding, 0xA0, vec![1, 2, 3, 4])
            .with_element(RegisterClass::Coil, 0, vec![0; 10]);
        Arc::new(InMemoryState::new(read, write))
    }

    fn handler(provider: Arc<InMemoryState>) -> SlaveHandler {
        SlaveHandler::new(1, provider)
    }

    #[test]
    fn test_read_holding_registers() {
        let slave = handler(provider());
        let response = slave.handle_request(&Message::new(1, 0x03, vec![0x00, 0xA0, 0x00, 0x02]));
        assert_eq!(response, Message::new(1, 0x03, vec![4, 0, 1, 0, 2]));
    }

    #[test]
    fn test_read_input_registers() {
        let slave = handler(provider());
        let response = slave.handle_request(&Message::new(1, 0x04, vec![0x00, 0x10, 0x00, 0x02]));
        assert_eq!(response.data, vec![4, 0xFF, 0xFF, 0x01, 0x02]);
    }

    #[test]
    fn test_read_coils_and_discrete() {
        let slave = handler(provider());
        let coils = slave.handle_request(&Message::new(1, 0x01, vec![0, 0, 0, 9]));
        assert_eq!(coils.data, vec![2, 0x09, 0x01]);

        let discrete = slave.handle_request(&Message::new(1, 0x02, vec![0, 0x20, 0, 2]));
        assert_eq!(discrete.data, vec![1, 0x02]);
    }

    #[test]
    fn test_read_outside_elements() {
        let slave = handler(provider());
        let response = slave.handle_request(&Message::new(1, 0x03, vec![0x00, 0xA3, 0x00, 0x02]));
        assert_eq!(response, Message::new(1, 0x83, vec![2]));

        let response = slave.handle_request(&Message::new(1, 0x03, vec![0x01, 0x00, 0x00, 0x01]));
        assert_eq!(response, Message::new(1, 0x83, vec![2]));
    }

    #[test]
    fn test_unknown_function() {
        let slave = handler(provider());
        let response = slave.handle_request(&Message::new(1, 0x2B, vec![0x0E, 0x01, 0x00]));
        assert_eq!(response, Message::new(1, 0xAB, vec![1]));
    }

    #[test]
    fn test_wrong_payload_length_is_illegal_function() {
        let slave = handler(provider());
        let response = slave.handle_request(&Message::new(1, 0x03, vec![0x00, 0xA0, 0x00]));
        assert_eq!(response, Message::new(1, 0x83, vec![1]));

        let response = slave.handle_request(&Message::new(1, 0x16, vec![0, 0xA0, 0, 0]));
        assert_eq!(response, Message::new(1, 0x96, vec![1]));
    }

    #[test]
    fn test_quantity_limits() {
        let slave = handler(provider());
        let zero = slave.handle_request(&Message::new(1, 0x03, vec![0x00, 0xA0, 0x00, 0x00]));
        assert_eq!(zero.data, vec![2]);
        let too_many = slave.handle_request(&Message::new(1, 0x03, vec![0x00, 0x00, 0x00, 126]));
        assert_eq!(too_many.data, vec![2]);
    }

    #[test]
    fn test_write_single_register_delta_and_echo() {
        let state = provider();
        let slave = handler(state.clone());
        let request = Message::new(1, 0x06, vec![0x00, 0xA0, 0x00, 0xFF]);

        assert_eq!(slave.handle_request(&request), request);
        assert_eq!(state.writable().holding.unwrap()["a0"], vec![255, 2, 3, 4]);
        // Reads come from the separate readable document
        assert_eq!(state.readable().holding.unwrap()["a0"], vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_write_single_coil_uses_high_byte() {
        let state = provider();
        let slave = handler(state.clone());

        let on = Message::new(1, 0x05, vec![0x00, 0x03, 0xFF, 0x00]);
        assert_eq!(slave.handle_request(&on), on);
        assert_eq!(state.writable().coil.unwrap()["0"][3], 1);

        let off = Message::new(1, 0x05, vec![0x00, 0x03, 0x00, 0x00]);
        assert_eq!(slave.handle_request(&off), off);
        assert_eq!(state.writable().coil.unwrap()["0"][3], 0);
    }

    #[test]
    fn test_write_multiple_registers_echoes_header() {
        let state = provider();
        let slave = handler(state.clone());
        let request = Message::new(1, 0x10, vec![0x00, 0xA1, 0x00, 0x02, 4, 0x12, 0x34, 0x56, 0x78]);

        let response = slave.handle_request(&request);
        assert_eq!(response, Message::new(1, 0x10, vec![0x00, 0xA1, 0x00, 0x02]));
        assert_eq!(
            state.writable().holding.unwrap()["a0"],
            vec![1, 0x1234, 0x5678, 4]
        );
    }

    #[test]
    fn test_write_multiple_registers_bad_byte_count() {
        let slave = handler(provider());
        let request = Message::new(1, 0x10, vec![0x00, 0xA0, 0x00, 0x02, 3, 0x12, 0x34, 0x56]);
        assert_eq!(slave.handle_request(&request).data, vec![2]);

        let short = Message::new(1, 0x10, vec![0x00, 0xA0, 0x00, 0x02]);
        assert_eq!(slave.handle_request(&short).data, vec![2]);
    }

    #[test]
    fn test_write_multiple_coils() {
        let state = provider();
        let slave = handler(state.clone());
        let request = Message::new(1, 0x0F, vec![0x00, 0x01, 0x00, 0x09, 2, 0xCD, 0x01]);

        let response = slave.handle_request(&request);
        assert_eq!(response.data, vec![0x00, 0x01, 0x00, 0x09]);
        assert_eq!(
            state.writable().coil.unwrap()["0"],
            vec![0, 1, 0, 1, 1, 0, 0, 1, 1, 1]
        );
    }

    #[test]
    fn test_mask_write_register() {
        let state = provider();
        let slave = handler(state.clone());
        let request = Message::new(1, 0x16, vec![0x00, 0xA0, 0x00, 0xF2, 0x00, 0x25]);

        assert_eq!(slave.handle_request(&request), request);
        // (0x0001 & 0x00F2) | (0x0025 & !0x00F2) = 0x0005
        assert_eq!(state.writable().holding.unwrap()["a0"][0], 0x0005);
    }

    #[test]
    fn test_missing_class_is_illegal_address() {
        let state = Arc::new(InMemoryState::shared(ModbusState::new()));
        let slave = SlaveHandler::new(1, state);
        let response = slave.handle_request(&Message::new(1, 0x06, vec![0, 0, 0, 1]));
        assert_eq!(response, Message::new(1, 0x86, vec![2]));
    }

    #[test]
    fn test_other_address_ignored() {
        let slave = handler(provider());
        assert!(slave
            .respond_to(&Message::new(2, 0x03, vec![0x00, 0xA0, 0x00, 0x02]))
            .is_none());
        assert!(slave
            .respond_to(&Message::new(1, 0x03, vec![0x00, 0xA0, 0x00, 0x02]))
            .is_some());
    }
}
