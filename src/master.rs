//! Modbus master (client) role
//!
//! A master sends one request at a time and waits for the correlated response:
//! the first decoded message of a chunk whose address and function (exception
//! bit masked) match the request. Anything else on the bus is skipped, and
//! skipping never extends the wait.
//!
//! # API Naming Convention
//!
//! Like the TCP/RTU clients this crate grew from, [`ModbusClient`] offers a
//! function-code name and a semantic alias for every call:
//!
//! | Function Code | Primary Name | Semantic Alias |
//! |---------------|--------------|----------------|
//! | 0x01 | `read_01()` | `read_coils()` |
//! | 0x02 | `read_02()` | `read_discrete_inputs()` |
//! | 0x03 | `read_03()` | `read_holding_registers()` |
//! | 0x04 | `read_04()` | `read_input_registers()` |
//! | 0x05 | `write_05()` | `write_single_coil()` |
//! | 0x06 | `write_06()` | `write_single_register()` |
//! | 0x0F | `write_0f()` | `write_multiple_coils()` |
//! | 0x10 | `write_10()` | `write_multiple_registers()` |
//! | 0x16 | `write_16()` | `mask_write_register()` |
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use voltage_serial_modbus::{
//!     FrameMode, FramerConfig, ModbusClient, ModbusLink, ModbusMaster, ModbusResult,
//! };
//!
//! # async fn example(stream: tokio::io::DuplexStream) -> ModbusResult<()> {
//! let link = ModbusLink::new(stream, FrameMode::Rtu, FramerConfig::default());
//! let mut master = ModbusMaster::new(link).with_response_timeout(Duration::from_secs(2));
//! master.start()?;
//!
//! let registers = master.read_03(1, 0xA0, 4).await?;
//! println!("Registers: {:?}", registers);
//!
//! master.stop().await
//! # }
//! ```

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::constants::{
    DEFAULT_RESPONSE_TIMEOUT_MS, FC_READ_COILS, FC_READ_DISCRETE_INPUTS,
    FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
};
use crate::error::{ModbusError, ModbusResult};
use crate::framer::StopHandle;
use crate::link::ModbusLink;
use crate::message::{Message, SlaveId};
use crate::payload::{parse_bits_response, parse_registers_response, PayloadBuilder};

/// The request a master is waiting on
#[derive(Debug, Clone, Copy)]
pub struct PendingRequest {
    pub address: SlaveId,
    pub function: u8,
    deadline: Instant,
}

impl PendingRequest {
    pub fn new(request: &Message, timeout: Duration) -> Self {
        Self {
            address: request.address,
            function: request.base_function(),
            deadline: Instant::now() + timeout,
        }
    }

    /// Whether `msg` answers this request (normal or exception response)
    pub fn matches(&self, msg: &Message) -> bool {
        msg.address == self.address && msg.base_function() == self.function
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Serial Modbus master over one link.
pub struct ModbusMaster<T> {
    link: ModbusLink<T>,
    response_timeout: Duration,
}

impl<T> ModbusMaster<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(link: ModbusLink<T>) -> Self {
        Self {
            link,
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
        }
    }

    /// Set the timeout used by the [`ModbusClient`] calls
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn link(&self) -> &ModbusLink<T> {
        &self.link
    }

    pub fn start(&mut self) -> ModbusResult<()> {
        info!("Starting Modbus master ({})", self.link.mode());
        self.link.start()
    }

    pub async fn stop(&mut self) -> ModbusResult<()> {
        self.link.stop().await
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.link.stop_handle()
    }

    /// Send `request` and wait up to `timeout` for its response.
    ///
    /// Returns `Ok(None)` when nothing correlated arrives in time. The total
    /// wait never exceeds `timeout`, however many unrelated messages arrive.
    pub async fn send_and_await(
        &mut self,
        request: &Message,
        timeout: Duration,
    ) -> ModbusResult<Option<Message>> {
        let pending = PendingRequest::new(request, timeout);
        self.link.send_message(request).await?;

        loop {
            let remaining = pending.remaining();
            if remaining.is_zero() {
                break;
            }

            let Some(messages) = self.link.await_messages(Some(remaining)).await? else {
                break;
            };
            match messages.into_iter().next() {
                Some(msg) if pending.matches(&msg) => {
                    debug!("Response received: {}", msg);
                    self.link.notifier().enabled();
                    self.link.notifier().activity();
                    return Ok(Some(msg));
                }
                Some(msg) => debug!("Ignoring uncorrelated message: {}", msg),
                None => {}
            }
        }

        warn!(
            "No response from slave {} for function 0x{:02X} within {:?}",
            pending.address, pending.function, timeout
        );
        self.link.notifier().exception();
        Ok(None)
    }

    /// Send `request` with the default response timeout and require a normal
    /// response.
    pub async fn execute(&mut self, request: &Message) -> ModbusResult<Message> {
        let timeout = self.response_timeout;
        match self.send_and_await(request, timeout).await? {
            Some(response) if response.is_exception() => Err(ModbusError::exception(
                response.function,
                response.exception_code().unwrap_or(0),
            )),
            Some(response) => Ok(response),
            None => Err(ModbusError::timeout(
                format!(
                    "{} (slave {})",
                    Message::function_code_description(request.function),
                    request.address
                ),
                timeout.as_millis() as u64,
            )),
        }
    }

    async fn read_bits(
        &mut self,
        slave_id: SlaveId,
        fc: u8,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        let request = PayloadBuilder::build_read_request(slave_id, fc, address, quantity)?;
        let response = self.execute(&request).await?;
        parse_bits_response(&response.data, quantity as usize)
    }

    async fn read_registers(
        &mut self,
        slave_id: SlaveId,
        fc: u8,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        let request = PayloadBuilder::build_read_request(slave_id, fc, address, quantity)?;
        let response = self.execute(&request).await?;
        let values = parse_registers_response(&response.data)?;
        if values.len() != quantity as usize {
            return Err(ModbusError::protocol(format!(
                "Expected {} registers, got {}",
                quantity,
                values.len()
            )));
        }
        Ok(values)
    }

    /// Execute a write and check the slave echoed the first `echo_len`
    /// request bytes (address plus value, quantity or masks).
    async fn write_echoed(&mut self, request: &Message, echo_len: usize) -> ModbusResult<()> {
        let response = self.execute(request).await?;
        let expected = &request.data[..echo_len.min(request.data.len())];
        if response.data != expected {
            return Err(ModbusError::protocol(format!(
                "{} echo mismatch: sent {:02X?}, got {:02X?}",
                Message::function_code_description(request.function),
                expected,
                response.data
            )));
        }
        Ok(())
    }
}

/// Modbus client operations over a serial master.
///
/// # Protocol Limits
///
/// | Operation | Limit |
/// |-----------|-------|
/// | Read Coils (0x01) | 2000 coils |
/// | Read Discrete Inputs (0x02) | 2000 bits |
/// | Read Holding Registers (0x03) | 125 registers |
/// | Read Input Registers (0x04) | 125 registers |
/// | Write Multiple Coils (0x0F) | 1968 coils |
/// | Write Multiple Registers (0x10) | 123 registers |
pub trait ModbusClient: Send {
    /// Read coils (function code 0x01).
    ///
    /// # Arguments
    ///
    /// * `slave_id` - The Modbus slave address (1-247)
    /// * `address` - Starting coil address (0-65535)
    /// * `quantity` - Number of coils to read (1-2000)
    fn read_01(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<bool>>> + Send;

    /// Read discrete inputs (function code 0x02).
    fn read_02(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<bool>>> + Send;

    /// Read holding registers (function code 0x03).
    ///
    /// # Arguments
    ///
    /// * `slave_id` - The Modbus slave address (1-247)
    /// * `address` - Starting register address (0-65535)
    /// * `quantity` - Number of registers to read (1-125)
    fn read_03(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Read input registers (function code 0x04).
    fn read_04(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Write single coil (function code 0x05).
    fn write_05(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: bool,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    /// Write single register (function code 0x06).
    fn write_06(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    /// Write multiple coils (function code 0x0F).
    fn write_0f(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    /// Write multiple registers (function code 0x10).
    fn write_10(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    /// Mask write register (function code 0x16).
    ///
    /// The slave stores `(current & and_mask) | (or_mask & !and_mask)`.
    fn write_16(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    // ===== Semantic name aliases (for readability) =====

    /// Alias for `read_01` - Read coils
    #[inline]
    fn read_coils(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<bool>>> + Send {
        self.read_01(slave_id, address, quantity)
    }

    /// Alias for `read_02` - Read discrete inputs
    #[inline]
    fn read_discrete_inputs(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<bool>>> + Send {
        self.read_02(slave_id, address, quantity)
    }

    /// Alias for `read_03` - Read holding registers
    #[inline]
    fn read_holding_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_03(slave_id, address, quantity)
    }

    /// Alias for `read_04` - Read input registers
    #[inline]
    fn read_input_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_04(slave_id, address, quantity)
    }

    /// Alias for `write_05` - Write single coil
    #[inline]
    fn write_single_coil(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: bool,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        self.write_05(slave_id, address, value)
    }

    /// Alias for `write_06` - Write single register
    #[inline]
    fn write_single_register(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        self.write_06(slave_id, address, value)
    }

    /// Alias for `write_0f` - Write multiple coils
    #[inline]
    fn write_multiple_coils(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        self.write_0f(slave_id, address, values)
    }

    /// Alias for `write_10` - Write multiple registers
    #[inline]
    fn write_multiple_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        self.write_10(slave_id, address, values)
    }

    /// Alias for `write_16` - Mask write register
    #[inline]
    fn mask_write_register(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        self.write_16(slave_id, address, and_mask, or_mask)
    }
}

impl<T> ModbusClient for ModbusMaster<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn read_01(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        self.read_bits(slave_id, FC_READ_COILS, address, quantity).await
    }

    async fn read_02(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        self.read_bits(slave_id, FC_READ_DISCRETE_INPUTS, address, quantity)
            .await
    }

    async fn read_03(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.read_registers(slave_id, FC_READ_HOLDING_REGISTERS, address, quantity)
            .await
    }

    async fn read_04(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.read_registers(slave_id, FC_READ_INPUT_REGISTERS, address, quantity)
            .await
    }

    async fn write_05(&mut self, slave_id: SlaveId, address: u16, value: bool) -> ModbusResult<()> {
        let request = PayloadBuilder::build_write_single_coil(slave_id, address, value)?;
        self.write_echoed(&request, 4).await
    }

    async fn write_06(&mut self, slave_id: SlaveId, address: u16, value: u16) -> ModbusResult<()> {
        let request = PayloadBuilder::build_write_single_register(slave_id, address, value)?;
        self.write_echoed(&request, 4).await
    }

    async fn write_0f(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> ModbusResult<()> {
        let request = PayloadBuilder::build_write_multiple_coils(slave_id, address, values)?;
        self.write_echoed(&request, 4).await
    }

    async fn write_10(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        let request = PayloadBuilder::build_write_multiple_registers(slave_id, address, values)?;
        self.write_echoed(&request, 4).await
    }

    async fn write_16(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> ModbusResult<()> {
        let request =
            PayloadBuilder::build_mask_write_register(slave_id, address, and_mask, or_mask)?;
        self.write_echoed(&request, 6).await
    }
}
