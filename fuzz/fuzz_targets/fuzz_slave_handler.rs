#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use voltage_serial_modbus::{InMemoryState, Message, ModbusState, RegisterClass, SlaveHandler};

#[derive(Debug, Arbitrary)]
struct Request {
    function: u8,
    data: Vec<u8>,
}

fuzz_target!(|request: Request| {
    let state = ModbusState::new()
        .with_element(RegisterClass::Coil, 0, vec![0; 64])
        .with_element(RegisterClass::Discrete, 0, vec![1; 64])
        .with_element(RegisterClass::Holding, 0, vec![0x1234; 64])
        .with_element(RegisterClass::Input, 0, vec![0xFFFF; 64]);
    let handler = SlaveHandler::new(1, Arc::new(InMemoryState::shared(state)));

    let response = handler.handle_request(&Message::new(1, request.function, request.data));
    assert_eq!(response.address, 1);
    assert_eq!(response.base_function(), request.function & 0x7F);
    if response.is_exception() {
        assert_eq!(response.data.len(), 1);
    }
});
