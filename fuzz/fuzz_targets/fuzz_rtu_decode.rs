#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_serial_modbus::frame::to_rtu;
use voltage_serial_modbus::{Decoder, RtuDecoder};

fuzz_target!(|data: &[u8]| {
    let mut decoder = RtuDecoder::new();
    let messages = decoder.decode(data);

    // Every accepted frame is consumed from the front of the chunk, so the
    // re-encoded frames must reproduce a prefix of the input.
    let encoded: Vec<u8> = messages.iter().flat_map(to_rtu).collect();
    assert!(encoded.len() <= data.len());
    assert_eq!(&data[..encoded.len()], encoded.as_slice());
});
