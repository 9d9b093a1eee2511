#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_serial_modbus::constants::MAX_ASCII_REMAINDER;
use voltage_serial_modbus::frame::{from_ascii, to_ascii};
use voltage_serial_modbus::{AsciiDecoder, Decoder};

fuzz_target!(|chunks: Vec<Vec<u8>>| {
    let mut decoder = AsciiDecoder::new();
    for chunk in &chunks {
        for msg in decoder.decode(chunk) {
            let frame = to_ascii(&msg);
            assert_eq!(from_ascii(&frame[..frame.len() - 2]), Some(msg));
        }
        assert!(decoder.remainder().len() <= MAX_ASCII_REMAINDER);
    }
});
