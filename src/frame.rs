//! ASCII and RTU frame codec
//!
//! Modbus serial line defines two encodings of the same message:
//! - **ASCII**: `:` + hex(address, function, data, LRC) + `CRLF`
//! - **RTU**: raw address, function, data followed by CRC-16 (little-endian)
//!
//! Decoding never yields a corrupted message: a checksum mismatch drops the
//! frame and logs a warning.

use crc::{Crc, CRC_16_MODBUS};
use tracing::{debug, warn};

use crate::constants::{ASCII_END, ASCII_START, MIN_RTU_FRAME_SIZE};
use crate::message::Message;

/// CRC calculator for RTU (polynomial 0xA001 reflected, init 0xFFFF)
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Compute the RTU CRC-16 over address, function and data bytes.
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Compute the ASCII LRC: two's complement of the byte sum modulo 256.
#[inline]
pub fn lrc(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)).wrapping_neg()
}

/// LRC of a whole message (address, function, data).
pub fn message_lrc(msg: &Message) -> u8 {
    [msg.address, msg.function]
        .iter()
        .chain(msg.data.iter())
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        .wrapping_neg()
}

/// CRC-16 of a whole message (address, function, data).
pub fn message_crc(msg: &Message) -> u16 {
    let mut digest = CRC_MODBUS.digest();
    digest.update(&[msg.address, msg.function]);
    digest.update(&msg.data);
    digest.finalize()
}

/// Convert byte to 2-character uppercase ASCII hex
#[inline]
fn byte_to_ascii_hex(byte: u8) -> [u8; 2] {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    [DIGITS[(byte >> 4) as usize], DIGITS[(byte & 0x0F) as usize]]
}

/// Convert single ASCII character to hex value
#[inline]
fn ascii_char_to_hex(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// Encode a message as an ASCII frame: `:AAFFDD...DDLL\r\n`
pub fn to_ascii(msg: &Message) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + 2 * (msg.data.len() + 3) + 2);
    frame.push(ASCII_START);
    frame.extend_from_slice(&byte_to_ascii_hex(msg.address));
    frame.extend_from_slice(&byte_to_ascii_hex(msg.function));
    for &b in &msg.data {
        frame.extend_from_slice(&byte_to_ascii_hex(b));
    }
    frame.extend_from_slice(&byte_to_ascii_hex(message_lrc(msg)));
    frame.extend_from_slice(ASCII_END);
    frame
}

/// Encode a message as an RTU frame: address, function, data, CRC (LE)
pub fn to_rtu(msg: &Message) -> Vec<u8> {
    let mut frame = Vec::with_capacity(msg.data.len() + MIN_RTU_FRAME_SIZE);
    frame.push(msg.address);
    frame.push(msg.function);
    frame.extend_from_slice(&msg.data);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes()); // CRC is little-endian in RTU
    frame
}

/// Decode one ASCII frame whose `CRLF` delimiter has already been removed.
///
/// Anything before the last `:` is ignored. The frame body is the run of hex
/// digits after it; an odd trailing digit and any non-hex tail are ignored.
/// Returns `None` when no frame is present or the LRC does not match.
pub fn from_ascii(text: &[u8]) -> Option<Message> {
    let start = text.iter().rposition(|&c| c == ASCII_START)? + 1;
    let body = &text[start..];
    let hex_len = body
        .iter()
        .position(|c| !c.is_ascii_hexdigit())
        .unwrap_or(body.len());
    let hex = &body[..hex_len - hex_len % 2];

    // Address, function and LRC at minimum
    if hex.len() < 6 {
        debug!("ASCII span too short for a frame: {} hex digits", hex.len());
        return None;
    }

    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for pair in hex.chunks_exact(2) {
        let high = ascii_char_to_hex(pair[0])?;
        let low = ascii_char_to_hex(pair[1])?;
        bytes.push((high << 4) | low);
    }

    let (body, received_lrc) = bytes.split_at(bytes.len() - 1);
    let calculated = lrc(body);
    if received_lrc[0] != calculated {
        warn!(
            "LRC mismatch, frame dropped: expected 0x{:02X}, got 0x{:02X}",
            calculated, received_lrc[0]
        );
        return None;
    }

    Some(Message::new(body[0], body[1], body[2..].to_vec()))
}

/// Try to read one RTU frame carrying exactly `data_len` data bytes from the
/// start of `bytes`.
///
/// On success returns the message and the bytes after its CRC. Otherwise
/// returns `None` with `bytes` untouched.
pub fn from_rtu_candidate(bytes: &[u8], data_len: usize) -> (Option<Message>, &[u8]) {
    let frame_len = data_len + MIN_RTU_FRAME_SIZE;
    if bytes.len() < frame_len {
        return (None, bytes);
    }

    let crc_at = frame_len - 2;
    let received_crc = u16::from_le_bytes([bytes[crc_at], bytes[crc_at + 1]]);
    if received_crc != crc16(&bytes[..crc_at]) {
        return (None, bytes);
    }

    let msg = Message::new(bytes[0], bytes[1], bytes[2..crc_at].to_vec());
    (Some(msg), &bytes[frame_len..])
}
