//! Chunk → message decoding
//!
//! The framer hands over byte chunks delimited by line silence. A decoder turns
//! each chunk into zero or more messages, skipping anything it cannot parse.
//!
//! - [`AsciiDecoder`] splits on `CRLF` and carries a partial frame across
//!   chunks.
//! - [`RtuDecoder`] has no delimiters to go on. It tries a fixed table of frame
//!   shapes in priority order and accepts the first whose CRC validates.

use tracing::{debug, warn};

use crate::config::FrameMode;
use crate::constants::{ASCII_END, ASCII_START, MAX_ASCII_REMAINDER};
use crate::frame::{from_ascii, from_rtu_candidate};
use crate::message::Message;

/// Turns byte chunks into messages.
pub trait Decoder: Send {
    /// Decode one chunk. Unparseable data is dropped and logged.
    fn decode(&mut self, chunk: &[u8]) -> Vec<Message>;

    /// Drop any partial frame carried from earlier chunks.
    fn reset(&mut self) {}
}

/// ASCII decoder with a carried remainder
#[derive(Debug, Default)]
pub struct AsciiDecoder {
    remainder: Vec<u8>,
}

impl AsciiDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Partial frame waiting for its `CRLF`
    pub fn remainder(&self) -> &[u8] {
        &self.remainder
    }
}

impl Decoder for AsciiDecoder {
    fn decode(&mut self, chunk: &[u8]) -> Vec<Message> {
        self.remainder.extend_from_slice(chunk);

        let mut messages = Vec::new();
        let mut start = 0;
        while let Some(pos) = find_crlf(&self.remainder[start..]) {
            let span = &self.remainder[start..start + pos];
            match from_ascii(span) {
                Some(msg) => {
                    debug!("Parsed ASCII frame: {}", msg);
                    messages.push(msg);
                }
                None => debug!("No valid ASCII frame in {} byte span", span.len()),
            }
            start += pos + ASCII_END.len();
        }

        // Keep the trailing partial frame from its last start character
        let tail = &self.remainder[start..];
        let mut next = match tail.iter().rposition(|&c| c == ASCII_START) {
            Some(i) => tail[i..].to_vec(),
            None => {
                if !tail.is_empty() {
                    debug!("Dropping {} bytes outside any ASCII frame", tail.len());
                }
                Vec::new()
            }
        };
        if next.len() > MAX_ASCII_REMAINDER {
            warn!(
                "ASCII remainder of {} bytes exceeds the longest frame, dropped",
                next.len()
            );
            next.clear();
        }
        self.remainder = next;

        messages
    }

    fn reset(&mut self) {
        self.remainder.clear();
    }
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == ASCII_END)
}

/// Data layout of one RTU frame hypothesis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameShape {
    /// Exactly this many data bytes
    Fixed(usize),
    /// `leading` data bytes, a byte count, then that many bytes
    Counted { leading: usize },
}

impl FrameShape {
    /// Data length this shape implies for `bytes`, if it can tell yet
    fn data_len(self, bytes: &[u8]) -> Option<usize> {
        match self {
            Self::Fixed(len) => Some(len),
            Self::Counted { leading } => {
                let count = *bytes.get(leading + 2)?;
                Some(leading + 1 + count as usize)
            }
        }
    }
}

/// Hypotheses in priority order
const RTU_SHAPES: [FrameShape; 9] = [
    // FC01-06 requests, FC05/06/0F/10 responses, FC08, FC0B/0C responses
    FrameShape::Fixed(4),
    // FC01-04 responses, FC11 response, FC14/15, FC17 response
    FrameShape::Counted { leading: 0 },
    // FC07/0B/0C/11 requests
    FrameShape::Fixed(0),
    // FC0F/10 requests
    FrameShape::Counted { leading: 4 },
    // Exception responses, FC07 response
    FrameShape::Fixed(1),
    // FC18 request
    FrameShape::Fixed(2),
    // FC08 sub-function 3
    FrameShape::Fixed(3),
    // FC16 request and response
    FrameShape::Fixed(6),
    // FC17 request
    FrameShape::Counted { leading: 8 },
];

/// RTU decoder. Chunks are expected to end on a frame boundary.
#[derive(Debug, Default)]
pub struct RtuDecoder {
    discarded_bytes: u64,
}

impl RtuDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes dropped because no hypothesis matched
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    fn parse_one(bytes: &[u8]) -> Option<(Message, &[u8])> {
        RTU_SHAPES.iter().find_map(|shape| {
            let data_len = shape.data_len(bytes)?;
            match from_rtu_candidate(bytes, data_len) {
                (Some(msg), rest) => Some((msg, rest)),
                (None, _) => None,
            }
        })
    }
}

impl Decoder for RtuDecoder {
    fn decode(&mut self, chunk: &[u8]) -> Vec<Message> {
        let mut messages = Vec::new();
        let mut rest = chunk;

        while !rest.is_empty() {
            match Self::parse_one(rest) {
                Some((msg, tail)) => {
                    debug!(
                        "Parsed RTU frame: address={}, function=0x{:02X}, len={}",
                        msg.address,
                        msg.function,
                        msg.data.len()
                    );
                    messages.push(msg);
                    rest = tail;
                }
                None => {
                    warn!("Unknown or invalid RTU frame(s), {} bytes dropped", rest.len());
                    self.discarded_bytes += rest.len() as u64;
                    break;
                }
            }
        }

        messages
    }
}

/// Decoder selected by frame mode
#[derive(Debug)]
pub enum ModbusDecoder {
    Ascii(AsciiDecoder),
    Rtu(RtuDecoder),
}

impl ModbusDecoder {
    pub fn new(mode: FrameMode) -> Self {
        match mode {
            FrameMode::Ascii => Self::Ascii(AsciiDecoder::new()),
            FrameMode::Rtu => Self::Rtu(RtuDecoder::new()),
        }
    }

    pub fn mode(&self) -> FrameMode {
        match self {
            Self::Ascii(_) => FrameMode::Ascii,
            Self::Rtu(_) => FrameMode::Rtu,
        }
    }
}

impl Decoder for ModbusDecoder {
    fn decode(&mut self, chunk: &[u8]) -> Vec<Message> {
        match self {
            Self::Ascii(d) => d.decode(chunk),
            Self::Rtu(d) => d.decode(chunk),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Ascii(d) => d.reset(),
            Self::Rtu(d) => d.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{to_ascii, to_rtu};

    /// One message of every RTU frame shape
    fn shape_samples() -> Vec<Message> {
        vec![
            Message::new(1, 0x01, vec![1, 2, 3, 4]),
            Message::new(2, 0x03, vec![8, 1, 2, 3, 4, 5, 6, 7, 8]),
            Message::new(3, 0x11, vec![]),
            Message::new(
                4,
                0x10,
                vec![1, 2, 3, 4, 16, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
            ),
            Message::new(5, 0x07, vec![0xDD]),
            Message::new(6, 0x18, vec![0xAA]),
            Message::new(7, 0x08, vec![0, 0, 0]),
            Message::new(8, 0x16, vec![10, 11, 12, 13, 14, 15]),
            Message::new(
                4,
                0x17,
                vec![1, 2, 3, 4, 5, 6, 7, 8, 8, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8],
            ),
        ]
    }

    #[test]
    fn test_rtu_every_shape_alone() {
        for msg in shape_samples() {
            let mut decoder = RtuDecoder::new();
            assert_eq!(decoder.decode(&to_rtu(&msg)), vec![msg.clone()], "{}", msg);
        }
    }

    #[test]
    fn test_rtu_two_frames_in_one_chunk() {
        let first = Message::new(1, 0x03, vec![0x00, 0xA0, 0x00, 0x02]);
        let second = Message::new(1, 0x03, vec![4, 0, 1, 0, 2]);
        let mut chunk = to_rtu(&first);
        chunk.extend(to_rtu(&second));

        let mut decoder = RtuDecoder::new();
        assert_eq!(decoder.decode(&chunk), vec![first, second]);
    }

    #[test]
    fn test_rtu_frame_then_garbage() {
        let msg = Message::new(9, 0x06, vec![0x00, 0x01, 0x12, 0x34]);
        let mut chunk = to_rtu(&msg);
        chunk.extend_from_slice(&[0x55, 0x66, 0x77]);

        let mut decoder = RtuDecoder::new();
        assert_eq!(decoder.decode(&chunk), vec![msg]);
        assert_eq!(decoder.discarded_bytes(), 3);
    }

    #[test]
    fn test_rtu_garbage_only() {
        let mut decoder = RtuDecoder::new();
        assert!(decoder.decode(&[0x01, 0x02, 0x03]).is_empty());
        assert!(decoder.decode(&[]).is_empty());
        assert_eq!(decoder.discarded_bytes(), 3);
    }

    #[test]
    fn test_rtu_corrupted_frame_dropped() {
        let mut frame = to_rtu(&Message::new(1, 0x03, vec![0x00, 0x00, 0x00, 0x01]));
        frame[3] ^= 0x10;
        let mut decoder = RtuDecoder::new();
        assert!(decoder.decode(&frame).is_empty());
    }

    #[test]
    fn test_ascii_every_shape() {
        let mut decoder = AsciiDecoder::new();
        let mut chunk = Vec::new();
        for msg in shape_samples() {
            chunk.extend(to_ascii(&msg));
        }
        assert_eq!(decoder.decode(&chunk), shape_samples());
        assert!(decoder.remainder().is_empty());
    }

    #[test]
    fn test_ascii_frame_split_across_chunks() {
        let msg = Message::new(1, 0x03, vec![0x00, 0x00, 0x00, 0x01]);
        let frame = to_ascii(&msg);
        let mut decoder = AsciiDecoder::new();

        assert!(decoder.decode(&frame[..5]).is_empty());
        assert_eq!(decoder.remainder(), &frame[..5]);
        // Split between CR and LF
        assert!(decoder.decode(&frame[5..frame.len() - 1]).is_empty());
        assert_eq!(decoder.decode(&frame[frame.len() - 1..]), vec![msg]);
        assert!(decoder.remainder().is_empty());
    }

    #[test]
    fn test_ascii_keeps_partial_after_complete() {
        let a = Message::new(1, 0x06, vec![0x00, 0x01, 0x00, 0x02]);
        let b = Message::new(2, 0x06, vec![0x00, 0x03, 0x00, 0x04]);
        let mut chunk = to_ascii(&a);
        let b_frame = to_ascii(&b);
        chunk.extend_from_slice(&b_frame[..7]);

        let mut decoder = AsciiDecoder::new();
        assert_eq!(decoder.decode(&chunk), vec![a]);
        assert_eq!(decoder.decode(&b_frame[7..]), vec![b]);
    }

    #[test]
    fn test_ascii_drops_tail_without_start() {
        let mut decoder = AsciiDecoder::new();
        assert!(decoder.decode(b"noise without a frame").is_empty());
        assert!(decoder.remainder().is_empty());
    }

    #[test]
    fn test_ascii_bad_lrc_dropped_next_frame_kept() {
        let good = Message::new(3, 0x11, vec![]);
        let mut chunk = b":010300000001FF\r\n".to_vec();
        chunk.extend(to_ascii(&good));

        let mut decoder = AsciiDecoder::new();
        assert_eq!(decoder.decode(&chunk), vec![good]);
    }

    #[test]
    fn test_ascii_overlong_remainder_dropped() {
        let mut chunk = vec![b':'];
        chunk.extend(std::iter::repeat(b'0').take(MAX_ASCII_REMAINDER + 10));

        let mut decoder = AsciiDecoder::new();
        assert!(decoder.decode(&chunk).is_empty());
        assert!(decoder.remainder().is_empty());
    }

    #[test]
    fn test_reset_clears_remainder() {
        let mut decoder = ModbusDecoder::new(FrameMode::Ascii);
        assert!(decoder.decode(b":0103").is_empty());
        decoder.reset();
        assert!(decoder.decode(b"0000000001FB\r\n").is_empty());
    }

    #[test]
    fn test_decoder_for_mode() {
        assert_eq!(ModbusDecoder::new(FrameMode::Rtu).mode(), FrameMode::Rtu);
        assert_eq!(ModbusDecoder::new(FrameMode::Ascii).mode(), FrameMode::Ascii);
    }
}
