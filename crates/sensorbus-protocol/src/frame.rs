//! Frame encoding/decoding utilities.
//!
//! Commands are fixed-size; responses carry a length byte and a variable
//! payload. Both end in an XOR checksum over everything after the marker.
//!
//! ```text
//! command:  +-----+-------+------+-----+-------+-----+
//!           | SOF | board | addr | cmd | param | xor |
//!           +-----+-------+------+-----+-------+-----+
//!
//! response: +-----+-------+------+-----+--------+-----+-----------------+-----+
//!           | SOF | board | addr | cmd | status | len | payload[0..len] | xor |
//!           +-----+-------+------+-----+--------+-----+-----------------+-----+
//! ```

use crate::constants::{
    ProtocolConstants, COMMAND_FRAME_SIZE, MAX_PAYLOAD_SIZE, RESPONSE_HEADER_SIZE,
};
use crate::error::{ProtocolError, Result};
use crate::status::StatusCode;
use bytes::{Buf, BufMut, BytesMut};

/// XOR every byte of every part together.
pub fn xor_checksum(parts: &[&[u8]]) -> u8 {
    parts
        .iter()
        .flat_map(|part| part.iter())
        .fold(0u8, |acc, byte| acc ^ byte)
}

/// A host → board command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    /// Target board.
    pub board_id: u8,
    /// Sensor address on that board (0 when the command is board-wide).
    pub addr: u8,
    /// Command code.
    pub command: u8,
    /// Single parameter byte.
    pub param: u8,
}

impl CommandFrame {
    /// Create a new command frame.
    pub fn new(board_id: u8, addr: u8, command: u8, param: u8) -> Self {
        CommandFrame {
            board_id,
            addr,
            command,
            param,
        }
    }

    /// Checksum over the four body bytes.
    pub fn checksum(&self) -> u8 {
        self.board_id ^ self.addr ^ self.command ^ self.param
    }

    /// Encode to wire bytes.
    pub fn encode(&self, sof: u8) -> [u8; COMMAND_FRAME_SIZE] {
        [
            sof,
            self.board_id,
            self.addr,
            self.command,
            self.param,
            self.checksum(),
        ]
    }

    /// Decode wire bytes produced by [`CommandFrame::encode`].
    pub fn decode(bytes: &[u8], sof: u8) -> Result<Self> {
        if bytes.len() != COMMAND_FRAME_SIZE {
            return Err(ProtocolError::InvalidFrame(format!(
                "expected {} bytes, got {}",
                COMMAND_FRAME_SIZE,
                bytes.len()
            )));
        }
        if bytes[0] != sof {
            return Err(ProtocolError::InvalidFrame(format!(
                "bad start marker 0x{:02X}",
                bytes[0]
            )));
        }

        let frame = CommandFrame::new(bytes[1], bytes[2], bytes[3], bytes[4]);
        let expected = frame.checksum();
        if bytes[5] != expected {
            return Err(ProtocolError::Checksum {
                expected,
                actual: bytes[5],
            });
        }
        Ok(frame)
    }
}

/// Encode a command frame. Always 6 bytes.
pub fn encode_command(
    sof: u8,
    board_id: u8,
    addr: u8,
    command: u8,
    param: u8,
) -> [u8; COMMAND_FRAME_SIZE] {
    CommandFrame::new(board_id, addr, command, param).encode(sof)
}

/// The fixed part of a response that follows the start marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Responding board.
    pub board_id: u8,
    /// Sensor address echoed from the request.
    pub addr: u8,
    /// Command code echoed from the request.
    pub command: u8,
    /// Outcome reported by the board.
    pub status: StatusCode,
    /// Payload length in bytes.
    pub length: u8,
}

impl ResponseHeader {
    /// Parse the 5 header bytes (marker excluded).
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != RESPONSE_HEADER_SIZE {
            return Err(ProtocolError::HeaderLength {
                expected: RESPONSE_HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(ResponseHeader {
            board_id: bytes[0],
            addr: bytes[1],
            command: bytes[2],
            status: StatusCode(bytes[3]),
            length: bytes[4],
        })
    }

    /// Header bytes in wire order.
    pub fn to_bytes(&self) -> [u8; RESPONSE_HEADER_SIZE] {
        [
            self.board_id,
            self.addr,
            self.command,
            self.status.raw(),
            self.length,
        ]
    }
}

/// A verified board → host response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Parsed header.
    pub header: ResponseHeader,
    /// Payload bytes (`header.length` of them).
    pub payload: Vec<u8>,
}

impl ResponseFrame {
    /// Build a response, deriving the length byte from the payload.
    pub fn new(
        board_id: u8,
        addr: u8,
        command: u8,
        status: StatusCode,
        payload: Vec<u8>,
    ) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLong {
                max: MAX_PAYLOAD_SIZE,
                actual: payload.len(),
            });
        }
        Ok(ResponseFrame {
            header: ResponseHeader {
                board_id,
                addr,
                command,
                status,
                length: payload.len() as u8,
            },
            payload,
        })
    }

    /// Status reported by the board.
    pub fn status(&self) -> StatusCode {
        self.header.status
    }

    /// Checksum over header and payload.
    pub fn checksum(&self) -> u8 {
        xor_checksum(&[&self.header.to_bytes(), &self.payload])
    }

    /// Encode to wire bytes. Checksum bytes beyond the first are zero.
    pub fn encode(&self, constants: &ProtocolConstants) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            1 + RESPONSE_HEADER_SIZE + self.payload.len() + constants.checksum_length,
        );
        buf.put_u8(constants.sof_marker);
        buf.put_slice(&self.header.to_bytes());
        buf.put_slice(&self.payload);
        buf.put_u8(self.checksum());
        buf.put_bytes(0, constants.checksum_length.saturating_sub(1));
        buf
    }
}

/// Verify and assemble a response that has already been read off the wire.
///
/// `header` is the 5 bytes after the marker, `payload` the bytes that
/// followed, and `checksum` the first trailing checksum byte.
pub fn decode_response(header: &[u8], payload: &[u8], checksum: u8) -> Result<ResponseFrame> {
    let parsed = ResponseHeader::parse(header)?;
    if payload.len() != parsed.length as usize {
        return Err(ProtocolError::LengthMismatch {
            declared: parsed.length as usize,
            actual: payload.len(),
        });
    }

    let expected = xor_checksum(&[header, payload]);
    if expected != checksum {
        return Err(ProtocolError::Checksum {
            expected,
            actual: checksum,
        });
    }

    Ok(ResponseFrame {
        header: parsed,
        payload: payload.to_vec(),
    })
}

/// A buffered decoder for response byte streams.
///
/// Bytes ahead of the start marker are discarded. A frame is only returned
/// once every byte of it, checksum included, has been pushed.
#[derive(Debug)]
pub struct ResponseDecoder {
    constants: ProtocolConstants,
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
}

impl ResponseDecoder {
    /// Create a new decoder for the given wire constants.
    pub fn new(constants: ProtocolConstants) -> Self {
        ResponseDecoder {
            constants,
            buffer: BytesMut::with_capacity(
                1 + RESPONSE_HEADER_SIZE + MAX_PAYLOAD_SIZE + constants.checksum_length,
            ),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode a complete frame from the buffer.
    ///
    /// Returns `None` if more data is needed. A complete frame that fails
    /// verification is consumed and reported as `Some(Err(..))`.
    pub fn decode(&mut self) -> Option<Result<ResponseFrame>> {
        let sof = self.constants.sof_marker;
        let skipped = self
            .buffer
            .iter()
            .position(|&b| b == sof)
            .unwrap_or(self.buffer.len());
        if skipped > 0 {
            log::trace!("skipping {} bytes before start marker", skipped);
            self.buffer.advance(skipped);
        }

        if self.buffer.len() < 1 + RESPONSE_HEADER_SIZE {
            return None;
        }

        let length = self.buffer[RESPONSE_HEADER_SIZE] as usize;
        let total = 1 + RESPONSE_HEADER_SIZE + length + self.constants.checksum_length;
        if self.buffer.len() < total {
            return None;
        }

        let frame = self.buffer.split_to(total);
        let header = &frame[1..1 + RESPONSE_HEADER_SIZE];
        let payload = &frame[1 + RESPONSE_HEADER_SIZE..1 + RESPONSE_HEADER_SIZE + length];
        let checksum = frame[1 + RESPONSE_HEADER_SIZE + length];

        Some(decode_response(header, payload, checksum))
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOF: u8 = 0xAA;

    #[test]
    fn test_command_frame_layout() {
        let frame = encode_command(SOF, 1, 2, 3, 4);
        assert_eq!(frame, [SOF, 1, 2, 3, 4, 4]);
    }

    #[test]
    fn test_command_frame_decode() {
        let bytes = encode_command(SOF, 9, 0x40, 31, 0);
        let frame = CommandFrame::decode(&bytes, SOF).expect("should decode");
        assert_eq!(frame, CommandFrame::new(9, 0x40, 31, 0));

        let mut corrupted = bytes;
        corrupted[5] ^= 0x01;
        assert!(matches!(
            CommandFrame::decode(&corrupted, SOF),
            Err(ProtocolError::Checksum { .. })
        ));
        assert!(matches!(
            CommandFrame::decode(&bytes, 0x55),
            Err(ProtocolError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_checksum_law() {
        for (board, addr, cmd, param) in [(0, 0, 0, 0), (255, 1, 7, 128), (17, 0x40, 30, 9)] {
            let frame = encode_command(SOF, board, addr, cmd, param);
            assert_eq!(frame[5], board ^ addr ^ cmd ^ param);
            assert_eq!(frame[5], xor_checksum(&[&frame[1..5]]));
        }
    }

    #[test]
    fn test_decode_response_ok() {
        let header = [1, 2, 3, 0, 2];
        let payload = [0x10, 0x20];
        let checksum = xor_checksum(&[&header, &payload]);

        let response = decode_response(&header, &payload, checksum).expect("should decode");
        assert_eq!(response.status(), StatusCode(0));
        assert_eq!(response.payload, vec![0x10, 0x20]);
        assert_eq!(response.header.board_id, 1);
        assert_eq!(response.header.addr, 2);
        assert_eq!(response.header.command, 3);
    }

    #[test]
    fn test_decode_response_flipped_checksum() {
        let header = [1, 2, 3, 0, 2];
        let payload = [0x10, 0x20];
        let checksum = xor_checksum(&[&header, &payload]);

        for bit in 0..8 {
            let err = decode_response(&header, &payload, checksum ^ (1 << bit)).unwrap_err();
            assert_eq!(
                err,
                ProtocolError::Checksum {
                    expected: checksum,
                    actual: checksum ^ (1 << bit)
                }
            );
        }
    }

    #[test]
    fn test_decode_response_rejects_bad_lengths() {
        assert!(matches!(
            decode_response(&[1, 2, 3, 0], &[], 0),
            Err(ProtocolError::HeaderLength { expected: 5, actual: 4 })
        ));
        assert!(matches!(
            decode_response(&[1, 2, 3, 0, 3], &[0x10], 0),
            Err(ProtocolError::LengthMismatch { declared: 3, actual: 1 })
        ));
    }

    #[test]
    fn test_response_encode_matches_decode() {
        let constants = ProtocolConstants::default();
        let frame = ResponseFrame::new(4, 0x40, 0, StatusCode(0), vec![0, 0, 0, 5, 0xAA, 0xBB])
            .expect("payload fits");
        let bytes = frame.encode(&constants);
        assert_eq!(bytes.len(), 1 + 5 + 6 + 1);
        assert_eq!(bytes[0], SOF);

        let decoded = decode_response(&bytes[1..6], &bytes[6..12], bytes[12]).expect("should decode");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_response_payload_limit() {
        let err = ResponseFrame::new(1, 0, 0, StatusCode(0), vec![0; 256]).unwrap_err();
        assert_eq!(err, ProtocolError::PayloadTooLong { max: 255, actual: 256 });
    }

    #[test]
    fn test_decoder_skips_garbage() {
        let constants = ProtocolConstants::default();
        let frame = ResponseFrame::new(2, 0, 3, StatusCode(0), vec![]).expect("payload fits");

        let mut decoder = ResponseDecoder::new(constants);
        decoder.push(&[0x00, 0x13, 0x37]);
        decoder.push(&frame.encode(&constants));

        let decoded = decoder.decode().expect("frame available").expect("valid frame");
        assert_eq!(decoded, frame);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_decoder_partial() {
        let constants = ProtocolConstants::default();
        let frame = ResponseFrame::new(2, 1, 0, StatusCode(0), vec![1, 2, 3, 4]).expect("payload fits");
        let bytes = frame.encode(&constants);

        let mut decoder = ResponseDecoder::new(constants);
        decoder.push(&bytes[..7]);
        assert!(decoder.decode().is_none());

        decoder.push(&bytes[7..]);
        let decoded = decoder.decode().expect("frame available").expect("valid frame");
        assert_eq!(decoded.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_decoder_multiple_and_corrupt() {
        let constants = ProtocolConstants::default();
        let first = ResponseFrame::new(1, 0, 3, StatusCode(0), vec![]).expect("payload fits");
        let second = ResponseFrame::new(2, 0, 3, StatusCode(2), vec![]).expect("payload fits");

        let mut corrupt = first.encode(&constants);
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;

        let mut decoder = ResponseDecoder::new(constants);
        decoder.push(&corrupt);
        decoder.push(&second.encode(&constants));

        assert!(matches!(
            decoder.decode(),
            Some(Err(ProtocolError::Checksum { .. }))
        ));
        let decoded = decoder.decode().expect("frame available").expect("valid frame");
        assert_eq!(decoded, second);
        assert!(decoder.decode().is_none());
    }

    #[test]
    fn test_wide_checksum_trailer() {
        let constants = ProtocolConstants {
            checksum_length: 2,
            ..ProtocolConstants::default()
        };
        let frame = ResponseFrame::new(3, 0, 4, StatusCode(0), vec![1, 0x40]).expect("payload fits");
        let bytes = frame.encode(&constants);
        assert_eq!(bytes.len(), 1 + 5 + 2 + 2);

        let mut decoder = ResponseDecoder::new(constants);
        decoder.push(&bytes);
        let decoded = decoder.decode().expect("frame available").expect("valid frame");
        assert_eq!(decoded, frame);
        assert_eq!(decoder.buffered_len(), 0);
    }
}
