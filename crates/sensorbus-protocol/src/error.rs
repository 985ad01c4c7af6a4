//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when working with the bus protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Response bytes arrived but failed the XOR integrity check.
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum {
        /// Checksum recomputed over the received bytes.
        expected: u8,
        /// Checksum byte carried by the frame.
        actual: u8,
    },

    /// Response header has the wrong number of bytes.
    #[error("response header must be {expected} bytes, got {actual}")]
    HeaderLength {
        /// Required header length.
        expected: usize,
        /// Actual length supplied.
        actual: usize,
    },

    /// Payload length disagrees with the header's length byte, or a payload
    /// could not be split into whole units.
    #[error("payload length mismatch: expected {declared} bytes, got {actual}")]
    LengthMismatch {
        /// Length the frame (or the payload layout) calls for.
        declared: usize,
        /// Length actually available.
        actual: usize,
    },

    /// A frame was started on the wire but ended before it was complete.
    #[error("frame truncated while reading {0}")]
    Truncated(FrameStage),

    /// The response does not belong to the request that was sent.
    #[error(
        "unexpected response from board {board_id} for command 0x{command:02X} \
         (sent board {expected_board}, command 0x{expected_command:02X})"
    )]
    UnexpectedEcho {
        /// Board id carried by the response.
        board_id: u8,
        /// Command code echoed by the response.
        command: u8,
        /// Board id of the request.
        expected_board: u8,
        /// Command code of the request.
        expected_command: u8,
    },

    /// Bytes do not form a valid command frame.
    #[error("invalid command frame: {0}")]
    InvalidFrame(String),

    /// Payload does not fit in a single response frame.
    #[error("payload too long: maximum {max} bytes, got {actual}")]
    PayloadTooLong {
        /// Maximum payload size.
        max: usize,
        /// Actual payload size.
        actual: usize,
    },

    /// Protocol tables are missing entries or hold out-of-range values.
    #[error("invalid protocol configuration: {0}")]
    InvalidConfig(String),

    /// A protocol description could not be parsed.
    #[error("JSON error: {0}")]
    Json(String),
}

/// The part of a response frame being read when it was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    /// The fixed header after the start marker.
    Header,
    /// The variable-length payload.
    Payload,
    /// The trailing checksum.
    Checksum,
}

impl std::fmt::Display for FrameStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameStage::Header => write!(f, "header"),
            FrameStage::Payload => write!(f, "payload"),
            FrameStage::Checksum => write!(f, "checksum"),
        }
    }
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
