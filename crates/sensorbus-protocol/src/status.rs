//! Response status codes.
//!
//! The numeric meaning of a status byte is defined by the protocol tables,
//! not by this crate. A [`StatusCode`] is only ever compared against a
//! [`StatusCodes`] table or forwarded to the caller.

use crate::constants::StatusCodes;

/// Raw status byte carried by a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(pub u8);

impl StatusCode {
    /// Get the raw byte.
    pub fn raw(self) -> u8 {
        self.0
    }

    /// Whether this status means success under the given table.
    pub fn is_ok(self, codes: &StatusCodes) -> bool {
        self.0 == codes.ok
    }

    /// Classify this status under the given table.
    pub fn kind(self, codes: &StatusCodes) -> StatusKind {
        codes.classify(self)
    }
}

impl From<u8> for StatusCode {
    fn from(code: u8) -> Self {
        StatusCode(code)
    }
}

impl From<StatusCode> for u8 {
    fn from(code: StatusCode) -> Self {
        code.0
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Well-known status meanings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Command succeeded.
    Ok,
    /// Generic failure on the board.
    Error,
    /// Board is alive but the addressed sensor does not exist.
    NotFound,
    /// Board did not recognise the command.
    UnknownCommand,
    /// Any status the table does not name.
    Other(u8),
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusKind::Ok => write!(f, "ok"),
            StatusKind::Error => write!(f, "error"),
            StatusKind::NotFound => write!(f, "not found"),
            StatusKind::UnknownCommand => write!(f, "unknown command"),
            StatusKind::Other(code) => write!(f, "status 0x{:02X}", code),
        }
    }
}
