//! RS-485 Sensor Bus Protocol
//!
//! This crate provides the wire-level pieces for talking to sensor hub boards
//! on a shared RS-485 bus: command frame encoding, response frame decoding and
//! checksum verification, and the protocol tables (constants, command codes,
//! status codes) that the firmware and host agree on.
//!
//! # Protocol Overview
//!
//! Every exchange is one command frame followed by exactly one response frame.
//! The protocol carries no request identifier, so a host must never have more
//! than one request outstanding on the bus.
//!
//! - **Command** (host → board): always 6 bytes
//!   `[SOF, board_id, addr, command, param, checksum]`
//! - **Response** (board → host): `[SOF, board_id, addr, command, status, length,
//!   payload[length], checksum]`
//!
//! Both checksums are the XOR of every byte after the start-of-frame marker.
//!
//! # Example
//!
//! ```rust
//! use sensorbus_protocol::{decode_response, encode_command, ProtocolConfig};
//!
//! let protocol = ProtocolConfig::default();
//! let sof = protocol.constants.sof_marker;
//!
//! // Build a PING for board 7
//! let frame = encode_command(sof, 7, 0x00, protocol.commands.ping, 0);
//! assert_eq!(frame.len(), 6);
//!
//! // Check a response that has already been read off the wire
//! let header = [7, 0x00, protocol.commands.ping, 0, 0];
//! let response = decode_response(&header, &[], 7 ^ protocol.commands.ping)?;
//! assert!(response.status().is_ok(&protocol.status));
//! # Ok::<(), sensorbus_protocol::ProtocolError>(())
//! ```

mod commands;
mod constants;
mod error;
mod frame;
mod status;

pub use commands::*;
pub use constants::*;
pub use error::*;
pub use frame::*;
pub use status::*;
