//! Error types for the bus master.

use sensorbus_protocol::{ProtocolError, StatusCode};
use sensorbus_registry::RegistryError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while driving the bus.
#[derive(Error, Debug)]
pub enum MasterError {
    /// No start marker arrived within the configured window.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// A response arrived but was malformed or failed its checksum.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A well-formed response carried a status the operation cannot accept.
    #[error("{command} failed with status {status}")]
    DeviceStatus {
        /// Operation that was attempted.
        command: String,
        /// Status returned by the board.
        status: StatusCode,
    },

    /// Sensor metadata lookup failed.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The config field has no getter command.
    #[error("no getter for {sensor}.{field}")]
    NoGetter {
        /// Sensor name.
        sensor: String,
        /// Field name.
        field: String,
    },

    /// The config field has no setter command.
    #[error("no setter for {sensor}.{field}")]
    NoSetter {
        /// Sensor name.
        sensor: String,
        /// Field name.
        field: String,
    },

    /// The command table has no command with this name.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A value does not fit the one-byte parameter slot.
    #[error("value {value} for {field} does not fit in one byte")]
    ValueOutOfRange {
        /// Field or parameter name.
        field: String,
        /// Rejected value.
        value: i64,
    },

    /// A sensor type code does not fit the one-byte parameter slot.
    #[error("type code {type_code} of {sensor} does not fit in one byte")]
    TypeCodeOutOfRange {
        /// Sensor name.
        sensor: String,
        /// Type code from the registry.
        type_code: u16,
    },

    /// The serial port could not be opened or configured.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Reading or writing the transport failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The streaming worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
}

impl MasterError {
    /// Whether the board simply did not answer.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MasterError::Timeout(_))
    }

    /// Whether a response was received but failed its checksum.
    pub fn is_checksum(&self) -> bool {
        matches!(self, MasterError::Protocol(ProtocolError::Checksum { .. }))
    }
}

/// Result type for bus master operations.
pub type Result<T> = std::result::Result<T, MasterError>;
