//! Error types for the sensor registry.

use thiserror::Error;

/// Errors raised while building or querying the sensor registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No descriptor with this name.
    #[error("unknown sensor: {0}")]
    UnknownSensor(String),

    /// The sensor has no config field with this name.
    #[error("sensor {sensor} has no config field {field}")]
    UnknownField {
        /// Sensor name.
        sensor: String,
        /// Requested field.
        field: String,
    },

    /// A field names a getter or setter missing from the command table.
    #[error("field {sensor}.{field} refers to unknown command {command}")]
    UnknownCommand {
        /// Sensor name.
        sensor: String,
        /// Field name.
        field: String,
        /// Command name as written in the descriptor.
        command: String,
    },

    /// A field descriptor cannot be decoded.
    #[error("invalid field {sensor}.{field}: {reason}")]
    InvalidField {
        /// Sensor name.
        sensor: String,
        /// Field name.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Two descriptors share a name.
    #[error("duplicate sensor: {0}")]
    DuplicateSensor(String),

    /// Two descriptors share a type code.
    #[error("duplicate sensor type code: {0}")]
    DuplicateTypeCode(u16),

    /// The protocol tables have no type code for this sensor.
    #[error("no type code for sensor {0}")]
    MissingTypeCode(String),

    /// A descriptor could not be parsed.
    #[error("JSON error: {0}")]
    Json(String),
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
