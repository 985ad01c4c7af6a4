//! Protocol constants
//!
//! The firmware and host share one protocol description (`protocol.json` in
//! the firmware tree). The defaults below match the firmware's generated
//! `protocol.h`; a deployment with different values builds a
//! [`ProtocolConfig`] from its own description instead of editing constants.

use crate::error::{ProtocolError, Result};
use crate::status::{StatusCode, StatusKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Frame Layout
// ============================================================================

/// Default start-of-frame marker (0xAA).
pub const DEFAULT_SOF_MARKER: u8 = 170;
/// Default width of the sample tick that prefixes every record.
pub const DEFAULT_TICK_BYTES: usize = 4;
/// Default number of checksum bytes trailing a response.
pub const DEFAULT_CHECKSUM_LENGTH: usize = 1;
/// Command frames are always this long, marker and checksum included.
pub const COMMAND_FRAME_SIZE: usize = 6;
/// Response header length, not counting the start marker:
/// board_id, addr, command, status, length.
pub const RESPONSE_HEADER_SIZE: usize = 5;
/// The length byte caps a response payload.
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize;

// ============================================================================
// Command Codes (host → board)
// ============================================================================

/// Drain queued samples for one sensor.
pub const CMD_READ_SAMPLES: u8 = 0;
/// Attach a sensor of the given type code at an address.
pub const CMD_ADD_SENSOR: u8 = 1;
/// Detach the sensor at an address.
pub const CMD_REMOVE_SENSOR: u8 = 2;
/// Board liveness check.
pub const CMD_PING: u8 = 3;
/// List `(type_code, address)` pairs of attached sensors.
pub const CMD_LIST_SENSORS: u8 = 4;
/// Replace a sensor's payload mask.
pub const CMD_SET_PAYLOAD_MASK: u8 = 5;
/// Read a sensor's payload mask.
pub const CMD_GET_PAYLOAD_MASK: u8 = 6;
/// Generic configuration read.
pub const CMD_GET_CONFIG: u8 = 7;
/// Set the sampling period (100 ms units).
pub const CMD_SET_PERIOD: u8 = 20;
/// Set the amplifier gain code.
pub const CMD_SET_GAIN: u8 = 21;
/// Set the input range code.
pub const CMD_SET_RANGE: u8 = 22;
/// Set the calibration code.
pub const CMD_SET_CAL: u8 = 23;
/// Set the shunt resistor code.
pub const CMD_SET_SHUNT: u8 = 24;
/// Set the current LSB code.
pub const CMD_SET_CURRENT_LSB: u8 = 25;
/// Read the sampling period.
pub const CMD_GET_PERIOD: u8 = 30;
/// Read the gain code.
pub const CMD_GET_GAIN: u8 = 31;
/// Read the input range code.
pub const CMD_GET_RANGE: u8 = 32;
/// Read the calibration code.
pub const CMD_GET_CAL: u8 = 33;
/// Read the shunt resistor code.
pub const CMD_GET_SHUNT: u8 = 34;
/// Read the current LSB code.
pub const CMD_GET_CURRENT_LSB: u8 = 35;

// ============================================================================
// Status Codes (board → host)
// ============================================================================

/// Command succeeded.
pub const STATUS_OK: u8 = 0;
/// Command failed on the board.
pub const STATUS_ERROR: u8 = 1;
/// Board alive, addressed sensor absent.
pub const STATUS_NOT_FOUND: u8 = 2;
/// Command code not recognised.
pub const STATUS_UNKNOWN_CMD: u8 = 3;

// ============================================================================
// Sensor Type Codes
// ============================================================================

/// INA219 current/power monitor.
pub const SENSOR_TYPE_INA219: u16 = 1;

/// Fixed numbers that shape frames and sample records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConstants {
    /// Start-of-frame marker.
    #[serde(rename = "SOF_MARKER")]
    pub sof_marker: u8,
    /// Width of the big-endian tick prefixing each sample record.
    #[serde(rename = "TICK_BYTES")]
    pub tick_bytes: usize,
    /// Number of checksum bytes trailing a response. The XOR checksum is
    /// carried in the first of them.
    #[serde(rename = "CHECKSUM_LENGTH")]
    pub checksum_length: usize,
}

impl Default for ProtocolConstants {
    fn default() -> Self {
        ProtocolConstants {
            sof_marker: DEFAULT_SOF_MARKER,
            tick_bytes: DEFAULT_TICK_BYTES,
            checksum_length: DEFAULT_CHECKSUM_LENGTH,
        }
    }
}

impl ProtocolConstants {
    /// Check that the values describe a usable wire format.
    pub fn validate(&self) -> Result<()> {
        if !(1..=4).contains(&self.tick_bytes) {
            return Err(ProtocolError::InvalidConfig(format!(
                "TICK_BYTES must be 1..=4, got {}",
                self.tick_bytes
            )));
        }
        if self.checksum_length == 0 {
            return Err(ProtocolError::InvalidConfig(
                "CHECKSUM_LENGTH must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Command codes the host needs, plus every named command in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSet {
    /// `CMD_READ_SAMPLES`.
    pub read_samples: u8,
    /// `CMD_ADD_SENSOR`.
    pub add_sensor: u8,
    /// `CMD_REMOVE_SENSOR`.
    pub remove_sensor: u8,
    /// `CMD_PING`.
    pub ping: u8,
    /// `CMD_LIST_SENSORS`.
    pub list_sensors: u8,
    /// `CMD_SET_PAYLOAD_MASK`.
    pub set_payload_mask: u8,
    /// `CMD_GET_PAYLOAD_MASK`.
    pub get_payload_mask: u8,
    by_name: BTreeMap<String, u8>,
}

impl CommandSet {
    /// Build from a name → code table. The core commands must be present.
    pub fn from_table(table: BTreeMap<String, u8>) -> Result<Self> {
        let required = |name: &str| {
            table.get(name).copied().ok_or_else(|| {
                ProtocolError::InvalidConfig(format!("command table is missing {}", name))
            })
        };

        Ok(CommandSet {
            read_samples: required("CMD_READ_SAMPLES")?,
            add_sensor: required("CMD_ADD_SENSOR")?,
            remove_sensor: required("CMD_REMOVE_SENSOR")?,
            ping: required("CMD_PING")?,
            list_sensors: required("CMD_LIST_SENSORS")?,
            set_payload_mask: required("CMD_SET_PAYLOAD_MASK")?,
            get_payload_mask: required("CMD_GET_PAYLOAD_MASK")?,
            by_name: table,
        })
    }

    /// Look up a command code by name (e.g. `"CMD_GET_GAIN"`).
    pub fn lookup(&self, name: &str) -> Option<u8> {
        self.by_name.get(name).copied()
    }

    /// Find the name of a command code, if the table has one.
    pub fn name_of(&self, code: u8) -> Option<&str> {
        self.by_name
            .iter()
            .find(|(_, &c)| c == code)
            .map(|(name, _)| name.as_str())
    }

    /// Iterate over every named command.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.by_name.iter().map(|(name, &code)| (name.as_str(), code))
    }
}

impl Default for CommandSet {
    fn default() -> Self {
        let table: BTreeMap<String, u8> = [
            ("CMD_READ_SAMPLES", CMD_READ_SAMPLES),
            ("CMD_ADD_SENSOR", CMD_ADD_SENSOR),
            ("CMD_REMOVE_SENSOR", CMD_REMOVE_SENSOR),
            ("CMD_PING", CMD_PING),
            ("CMD_LIST_SENSORS", CMD_LIST_SENSORS),
            ("CMD_SET_PAYLOAD_MASK", CMD_SET_PAYLOAD_MASK),
            ("CMD_GET_PAYLOAD_MASK", CMD_GET_PAYLOAD_MASK),
            ("CMD_GET_CONFIG", CMD_GET_CONFIG),
            ("CMD_SET_PERIOD", CMD_SET_PERIOD),
            ("CMD_SET_GAIN", CMD_SET_GAIN),
            ("CMD_SET_RANGE", CMD_SET_RANGE),
            ("CMD_SET_CAL", CMD_SET_CAL),
            ("CMD_SET_SHUNT", CMD_SET_SHUNT),
            ("CMD_SET_CURRENT_LSB", CMD_SET_CURRENT_LSB),
            ("CMD_GET_PERIOD", CMD_GET_PERIOD),
            ("CMD_GET_GAIN", CMD_GET_GAIN),
            ("CMD_GET_RANGE", CMD_GET_RANGE),
            ("CMD_GET_CAL", CMD_GET_CAL),
            ("CMD_GET_SHUNT", CMD_GET_SHUNT),
            ("CMD_GET_CURRENT_LSB", CMD_GET_CURRENT_LSB),
        ]
        .into_iter()
        .map(|(name, code)| (name.to_string(), code))
        .collect();

        CommandSet {
            read_samples: CMD_READ_SAMPLES,
            add_sensor: CMD_ADD_SENSOR,
            remove_sensor: CMD_REMOVE_SENSOR,
            ping: CMD_PING,
            list_sensors: CMD_LIST_SENSORS,
            set_payload_mask: CMD_SET_PAYLOAD_MASK,
            get_payload_mask: CMD_GET_PAYLOAD_MASK,
            by_name: table,
        }
    }
}

/// Status byte meanings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCodes {
    /// `STATUS_OK`.
    pub ok: u8,
    /// `STATUS_NOT_FOUND`.
    pub not_found: u8,
    /// `STATUS_ERROR`, if the table defines it.
    pub error: Option<u8>,
    /// `STATUS_UNKNOWN_CMD`, if the table defines it.
    pub unknown_cmd: Option<u8>,
}

impl StatusCodes {
    /// Build from a name → code table. `STATUS_OK` and `STATUS_NOT_FOUND`
    /// must be present.
    pub fn from_table(table: &BTreeMap<String, u8>) -> Result<Self> {
        let required = |name: &str| {
            table.get(name).copied().ok_or_else(|| {
                ProtocolError::InvalidConfig(format!("status table is missing {}", name))
            })
        };

        Ok(StatusCodes {
            ok: required("STATUS_OK")?,
            not_found: required("STATUS_NOT_FOUND")?,
            error: table.get("STATUS_ERROR").copied(),
            unknown_cmd: table.get("STATUS_UNKNOWN_CMD").copied(),
        })
    }

    /// Map a raw status onto its meaning.
    pub fn classify(&self, status: StatusCode) -> StatusKind {
        let code = status.raw();
        if code == self.ok {
            StatusKind::Ok
        } else if code == self.not_found {
            StatusKind::NotFound
        } else if Some(code) == self.error {
            StatusKind::Error
        } else if Some(code) == self.unknown_cmd {
            StatusKind::UnknownCommand
        } else {
            StatusKind::Other(code)
        }
    }
}

impl Default for StatusCodes {
    fn default() -> Self {
        StatusCodes {
            ok: STATUS_OK,
            not_found: STATUS_NOT_FOUND,
            error: Some(STATUS_ERROR),
            unknown_cmd: Some(STATUS_UNKNOWN_CMD),
        }
    }
}

/// The complete protocol description shared by every component.
///
/// Build it once and share it (typically behind an `Arc`); nothing in the
/// workspace reads protocol values from global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Frame-shaping constants.
    pub constants: ProtocolConstants,
    /// Command codes.
    pub commands: CommandSet,
    /// Status codes.
    pub status: StatusCodes,
    /// Sensor name (lowercase) → type code.
    pub sensor_types: BTreeMap<String, u16>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            constants: ProtocolConstants::default(),
            commands: CommandSet::default(),
            status: StatusCodes::default(),
            sensor_types: [("ina219".to_string(), SENSOR_TYPE_INA219)]
                .into_iter()
                .collect(),
        }
    }
}

/// On-disk shape of `protocol.json`.
#[derive(Debug, Deserialize)]
struct ProtocolDocument {
    constants: ProtocolConstants,
    commands: BTreeMap<String, u8>,
    status_codes: BTreeMap<String, u8>,
    #[serde(default)]
    sensors: BTreeMap<String, u16>,
}

impl ProtocolConfig {
    /// Parse a protocol description in the `protocol.json` layout:
    ///
    /// ```json
    /// {
    ///   "constants":    { "SOF_MARKER": 170, "TICK_BYTES": 4, "CHECKSUM_LENGTH": 1 },
    ///   "commands":     { "CMD_PING": 3, "...": 0 },
    ///   "status_codes": { "STATUS_OK": 0, "STATUS_NOT_FOUND": 2 },
    ///   "sensors":      { "INA219": 1 }
    /// }
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let doc: ProtocolDocument =
            serde_json::from_str(json).map_err(|e| ProtocolError::Json(e.to_string()))?;
        doc.constants.validate()?;

        let status = StatusCodes::from_table(&doc.status_codes)?;
        let commands = CommandSet::from_table(doc.commands)?;
        let sensor_types = doc
            .sensors
            .into_iter()
            .map(|(name, code)| (name.to_lowercase(), code))
            .collect();

        Ok(ProtocolConfig {
            constants: doc.constants,
            commands,
            status,
            sensor_types,
        })
    }

    /// Type code for a sensor name (case-insensitive).
    pub fn sensor_type(&self, name: &str) -> Option<u16> {
        self.sensor_types.get(&name.to_lowercase()).copied()
    }
}
