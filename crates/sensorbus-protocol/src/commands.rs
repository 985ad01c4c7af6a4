//! Commands that can be sent to a sensor board.

use crate::constants::CommandSet;
use crate::frame::CommandFrame;

/// Commands that can be sent to a sensor board.
///
/// Configuration getters and setters are sensor-specific and resolved by
/// name through the sensor registry; they travel as [`Command::Raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Liveness check. Sent with address 0.
    Ping,

    /// List attached sensors as `(type_code, address)` pairs.
    ListSensors,

    /// Drain the queued samples of one sensor.
    ReadSamples,

    /// Attach a sensor at the frame's address.
    AddSensor {
        /// Sensor type code.
        type_code: u8,
    },

    /// Detach the sensor at the frame's address.
    RemoveSensor,

    /// Read the sensor's payload mask.
    GetPayloadMask,

    /// Replace the sensor's payload mask.
    SetPayloadMask {
        /// New mask; bit *i* selects payload field *i*.
        mask: u8,
    },

    /// Any other command code.
    Raw {
        /// Command code.
        code: u8,
        /// Parameter byte.
        param: u8,
    },
}

impl Command {
    /// Get the command code under the given command table.
    pub fn code(&self, commands: &CommandSet) -> u8 {
        match self {
            Command::Ping => commands.ping,
            Command::ListSensors => commands.list_sensors,
            Command::ReadSamples => commands.read_samples,
            Command::AddSensor { .. } => commands.add_sensor,
            Command::RemoveSensor => commands.remove_sensor,
            Command::GetPayloadMask => commands.get_payload_mask,
            Command::SetPayloadMask { .. } => commands.set_payload_mask,
            Command::Raw { code, .. } => *code,
        }
    }

    /// Get the parameter byte.
    pub fn param(&self) -> u8 {
        match self {
            Command::AddSensor { type_code } => *type_code,
            Command::SetPayloadMask { mask } => *mask,
            Command::Raw { param, .. } => *param,
            _ => 0,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::ListSensors => "list_sensors",
            Command::ReadSamples => "read_samples",
            Command::AddSensor { .. } => "add_sensor",
            Command::RemoveSensor => "remove_sensor",
            Command::GetPayloadMask => "get_payload_mask",
            Command::SetPayloadMask { .. } => "set_payload_mask",
            Command::Raw { .. } => "raw",
        }
    }

    /// Address this command to a board and sensor.
    pub fn frame(&self, board_id: u8, addr: u8, commands: &CommandSet) -> CommandFrame {
        CommandFrame::new(board_id, addr, self.code(commands), self.param())
    }
}
