//! Sensor Registry and Payload Decoder
//!
//! Sensors on the bus are described by metadata: which config fields they
//! have and which commands read and write them, and how the fields of a
//! sample record are laid out. This crate turns those descriptors into a
//! validated [`SensorRegistry`] and decodes `READ_SAMPLES` payloads into
//! [`Record`]s.
//!
//! # Example
//!
//! ```rust
//! use sensorbus_protocol::ProtocolConfig;
//! use sensorbus_registry::{FieldDescriptor, FieldValue, SensorDescriptor, SensorRegistry};
//!
//! let protocol = ProtocolConfig::default();
//! let probe = SensorDescriptor::new("probe", 9)
//!     .with_payload_field(FieldDescriptor::unsigned("measurement", 2));
//! let registry = SensorRegistry::new([probe], &protocol)?;
//!
//! let raw = [0, 0, 0, 5, 0xAA, 0xBB];
//! let records = registry.sensor("probe")?.decode(&raw, 0x01, protocol.constants.tick_bytes);
//! assert_eq!(records[0].tick, 5);
//! assert_eq!(records[0].get("measurement"), Some(&FieldValue::Scalar(0xAABB)));
//! # Ok::<(), sensorbus_registry::RegistryError>(())
//! ```

mod decode;
mod descriptor;
mod error;
mod registry;

pub use decode::*;
pub use descriptor::*;
pub use error::*;
pub use registry::*;
