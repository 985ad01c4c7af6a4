//! Bus master for RS-485 sensor hub boards.
//!
//! The host sends fixed 6-byte command frames to addressed boards and reads
//! back checksummed, variable-length responses. This crate provides:
//!
//! - [`BusMaster`]: one request in flight at a time, typed board and sensor
//!   operations, host-side config and payload-mask caches
//! - [`StreamScheduler`]: a worker thread polling sensors on their own periods
//! - [`SensorBackend`]: the Idle / Discovery / Streaming mode machine
//! - [`Transport`]: the byte pipe, with a serial implementation and a scripted
//!   [`MockTransport`] for tests
//!
//! # Example
//!
//! ```rust
//! use sensorbus_master::{BusMaster, MockTransport, PortSettings, TransportSession};
//! use sensorbus_protocol::{ProtocolConfig, ResponseFrame, StatusCode};
//! use sensorbus_registry::SensorRegistry;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let protocol = Arc::new(ProtocolConfig::default());
//! let constants = protocol.constants;
//! let bus = MockTransport::new(constants.sof_marker, move |frame| {
//!     let response = ResponseFrame::new(frame.board_id, frame.addr, frame.command, StatusCode(0), vec![])
//!         .ok()?;
//!     Some(response.encode(&constants))
//! });
//!
//! let settings = PortSettings::new("sim", 115_200, Duration::from_millis(20));
//! let master = BusMaster::new(
//!     TransportSession::with_transport(settings, bus),
//!     protocol,
//!     Arc::new(SensorRegistry::default()),
//! );
//! assert_eq!(master.ping(4)?, StatusCode(0));
//! # Ok::<(), sensorbus_master::MasterError>(())
//! ```

mod backend;
mod cache;
mod config;
mod engine;
mod error;
mod scheduler;
mod session;
pub mod transport;

pub use backend::{Discovery, Mode, SensorBackend, SensorInfo};
pub use cache::FieldCache;
pub use config::MasterConfig;
pub use engine::{BoardHandle, BusMaster};
pub use error::{MasterError, Result};
pub use scheduler::{ErrorCallback, SampleCallback, StreamScheduler, Subscription};
pub use session::{Connector, PortSettings, TransportSession};
pub use transport::{MockTransport, Responder, SerialTransport, Transport};
