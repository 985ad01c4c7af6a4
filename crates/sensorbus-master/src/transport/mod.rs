//! Byte transports the bus master can drive.

use crate::error::Result;
use std::time::Duration;

mod mock;
mod serial;

pub use mock::{MockTransport, Responder};
pub use serial::SerialTransport;

/// A half-duplex byte stream to the bus.
pub trait Transport: Send {
    /// Read available bytes into `buffer`.
    ///
    /// Returns `Ok(0)` when nothing arrived within the transport's own read
    /// timeout; that is not an error at this level.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write all of `data`.
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Block until written data has left the host.
    fn flush(&mut self) -> Result<()>;

    /// Discard anything received but not yet read.
    fn clear_input(&mut self) -> Result<()>;

    /// Change the line speed without reopening.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Change the per-read timeout without reopening.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;
}
