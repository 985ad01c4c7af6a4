//! Transport session: one open connection plus the settings it was opened with.
//!
//! Reads here are deadline based. `read_exact` and `read_until_marker` each
//! get the full configured timeout, measured from when they start.

use crate::error::{MasterError, Result};
use crate::transport::{SerialTransport, Transport};
use std::time::{Duration, Instant};
use tracing::{info, trace};

/// How to reach the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    /// Device path.
    pub path: String,
    /// Line speed.
    pub baud_rate: u32,
    /// Read timeout.
    pub timeout: Duration,
}

impl PortSettings {
    /// Create port settings.
    pub fn new(path: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        PortSettings {
            path: path.into(),
            baud_rate,
            timeout,
        }
    }
}

/// Opens a transport for the given settings.
pub type Connector = Box<dyn Fn(&PortSettings) -> Result<Box<dyn Transport>> + Send>;

/// An open transport and the means to reopen it.
pub struct TransportSession {
    transport: Option<Box<dyn Transport>>,
    settings: PortSettings,
    connector: Connector,
}

impl TransportSession {
    /// Open a session using `connector`.
    pub fn open(settings: PortSettings, connector: Connector) -> Result<Self> {
        let transport = connector(&settings)?;
        Ok(TransportSession {
            transport: Some(transport),
            settings,
            connector,
        })
    }

    /// Open a session on a serial port.
    pub fn serial(settings: PortSettings) -> Result<Self> {
        Self::open(
            settings,
            Box::new(|s: &PortSettings| {
                let transport = SerialTransport::open(&s.path, s.baud_rate, s.timeout)?;
                Ok(Box::new(transport) as Box<dyn Transport>)
            }),
        )
    }

    /// Wrap an already open transport. Reopening hands back a clone of it.
    pub fn with_transport<T>(settings: PortSettings, transport: T) -> Self
    where
        T: Transport + Clone + 'static,
    {
        let template = transport.clone();
        TransportSession {
            transport: Some(Box::new(transport)),
            settings,
            connector: Box::new(move |_: &PortSettings| {
                Ok(Box::new(template.clone()) as Box<dyn Transport>)
            }),
        }
    }

    /// Current settings.
    pub fn settings(&self) -> &PortSettings {
        &self.settings
    }

    fn transport(&mut self) -> Result<&mut (dyn Transport + 'static)> {
        self.transport.as_deref_mut().ok_or_else(|| {
            MasterError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport is closed",
            ))
        })
    }

    /// Write a complete frame and flush it.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let transport = self.transport()?;
        transport.write_all(bytes)?;
        transport.flush()
    }

    /// Drop stale input left over from earlier exchanges.
    pub fn clear_input(&mut self) -> Result<()> {
        self.transport()?.clear_input()
    }

    /// Read exactly `n` bytes, or fail with [`MasterError::Timeout`].
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let timeout = self.settings.timeout;
        let deadline = Instant::now() + timeout;
        let transport = self.transport()?;

        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            filled += transport.read(&mut buf[filled..])?;
            if filled < n && Instant::now() >= deadline {
                trace!("read_exact timed out with {} of {} bytes", filled, n);
                return Err(MasterError::Timeout(timeout));
            }
        }
        Ok(buf)
    }

    /// Discard bytes until `marker` has been read.
    ///
    /// Returns how many bytes were skipped ahead of it.
    pub fn read_until_marker(&mut self, marker: u8) -> Result<usize> {
        let timeout = self.settings.timeout;
        let deadline = Instant::now() + timeout;
        let transport = self.transport()?;

        let mut byte = [0u8; 1];
        let mut skipped = 0;
        loop {
            if transport.read(&mut byte)? == 1 {
                if byte[0] == marker {
                    return Ok(skipped);
                }
                skipped += 1;
            }
            // Noise on the line must not extend the deadline.
            if Instant::now() >= deadline {
                trace!("no marker after skipping {} bytes", skipped);
                return Err(MasterError::Timeout(timeout));
            }
        }
    }

    /// Close the transport and reopen it on another device.
    ///
    /// The old transport is closed first. If the new one fails to open the
    /// session stays closed until the next successful `set_path`.
    pub fn set_path(&mut self, path: impl Into<String>) -> Result<()> {
        self.transport = None;
        self.settings.path = path.into();
        let transport = (self.connector)(&self.settings)?;
        self.transport = Some(transport);
        info!("reopened bus on {}", self.settings.path);
        Ok(())
    }

    /// Change the line speed of the open transport.
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.transport()?.set_baud_rate(baud_rate)?;
        self.settings.baud_rate = baud_rate;
        Ok(())
    }

    /// Change the read timeout of the open transport.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.transport()?.set_timeout(timeout)?;
        self.settings.timeout = timeout;
        Ok(())
    }
}
