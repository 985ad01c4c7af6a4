//! Runtime configuration for the bus master.
//!
//! Loaded from YAML or built in code:
//!
//! ```yaml
//! port: /dev/ttyUSB0
//! baud_rate: 115200
//! timeout_ms: 50
//! scan_start: 1
//! scan_end: 32
//! ```

use crate::error::{MasterError, Result};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

/// Configuration for a [`crate::SensorBackend`] and the bus it drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Serial device path (e.g. `/dev/ttyUSB0`, `COM3`).
    pub port: String,

    /// Line speed. The bus runs 8N1 without flow control.
    pub baud_rate: u32,

    /// How long a single read may wait for bytes (milliseconds).
    /// A board that stays silent this long is treated as absent.
    pub timeout_ms: u64,

    /// First board id probed by discovery.
    pub scan_start: u8,

    /// Last board id probed by discovery (inclusive).
    pub scan_end: u8,

    /// Floor on a subscription's poll interval (milliseconds).
    pub min_poll_interval_ms: u64,

    /// Poll period, in 100 ms ticks, for sensors without a readable period.
    pub default_period_ticks: u32,

    /// Config field holding a sensor's sampling period.
    pub period_field: String,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            timeout_ms: 50,
            scan_start: 1,
            scan_end: 255,
            min_poll_interval_ms: 100,
            default_period_ticks: 10,
            period_field: "period".to_string(),
        }
    }
}

impl MasterConfig {
    /// Create a config for the given serial port.
    pub fn new(port: impl Into<String>) -> Self {
        MasterConfig {
            port: port.into(),
            ..Default::default()
        }
    }

    /// Parse a YAML document. Missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: MasterConfig =
            serde_yaml::from_str(yaml).map_err(|e| MasterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the line speed.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the board range probed by discovery.
    pub fn with_scan_range(mut self, range: RangeInclusive<u8>) -> Self {
        self.scan_start = *range.start();
        self.scan_end = *range.end();
        self
    }

    /// Set the poll interval floor.
    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the fallback poll period in 100 ms ticks.
    pub fn with_default_period_ticks(mut self, ticks: u32) -> Self {
        self.default_period_ticks = ticks;
        self
    }

    /// Read timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Boards probed by discovery.
    pub fn scan_range(&self) -> RangeInclusive<u8> {
        self.scan_start..=self.scan_end
    }

    /// Poll interval floor as a duration.
    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }

    /// Check for values the bus cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.port.is_empty() {
            return Err(MasterError::Config("port must not be empty".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(MasterError::Config("baud_rate must be positive".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(MasterError::Config("timeout_ms must be positive".to_string()));
        }
        if self.scan_start > self.scan_end {
            return Err(MasterError::Config(format!(
                "scan range {}..={} is empty",
                self.scan_start, self.scan_end
            )));
        }
        Ok(())
    }
}
