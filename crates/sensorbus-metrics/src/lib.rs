//! Metrics for the RS-485 sensor bus master.
//!
//! This crate declares every metric the bus master records as a structured
//! [`Metric`] constant, and provides label helpers for board and sensor
//! scoped series. It re-exports the `metrics` crate so callers record through
//! the same facade.
//!
//! Nothing here installs a recorder. Without one, every macro call is a no-op.
//!
//! # Example
//!
//! ```rust
//! use sensorbus_metrics::{metric_defs, BusLabels};
//!
//! let labels = BusLabels::board(3).with_sensor("ina219", 0x40);
//! metrics::counter!(metric_defs::STREAM_POLLS.name, &labels.to_labels()).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// Counter, gauge or histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Only ever increases.
    Counter,
    /// Last value wins.
    Gauge,
    /// Distribution of observations.
    Histogram,
}

/// A metric name together with what exporters should say about it.
///
/// ```rust
/// use sensorbus_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const LATENCY: Metric = Metric::histogram("sensorbus.example_us", "Example latency")
///     .in_units(Unit::Microseconds)
///     .labelled(&["board"]);
///
/// assert_eq!(LATENCY.kind, MetricKind::Histogram);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// Series name, e.g. `sensorbus.frames.sent`.
    pub name: &'static str,
    /// How the series is recorded.
    pub kind: MetricKind,
    /// One-line description.
    pub description: &'static str,
    /// Unit of the recorded values. Counts unless stated otherwise.
    pub unit: Unit,
    /// Label keys every sample of this series carries.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind, description: &'static str) -> Self {
        Metric {
            name,
            kind,
            description,
            unit: Unit::Count,
            labels: &[],
        }
    }

    /// Declare a counter.
    pub const fn counter(name: &'static str, description: &'static str) -> Self {
        Self::new(name, MetricKind::Counter, description)
    }

    /// Declare a gauge.
    pub const fn gauge(name: &'static str, description: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge, description)
    }

    /// Declare a histogram.
    pub const fn histogram(name: &'static str, description: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram, description)
    }

    /// Record values in `unit` instead of plain counts.
    pub const fn in_units(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    /// Declare the label keys.
    pub const fn labelled(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Hand the unit and description to the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => {
                describe_counter!(self.name, self.unit, self.description);
            }
            MetricKind::Gauge => {
                describe_gauge!(self.name, self.unit, self.description);
            }
            MetricKind::Histogram => {
                describe_histogram!(self.name, self.unit, self.description);
            }
        }
    }
}

/// Every series the bus master records.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Label keys of per-request series.
    pub const BOARD_LABELS: &[&str] = &["board", "command"];

    /// Label keys of per-sensor series.
    pub const SENSOR_LABELS: &[&str] = &["board", "sensor", "address"];

    // Frame layer, one sample per request.

    /// Command frames written to the bus.
    pub const FRAMES_SENT: Metric =
        Metric::counter("sensorbus.frames.sent", "Command frames written to the bus")
            .labelled(BOARD_LABELS);

    /// Requests that got no start marker within the timeout.
    pub const FRAMES_TIMEOUTS: Metric = Metric::counter(
        "sensorbus.frames.timeouts",
        "Requests with no response before the timeout",
    )
    .labelled(BOARD_LABELS);

    /// Responses rejected by the XOR check.
    pub const FRAMES_CHECKSUM_ERRORS: Metric = Metric::counter(
        "sensorbus.frames.checksum_errors",
        "Responses that failed checksum verification",
    )
    .labelled(BOARD_LABELS);

    /// Truncated responses, wrong echoes and other violations.
    pub const FRAMES_PROTOCOL_ERRORS: Metric = Metric::counter(
        "sensorbus.frames.protocol_errors",
        "Responses that violated the frame protocol",
    )
    .labelled(BOARD_LABELS);

    /// Time from writing a command to verifying its response.
    pub const ROUND_TRIP_TIME: Metric =
        Metric::histogram("sensorbus.round_trip_us", "Command round trip time")
            .in_units(Unit::Microseconds)
            .labelled(BOARD_LABELS);

    // Streaming, one sample per poll.

    /// Streaming polls attempted.
    pub const STREAM_POLLS: Metric =
        Metric::counter("sensorbus.stream.polls", "Streaming polls attempted")
            .labelled(SENSOR_LABELS);

    /// Streaming polls that raised an error.
    pub const STREAM_POLL_FAILURES: Metric =
        Metric::counter("sensorbus.stream.poll_failures", "Streaming polls that failed")
            .labelled(SENSOR_LABELS);

    /// Sample records delivered to the streaming callback.
    pub const STREAM_RECORDS: Metric = Metric::counter(
        "sensorbus.stream.records",
        "Sample records delivered to subscribers",
    )
    .labelled(SENSOR_LABELS);

    /// Boards that answered the most recent scan.
    pub const SCAN_BOARDS_FOUND: Metric = Metric::gauge(
        "sensorbus.scan.boards_found",
        "Boards present in the most recent scan",
    );

    /// Every definition above.
    pub const ALL: &[&Metric] = &[
        &FRAMES_SENT,
        &FRAMES_TIMEOUTS,
        &FRAMES_CHECKSUM_ERRORS,
        &FRAMES_PROTOCOL_ERRORS,
        &ROUND_TRIP_TIME,
        &STREAM_POLLS,
        &STREAM_POLL_FAILURES,
        &STREAM_RECORDS,
        &SCAN_BOARDS_FOUND,
    ];
}

/// Labels identifying a board, and optionally one sensor on it.
///
/// ```rust
/// use sensorbus_metrics::BusLabels;
///
/// let labels = BusLabels::board(2).with_sensor("ina219", 0x40);
/// assert!(labels.to_labels().contains(&("address", "64".to_string())));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusLabels {
    /// Board id.
    pub board: u8,
    /// Sensor name and address, for sensor-scoped series.
    pub sensor: Option<(String, u8)>,
}

impl BusLabels {
    /// Labels for a board-scoped series.
    pub fn board(board: u8) -> Self {
        BusLabels {
            board,
            sensor: None,
        }
    }

    /// Narrow the labels to one sensor on the board.
    pub fn with_sensor(mut self, name: impl Into<String>, address: u8) -> Self {
        self.sensor = Some((name.into(), address));
        self
    }

    /// Label pairs in the form the `metrics` macros take.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        let mut labels = vec![("board", self.board.to_string())];
        if let Some((name, address)) = &self.sensor {
            labels.push(("sensor", name.clone()));
            labels.push(("address", address.to_string()));
        }
        labels
    }

    /// Label pairs plus `extra`.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Describe every bus metric to the installed recorder.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    metric_defs::ALL.iter().for_each(|metric| metric.describe());
}
