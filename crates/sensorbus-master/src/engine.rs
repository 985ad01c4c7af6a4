//! Command/response engine.
//!
//! The wire carries no request id, so a response can only be matched to its
//! request by there being nothing else in flight. [`BusMaster`] enforces
//! that with one lock held for the full round trip: clear stale input,
//! write the command, then read and verify the response.
//!
//! The config and mask caches live under the same lock.

use crate::cache::FieldCache;
use crate::config::MasterConfig;
use crate::error::{MasterError, Result};
use crate::session::{PortSettings, TransportSession};
use parking_lot::Mutex;
use sensorbus_metrics::{metric_defs, BusLabels};
use sensorbus_protocol::{
    decode_response, Command, CommandFrame, FrameStage, ProtocolConfig, ProtocolError,
    ResponseFrame, StatusCode, StatusKind, RESPONSE_HEADER_SIZE,
};
use sensorbus_registry::{FieldDescriptor, FieldValue, Record, SensorEntry, SensorRegistry};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

struct Inner {
    session: TransportSession,
    cache: FieldCache,
}

/// Bus master for one RS-485 segment.
///
/// Every method performs whole round trips under the session lock and may
/// be called from any thread.
pub struct BusMaster {
    protocol: Arc<ProtocolConfig>,
    registry: Arc<SensorRegistry>,
    inner: Mutex<Inner>,
}

impl BusMaster {
    /// Create a bus master on an open session.
    pub fn new(
        session: TransportSession,
        protocol: Arc<ProtocolConfig>,
        registry: Arc<SensorRegistry>,
    ) -> Self {
        BusMaster {
            protocol,
            registry,
            inner: Mutex::new(Inner {
                session,
                cache: FieldCache::new(),
            }),
        }
    }

    /// Open the serial port named in `config`.
    pub fn open_serial(
        config: &MasterConfig,
        protocol: Arc<ProtocolConfig>,
        registry: Arc<SensorRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let settings = PortSettings::new(&config.port, config.baud_rate, config.timeout());
        let session = TransportSession::serial(settings)?;
        Ok(Self::new(session, protocol, registry))
    }

    /// Protocol tables in use.
    pub fn protocol(&self) -> &Arc<ProtocolConfig> {
        &self.protocol
    }

    /// Sensor registry in use.
    pub fn registry(&self) -> &Arc<SensorRegistry> {
        &self.registry
    }

    /// Bind a board id for repeated calls.
    pub fn board(&self, board_id: u8) -> BoardHandle<'_> {
        BoardHandle {
            master: self,
            board_id,
        }
    }

    // ========================================================================
    // Round Trip
    // ========================================================================

    /// Send one command and return the verified response.
    ///
    /// A non-OK status is returned as part of the frame, not as an error.
    pub fn execute(&self, board_id: u8, addr: u8, command: u8, param: u8) -> Result<ResponseFrame> {
        let mut inner = self.inner.lock();
        self.round_trip(
            &mut inner.session,
            CommandFrame::new(board_id, addr, command, param),
        )
    }

    fn round_trip(
        &self,
        session: &mut TransportSession,
        request: CommandFrame,
    ) -> Result<ResponseFrame> {
        let labels = BusLabels::board(request.board_id)
            .with(&[("command", request.command.to_string())]);
        let bytes = request.encode(self.protocol.constants.sof_marker);

        session.clear_input()?;
        let started = Instant::now();
        session.write(&bytes)?;
        metrics::counter!(metric_defs::FRAMES_SENT.name, &labels).increment(1);
        trace!(board = request.board_id, tx = %hex::encode(bytes), "sent command");

        let result = self.read_response(session, &request);
        match &result {
            Ok(response) => {
                metrics::histogram!(metric_defs::ROUND_TRIP_TIME.name, &labels)
                    .record(started.elapsed().as_micros() as f64);
                trace!(
                    board = request.board_id,
                    status = %response.status(),
                    payload = %hex::encode(&response.payload),
                    "received response"
                );
            }
            Err(e) if e.is_timeout() => {
                metrics::counter!(metric_defs::FRAMES_TIMEOUTS.name, &labels).increment(1);
            }
            Err(e) if e.is_checksum() => {
                metrics::counter!(metric_defs::FRAMES_CHECKSUM_ERRORS.name, &labels).increment(1);
                debug!(board = request.board_id, "discarding response: {}", e);
            }
            Err(MasterError::Protocol(e)) => {
                metrics::counter!(metric_defs::FRAMES_PROTOCOL_ERRORS.name, &labels).increment(1);
                debug!(board = request.board_id, "discarding response: {}", e);
            }
            Err(_) => {}
        }
        result
    }

    fn read_response(
        &self,
        session: &mut TransportSession,
        request: &CommandFrame,
    ) -> Result<ResponseFrame> {
        let constants = &self.protocol.constants;

        let skipped = session.read_until_marker(constants.sof_marker)?;
        if skipped > 0 {
            debug!(board = request.board_id, "skipped {} bytes before start marker", skipped);
        }

        // From here on a frame has started; running out of time means it was cut short.
        let header = session
            .read_exact(RESPONSE_HEADER_SIZE)
            .map_err(|e| truncated(e, FrameStage::Header))?;
        let length = header[RESPONSE_HEADER_SIZE - 1] as usize;
        let payload = session
            .read_exact(length)
            .map_err(|e| truncated(e, FrameStage::Payload))?;
        let checksum = session
            .read_exact(constants.checksum_length)
            .map_err(|e| truncated(e, FrameStage::Checksum))?;

        let response = decode_response(&header, &payload, checksum[0])?;
        if response.header.board_id != request.board_id
            || response.header.command != request.command
        {
            return Err(ProtocolError::UnexpectedEcho {
                board_id: response.header.board_id,
                command: response.header.command,
                expected_board: request.board_id,
                expected_command: request.command,
            }
            .into());
        }
        Ok(response)
    }

    fn send(
        &self,
        inner: &mut Inner,
        board_id: u8,
        addr: u8,
        command: Command,
    ) -> Result<ResponseFrame> {
        let frame = command.frame(board_id, addr, &self.protocol.commands);
        self.round_trip(&mut inner.session, frame)
    }

    fn require_ok(&self, response: &ResponseFrame, command: &str) -> Result<()> {
        if response.status().is_ok(&self.protocol.status) {
            Ok(())
        } else {
            Err(MasterError::DeviceStatus {
                command: command.to_string(),
                status: response.status(),
            })
        }
    }

    // ========================================================================
    // Board Operations
    // ========================================================================

    /// Ping a board and return its status.
    pub fn ping(&self, board_id: u8) -> Result<StatusCode> {
        let mut inner = self.inner.lock();
        Ok(self.send(&mut inner, board_id, 0, Command::Ping)?.status())
    }

    /// Ping every board id in `range`, in ascending order, and return those
    /// that answered.
    ///
    /// A board that answers OK or NOT_FOUND is present. Silence means absent;
    /// so does any other failure, which is logged.
    pub fn scan(&self, range: RangeInclusive<u8>) -> Vec<u8> {
        let mut found = Vec::new();
        for board_id in range {
            match self.ping(board_id) {
                Ok(status) => match status.kind(&self.protocol.status) {
                    StatusKind::Ok | StatusKind::NotFound => found.push(board_id),
                    kind => debug!(board = board_id, "ping answered with {}, skipping", kind),
                },
                Err(e) if e.is_timeout() => trace!(board = board_id, "no answer"),
                Err(e) => warn!(board = board_id, "ping failed: {}", e),
            }
        }

        debug!("scan found {} boards: {:?}", found.len(), found);
        metrics::gauge!(metric_defs::SCAN_BOARDS_FOUND.name).set(found.len() as f64);
        found
    }

    /// List the sensors attached to a board as `(name, address)` pairs.
    ///
    /// Type codes missing from the registry are named `unknown(<code>)`.
    pub fn list_sensors(&self, board_id: u8) -> Result<Vec<(String, u8)>> {
        let response = {
            let mut inner = self.inner.lock();
            self.send(&mut inner, board_id, 0, Command::ListSensors)?
        };
        self.require_ok(&response, "list_sensors")?;

        if response.payload.len() % 2 != 0 {
            return Err(ProtocolError::LengthMismatch {
                declared: response.payload.len() + 1,
                actual: response.payload.len(),
            }
            .into());
        }

        Ok(response
            .payload
            .chunks_exact(2)
            .map(|pair| (self.registry.name_from_type(u16::from(pair[0])), pair[1]))
            .collect())
    }

    /// Attach a sensor of the named type at `addr`.
    pub fn add_sensor(&self, board_id: u8, addr: u8, sensor: &str) -> Result<StatusCode> {
        let entry = self.registry.sensor(sensor)?;
        let type_code =
            u8::try_from(entry.type_code()).map_err(|_| MasterError::TypeCodeOutOfRange {
                sensor: entry.name().to_string(),
                type_code: entry.type_code(),
            })?;

        let mut inner = self.inner.lock();
        Ok(self
            .send(&mut inner, board_id, addr, Command::AddSensor { type_code })?
            .status())
    }

    /// Detach the sensor at `addr`.
    pub fn remove_sensor(&self, board_id: u8, addr: u8) -> Result<StatusCode> {
        let mut inner = self.inner.lock();
        Ok(self
            .send(&mut inner, board_id, addr, Command::RemoveSensor)?
            .status())
    }

    /// Run any named command from the protocol's command table.
    pub fn send_command(
        &self,
        board_id: u8,
        addr: u8,
        name: &str,
        param: u8,
    ) -> Result<ResponseFrame> {
        let code = self
            .protocol
            .commands
            .lookup(name)
            .ok_or_else(|| MasterError::UnknownCommand(name.to_string()))?;
        self.execute(board_id, addr, code, param)
    }

    // ========================================================================
    // Config Fields
    // ========================================================================

    /// Read a config field, from the cache when possible.
    pub fn get_config_field(
        &self,
        board_id: u8,
        addr: u8,
        sensor: &str,
        field: &str,
    ) -> Result<FieldValue> {
        let entry = self.registry.sensor(sensor)?;
        let mut inner = self.inner.lock();
        self.fetch_config_field(&mut inner, board_id, addr, entry, field)
    }

    fn fetch_config_field(
        &self,
        inner: &mut Inner,
        board_id: u8,
        addr: u8,
        entry: &SensorEntry,
        field: &str,
    ) -> Result<FieldValue> {
        let config_field = entry.config_field(field)?;
        if let Some(value) = inner.cache.config(board_id, addr, entry.name(), field) {
            return Ok(value.clone());
        }

        let getter = config_field.getter().ok_or_else(|| MasterError::NoGetter {
            sensor: entry.name().to_string(),
            field: field.to_string(),
        })?;
        let response = self.send(inner, board_id, addr, Command::Raw { code: getter, param: 0 })?;
        self.require_ok(&response, field)?;

        let descriptor = config_field.descriptor();
        let len = descriptor.byte_len();
        if response.payload.len() < len {
            return Err(ProtocolError::LengthMismatch {
                declared: len,
                actual: response.payload.len(),
            }
            .into());
        }

        let value = descriptor.decode_value(&response.payload[..len]);
        inner
            .cache
            .store_config(board_id, addr, entry.name(), field, value.clone());
        Ok(value)
    }

    /// Write a config field. The cache is updated only if the board
    /// answers OK.
    pub fn set_config_field(
        &self,
        board_id: u8,
        addr: u8,
        sensor: &str,
        field: &str,
        value: i64,
    ) -> Result<StatusCode> {
        let entry = self.registry.sensor(sensor)?;
        let config_field = entry.config_field(field)?;
        let setter = config_field.setter().ok_or_else(|| MasterError::NoSetter {
            sensor: entry.name().to_string(),
            field: field.to_string(),
        })?;
        let param = setter_param(config_field.descriptor(), value)?;

        let mut inner = self.inner.lock();
        let status = self
            .send(&mut inner, board_id, addr, Command::Raw { code: setter, param })?
            .status();
        if status.is_ok(&self.protocol.status) {
            inner
                .cache
                .store_config(board_id, addr, entry.name(), field, FieldValue::Scalar(value));
        }
        Ok(status)
    }

    /// Read every config field that has a getter, in declaration order.
    ///
    /// Stops at the first failure.
    pub fn get_all_config_fields(
        &self,
        board_id: u8,
        addr: u8,
        sensor: &str,
    ) -> Result<Vec<(String, FieldValue)>> {
        let entry = self.registry.sensor(sensor)?;
        let mut inner = self.inner.lock();
        entry
            .config_fields()
            .iter()
            .filter(|field| field.getter().is_some())
            .map(|field| {
                let value = self.fetch_config_field(&mut inner, board_id, addr, entry, field.name())?;
                Ok((field.name().to_string(), value))
            })
            .collect()
    }

    // ========================================================================
    // Payload Masks And Samples
    // ========================================================================

    /// Read a sensor's payload mask, from the cache when possible.
    pub fn get_payload_mask(&self, board_id: u8, addr: u8) -> Result<u8> {
        let mut inner = self.inner.lock();
        self.fetch_payload_mask(&mut inner, board_id, addr)
    }

    fn fetch_payload_mask(&self, inner: &mut Inner, board_id: u8, addr: u8) -> Result<u8> {
        if let Some(mask) = inner.cache.mask(board_id, addr) {
            return Ok(mask);
        }

        let response = self.send(inner, board_id, addr, Command::GetPayloadMask)?;
        self.require_ok(&response, "get_payload_mask")?;
        let mask = *response.payload.first().ok_or(ProtocolError::LengthMismatch {
            declared: 1,
            actual: 0,
        })?;

        inner.cache.store_mask(board_id, addr, mask);
        Ok(mask)
    }

    /// Replace a sensor's payload mask. The cache is updated only if the
    /// board answers OK.
    pub fn set_payload_mask(&self, board_id: u8, addr: u8, mask: u8) -> Result<StatusCode> {
        let mut inner = self.inner.lock();
        let status = self
            .send(&mut inner, board_id, addr, Command::SetPayloadMask { mask })?
            .status();
        if status.is_ok(&self.protocol.status) {
            inner.cache.store_mask(board_id, addr, mask);
        }
        Ok(status)
    }

    /// Drain and decode the queued samples of one sensor.
    ///
    /// Without an explicit `mask` the cached (or freshly read) payload mask
    /// is used. The mask is resolved before the samples are drained.
    pub fn read_samples(
        &self,
        board_id: u8,
        addr: u8,
        sensor: &str,
        mask: Option<u8>,
    ) -> Result<Vec<Record>> {
        let entry = self.registry.sensor(sensor)?;
        let mut inner = self.inner.lock();

        let mask = match mask {
            Some(mask) => mask,
            None => self.fetch_payload_mask(&mut inner, board_id, addr)?,
        };
        let response = self.send(&mut inner, board_id, addr, Command::ReadSamples)?;
        drop(inner);

        self.require_ok(&response, "read_samples")?;
        Ok(entry.decode(&response.payload, mask, self.protocol.constants.tick_bytes))
    }

    // ========================================================================
    // Port Settings
    // ========================================================================

    /// Current port settings.
    pub fn settings(&self) -> PortSettings {
        self.inner.lock().session.settings().clone()
    }

    /// Close the port and reopen on another device.
    pub fn set_port(&self, path: impl Into<String>) -> Result<()> {
        self.inner.lock().session.set_path(path)
    }

    /// Change the line speed in place.
    pub fn set_baud_rate(&self, baud_rate: u32) -> Result<()> {
        self.inner.lock().session.set_baud_rate(baud_rate)
    }

    /// Change the read timeout in place.
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        self.inner.lock().session.set_timeout(timeout)
    }
}

fn truncated(err: MasterError, stage: FrameStage) -> MasterError {
    if err.is_timeout() {
        ProtocolError::Truncated(stage).into()
    } else {
        err
    }
}

/// A [`BusMaster`] with the board id filled in.
#[derive(Clone, Copy)]
pub struct BoardHandle<'a> {
    master: &'a BusMaster,
    board_id: u8,
}

impl BoardHandle<'_> {
    /// Bound board id.
    pub fn id(&self) -> u8 {
        self.board_id
    }

    /// See [`BusMaster::ping`].
    pub fn ping(&self) -> Result<StatusCode> {
        self.master.ping(self.board_id)
    }

    /// See [`BusMaster::list_sensors`].
    pub fn list_sensors(&self) -> Result<Vec<(String, u8)>> {
        self.master.list_sensors(self.board_id)
    }

    /// See [`BusMaster::add_sensor`].
    pub fn add_sensor(&self, addr: u8, sensor: &str) -> Result<StatusCode> {
        self.master.add_sensor(self.board_id, addr, sensor)
    }

    /// See [`BusMaster::remove_sensor`].
    pub fn remove_sensor(&self, addr: u8) -> Result<StatusCode> {
        self.master.remove_sensor(self.board_id, addr)
    }

    /// See [`BusMaster::get_config_field`].
    pub fn get_config_field(&self, addr: u8, sensor: &str, field: &str) -> Result<FieldValue> {
        self.master.get_config_field(self.board_id, addr, sensor, field)
    }

    /// See [`BusMaster::set_config_field`].
    pub fn set_config_field(
        &self,
        addr: u8,
        sensor: &str,
        field: &str,
        value: i64,
    ) -> Result<StatusCode> {
        self.master
            .set_config_field(self.board_id, addr, sensor, field, value)
    }

    /// See [`BusMaster::get_all_config_fields`].
    pub fn get_all_config_fields(&self, addr: u8, sensor: &str) -> Result<Vec<(String, FieldValue)>> {
        self.master.get_all_config_fields(self.board_id, addr, sensor)
    }

    /// See [`BusMaster::get_payload_mask`].
    pub fn get_payload_mask(&self, addr: u8) -> Result<u8> {
        self.master.get_payload_mask(self.board_id, addr)
    }

    /// See [`BusMaster::set_payload_mask`].
    pub fn set_payload_mask(&self, addr: u8, mask: u8) -> Result<StatusCode> {
        self.master.set_payload_mask(self.board_id, addr, mask)
    }

    /// See [`BusMaster::read_samples`].
    pub fn read_samples(&self, addr: u8, sensor: &str, mask: Option<u8>) -> Result<Vec<Record>> {
        self.master.read_samples(self.board_id, addr, sensor, mask)
    }

    /// See [`BusMaster::send_command`].
    pub fn send_command(&self, addr: u8, name: &str, param: u8) -> Result<ResponseFrame> {
        self.master.send_command(self.board_id, addr, name, param)
    }
}

/// Encode a setter value into the one-byte command parameter.
///
/// Signed fields take `-128..=127` as two's complement, unsigned ones
/// `0..=255`.
fn setter_param(descriptor: &FieldDescriptor, value: i64) -> Result<u8> {
    let param = if descriptor.signed {
        i8::try_from(value).map(|v| v as u8).ok()
    } else {
        u8::try_from(value).ok()
    };
    param.ok_or_else(|| MasterError::ValueOutOfRange {
        field: descriptor.name.clone(),
        value,
    })
}
