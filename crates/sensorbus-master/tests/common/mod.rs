//! Simulated sensor hub boards behind a [`MockTransport`].

#![allow(dead_code)]

use parking_lot::Mutex;
use sensorbus_master::{BusMaster, MockTransport, PortSettings, TransportSession};
use sensorbus_protocol::{
    CommandFrame, ProtocolConfig, ResponseFrame, StatusCode, CMD_ADD_SENSOR,
    CMD_GET_PAYLOAD_MASK, CMD_LIST_SENSORS, CMD_PING, CMD_READ_SAMPLES, CMD_REMOVE_SENSOR,
    CMD_SET_PAYLOAD_MASK, STATUS_ERROR, STATUS_NOT_FOUND, STATUS_OK, STATUS_UNKNOWN_CMD,
};
use sensorbus_registry::{FieldDescriptor, SensorDescriptor, SensorRegistry};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

pub const SOF: u8 = 0xAA;
pub const INA219: u8 = 1;

/// One sensor on a simulated board.
#[derive(Debug, Clone, Default)]
pub struct SimSensor {
    pub type_code: u8,
    /// Config registers keyed by getter command code.
    pub registers: HashMap<u8, u8>,
    pub mask: u8,
    /// Bytes returned by every `READ_SAMPLES`.
    pub samples: Vec<u8>,
    /// How long a `READ_SAMPLES` takes to answer.
    pub read_delay: Duration,
}

impl SimSensor {
    pub fn ina219(period: u8) -> Self {
        SimSensor {
            type_code: INA219,
            registers: [(30, period), (31, 3), (32, 1)].into_iter().collect(),
            mask: 0b011,
            samples: Vec::new(),
            read_delay: Duration::ZERO,
        }
    }

    pub fn with_samples(mut self, samples: Vec<u8>) -> Self {
        self.samples = samples;
        self
    }

    pub fn without_register(mut self, getter: u8) -> Self {
        self.registers.remove(&getter);
        self
    }
}

/// One simulated board.
#[derive(Debug, Clone)]
pub struct SimBoard {
    pub ping_status: u8,
    pub sensors: BTreeMap<u8, SimSensor>,
    pub list_fails: bool,
    pub corrupt_checksum: bool,
}

impl SimBoard {
    pub fn new() -> Self {
        SimBoard {
            ping_status: STATUS_OK,
            sensors: BTreeMap::new(),
            list_fails: false,
            corrupt_checksum: false,
        }
    }

    pub fn with_ping_status(mut self, status: u8) -> Self {
        self.ping_status = status;
        self
    }

    pub fn with_sensor(mut self, addr: u8, sensor: SimSensor) -> Self {
        self.sensors.insert(addr, sensor);
        self
    }
}

/// A bus of simulated boards. Absent boards stay silent.
#[derive(Clone, Default)]
pub struct SimBus {
    boards: Arc<Mutex<BTreeMap<u8, SimBoard>>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_board(self, id: u8, board: SimBoard) -> Self {
        self.add_board(id, board);
        self
    }

    /// Plug in a board while the bus is running.
    pub fn add_board(&self, id: u8, board: SimBoard) {
        self.boards.lock().insert(id, board);
    }

    /// Change a board while the bus is running.
    pub fn update(&self, id: u8, f: impl FnOnce(&mut SimBoard)) {
        if let Some(board) = self.boards.lock().get_mut(&id) {
            f(board);
        }
    }

    pub fn board(&self, id: u8) -> Option<SimBoard> {
        self.boards.lock().get(&id).cloned()
    }

    pub fn transport(&self) -> MockTransport {
        let boards = Arc::clone(&self.boards);
        MockTransport::new(SOF, move |frame| respond(&boards, frame))
    }
}

fn respond(boards: &Mutex<BTreeMap<u8, SimBoard>>, frame: CommandFrame) -> Option<Vec<u8>> {
    let (status, payload, corrupt, delay) = {
        let mut boards = boards.lock();
        let board = boards.get_mut(&frame.board_id)?;
        let corrupt = board.corrupt_checksum;
        let mut delay = Duration::ZERO;
        let (status, payload) = handle(board, frame, &mut delay);
        (status, payload, corrupt, delay)
    };

    if !delay.is_zero() {
        std::thread::sleep(delay);
    }

    let response = ResponseFrame::new(
        frame.board_id,
        frame.addr,
        frame.command,
        StatusCode(status),
        payload,
    )
    .ok()?;
    let mut bytes = response.encode(&ProtocolConfig::default().constants);
    if corrupt {
        if let Some(last) = bytes.last_mut() {
            *last ^= 0x01;
        }
    }
    Some(bytes)
}

fn handle(board: &mut SimBoard, frame: CommandFrame, delay: &mut Duration) -> (u8, Vec<u8>) {
    match frame.command {
        CMD_PING => (board.ping_status, vec![]),
        CMD_LIST_SENSORS if board.list_fails => (STATUS_ERROR, vec![]),
        CMD_LIST_SENSORS => {
            let payload = board
                .sensors
                .iter()
                .flat_map(|(addr, sensor)| [sensor.type_code, *addr])
                .collect();
            (STATUS_OK, payload)
        }
        CMD_ADD_SENSOR => {
            board.sensors.insert(
                frame.addr,
                SimSensor {
                    type_code: frame.param,
                    ..Default::default()
                },
            );
            (STATUS_OK, vec![])
        }
        CMD_REMOVE_SENSOR => match board.sensors.remove(&frame.addr) {
            Some(_) => (STATUS_OK, vec![]),
            None => (STATUS_NOT_FOUND, vec![]),
        },
        command => {
            let Some(sensor) = board.sensors.get_mut(&frame.addr) else {
                return (STATUS_NOT_FOUND, vec![]);
            };
            match command {
                CMD_READ_SAMPLES => {
                    *delay = sensor.read_delay;
                    (STATUS_OK, sensor.samples.clone())
                }
                CMD_GET_PAYLOAD_MASK => (STATUS_OK, vec![sensor.mask]),
                CMD_SET_PAYLOAD_MASK => {
                    sensor.mask = frame.param;
                    (STATUS_OK, vec![])
                }
                20..=29 => {
                    sensor.registers.insert(command + 10, frame.param);
                    (STATUS_OK, vec![])
                }
                30..=39 => match sensor.registers.get(&command) {
                    Some(value) => (STATUS_OK, vec![*value]),
                    None => (STATUS_UNKNOWN_CMD, vec![]),
                },
                _ => (STATUS_UNKNOWN_CMD, vec![]),
            }
        }
    }
}

/// INA219 as the tests know it: three config fields and three payload fields.
pub fn registry(protocol: &ProtocolConfig) -> SensorRegistry {
    let ina219 = SensorDescriptor::new("INA219", 1)
        .with_config_field(
            FieldDescriptor::unsigned("period", 1)
                .with_commands(Some("CMD_GET_PERIOD"), Some("CMD_SET_PERIOD")),
        )
        .with_config_field(
            FieldDescriptor::unsigned("gain", 1)
                .with_commands(Some("CMD_GET_GAIN"), Some("CMD_SET_GAIN")),
        )
        .with_config_field(
            FieldDescriptor::unsigned("range", 1)
                .with_commands(Some("CMD_GET_RANGE"), Some("CMD_SET_RANGE")),
        )
        .with_config_field(FieldDescriptor::unsigned("shunt", 1).with_commands(None, Some("CMD_SET_SHUNT")))
        .with_payload_field(FieldDescriptor::unsigned("bus_voltage", 2))
        .with_payload_field(FieldDescriptor::signed("current", 2))
        .with_payload_field(FieldDescriptor::unsigned("power", 2))
        .with_default_bits(vec![0, 1]);
    SensorRegistry::new([ina219], protocol).expect("test registry is valid")
}

/// Route `tracing` output through the test harness. `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A bus master talking to `bus`, with a short read timeout.
pub fn master(bus: &SimBus) -> (Arc<BusMaster>, MockTransport) {
    init_tracing();
    let protocol = ProtocolConfig::default();
    let registry = registry(&protocol);
    let transport = bus.transport();
    let settings = PortSettings::new("sim", 115_200, Duration::from_millis(15));
    let master = BusMaster::new(
        TransportSession::with_transport(settings, transport.clone()),
        Arc::new(protocol),
        Arc::new(registry),
    );
    (Arc::new(master), transport)
}

/// Encode one INA219 record with bus voltage and current.
pub fn record(tick: u32, bus_voltage: u16, current: i16) -> Vec<u8> {
    let mut bytes = tick.to_be_bytes().to_vec();
    bytes.extend_from_slice(&bus_voltage.to_be_bytes());
    bytes.extend_from_slice(&current.to_be_bytes());
    bytes
}
