//! Backend mode state machine.
//!
//! Ties the engine and the streaming scheduler together behind three modes:
//!
//! ```text
//! Idle ──► Discovery ──► Streaming
//!   ▲          │             │
//!   └──────────┴─────────────┘
//! ```
//!
//! Entering Discovery (again) runs a fresh scan. Leaving Streaming stops
//! the worker before the mode changes.

use crate::config::MasterConfig;
use crate::engine::BusMaster;
use crate::error::{MasterError, Result};
use crate::scheduler::{ErrorCallback, SampleCallback, StreamScheduler, Subscription};
use parking_lot::Mutex;
use sensorbus_protocol::ProtocolConfig;
use sensorbus_registry::{FieldValue, SensorRegistry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One period tick on the boards.
const PERIOD_TICK: Duration = Duration::from_millis(100);

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Mode {
    /// Nothing running.
    Idle,
    /// Last action was a discovery scan.
    Discovery,
    /// The worker is polling subscriptions.
    Streaming,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Idle => write!(f, "idle"),
            Mode::Discovery => write!(f, "discovery"),
            Mode::Streaming => write!(f, "streaming"),
        }
    }
}

/// A sensor found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorInfo {
    /// Registered name, or `unknown(<code>)`.
    pub name: String,
    /// Address on the board.
    pub address: u8,
    /// Config fields that could be read, in declaration order.
    pub config: Vec<(String, FieldValue)>,
}

impl SensorInfo {
    /// Look up a config value by field name.
    pub fn config_value(&self, field: &str) -> Option<&FieldValue> {
        self.config
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }
}

/// Discovery result: sensors per responding board, in ascending board order.
pub type Discovery = BTreeMap<u8, Vec<SensorInfo>>;

struct BackendState {
    mode: Mode,
    /// A `start_streaming` call is discovering the bus with the lock released.
    /// Clearing it cancels that start.
    starting: bool,
    scheduler: StreamScheduler,
}

/// Owns the bus master and drives discovery and streaming.
pub struct SensorBackend {
    master: Arc<BusMaster>,
    config: MasterConfig,
    state: Mutex<BackendState>,
}

impl SensorBackend {
    /// Create a backend around an existing master.
    pub fn new(master: Arc<BusMaster>, config: MasterConfig) -> Self {
        let scheduler = StreamScheduler::new(Arc::clone(&master));
        SensorBackend {
            master,
            config,
            state: Mutex::new(BackendState {
                mode: Mode::Idle,
                starting: false,
                scheduler,
            }),
        }
    }

    /// Open the configured serial port and create a backend on it.
    pub fn open(
        config: MasterConfig,
        protocol: Arc<ProtocolConfig>,
        registry: Arc<SensorRegistry>,
    ) -> Result<Self> {
        let master = BusMaster::open_serial(&config, protocol, registry)?;
        Ok(Self::new(Arc::new(master), config))
    }

    /// Report failed polls to `callback`.
    pub fn with_error_callback(self, callback: ErrorCallback) -> Self {
        self.state.lock().scheduler.set_error_callback(Some(callback));
        self
    }

    /// The bus master, for direct commands.
    pub fn master(&self) -> &Arc<BusMaster> {
        &self.master
    }

    /// Runtime configuration.
    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        self.state.lock().mode
    }

    /// Subscriptions of the current (or last) streaming session.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.state.lock().scheduler.subscriptions().to_vec()
    }

    /// Switch mode.
    ///
    /// Entering Discovery returns the scan result. Streaming needs a
    /// callback, so it can only be entered through [`start_streaming`];
    /// asking for it here is accepted only when already streaming.
    ///
    /// [`start_streaming`]: SensorBackend::start_streaming
    pub fn set_mode(&self, mode: Mode) -> Result<Option<Discovery>> {
        {
            let mut state = self.state.lock();
            if mode == Mode::Streaming {
                return if state.mode == Mode::Streaming || state.starting {
                    Ok(None)
                } else {
                    Err(MasterError::Config(
                        "streaming must be started with a sample callback".to_string(),
                    ))
                };
            }

            state.starting = false;
            if state.mode == Mode::Streaming {
                state.scheduler.stop();
            }
            if state.mode != mode {
                info!("mode {} -> {}", state.mode, mode);
            }
            state.mode = mode;
        }

        Ok(match mode {
            Mode::Discovery => Some(self.discover()),
            _ => None,
        })
    }

    /// Scan the bus and describe every sensor found.
    ///
    /// Never fails: a board whose sensor list cannot be read is reported with
    /// no sensors, and a config field that cannot be read is left out.
    pub fn discover(&self) -> Discovery {
        let mut discovery = Discovery::new();

        for board_id in self.master.scan(self.config.scan_range()) {
            let sensors = match self.master.list_sensors(board_id) {
                Ok(sensors) => sensors,
                Err(e) => {
                    warn!(board = board_id, "listing sensors failed: {}", e);
                    Vec::new()
                }
            };

            let infos = sensors
                .into_iter()
                .map(|(name, address)| {
                    let config = self.read_config(board_id, address, &name);
                    SensorInfo {
                        name,
                        address,
                        config,
                    }
                })
                .collect::<Vec<_>>();

            debug!(board = board_id, "discovered {} sensors", infos.len());
            discovery.insert(board_id, infos);
        }

        discovery
    }

    fn read_config(&self, board_id: u8, address: u8, sensor: &str) -> Vec<(String, FieldValue)> {
        let Some(entry) = self.master.registry().get(sensor) else {
            return Vec::new();
        };

        entry
            .config_fields()
            .iter()
            .filter(|field| field.getter().is_some())
            .filter_map(|field| {
                match self
                    .master
                    .get_config_field(board_id, address, sensor, field.name())
                {
                    Ok(value) => Some((field.name().to_string(), value)),
                    Err(e) => {
                        warn!(
                            board = board_id,
                            address,
                            "reading {}.{} failed: {}",
                            sensor,
                            field.name(),
                            e
                        );
                        None
                    }
                }
            })
            .collect()
    }

    /// Poll interval for a discovered sensor.
    ///
    /// The period field counts board ticks of 100 ms. Missing or
    /// non-numeric periods use the configured default; the result is never
    /// shorter than the configured minimum.
    fn poll_interval(&self, sensor: &SensorInfo) -> Duration {
        let ticks = sensor
            .config_value(&self.config.period_field)
            .and_then(FieldValue::as_scalar)
            .unwrap_or(i64::from(self.config.default_period_ticks));
        let ticks = u32::try_from(ticks.max(0)).unwrap_or(u32::MAX);
        (PERIOD_TICK * ticks).max(self.config.min_poll_interval())
    }

    /// Discover the bus, subscribe to every sensor found and start polling.
    ///
    /// Does nothing if already streaming or starting. The scan runs without
    /// holding the backend state, so [`mode`] and [`subscriptions`] answer
    /// meanwhile; a [`stop_streaming`] or [`set_mode`] issued during the scan
    /// cancels the start.
    ///
    /// [`mode`]: SensorBackend::mode
    /// [`subscriptions`]: SensorBackend::subscriptions
    /// [`stop_streaming`]: SensorBackend::stop_streaming
    /// [`set_mode`]: SensorBackend::set_mode
    pub fn start_streaming(&self, callback: SampleCallback) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.mode == Mode::Streaming || state.starting {
                return Ok(());
            }
            state.starting = true;
        }

        let subscriptions: Vec<Subscription> = self
            .discover()
            .into_iter()
            .flat_map(|(board_id, sensors)| sensors.into_iter().map(move |s| (board_id, s)))
            .map(|(board_id, sensor)| {
                let interval = self.poll_interval(&sensor);
                Subscription::new(board_id, sensor.address, sensor.name, interval)
            })
            .collect();

        let mut state = self.state.lock();
        if !state.starting {
            debug!("streaming start cancelled during discovery");
            return Ok(());
        }
        state.starting = false;

        state.scheduler.clear_subscriptions();
        for subscription in subscriptions {
            state.scheduler.subscribe(subscription);
        }
        state.scheduler.start(callback)?;
        info!("mode {} -> {}", state.mode, Mode::Streaming);
        state.mode = Mode::Streaming;
        Ok(())
    }

    /// Stop polling and return to Idle. Also cancels a start that is still
    /// discovering. Does nothing otherwise.
    pub fn stop_streaming(&self) {
        let mut state = self.state.lock();
        state.starting = false;
        if state.mode == Mode::Streaming {
            state.scheduler.stop();
            state.mode = Mode::Idle;
            info!("mode {} -> {}", Mode::Streaming, Mode::Idle);
        }
    }
}
