//! Periodic sample polling on a background thread.
//!
//! Each subscription is a job with its own interval. The worker keeps a
//! min-heap of due times, sleeps on the stop channel until the earliest one,
//! polls that sensor, hands the records to the callback and reschedules the
//! job one interval after it finished. Jobs never overlap: there is one
//! worker and every poll goes through the engine lock.

use crate::engine::BusMaster;
use crate::error::{MasterError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use sensorbus_metrics::{metric_defs, BusLabels};
use sensorbus_registry::Record;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// One sensor polled at a fixed interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Board the sensor is attached to.
    pub board_id: u8,
    /// Sensor address on the board.
    pub address: u8,
    /// Registered sensor name.
    pub sensor: String,
    /// Time between the end of one poll and the start of the next.
    pub interval: Duration,
}

impl Subscription {
    /// Create a subscription.
    pub fn new(board_id: u8, address: u8, sensor: impl Into<String>, interval: Duration) -> Self {
        Subscription {
            board_id,
            address,
            sensor: sensor.into(),
            interval,
        }
    }
}

/// Receives `(board_id, address, sensor, records)` after every successful poll.
///
/// Runs on the worker thread. It must not stop the scheduler that calls it.
pub type SampleCallback = Arc<dyn Fn(u8, u8, &str, &[Record]) + Send + Sync>;

/// Receives every failed poll.
pub type ErrorCallback = Arc<dyn Fn(&Subscription, &MasterError) + Send + Sync>;

struct Worker {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

/// Owns the subscriptions and the worker thread that polls them.
pub struct StreamScheduler {
    master: Arc<BusMaster>,
    subscriptions: Vec<Subscription>,
    on_error: Option<ErrorCallback>,
    worker: Option<Worker>,
}

impl StreamScheduler {
    /// Create an idle scheduler.
    pub fn new(master: Arc<BusMaster>) -> Self {
        StreamScheduler {
            master,
            subscriptions: Vec::new(),
            on_error: None,
            worker: None,
        }
    }

    /// Report failed polls to `callback` as well as the log.
    pub fn with_error_callback(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    /// Replace the error callback.
    pub fn set_error_callback(&mut self, callback: Option<ErrorCallback>) {
        self.on_error = callback;
    }

    /// Add a subscription. Takes effect the next time the worker starts.
    pub fn subscribe(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    /// Remove every subscription. The running worker keeps its own copy.
    pub fn clear_subscriptions(&mut self) {
        self.subscriptions.clear();
    }

    /// Current subscriptions.
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Whether the worker thread is running.
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Start polling. Does nothing if already running.
    pub fn start(&mut self, callback: SampleCallback) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let job = PollLoop {
            master: Arc::clone(&self.master),
            subscriptions: self.subscriptions.clone(),
            callback,
            on_error: self.on_error.clone(),
            stop_rx,
        };

        let thread = thread::Builder::new()
            .name("sensorbus-stream".to_string())
            .spawn(move || job.run())
            .map_err(|e| MasterError::WorkerSpawn(e.to_string()))?;

        info!("streaming {} subscriptions", self.subscriptions.len());
        self.worker = Some(Worker { stop_tx, thread });
        Ok(())
    }

    /// Stop polling and wait for the worker to exit.
    ///
    /// A poll already in progress finishes first. Does nothing if not running.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        // The worker may already be gone; joining is what matters.
        let _ = worker.stop_tx.send(());
        if worker.thread.join().is_err() {
            warn!("stream worker panicked");
        }
        info!("streaming stopped");
    }
}

impl Drop for StreamScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollLoop {
    master: Arc<BusMaster>,
    subscriptions: Vec<Subscription>,
    callback: SampleCallback,
    on_error: Option<ErrorCallback>,
    stop_rx: Receiver<()>,
}

impl PollLoop {
    fn run(self) {
        let start = Instant::now();
        let mut queue: BinaryHeap<Reverse<(Instant, usize)>> = (0..self.subscriptions.len())
            .map(|index| Reverse((start, index)))
            .collect();

        while let Some(Reverse((due, index))) = queue.pop() {
            if !self.wait_until(due) {
                return;
            }

            let subscription = &self.subscriptions[index];
            self.poll(subscription);
            queue.push(Reverse((Instant::now() + subscription.interval, index)));
        }

        // Nothing to poll: idle until told to stop.
        let _ = self.stop_rx.recv();
    }

    /// Sleep until `due`. Returns false once a stop has been requested.
    fn wait_until(&self, due: Instant) -> bool {
        let now = Instant::now();
        if due > now {
            match self.stop_rx.recv_timeout(due - now) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
        matches!(self.stop_rx.try_recv(), Err(TryRecvError::Empty))
    }

    fn poll(&self, subscription: &Subscription) {
        let labels = BusLabels::board(subscription.board_id)
            .with_sensor(subscription.sensor.as_str(), subscription.address)
            .to_labels();
        metrics::counter!(metric_defs::STREAM_POLLS.name, &labels).increment(1);

        match self.master.read_samples(
            subscription.board_id,
            subscription.address,
            &subscription.sensor,
            None,
        ) {
            Ok(records) => {
                trace!(
                    board = subscription.board_id,
                    address = subscription.address,
                    "{} records from {}",
                    records.len(),
                    subscription.sensor
                );
                metrics::counter!(metric_defs::STREAM_RECORDS.name, &labels)
                    .increment(records.len() as u64);
                (self.callback)(
                    subscription.board_id,
                    subscription.address,
                    &subscription.sensor,
                    &records,
                );
            }
            Err(e) => {
                metrics::counter!(metric_defs::STREAM_POLL_FAILURES.name, &labels).increment(1);
                if e.is_timeout() {
                    debug!(
                        board = subscription.board_id,
                        address = subscription.address,
                        "no answer polling {}",
                        subscription.sensor
                    );
                } else {
                    warn!(
                        board = subscription.board_id,
                        address = subscription.address,
                        "polling {} failed: {}",
                        subscription.sensor,
                        e
                    );
                }
                if let Some(on_error) = &self.on_error {
                    on_error(subscription, &e);
                }
            }
        }
    }
}
