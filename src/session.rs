//! # Session
//!
//! Owner of one device connection.
//!
//! A session holds the serial link, the reader thread, the hand-off queue and
//! all domain state (sample buffer, mirrored configuration, counters). Apart
//! from the reader thread everything runs on the caller's context through
//! [`Session::tick`], which never blocks on the queue and is scheduler
//! agnostic: call it every [`Session::next_tick_interval`].
//!
//! # Example
//!
//! ```no_run
//! use imu_link::config::Config;
//! use imu_link::session::Session;
//! # use imu_link::ingest::TelemetrySink;
//! # fn run(sink: &mut dyn TelemetrySink) -> Result<(), Box<dyn std::error::Error>> {
//!
//! let mut session = Session::connect(&Config::default())?;
//! session.start_streaming()?;
//! loop {
//!     session.tick(sink);
//!     std::thread::sleep(session.next_tick_interval());
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{CommandError, ConnectionError, ErrorKind};
use crate::ingest::buffer::TelemetryBuffer;
use crate::ingest::{IngestStats, IngestionLoop, TelemetrySink};
use crate::protocol::commands::{Command, Preset};
use crate::protocol::types::{DeviceConfig, Sensor};
use crate::serial::port_trait::SerialPortIO;
use crate::serial::queue::LineQueue;
use crate::serial::reader::{ReaderWorker, SHUTDOWN_GRACE};
use crate::serial::SerialLink;
use crate::sync::{CommandDispatcher, ConfigSync, SyncState};

/// One connection to an IMU device
#[derive(Debug)]
pub struct Session {
    link: Arc<SerialLink>,
    /// Fresh per connection so a detached reader can never feed a later session
    queue: Arc<LineQueue>,
    worker: ReaderWorker,
    dispatcher: CommandDispatcher,
    sync: ConfigSync,
    ingest: IngestionLoop,
    /// When the first `CONFIG` request is due; `None` once sent
    initial_request_at: Option<Instant>,
    connected: bool,
}

impl Session {
    /// Open the configured serial port and start the reader
    ///
    /// Blocks while the device boots after the port opens.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` fails validation, the
    /// [`ConnectionError`] from opening the port, or `Io` if the reader thread
    /// cannot be started.
    pub fn connect(config: &Config) -> Result<Self, ConnectionError> {
        check_config(config)?;
        let link = SerialLink::open(&config.serial.port, config.serial.baud_rate)?;
        Self::start(link, config)
    }

    /// Run a session over an already opened port (simulator, tests)
    ///
    /// `config.serial.port` is only used as the device name in logs.
    pub fn with_port(
        port: Box<dyn SerialPortIO>,
        config: &Config,
    ) -> Result<Self, ConnectionError> {
        check_config(config)?;
        let link = SerialLink::from_port(port, &config.serial.port, Duration::ZERO)?;
        Self::start(link, config)
    }

    fn start(link: SerialLink, config: &Config) -> Result<Self, ConnectionError> {
        let link = Arc::new(link);
        let queue = Arc::new(LineQueue::new(config.reader.queue_capacity));

        let settings = config.reader_settings();
        let worker = match ReaderWorker::spawn(Arc::clone(&link), Arc::clone(&queue), settings) {
            Ok(worker) => worker,
            Err(e) => {
                link.close();
                return Err(ConnectionError::Io(format!(
                    "Failed to start reader thread: {}",
                    e
                )));
            }
        };

        Ok(Self {
            dispatcher: CommandDispatcher::new(Arc::clone(&link), config.write_timeout()),
            sync: ConfigSync::new(config.config_timeout()),
            ingest: IngestionLoop::new(config.ingest_settings()),
            initial_request_at: Some(Instant::now() + config.initial_request_delay()),
            link,
            queue,
            worker,
            connected: true,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn device_path(&self) -> &str {
        self.link.device_path()
    }

    pub fn is_streaming(&self) -> bool {
        self.ingest.is_streaming()
    }

    /// Mirrored device configuration
    pub fn device_config(&self) -> &DeviceConfig {
        self.sync.config()
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }

    pub fn buffer(&self) -> &TelemetryBuffer {
        self.ingest.buffer()
    }

    pub fn clear_buffer(&mut self) {
        self.ingest.clear_buffer();
    }

    pub fn stats(&self) -> IngestStats {
        self.ingest.stats()
    }

    /// Lines the reader has queued since connecting
    pub fn lines_read(&self) -> u64 {
        self.worker.lines_read()
    }

    /// Commands written to the device since connecting
    pub fn commands_sent(&self) -> u64 {
        self.dispatcher.commands_sent()
    }

    /// How long the host should wait before the next [`tick`](Self::tick)
    pub fn next_tick_interval(&self) -> Duration {
        self.ingest.next_interval()
    }

    /// One cooperative step; see [`tick_at`](Self::tick_at)
    pub fn tick(&mut self, sink: &mut dyn TelemetrySink) {
        self.tick_at(Instant::now(), sink);
    }

    /// One cooperative step at `now`
    ///
    /// 1. A reader disconnect request or a fatal write ends the session with a
    ///    single `Connection` error
    /// 2. The initial `CONFIG` request goes out once due
    /// 3. Queued lines are ingested
    /// 4. An overdue `CONFIG` response is reported as a `Config` error
    pub fn tick_at(&mut self, now: Instant, sink: &mut dyn TelemetrySink) {
        if !self.connected {
            return;
        }

        let lost = self
            .worker
            .take_disconnect_request()
            .or_else(|| self.dispatcher.take_fatal());
        if let Some(reason) = lost {
            warn!("Connection to {} lost: {}", self.link.device_path(), reason);
            self.disconnect();
            sink.on_error(ErrorKind::Connection, &format!("Connection lost: {}", reason));
            return;
        }

        if self.initial_request_at.is_some_and(|at| now >= at) {
            self.initial_request_at = None;
            if let Err(e) = self.sync.request_refresh(now, &mut self.dispatcher) {
                sink.on_error(ErrorKind::Command, &format!("Config request failed: {}", e));
            }
        }

        self.ingest.tick_at(now, &self.queue, &mut self.sync, sink);

        if let Some(e) = self.sync.poll_timeout(now) {
            sink.on_error(ErrorKind::Config, &e.to_string());
        }
    }

    /// Send `START` and switch to the streaming cadence
    pub fn start_streaming(&mut self) -> Result<(), CommandError> {
        self.dispatcher.send(&Command::Start)?;
        self.ingest.set_streaming(true);
        info!("Streaming started");
        Ok(())
    }

    /// Leave the streaming cadence, then send `STOP`
    pub fn stop_streaming(&mut self) -> Result<(), CommandError> {
        self.ingest.set_streaming(false);
        self.dispatcher.send(&Command::Stop)?;
        info!("Streaming stopped");
        Ok(())
    }

    /// Ask the device for a fresh configuration snapshot
    pub fn request_config(&mut self) -> Result<(), CommandError> {
        self.sync.request_refresh(Instant::now(), &mut self.dispatcher)
    }

    /// Ask the device to scan its I2C bus
    pub fn scan(&mut self) -> Result<(), CommandError> {
        self.dispatcher.send(&Command::Scan).map(drop)
    }

    /// Ask the device for its command listing
    pub fn help(&mut self) -> Result<(), CommandError> {
        self.dispatcher.send(&Command::Help).map(drop)
    }

    pub fn set_accel_range(&mut self, range: u8) -> Result<(), CommandError> {
        self.sync.set_accel_range(&mut self.dispatcher, range)
    }

    pub fn set_gyro_range(&mut self, range: u8) -> Result<(), CommandError> {
        self.sync.set_gyro_range(&mut self.dispatcher, range)
    }

    pub fn set_mag_rate(&mut self, rate: u8) -> Result<(), CommandError> {
        self.sync.set_mag_rate(&mut self.dispatcher, rate)
    }

    pub fn set_sample_rate(&mut self, hz: u16) -> Result<(), CommandError> {
        self.sync.set_sample_rate(&mut self.dispatcher, hz)
    }

    pub fn set_sensor_enabled(
        &mut self,
        sensor: Sensor,
        enabled: bool,
    ) -> Result<(), CommandError> {
        self.sync.set_sensor_enabled(&mut self.dispatcher, sensor, enabled)
    }

    pub fn apply_preset(&mut self, preset: Preset) -> Result<(), CommandError> {
        self.sync.apply_preset(&mut self.dispatcher, preset)
    }

    /// Stop the reader and release the port
    ///
    /// Waits up to 0.5 s for the reader thread. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.ingest.set_streaming(false);

        self.link.begin_close();
        if !self.worker.stop(SHUTDOWN_GRACE) {
            warn!("Closing {} with the reader thread still running", self.link.device_path());
        }
        self.link.close();
        info!("Disconnected from {}", self.link.device_path());
    }
}

/// Reject settings the session cannot run with
fn check_config(config: &Config) -> Result<(), ConnectionError> {
    config
        .validate()
        .map_err(|e| ConnectionError::InvalidConfig(e.to_string()))
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}
