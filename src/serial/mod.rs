//! # Serial Communication Module
//!
//! Handles the serial link to the ESP32/ICM20948 device.
//!
//! This module handles:
//! - Opening the serial port with 8-N-1 framing and waiting out device boot
//! - Assembling incoming bytes into `\n` terminated frames
//! - Bounded-time writes for outgoing commands
//! - The reader thread and the hand-off queue it feeds
//!
//! The port sits behind a mutex that is only held for operations that return
//! promptly (reading bytes already received, a write bounded by its timeout,
//! a buffer clear), so the reader thread and the command path never wait on
//! each other for long.

pub mod port_trait;
pub mod queue;
pub mod reader;
pub mod simulator;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::io;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, ReadError, WriteError};
use port_trait::{HardwarePort, SerialPortIO};

/// Default baud rate of the device firmware
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Time the device needs to boot after the port is opened (opening toggles DTR,
/// which resets the ESP32)
pub const DEVICE_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Sleep between polls for new bytes inside `read_line`
const READ_POLL_STEP: Duration = Duration::from_millis(5);

/// Largest chunk read from the port in one go
const READ_CHUNK_SIZE: usize = 1024;

/// A partial line longer than this is handed out as-is
pub const MAX_LINE_LENGTH: usize = 4096;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl ConnectionState {
    /// Whether `self -> to` is a legal transition
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Closing)
                | (Closing, Disconnected)
        )
    }
}

/// Whether an I/O error means the device or link is gone
pub fn is_fatal_io(err: &io::Error) -> bool {
    use io::ErrorKind::*;
    if matches!(
        err.kind(),
        PermissionDenied
            | BrokenPipe
            | NotConnected
            | ConnectionAborted
            | ConnectionReset
            | UnexpectedEof
            | NotFound
    ) {
        return true;
    }
    let message = err.to_string().to_lowercase();
    ["access is denied", "invalid handle", "no such device"]
        .iter()
        .any(|needle| message.contains(needle))
}

fn is_transient_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

fn read_error(err: io::Error) -> ReadError {
    ReadError::Io {
        fatal: is_fatal_io(&err),
        message: err.to_string(),
    }
}

fn write_error(err: io::Error) -> WriteError {
    if err.kind() == io::ErrorKind::TimedOut {
        return WriteError::Timeout;
    }
    WriteError::Io {
        fatal: is_fatal_io(&err),
        message: err.to_string(),
    }
}

/// Map a `serialport` open failure onto the connection error taxonomy
///
/// A port held by another process shows up as "Device or resource busy" on
/// Linux and as "Access is denied" on Windows.
fn classify_open_error(path: &str, err: &serialport::Error) -> ConnectionError {
    let description = err.description.to_lowercase();
    if description.contains("busy") || description.contains("access is denied") {
        return ConnectionError::Busy(path.to_string());
    }
    match err.kind() {
        serialport::ErrorKind::NoDevice
        | serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
            ConnectionError::NotFound(path.to_string())
        }
        _ => ConnectionError::Io(format!("Failed to open {}: {}", path, err)),
    }
}

/// Port handle and the bytes read from it that do not form a line yet
///
/// Kept under one lock so clearing input can never interleave with a read
/// that is still moving bytes into the line buffer.
struct LinkIo {
    /// `None` once closed
    port: Option<Box<dyn SerialPortIO>>,
    pending: BytesMut,
}

impl LinkIo {
    /// Move bytes already received by the port into the line buffer
    fn fill(&mut self) -> Result<usize, ReadError> {
        let port = self.port.as_mut().ok_or_else(|| ReadError::Io {
            message: "port closed".to_string(),
            fatal: true,
        })?;

        let available = match port.bytes_to_read() {
            Ok(n) => n,
            Err(e) if is_transient_io(&e) => return Ok(0),
            Err(e) => return Err(read_error(e)),
        };
        if available == 0 {
            return Ok(0);
        }

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let want = available.min(READ_CHUNK_SIZE);
        let n = match port.read(&mut chunk[..want]) {
            Ok(n) => n,
            Err(e) if is_transient_io(&e) => return Ok(0),
            Err(e) => return Err(read_error(e)),
        };

        self.pending.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn take_line(&mut self) -> Option<Bytes> {
        if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut frame = self.pending.split_to(pos + 1);
            frame.truncate(pos);
            return Some(frame.freeze());
        }
        if self.pending.len() >= MAX_LINE_LENGTH {
            debug!("Line exceeded {} bytes without terminator", MAX_LINE_LENGTH);
            return Some(self.pending.split().freeze());
        }
        None
    }
}

/// Serial link to the IMU device
///
/// Shared between the session (writes, lifecycle) and the reader thread
/// (`read_line`) behind an `Arc`.
pub struct SerialLink {
    io: Mutex<LinkIo>,
    state: Mutex<ConnectionState>,
    /// Device path (e.g., /dev/ttyUSB0)
    device_path: String,
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("device_path", &self.device_path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SerialLink {
    /// Open the serial port and wait for the device to boot
    ///
    /// Blocks for [`DEVICE_SETTLE_DELAY`] after a successful open.
    ///
    /// # Errors
    ///
    /// - `Busy` if another process holds the port
    /// - `NotFound` if there is no device at `path`
    /// - `Io` for any other failure
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use imu_link::serial::SerialLink;
    ///
    /// let link = SerialLink::open("/dev/ttyUSB0", 115_200)?;
    /// assert!(link.is_connected());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, ConnectionError> {
        debug!("Opening serial port {} at {} baud", path, baud_rate);
        let port = Self::open_port(path, baud_rate)?;
        Self::from_port(Box::new(HardwarePort::new(port)), path, DEVICE_SETTLE_DELAY)
    }

    /// Open a specific serial port with 8-N-1 settings
    fn open_port(
        path: &str,
        baud_rate: u32,
    ) -> Result<Box<dyn serialport::SerialPort>, ConnectionError> {
        serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| {
                let err = classify_open_error(path, &e);
                warn!("Failed to open {}: {}", path, e);
                err
            })
    }

    /// Wrap an already opened port
    ///
    /// Resets both port buffers, then waits `settle` before the link reports
    /// `Connected`.
    pub fn from_port(
        mut port: Box<dyn SerialPortIO>,
        device_path: &str,
        settle: Duration,
    ) -> Result<Self, ConnectionError> {
        let state = ConnectionState::Connecting;
        debug!("{}: {:?}", device_path, state);

        port.clear_all().map_err(|e| {
            ConnectionError::Io(format!("Failed to reset buffers on {}: {}", device_path, e))
        })?;

        if !settle.is_zero() {
            debug!("Waiting {:?} for device on {} to boot", settle, device_path);
            thread::sleep(settle);
        }

        let link = Self {
            io: Mutex::new(LinkIo {
                port: Some(port),
                pending: BytesMut::with_capacity(MAX_LINE_LENGTH),
            }),
            state: Mutex::new(state),
            device_path: device_path.to_string(),
        };
        link.transition(ConnectionState::Connected);
        info!("Connected to IMU device at {}", device_path);
        Ok(link)
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Apply a state transition; illegal transitions are logged and ignored
    fn transition(&self, to: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if !state.can_transition_to(to) {
            warn!(
                "{}: ignoring illegal transition {:?} -> {:?}",
                self.device_path, *state, to
            );
            return false;
        }
        debug!("{}: {:?} -> {:?}", self.device_path, *state, to);
        *state = to;
        true
    }

    /// Read one `\n` terminated frame, waiting up to `timeout`
    ///
    /// The terminator is stripped. Returns `Ok(None)` if no complete line
    /// arrived in time; a zero timeout only looks at bytes already received.
    pub fn read_line(&self, timeout: Duration) -> Result<Option<Bytes>, ReadError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut io = self.io.lock();
                if let Some(frame) = io.take_line() {
                    return Ok(Some(frame));
                }
                if io.fill()? > 0 {
                    if let Some(frame) = io.take_line() {
                        return Ok(Some(frame));
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(READ_POLL_STEP.min(deadline - now));
        }
    }

    /// Write bytes to the device within `timeout`
    ///
    /// # Errors
    ///
    /// - `Timeout` if the write did not complete in time
    /// - `NotConnected` if the port is closed
    /// - `Io` for other failures, flagged fatal when the device is gone
    pub fn write(&self, data: &[u8], timeout: Duration) -> Result<usize, WriteError> {
        let mut io = self.io.lock();
        let port = io.port.as_mut().ok_or(WriteError::NotConnected)?;

        port.set_timeout(timeout).map_err(write_error)?;
        port.write_all(data).map_err(write_error)?;
        port.flush().map_err(write_error)?;

        debug!("Sent {} bytes to {}", data.len(), self.device_path);
        Ok(data.len())
    }

    /// Discard unread input, including any partially assembled line
    pub fn flush_input(&self) -> Result<(), WriteError> {
        let mut io = self.io.lock();
        let port = io.port.as_mut().ok_or(WriteError::NotConnected)?;
        port.clear_input().map_err(write_error)?;

        if !io.pending.is_empty() {
            debug!("Discarding {} buffered bytes", io.pending.len());
            io.pending.clear();
        }
        Ok(())
    }

    /// Mark the link as closing; the owner stops the reader before `close`
    pub fn begin_close(&self) -> bool {
        self.transition(ConnectionState::Closing)
    }

    /// Release the port handle
    pub fn close(&self) {
        if self.state() == ConnectionState::Connected {
            self.transition(ConnectionState::Closing);
        }
        {
            let mut io = self.io.lock();
            io.port.take();
            io.pending.clear();
        }
        if self.state() == ConnectionState::Closing {
            self.transition(ConnectionState::Disconnected);
            info!("Serial connection to {} closed", self.device_path);
        }
    }
}
