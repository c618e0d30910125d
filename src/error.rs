//! # Error Types
//!
//! Custom error types for IMU Link using `thiserror`.
//!
//! Each pipeline stage has its own small enum so callers can match on exactly
//! the failures that stage can produce. [`ImuLinkError`] wraps the ones that
//! escape to the top level (configuration loading, connecting, commands).

use std::time::Duration;
use thiserror::Error;

/// Failure to open or keep a serial connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Port exists but is held by another process
    #[error("serial port {0} is busy (held by another process)")]
    Busy(String),

    /// No device at the given path
    #[error("serial port {0} not found")]
    NotFound(String),

    /// Any other I/O failure while opening or configuring the port
    #[error("serial I/O error: {0}")]
    Io(String),

    /// Settings rejected before the port was touched
    #[error("{0}")]
    InvalidConfig(String),
}

/// Failure to write bytes to the link
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The write did not complete within the requested timeout
    #[error("write timed out")]
    Timeout,

    /// The link has no open port
    #[error("not connected")]
    NotConnected,

    /// Other I/O failure; `fatal` is set when the device appears to be gone
    #[error("write failed: {message}")]
    Io { message: String, fatal: bool },
}

/// Failure to read from the link
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    /// I/O failure; `fatal` is set when the device appears to be gone
    #[error("read failed: {message}")]
    Io { message: String, fatal: bool },
}

impl ReadError {
    /// Whether this error means the device is gone
    pub fn is_fatal(&self) -> bool {
        match self {
            ReadError::Io { fatal, .. } => *fatal,
        }
    }
}

/// Failure to parse one protocol line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Wrong number of comma-separated fields
    #[error("expected {expected} fields, got {found}")]
    FieldCount { expected: usize, found: usize },

    /// A field that should be numeric is not
    #[error("invalid numeric value {value:?} for {field}")]
    NumericFormat { field: String, value: String },

    /// A configuration segment that is not a single `KEY=VALUE` pair
    #[error("malformed config pair {0:?}")]
    MalformedPair(String),

    /// A recognised configuration key carries a value outside its range
    #[error("value {value} out of range for {key}")]
    OutOfRange { key: String, value: i64 },
}

/// Failure of the configuration round trip
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No snapshot arrived before the deadline
    #[error("no CONFIG response within {0:?}")]
    Timeout(Duration),
}

/// Failure to deliver a command to the device
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Write did not complete in time
    #[error("command write timed out")]
    Timeout,

    /// No usable connection
    #[error("not connected")]
    NotConnected,

    /// I/O failure while writing
    #[error("command I/O error: {0}")]
    Io(String),

    /// Argument outside the device's accepted range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<WriteError> for CommandError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::Timeout => CommandError::Timeout,
            WriteError::NotConnected => CommandError::NotConnected,
            WriteError::Io { message, .. } => CommandError::Io(message),
        }
    }
}

/// Lines evicted from the hand-off queue because it was full
///
/// Non-fatal: the newest line is always admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("hand-off queue overflow, {dropped} oldest line(s) dropped")]
pub struct QueueOverflow {
    pub dropped: u64,
}

/// Category attached to error events delivered to a
/// [`TelemetrySink`](crate::ingest::TelemetrySink)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Parse,
    Config,
    Command,
    QueueOverflow,
}

/// Main error type for IMU Link
#[derive(Debug, Error)]
pub enum ImuLinkError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Connection errors
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Command errors
    #[error(transparent)]
    Command(#[from] CommandError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for IMU Link
pub type Result<T> = std::result::Result<T, ImuLinkError>;
