//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and every field is optional; missing values fall back to the
//! `default_*` functions below, so an empty file is a valid configuration.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{ImuLinkError, Result};
use crate::ingest::IngestSettings;
use crate::serial::reader::ReaderSettings;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Time one read waits for a complete line
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Time one command write may take
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

/// Reader thread configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ReaderConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Capacity of the hand-off queue between reader and ingestion
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Ingestion loop configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct IngestConfig {
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    #[serde(default = "default_max_lines_per_tick")]
    pub max_lines_per_tick: usize,

    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,

    #[serde(default = "default_streaming_interval_ms")]
    pub streaming_interval_ms: u64,

    #[serde(default = "default_idle_emit_interval_ms")]
    pub idle_emit_interval_ms: u64,

    #[serde(default = "default_streaming_emit_interval_ms")]
    pub streaming_emit_interval_ms: u64,

    #[serde(default = "default_malformed_report_every")]
    pub malformed_report_every: u64,
}

/// Configuration round-trip settings
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SyncConfig {
    #[serde(default = "default_config_timeout_ms")]
    pub config_timeout_ms: u64,

    /// Delay after connecting before the first `CONFIG` request
    #[serde(default = "default_initial_request_delay_ms")]
    pub initial_request_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rolling log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_read_timeout_ms() -> u64 { 100 }
fn default_write_timeout_ms() -> u64 { 1000 }

fn default_poll_interval_ms() -> u64 { 20 }
fn default_queue_capacity() -> usize { 1000 }

fn default_buffer_capacity() -> usize { 500 }
fn default_max_lines_per_tick() -> usize { 10 }
fn default_idle_interval_ms() -> u64 { 100 }
fn default_streaming_interval_ms() -> u64 { 200 }
fn default_idle_emit_interval_ms() -> u64 { 100 }
fn default_streaming_emit_interval_ms() -> u64 { 200 }
fn default_malformed_report_every() -> u64 { 50 }

fn default_config_timeout_ms() -> u64 { 3000 }
fn default_initial_request_delay_ms() -> u64 { 1000 }

fn default_log_level() -> String { "info".to_string() }

/// Baud rates the firmware can be built for
const SUPPORTED_BAUD_RATES: [u32; 8] = [9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600];

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            max_lines_per_tick: default_max_lines_per_tick(),
            idle_interval_ms: default_idle_interval_ms(),
            streaming_interval_ms: default_streaming_interval_ms(),
            idle_emit_interval_ms: default_idle_emit_interval_ms(),
            streaming_emit_interval_ms: default_streaming_emit_interval_ms(),
            malformed_report_every: default_malformed_report_every(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            config_timeout_ms: default_config_timeout_ms(),
            initial_request_delay_ms: default_initial_request_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> ImuLinkError {
    ImuLinkError::Config(toml::de::Error::custom(message))
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(invalid(format!("{} must be between {} and {}", name, min, max)));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use imu_link::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {:?}",
                SUPPORTED_BAUD_RATES
            )));
        }

        check_range("read_timeout_ms", self.serial.read_timeout_ms, 1, 10000)?;
        check_range("write_timeout_ms", self.serial.write_timeout_ms, 1, 10000)?;
        check_range("poll_interval_ms", self.reader.poll_interval_ms, 1, 1000)?;

        if self.reader.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be greater than 0"));
        }

        if self.ingest.buffer_capacity == 0 {
            return Err(invalid("buffer_capacity must be greater than 0"));
        }

        if self.ingest.max_lines_per_tick == 0 {
            return Err(invalid("max_lines_per_tick must be greater than 0"));
        }

        for (name, value) in [
            ("idle_interval_ms", self.ingest.idle_interval_ms),
            ("streaming_interval_ms", self.ingest.streaming_interval_ms),
            ("idle_emit_interval_ms", self.ingest.idle_emit_interval_ms),
            ("streaming_emit_interval_ms", self.ingest.streaming_emit_interval_ms),
        ] {
            check_range(name, value, 1, 10000)?;
        }

        if self.ingest.malformed_report_every == 0 {
            return Err(invalid("malformed_report_every must be greater than 0"));
        }

        check_range("config_timeout_ms", self.sync.config_timeout_ms, 1, 60000)?;
        check_range("initial_request_delay_ms", self.sync.initial_request_delay_ms, 0, 60000)?;

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(format!("logging level must be one of: {}", LOG_LEVELS.join(", "))));
        }

        if matches!(&self.logging.log_dir, Some(dir) if dir.is_empty()) {
            return Err(invalid("log_dir cannot be empty when set"));
        }

        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.write_timeout_ms)
    }

    pub fn config_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.config_timeout_ms)
    }

    pub fn initial_request_delay(&self) -> Duration {
        Duration::from_millis(self.sync.initial_request_delay_ms)
    }

    /// Reader thread timing
    pub fn reader_settings(&self) -> ReaderSettings {
        ReaderSettings {
            poll_interval: Duration::from_millis(self.reader.poll_interval_ms),
            read_timeout: self.read_timeout(),
        }
    }

    /// Ingestion loop tuning
    pub fn ingest_settings(&self) -> IngestSettings {
        let ingest = &self.ingest;
        IngestSettings {
            buffer_capacity: ingest.buffer_capacity,
            max_lines_per_tick: ingest.max_lines_per_tick,
            idle_interval: Duration::from_millis(ingest.idle_interval_ms),
            streaming_interval: Duration::from_millis(ingest.streaming_interval_ms),
            idle_emit_interval: Duration::from_millis(ingest.idle_emit_interval_ms),
            streaming_emit_interval: Duration::from_millis(ingest.streaming_emit_interval_ms),
            malformed_report_every: ingest.malformed_report_every,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_default_config() {
        let config = create_valid_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.reader.queue_capacity, 1000);
        assert_eq!(config.ingest.buffer_capacity, 500);
        assert_eq!(config.sync.config_timeout_ms, 3000);
        assert!(config.logging.log_dir.is_none());
    }

    #[test]
    fn test_defaults_match_runtime_settings() {
        let config = create_valid_config();
        assert_eq!(config.ingest_settings(), IngestSettings::default());

        let reader = config.reader_settings();
        let defaults = ReaderSettings::default();
        assert_eq!(reader.poll_interval, defaults.poll_interval);
        assert_eq!(reader.read_timeout, defaults.read_timeout);
        assert_eq!(config.write_timeout(), crate::sync::dispatcher::DEFAULT_WRITE_TIMEOUT);
        assert_eq!(config.config_timeout(), crate::sync::DEFAULT_CONFIG_TIMEOUT);
    }

    #[test]
    fn test_empty_file_is_valid() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[serial]
port = "/dev/ttyACM1"
baud_rate = 921600

[ingest]
buffer_capacity = 2000

[logging]
level = "debug"
log_dir = "./logs"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyACM1");
        assert_eq!(config.serial.baud_rate, 921600);
        assert_eq!(config.serial.write_timeout_ms, 1000);
        assert_eq!(config.ingest.buffer_capacity, 2000);
        assert_eq!(config.ingest.max_lines_per_tick, 10);
        assert_eq!(config.logging.log_dir.as_deref(), Some("./logs"));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/imu-link.toml");
        assert!(matches!(result, Err(ImuLinkError::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = Config::from_toml("[serial\nport = ");
        assert!(matches!(result, Err(ImuLinkError::Config(_))));
    }

    #[test]
    fn test_wrong_field_type() {
        let result = Config::from_toml("[serial]\nbaud_rate = \"fast\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_error_in_file() {
        let result = Config::from_toml("[reader]\nqueue_capacity = 0\n");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("queue_capacity"));
    }

    #[test]
    fn test_empty_serial_port() {
        let mut config = create_valid_config();
        config.serial.port = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unsupported_baud_rate() {
        let mut config = create_valid_config();
        config.serial.baud_rate = 420000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_read_timeout_zero() {
        let mut config = create_valid_config();
        config.serial.read_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_write_timeout_too_high() {
        let mut config = create_valid_config();
        config.serial.write_timeout_ms = 10001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_interval_zero() {
        let mut config = create_valid_config();
        config.reader.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_buffer_capacity_zero() {
        let mut config = create_valid_config();
        config.ingest.buffer_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_lines_per_tick_zero() {
        let mut config = create_valid_config();
        config.ingest.max_lines_per_tick = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_streaming_interval_zero() {
        let mut config = create_valid_config();
        config.ingest.streaming_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_emit_interval_too_high() {
        let mut config = create_valid_config();
        config.ingest.idle_emit_interval_ms = 10001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_report_every_zero() {
        let mut config = create_valid_config();
        config.ingest.malformed_report_every = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_timeout_zero() {
        let mut config = create_valid_config();
        config.sync.config_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_initial_request_delay_zero_is_valid() {
        let mut config = create_valid_config();
        config.sync.initial_request_delay_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = create_valid_config();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_case_insensitive() {
        let mut config = create_valid_config();
        config.logging.level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_log_dir_when_set() {
        let mut config = create_valid_config();
        config.logging.log_dir = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_file_is_valid() {
        let config = Config::from_toml(include_str!("../config/default.toml")).unwrap();
        assert_eq!(config, Config::default());
    }
}
