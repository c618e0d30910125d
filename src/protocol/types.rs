//! # Line Protocol Constants and Types
//!
//! Core definitions for the ICM20948 text line protocol.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Telemetry line prefix
pub const DATA_PREFIX: &str = "DATA:";

/// Configuration snapshot prefix
pub const CONFIG_PREFIX: &str = "CONFIG:";

/// Firmware debug text prefix
pub const DEBUG_PREFIX: &str = "DEBUG:";

/// Prefix of an I2C scan result line
pub const SCAN_PREFIX: &str = "I2C device found";

/// Marker of the firmware help listing
pub const HELP_MARKER: &str = "Available commands:";

/// Status vocabulary, matched case-insensitively anywhere in a line
pub const STATUS_KEYWORDS: &[&str] = &[
    "started", "stopped", "applied", "enabled", "disabled", "scanning", "rate set",
];

/// Number of comma-separated fields in a `DATA:` payload
/// (timestamp + 3 × accel + 3 × gyro + 3 × mag + temperature)
pub const TELEMETRY_FIELD_COUNT: usize = 11;

/// Highest accelerometer range index (±2g, ±4g, ±8g, ±16g)
pub const ACCEL_RANGE_MAX: u8 = 3;

/// Highest gyroscope range index (±250, ±500, ±1000, ±2000 °/s)
pub const GYRO_RANGE_MAX: u8 = 3;

/// Highest magnetometer mode index
/// (shutdown, single, 10Hz, 20Hz, 50Hz, 100Hz, 200Hz, 1Hz, reserved)
pub const MAG_RATE_MAX: u8 = 8;

/// Accepted sample rate range in Hz
pub const SAMPLE_RATE_MIN: u16 = 1;
pub const SAMPLE_RATE_MAX: u16 = 1000;

/// Three-axis reading
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// One decoded `DATA:` line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySample {
    /// Device clock in milliseconds
    pub device_timestamp: u32,

    /// Host arrival time of the line that carried the sample
    pub host_time: DateTime<Utc>,

    /// Accelerometer reading
    pub accel: Vec3,

    /// Gyroscope reading
    pub gyro: Vec3,

    /// Magnetometer reading
    pub mag: Vec3,

    /// Die temperature
    pub temperature: f32,
}

/// Sensor that can be switched on or off with `ENABLE_*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sensor {
    Accel,
    Gyro,
    Mag,
    Temp,
}

impl Sensor {
    /// Wire name used in `ENABLE_<NAME>=` commands
    pub fn wire_name(self) -> &'static str {
        match self {
            Sensor::Accel => "ACCEL",
            Sensor::Gyro => "GYRO",
            Sensor::Mag => "MAG",
            Sensor::Temp => "TEMP",
        }
    }
}

/// Host-side mirror of the device configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceConfig {
    pub accel_range: u8,
    pub gyro_range: u8,
    pub mag_rate: u8,
    pub sample_rate_hz: u16,
    pub enable_accel: bool,
    pub enable_gyro: bool,
    pub enable_mag: bool,
    pub enable_temp: bool,
}

impl Default for DeviceConfig {
    /// Firmware power-on configuration
    fn default() -> Self {
        Self {
            accel_range: 1,
            gyro_range: 0,
            mag_rate: 2,
            sample_rate_hz: 100,
            enable_accel: true,
            enable_gyro: true,
            enable_mag: true,
            enable_temp: true,
        }
    }
}

impl DeviceConfig {
    /// Overwrite every field present in `patch`, keep the rest
    pub fn apply(&mut self, patch: &ConfigPatch) {
        if let Some(v) = patch.accel_range {
            self.accel_range = v;
        }
        if let Some(v) = patch.gyro_range {
            self.gyro_range = v;
        }
        if let Some(v) = patch.mag_rate {
            self.mag_rate = v;
        }
        if let Some(v) = patch.sample_rate_hz {
            self.sample_rate_hz = v;
        }
        if let Some(v) = patch.enable_accel {
            self.enable_accel = v;
        }
        if let Some(v) = patch.enable_gyro {
            self.enable_gyro = v;
        }
        if let Some(v) = patch.enable_mag {
            self.enable_mag = v;
        }
        if let Some(v) = patch.enable_temp {
            self.enable_temp = v;
        }
    }

    /// Mutable access to a sensor's enable flag
    pub fn sensor_enabled_mut(&mut self, sensor: Sensor) -> &mut bool {
        match sensor {
            Sensor::Accel => &mut self.enable_accel,
            Sensor::Gyro => &mut self.enable_gyro,
            Sensor::Mag => &mut self.enable_mag,
            Sensor::Temp => &mut self.enable_temp,
        }
    }
}

/// Fields carried by one `CONFIG:` line; `None` for keys the line omitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigPatch {
    pub accel_range: Option<u8>,
    pub gyro_range: Option<u8>,
    pub mag_rate: Option<u8>,
    pub sample_rate_hz: Option<u16>,
    pub enable_accel: Option<bool>,
    pub enable_gyro: Option<bool>,
    pub enable_mag: Option<bool>,
    pub enable_temp: Option<bool>,
}

impl ConfigPatch {
    /// Whether the line carried no recognised key
    pub fn is_empty(&self) -> bool {
        *self == ConfigPatch::default()
    }
}

/// Kind of non-data text line, as reported to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// `DEBUG:` output from the firmware
    Debug,
    /// I2C scan result
    Scan,
    /// Help listing
    Help,
    /// Status message matching the status vocabulary
    Status,
    /// Anything else
    Message,
}

/// Classification of one decoded line
///
/// Payload slices borrow from the classified line; the `DATA:`/`CONFIG:`
/// prefixes are already stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    Telemetry(&'a str),
    ConfigSnapshot(&'a str),
    Debug(&'a str),
    Scan(&'a str),
    Help(&'a str),
    Status(&'a str),
    Unrecognized(&'a str),
}

impl<'a> LineKind<'a> {
    /// Status category and text for the kinds that are forwarded verbatim
    pub fn as_status(&self) -> Option<(StatusKind, &'a str)> {
        match *self {
            LineKind::Debug(text) => Some((StatusKind::Debug, text)),
            LineKind::Scan(text) => Some((StatusKind::Scan, text)),
            LineKind::Help(text) => Some((StatusKind::Help, text)),
            LineKind::Status(text) => Some((StatusKind::Status, text)),
            LineKind::Unrecognized(text) => Some((StatusKind::Message, text)),
            LineKind::Telemetry(_) | LineKind::ConfigSnapshot(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_power_on_state() {
        let config = DeviceConfig::default();
        assert_eq!(config.accel_range, 1);
        assert_eq!(config.gyro_range, 0);
        assert_eq!(config.mag_rate, 2);
        assert_eq!(config.sample_rate_hz, 100);
        assert!(
            config.enable_accel && config.enable_gyro && config.enable_mag && config.enable_temp
        );
    }

    #[test]
    fn test_apply_patch_keeps_absent_fields() {
        let mut config = DeviceConfig::default();
        let patch = ConfigPatch {
            gyro_range: Some(3),
            enable_mag: Some(false),
            ..ConfigPatch::default()
        };

        config.apply(&patch);

        assert_eq!(config.gyro_range, 3);
        assert!(!config.enable_mag);
        assert_eq!(config.accel_range, 1);
        assert_eq!(config.sample_rate_hz, 100);
    }

    #[test]
    fn test_empty_patch() {
        assert!(ConfigPatch::default().is_empty());
        let patch = ConfigPatch {
            sample_rate_hz: Some(50),
            ..ConfigPatch::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_sensor_wire_names() {
        assert_eq!(Sensor::Accel.wire_name(), "ACCEL");
        assert_eq!(Sensor::Temp.wire_name(), "TEMP");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            LineKind::Debug(" hi").as_status(),
            Some((StatusKind::Debug, " hi"))
        );
        assert_eq!(LineKind::Telemetry("1,2").as_status(), None);
    }
}
