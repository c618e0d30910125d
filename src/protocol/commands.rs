//! # Device Commands
//!
//! Host-to-device commands and the built-in configuration presets.

use std::fmt;

use super::codec;
use super::types::Sensor;
use bytes::Bytes;

/// A command understood by the device firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Request a `CONFIG:` snapshot
    Config,
    /// Begin `DATA:` streaming
    Start,
    /// End `DATA:` streaming
    Stop,
    /// Scan the I2C bus
    Scan,
    /// Print the firmware help listing
    Help,
    SetAccelRange(u8),
    SetGyroRange(u8),
    SetMagRate(u8),
    SetSampleRate(u16),
    Enable(Sensor, bool),
}

impl Command {
    /// Wire bytes including the line terminator
    pub fn encode(&self) -> Bytes {
        codec::encode(&self.to_string())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Config => f.write_str("CONFIG"),
            Command::Start => f.write_str("START"),
            Command::Stop => f.write_str("STOP"),
            Command::Scan => f.write_str("SCAN"),
            Command::Help => f.write_str("HELP"),
            Command::SetAccelRange(n) => write!(f, "SET_ACCEL_RANGE={}", n),
            Command::SetGyroRange(n) => write!(f, "SET_GYRO_RANGE={}", n),
            Command::SetMagRate(n) => write!(f, "SET_MAG_RATE={}", n),
            Command::SetSampleRate(n) => write!(f, "SET_SAMPLE_RATE={}", n),
            Command::Enable(sensor, on) => {
                write!(f, "ENABLE_{}={}", sensor.wire_name(), u8::from(*on))
            }
        }
    }
}

/// Bundled sensor settings for common recording scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Fast, high-range capture: ±16g, ±2000°/s, mag 100Hz, 500Hz sampling
    GolfSwing,
    /// Low-range, low-rate capture: ±2g, ±250°/s, mag 10Hz, 50Hz sampling
    SlowMotion,
    /// Middle ground: ±4g, ±500°/s, mag 20Hz, 100Hz sampling
    Balanced,
}

impl Preset {
    /// `SET_*` commands in the order they are sent
    pub fn commands(self) -> [Command; 4] {
        let (accel, gyro, mag, rate) = match self {
            Preset::GolfSwing => (3, 3, 5, 500),
            Preset::SlowMotion => (0, 0, 2, 50),
            Preset::Balanced => (1, 1, 3, 100),
        };
        [
            Command::SetAccelRange(accel),
            Command::SetGyroRange(gyro),
            Command::SetMagRate(mag),
            Command::SetSampleRate(rate),
        ]
    }
}

impl std::str::FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "golfswing" => Ok(Preset::GolfSwing),
            "slowmotion" => Ok(Preset::SlowMotion),
            "balanced" => Ok(Preset::Balanced),
            _ => Err(format!("unknown preset {:?}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_text() {
        assert_eq!(Command::Config.to_string(), "CONFIG");
        assert_eq!(Command::Start.to_string(), "START");
        assert_eq!(Command::Stop.to_string(), "STOP");
        assert_eq!(Command::SetAccelRange(2).to_string(), "SET_ACCEL_RANGE=2");
        assert_eq!(Command::SetGyroRange(1).to_string(), "SET_GYRO_RANGE=1");
        assert_eq!(Command::SetMagRate(8).to_string(), "SET_MAG_RATE=8");
        assert_eq!(Command::SetSampleRate(500).to_string(), "SET_SAMPLE_RATE=500");
        assert_eq!(Command::Enable(Sensor::Gyro, false).to_string(), "ENABLE_GYRO=0");
        assert_eq!(Command::Enable(Sensor::Temp, true).to_string(), "ENABLE_TEMP=1");
    }

    #[test]
    fn test_command_encode_is_terminated() {
        assert_eq!(&Command::Scan.encode()[..], b"SCAN\r\n");
    }

    #[test]
    fn test_golf_swing_preset() {
        assert_eq!(
            Preset::GolfSwing.commands(),
            [
                Command::SetAccelRange(3),
                Command::SetGyroRange(3),
                Command::SetMagRate(5),
                Command::SetSampleRate(500),
            ]
        );
    }

    #[test]
    fn test_slow_motion_and_balanced_presets() {
        assert_eq!(Preset::SlowMotion.commands()[3], Command::SetSampleRate(50));
        assert_eq!(Preset::Balanced.commands()[2], Command::SetMagRate(3));
    }

    #[test]
    fn test_preset_from_str() {
        assert_eq!("golf-swing".parse::<Preset>(), Ok(Preset::GolfSwing));
        assert_eq!("SLOW_MOTION".parse::<Preset>(), Ok(Preset::SlowMotion));
        assert_eq!("balanced".parse::<Preset>(), Ok(Preset::Balanced));
        assert!("turbo".parse::<Preset>().is_err());
    }
}
