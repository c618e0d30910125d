//! # Configuration Sync
//!
//! Keeps a host-side mirror of the device configuration.
//!
//! The mirror is refreshed by a `CONFIG` round trip and updated optimistically
//! when a `SET_*`/`ENABLE_*` command is written. It may diverge from the device
//! until the next snapshot arrives.
//!
//! ```text
//! Idle --request_refresh--> AwaitingConfig --snapshot--> Synced
//!   ^                            |                          |
//!   +--------timeout-------------+                          |
//!                                ^------request_refresh-----+
//! ```

pub mod dispatcher;

pub use dispatcher::CommandDispatcher;

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{CommandError, ConfigError, ParseError};
use crate::protocol::commands::{Command, Preset};
use crate::protocol::parser::parse_config;
use crate::protocol::types::*;

/// Default time to wait for a `CONFIG` response
pub const DEFAULT_CONFIG_TIMEOUT: Duration = Duration::from_secs(3);

/// Round-trip state of the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No request outstanding, nothing received yet (or the last request timed out)
    Idle,
    /// `CONFIG` sent, waiting for the snapshot
    AwaitingConfig,
    /// Mirror reflects a fully parsed snapshot
    Synced,
}

/// Host-side mirror of the device configuration
#[derive(Debug, Clone)]
pub struct ConfigSync {
    config: DeviceConfig,
    state: SyncState,
    deadline: Option<Instant>,
    timeout: Duration,
}

impl Default for ConfigSync {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_TIMEOUT)
    }
}

impl ConfigSync {
    pub fn new(timeout: Duration) -> Self {
        Self {
            config: DeviceConfig::default(),
            state: SyncState::Idle,
            deadline: None,
            timeout,
        }
    }

    /// Current mirrored configuration
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Send `CONFIG` and wait for the snapshot until `now + timeout`
    ///
    /// A failed send leaves the state untouched.
    pub fn request_refresh(
        &mut self,
        now: Instant,
        dispatcher: &mut CommandDispatcher,
    ) -> Result<(), CommandError> {
        dispatcher.send(&Command::Config)?;
        self.state = SyncState::AwaitingConfig;
        self.deadline = Some(now + self.timeout);
        debug!("Requested device configuration");
        Ok(())
    }

    /// Apply the payload of a `CONFIG:` line
    ///
    /// Accepted in any state, including unsolicited snapshots such as the
    /// boot banner. On error nothing changes.
    pub fn apply_snapshot(&mut self, fields: &str) -> Result<DeviceConfig, ParseError> {
        let patch = parse_config(fields)?;
        self.config.apply(&patch);
        self.state = SyncState::Synced;
        self.deadline = None;
        info!("Device config synced: {:?}", self.config);
        Ok(self.config)
    }

    /// Check the outstanding request against `now`
    ///
    /// Returns the timeout once, then the state is back to `Idle`.
    pub fn poll_timeout(&mut self, now: Instant) -> Option<ConfigError> {
        match (self.state, self.deadline) {
            (SyncState::AwaitingConfig, Some(deadline)) if now >= deadline => {
                self.state = SyncState::Idle;
                self.deadline = None;
                warn!("No CONFIG response within {:?}", self.timeout);
                Some(ConfigError::Timeout(self.timeout))
            }
            _ => None,
        }
    }

    pub fn set_accel_range(
        &mut self,
        dispatcher: &mut CommandDispatcher,
        range: u8,
    ) -> Result<(), CommandError> {
        self.send_setting(dispatcher, Command::SetAccelRange(range))
    }

    pub fn set_gyro_range(
        &mut self,
        dispatcher: &mut CommandDispatcher,
        range: u8,
    ) -> Result<(), CommandError> {
        self.send_setting(dispatcher, Command::SetGyroRange(range))
    }

    pub fn set_mag_rate(
        &mut self,
        dispatcher: &mut CommandDispatcher,
        rate: u8,
    ) -> Result<(), CommandError> {
        self.send_setting(dispatcher, Command::SetMagRate(rate))
    }

    pub fn set_sample_rate(
        &mut self,
        dispatcher: &mut CommandDispatcher,
        hz: u16,
    ) -> Result<(), CommandError> {
        self.send_setting(dispatcher, Command::SetSampleRate(hz))
    }

    pub fn set_sensor_enabled(
        &mut self,
        dispatcher: &mut CommandDispatcher,
        sensor: Sensor,
        enabled: bool,
    ) -> Result<(), CommandError> {
        self.send_setting(dispatcher, Command::Enable(sensor, enabled))
    }

    /// Send the preset's settings in order, stopping at the first failure
    pub fn apply_preset(
        &mut self,
        dispatcher: &mut CommandDispatcher,
        preset: Preset,
    ) -> Result<(), CommandError> {
        info!("Applying {:?} preset", preset);
        for command in preset.commands() {
            self.send_setting(dispatcher, command)?;
        }
        Ok(())
    }

    fn send_setting(
        &mut self,
        dispatcher: &mut CommandDispatcher,
        command: Command,
    ) -> Result<(), CommandError> {
        validate(&command)?;
        dispatcher.send(&command)?;

        let config = &mut self.config;
        match command {
            Command::SetAccelRange(v) => config.accel_range = v,
            Command::SetGyroRange(v) => config.gyro_range = v,
            Command::SetMagRate(v) => config.mag_rate = v,
            Command::SetSampleRate(v) => config.sample_rate_hz = v,
            Command::Enable(sensor, on) => *config.sensor_enabled_mut(sensor) = on,
            _ => {}
        }
        Ok(())
    }
}

/// Reject setting values the firmware does not accept
fn validate(command: &Command) -> Result<(), CommandError> {
    let in_range = match *command {
        Command::SetAccelRange(v) => v <= ACCEL_RANGE_MAX,
        Command::SetGyroRange(v) => v <= GYRO_RANGE_MAX,
        Command::SetMagRate(v) => v <= MAG_RATE_MAX,
        Command::SetSampleRate(v) => (SAMPLE_RATE_MIN..=SAMPLE_RATE_MAX).contains(&v),
        _ => true,
    };
    if in_range {
        Ok(())
    } else {
        Err(CommandError::InvalidArgument(command.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::port_trait::mocks::MockSerialPort;
    use crate::serial::SerialLink;
    use std::io;
    use std::sync::Arc;

    const SNAPSHOT: &str =
        "ACCEL_RANGE=2,GYRO_RANGE=1,MAG_RATE=3,SAMPLE_RATE=200,EN_ACCEL=1,EN_GYRO=0,EN_MAG=1,\
         EN_TEMP=1";

    fn setup() -> (ConfigSync, CommandDispatcher, MockSerialPort) {
        let mock = MockSerialPort::new();
        let link = Arc::new(
            SerialLink::from_port(Box::new(mock.clone()), "mock", Duration::ZERO).unwrap(),
        );
        let dispatcher = CommandDispatcher::new(link, dispatcher::DEFAULT_WRITE_TIMEOUT);
        (ConfigSync::default(), dispatcher, mock)
    }

    #[test]
    fn test_initial_state() {
        let sync = ConfigSync::default();
        assert_eq!(sync.state(), SyncState::Idle);
        assert_eq!(*sync.config(), DeviceConfig::default());
    }

    #[test]
    fn test_refresh_then_snapshot() {
        let (mut sync, mut dispatcher, mock) = setup();

        sync.request_refresh(Instant::now(), &mut dispatcher).unwrap();
        assert_eq!(sync.state(), SyncState::AwaitingConfig);
        assert_eq!(mock.written_lines(), vec!["CONFIG"]);

        let config = sync.apply_snapshot(SNAPSHOT).unwrap();
        assert_eq!(sync.state(), SyncState::Synced);
        assert_eq!(config.accel_range, 2);
        assert_eq!(config.gyro_range, 1);
        assert_eq!(config.mag_rate, 3);
        assert_eq!(config.sample_rate_hz, 200);
        assert!(!config.enable_gyro);
        assert!(config.enable_temp);
    }

    #[test]
    fn test_unsolicited_snapshot_accepted() {
        let mut sync = ConfigSync::default();
        sync.apply_snapshot(SNAPSHOT).unwrap();
        assert_eq!(sync.state(), SyncState::Synced);
    }

    #[test]
    fn test_bad_snapshot_changes_nothing() {
        let mut sync = ConfigSync::default();
        let before = *sync.config();

        assert!(sync.apply_snapshot("ACCEL_RANGE=2,GYRO_RANGE").is_err());
        assert!(sync.apply_snapshot("ACCEL_RANGE=9").is_err());

        assert_eq!(*sync.config(), before);
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[test]
    fn test_partial_snapshot_keeps_other_fields() {
        let mut sync = ConfigSync::default();
        sync.apply_snapshot("SAMPLE_RATE=250").unwrap();

        assert_eq!(sync.config().sample_rate_hz, 250);
        assert_eq!(sync.config().accel_range, DeviceConfig::default().accel_range);
    }

    #[test]
    fn test_timeout_returns_to_idle_once() {
        let (mut sync, mut dispatcher, _mock) = setup();
        let t0 = Instant::now();
        sync.request_refresh(t0, &mut dispatcher).unwrap();

        assert!(sync.poll_timeout(t0 + Duration::from_secs(2)).is_none());
        assert_eq!(
            sync.poll_timeout(t0 + Duration::from_secs(3)),
            Some(ConfigError::Timeout(DEFAULT_CONFIG_TIMEOUT))
        );
        assert_eq!(sync.state(), SyncState::Idle);
        assert!(sync.poll_timeout(t0 + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn test_snapshot_cancels_timeout() {
        let (mut sync, mut dispatcher, _mock) = setup();
        let t0 = Instant::now();
        sync.request_refresh(t0, &mut dispatcher).unwrap();
        sync.apply_snapshot(SNAPSHOT).unwrap();

        assert!(sync.poll_timeout(t0 + Duration::from_secs(5)).is_none());
        assert_eq!(sync.state(), SyncState::Synced);
    }

    #[test]
    fn test_failed_refresh_leaves_state() {
        let (mut sync, mut dispatcher, mock) = setup();
        mock.set_write_error(io::ErrorKind::TimedOut);

        let result = sync.request_refresh(Instant::now(), &mut dispatcher);

        assert_eq!(result, Err(CommandError::Timeout));
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[test]
    fn test_set_updates_mirror_after_write() {
        let (mut sync, mut dispatcher, mock) = setup();

        sync.set_accel_range(&mut dispatcher, 3).unwrap();
        sync.set_sample_rate(&mut dispatcher, 500).unwrap();
        sync.set_sensor_enabled(&mut dispatcher, Sensor::Mag, false).unwrap();

        assert_eq!(
            mock.written_lines(),
            vec!["SET_ACCEL_RANGE=3", "SET_SAMPLE_RATE=500", "ENABLE_MAG=0"]
        );
        assert_eq!(sync.config().accel_range, 3);
        assert_eq!(sync.config().sample_rate_hz, 500);
        assert!(!sync.config().enable_mag);
        // No re-query
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[test]
    fn test_set_rejects_out_of_range() {
        let (mut sync, mut dispatcher, mock) = setup();

        assert!(matches!(
            sync.set_accel_range(&mut dispatcher, 4),
            Err(CommandError::InvalidArgument(_))
        ));
        assert!(matches!(
            sync.set_mag_rate(&mut dispatcher, 9),
            Err(CommandError::InvalidArgument(_))
        ));
        assert!(matches!(
            sync.set_sample_rate(&mut dispatcher, 0),
            Err(CommandError::InvalidArgument(_))
        ));
        assert!(matches!(
            sync.set_sample_rate(&mut dispatcher, 1001),
            Err(CommandError::InvalidArgument(_))
        ));

        assert!(mock.get_written_data().is_empty());
        assert_eq!(*sync.config(), DeviceConfig::default());
    }

    #[test]
    fn test_failed_write_leaves_mirror() {
        let (mut sync, mut dispatcher, mock) = setup();
        mock.set_write_error(io::ErrorKind::TimedOut);

        assert!(sync.set_gyro_range(&mut dispatcher, 3).is_err());
        assert_eq!(sync.config().gyro_range, DeviceConfig::default().gyro_range);
    }

    #[test]
    fn test_apply_preset() {
        let (mut sync, mut dispatcher, mock) = setup();

        sync.apply_preset(&mut dispatcher, Preset::GolfSwing).unwrap();

        assert_eq!(
            mock.written_lines(),
            vec![
                "SET_ACCEL_RANGE=3",
                "SET_GYRO_RANGE=3",
                "SET_MAG_RATE=5",
                "SET_SAMPLE_RATE=500"
            ]
        );
        let config = sync.config();
        assert_eq!(
            (config.accel_range, config.gyro_range, config.mag_rate, config.sample_rate_hz),
            (3, 3, 5, 500)
        );
    }

    #[test]
    fn test_apply_preset_stops_at_first_failure() {
        let (mut sync, mut dispatcher, mock) = setup();
        mock.set_write_error(io::ErrorKind::TimedOut);

        assert!(sync.apply_preset(&mut dispatcher, Preset::SlowMotion).is_err());
        assert!(mock.get_written_data().is_empty());
        assert_eq!(*sync.config(), DeviceConfig::default());
    }
}
