//! Simulated IMU device
//!
//! Speaks the firmware's line protocol behind [`SerialPortIO`] so the CLI and
//! end-to-end tests can run without hardware. Data lines are generated lazily
//! whenever the link polls for input, paced by the simulated sample rate.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use super::port_trait::SerialPortIO;
use crate::protocol::commands::Command;
use crate::protocol::types::*;

/// Upper bound on data lines generated per poll, so a stalled reader does not
/// come back to an unbounded backlog
const MAX_BURST: usize = 64;

/// In-process stand-in for the ESP32 firmware
pub struct SimulatedDevice {
    config: DeviceConfig,
    streaming: bool,
    booted: bool,
    started: Instant,
    next_sample_at: Instant,
    outbound: VecDeque<u8>,
    command_buf: Vec<u8>,
    rng: StdRng,
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("config", &self.config)
            .field("streaming", &self.streaming)
            .finish_non_exhaustive()
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic noise for tests
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        let now = Instant::now();
        Self {
            config: DeviceConfig::default(),
            streaming: false,
            booted: false,
            started: now,
            next_sample_at: now,
            outbound: VecDeque::new(),
            command_buf: Vec::new(),
            rng,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn send(&mut self, line: &str) {
        self.outbound.extend(line.as_bytes());
        self.outbound.push_back(b'\n');
    }

    fn boot(&mut self) {
        self.booted = true;
        for line in [
            "ICM20948 Configurable Data Logger",
            "I2C initialized",
            "Scanning I2C bus...",
            "I2C device found at address 0x69!",
            "Found 1 device(s)",
            "Initializing ICM20948...",
            "ICM20948 found at address 0x69",
            "Configuration applied successfully",
            "Ready! Type HELP for commands",
        ] {
            self.send(line);
        }
        let snapshot = self.config_line();
        self.send(&snapshot);
    }

    fn config_line(&self) -> String {
        let c = &self.config;
        format!(
            "{}ACCEL_RANGE={},GYRO_RANGE={},MAG_RATE={},SAMPLE_RATE={},\
             EN_ACCEL={},EN_GYRO={},EN_MAG={},EN_TEMP={},STREAMING={}",
            CONFIG_PREFIX,
            c.accel_range,
            c.gyro_range,
            c.mag_rate,
            c.sample_rate_hz,
            u8::from(c.enable_accel),
            u8::from(c.enable_gyro),
            u8::from(c.enable_mag),
            u8::from(c.enable_temp),
            u8::from(self.streaming),
        )
    }

    fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.config.sample_rate_hz.max(1)))
    }

    fn data_line(&mut self) -> String {
        let ts = (self.started.elapsed().as_millis() % 1_000_000) as u32;
        let noise =
            |rng: &mut StdRng, center: f32, spread: f32| center + rng.gen_range(-spread..spread);
        let rng = &mut self.rng;
        let values = [
            noise(rng, 0.0, 0.5),
            noise(rng, 0.0, 0.5),
            noise(rng, 9.81, 0.5),
            noise(rng, 0.0, 0.1),
            noise(rng, 0.0, 0.1),
            noise(rng, 0.0, 0.1),
            noise(rng, 25.0, 5.0),
            noise(rng, 15.0, 5.0),
            noise(rng, -40.0, 5.0),
        ];
        let temp = noise(rng, 22.5, 2.0);

        let mut line = format!("{}{}", DATA_PREFIX, ts);
        for v in values {
            line.push_str(&format!(",{:.3}", v));
        }
        line.push_str(&format!(",{:.1}", temp));
        line
    }

    fn generate_due_samples(&mut self) {
        if !self.streaming {
            return;
        }
        let now = Instant::now();
        let interval = self.sample_interval();
        let mut produced = 0;
        while self.next_sample_at <= now && produced < MAX_BURST {
            let line = self.data_line();
            self.send(&line);
            self.next_sample_at += interval;
            produced += 1;
        }
        if self.next_sample_at <= now {
            self.next_sample_at = now + interval;
        }
    }

    fn handle_command(&mut self, raw: &str) {
        let command = raw.trim().to_uppercase();
        if command.is_empty() {
            return;
        }

        match command.as_str() {
            "CONFIG" => {
                self.send("DEBUG: CONFIG command received");
                let snapshot = self.config_line();
                self.send(&snapshot);
            }
            "START" => {
                self.send("DEBUG: START command received");
                self.streaming = true;
                self.next_sample_at = Instant::now();
                self.send("Started streaming");
            }
            "STOP" => {
                self.send("DEBUG: STOP command received");
                self.streaming = false;
                self.send("Stopped streaming");
            }
            "SCAN" => {
                self.send("DEBUG: SCAN command received");
                self.send("Scanning I2C bus...");
                self.send("I2C device found at address 0x69!");
                self.send("Found 1 device(s)");
            }
            "HELP" => {
                for line in [
                    "Available commands:",
                    "  SCAN - Scan I2C bus",
                    "  CONFIG - Show current configuration",
                    "  START - Start data streaming",
                    "  STOP - Stop data streaming",
                    "  HELP - Show this help",
                ] {
                    self.send(line);
                }
            }
            other => {
                if !self.apply_setting(other) {
                    self.send(&format!("Unknown command: {} (Type HELP for commands)", other));
                }
            }
        }
    }

    /// Handle `SET_*=n` and `ENABLE_*=n`; returns `false` if not a setting
    fn apply_setting(&mut self, command: &str) -> bool {
        let Some((key, value)) = command.split_once('=') else {
            return false;
        };
        let Ok(n) = value.trim().parse::<u16>() else {
            return false;
        };

        let applied = match key {
            "SET_ACCEL_RANGE" if n <= u16::from(ACCEL_RANGE_MAX) => {
                self.config.accel_range = n as u8;
                Command::SetAccelRange(n as u8)
            }
            "SET_GYRO_RANGE" if n <= u16::from(GYRO_RANGE_MAX) => {
                self.config.gyro_range = n as u8;
                Command::SetGyroRange(n as u8)
            }
            "SET_MAG_RATE" if n <= u16::from(MAG_RATE_MAX) => {
                self.config.mag_rate = n as u8;
                Command::SetMagRate(n as u8)
            }
            "SET_SAMPLE_RATE" if (SAMPLE_RATE_MIN..=SAMPLE_RATE_MAX).contains(&n) => {
                self.config.sample_rate_hz = n;
                Command::SetSampleRate(n)
            }
            _ => {
                let sensor = match key {
                    "ENABLE_ACCEL" => Sensor::Accel,
                    "ENABLE_GYRO" => Sensor::Gyro,
                    "ENABLE_MAG" => Sensor::Mag,
                    "ENABLE_TEMP" => Sensor::Temp,
                    _ => return false,
                };
                let on = n != 0;
                *self.config.sensor_enabled_mut(sensor) = on;
                let word = if on { "enabled" } else { "disabled" };
                self.send(&format!("{} {}", sensor.wire_name(), word));
                return true;
            }
        };

        self.send(&format!("{} applied", applied));
        true
    }
}

impl SerialPortIO for SimulatedDevice {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        if !self.booted {
            self.boot();
        }
        self.generate_due_samples();
        Ok(self.outbound.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.command_buf.extend_from_slice(data);
        while let Some(pos) = self.command_buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.command_buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).into_owned();
            self.handle_command(&text);
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.outbound.clear();
        Ok(())
    }

    fn clear_all(&mut self) -> io::Result<()> {
        self.outbound.clear();
        self.command_buf.clear();
        Ok(())
    }
}
