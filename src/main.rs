//! # IMU Link
//!
//! Stream telemetry from an ICM20948 IMU device over USB serial.
//!
//! Connects to the device (or an in-process simulator), requests its
//! configuration, optionally applies a preset and starts streaming, then
//! drives the session until Ctrl+C or until the connection is lost.

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use imu_link::config::{Config, LoggingConfig};
use imu_link::error::ErrorKind;
use imu_link::ingest::TelemetrySink;
use imu_link::protocol::commands::Preset;
use imu_link::protocol::types::{DeviceConfig, StatusKind, TelemetrySample};
use imu_link::serial::simulator::SimulatedDevice;
use imu_link::session::Session;

/// Interval between status log messages
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// File name prefix of the rolling log files
const LOG_FILE_PREFIX: &str = "imu-link.log";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "imu-link", version, about = "Stream telemetry from an ICM20948 IMU over serial")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port, overrides the configuration file
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate, overrides the configuration file
    #[arg(short, long)]
    baud: Option<u32>,

    /// Use the built-in simulated device instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// Start streaming right after connecting
    #[arg(long)]
    stream: bool,

    /// Print samples as JSON lines on stdout
    #[arg(long)]
    json: bool,

    /// Apply a sensor preset (golf-swing, slow-motion, balanced)
    #[arg(long)]
    preset: Option<Preset>,
}

/// Sink that prints samples and routes everything else to the log
struct ConsoleSink {
    json: bool,
}

impl TelemetrySink for ConsoleSink {
    fn on_sample(&mut self, sample: &TelemetrySample) {
        if self.json {
            match serde_json::to_string(sample) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize sample: {}", e),
            }
        } else {
            info!("{}", format_sample(sample));
        }
    }

    fn on_config(&mut self, config: &DeviceConfig) {
        info!(
            "Device config: accel range {}, gyro range {}, mag rate {}, {} Hz \
             (accel={} gyro={} mag={} temp={})",
            config.accel_range,
            config.gyro_range,
            config.mag_rate,
            config.sample_rate_hz,
            config.enable_accel,
            config.enable_gyro,
            config.enable_mag,
            config.enable_temp
        );
    }

    fn on_status(&mut self, kind: StatusKind, text: &str) {
        match kind {
            StatusKind::Debug => tracing::debug!("device: {}", text),
            _ => info!("device: {}", text),
        }
    }

    fn on_error(&mut self, kind: ErrorKind, message: &str) {
        match kind {
            ErrorKind::Connection => error!("{}", message),
            _ => warn!("{:?}: {}", kind, message),
        }
    }
}

fn format_sample(sample: &TelemetrySample) -> String {
    format!(
        "t={}ms accel=({:.2}, {:.2}, {:.2}) gyro=({:.2}, {:.2}, {:.2}) \
         mag=({:.1}, {:.1}, {:.1}) temp={:.1}°C",
        sample.device_timestamp,
        sample.accel.x,
        sample.accel.y,
        sample.accel.z,
        sample.gyro.x,
        sample.gyro.y,
        sample.gyro.z,
        sample.mag.x,
        sample.mag.y,
        sample.mag.z,
        sample.temperature
    )
}

/// Install the console logger, plus a daily rolling file when `log_dir` is set
///
/// The returned guard flushes the file writer and must live until exit.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let console = fmt::layer().with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(console).init();
            None
        }
    }
}

/// Load the configuration file (or defaults) and apply command line overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(port) = &cli.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    if cli.simulate {
        config.serial.port = "simulator".to_string();
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let _log_guard = init_logging(&config.logging);

    info!("IMU Link v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut session = if cli.simulate {
        info!("Using simulated device");
        Session::with_port(Box::new(SimulatedDevice::new()), &config)?
    } else {
        info!("Connecting to {} at {} baud", config.serial.port, config.serial.baud_rate);
        let connect_config = config.clone();
        tokio::task::spawn_blocking(move || Session::connect(&connect_config)).await??
    };

    if let Some(preset) = cli.preset {
        session.apply_preset(preset)?;
    }
    if cli.stream {
        session.start_streaming()?;
    }

    info!("Press Ctrl+C to exit");

    let mut sink = ConsoleSink { json: cli.json };
    let mut last_stats_log = Instant::now();

    loop {
        tokio::select! {
            _ = sleep(session.next_tick_interval()) => {
                session.tick(&mut sink);
                if !session.is_connected() {
                    break;
                }

                if last_stats_log.elapsed() >= STATS_LOG_INTERVAL {
                    let stats = session.stats();
                    info!(
                        "Read {} lines, {} samples ({} malformed), {} buffered, {} commands sent",
                        session.lines_read(),
                        stats.samples_accepted,
                        stats.malformed_lines,
                        session.buffer().len(),
                        session.commands_sent()
                    );
                    last_stats_log = Instant::now();
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    if !session.is_connected() {
        bail!("connection to {} lost", session.device_path());
    }

    if session.is_streaming() {
        if let Err(e) = session.stop_streaming() {
            warn!("Failed to stop streaming: {}", e);
        }
    }
    session.disconnect();
    info!("Total samples received: {}", session.stats().samples_accepted);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use imu_link::protocol::types::Vec3;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["imu-link"]).unwrap();
        assert!(cli.config.is_none());
        assert!(!cli.simulate);
        assert!(!cli.stream);
        assert!(!cli.json);
        assert!(cli.preset.is_none());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "imu-link",
            "--port",
            "/dev/ttyACM0",
            "--baud",
            "921600",
            "--stream",
            "--json",
            "--preset",
            "golf-swing",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.baud, Some(921600));
        assert!(cli.stream);
        assert!(cli.json);
        assert_eq!(cli.preset, Some(Preset::GolfSwing));
    }

    #[test]
    fn test_cli_rejects_unknown_preset() {
        assert!(Cli::try_parse_from(["imu-link", "--preset", "turbo"]).is_err());
    }

    #[test]
    fn test_load_config_overrides() {
        let cli =
            Cli::try_parse_from(["imu-link", "--port", "/dev/ttyS3", "--baud", "57600"]).unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyS3");
        assert_eq!(config.serial.baud_rate, 57600);
    }

    #[test]
    fn test_load_config_rejects_bad_baud_override() {
        let cli = Cli::try_parse_from(["imu-link", "--baud", "12345"]).unwrap();
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn test_simulate_names_port() {
        let cli = Cli::try_parse_from(["imu-link", "--simulate"]).unwrap();
        assert_eq!(load_config(&cli).unwrap().serial.port, "simulator");
    }

    #[test]
    fn test_format_sample() {
        let sample = TelemetrySample {
            device_timestamp: 1000,
            host_time: Utc::now(),
            accel: Vec3::new(0.1, 0.2, 9.8),
            gyro: Vec3::default(),
            mag: Vec3::new(25.0, 15.0, -40.0),
            temperature: 22.5,
        };
        assert_eq!(
            format_sample(&sample),
            "t=1000ms accel=(0.10, 0.20, 9.80) gyro=(0.00, 0.00, 0.00) \
             mag=(25.0, 15.0, -40.0) temp=22.5°C"
        );
    }

    #[test]
    fn test_stats_interval() {
        assert_eq!(STATS_LOG_INTERVAL.as_secs(), 10);
    }
}
