//! # Ingestion Module
//!
//! Single-threaded consumer side of the pipeline.
//!
//! This module handles:
//! - Draining a bounded number of queued lines per tick
//! - Routing lines through the parser into the sample buffer and config sync
//! - Throttled delivery of samples to a [`TelemetrySink`]
//! - Sampled reporting of malformed lines and queue overflow
//!
//! [`IngestionLoop::tick`] is meant to be called periodically by whatever
//! hosts the session (CLI loop, GUI timer, service scheduler), at the cadence
//! reported by [`IngestionLoop::next_interval`]. It never blocks.

pub mod buffer;
pub mod throttle;

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, QueueOverflow};
use crate::protocol::parser::{classify, parse_telemetry};
use crate::protocol::types::{DeviceConfig, LineKind, StatusKind, TelemetrySample};
use crate::serial::queue::{DecodedLine, LineQueue};
use crate::sync::ConfigSync;
use buffer::TelemetryBuffer;
use throttle::{EmissionThrottle, SampledCounter};

/// Receiver of pipeline events
///
/// Every method is called from the thread that drives
/// [`IngestionLoop::tick`], never from the reader thread.
#[cfg_attr(test, mockall::automock)]
pub trait TelemetrySink {
    /// A decoded sample, rate limited
    fn on_sample(&mut self, sample: &TelemetrySample);

    /// The mirrored device configuration after a snapshot was applied
    fn on_config(&mut self, config: &DeviceConfig);

    /// Debug, status, scan, help or unrecognised text from the device
    fn on_status(&mut self, kind: StatusKind, text: &str);

    /// A recoverable or session-ending error
    fn on_error(&mut self, kind: ErrorKind, message: &str);
}

/// Tuning of the ingestion loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IngestSettings {
    /// Samples kept in the buffer
    pub buffer_capacity: usize,
    /// Lines handled per tick; the rest wait for the next tick
    pub max_lines_per_tick: usize,
    /// Suggested tick interval while idle
    pub idle_interval: Duration,
    /// Suggested tick interval while streaming
    pub streaming_interval: Duration,
    /// Minimum gap between `on_sample` calls while idle
    pub idle_emit_interval: Duration,
    /// Minimum gap between `on_sample` calls while streaming
    pub streaming_emit_interval: Duration,
    /// Report one malformed line out of this many
    pub malformed_report_every: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: buffer::DEFAULT_BUFFER_CAPACITY,
            max_lines_per_tick: 10,
            idle_interval: Duration::from_millis(100),
            streaming_interval: Duration::from_millis(200),
            idle_emit_interval: Duration::from_millis(100),
            streaming_emit_interval: Duration::from_millis(200),
            malformed_report_every: 50,
        }
    }
}

/// Running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub lines_processed: u64,
    pub samples_accepted: u64,
    pub samples_emitted: u64,
    pub malformed_lines: u64,
    pub config_snapshots: u64,
    pub overflow_dropped: u64,
}

/// Periodic consumer of the hand-off queue
#[derive(Debug)]
pub struct IngestionLoop {
    settings: IngestSettings,
    buffer: TelemetryBuffer,
    throttle: EmissionThrottle,
    malformed: SampledCounter,
    streaming: bool,
    stats: IngestStats,
    /// Queue eviction count already reported
    seen_dropped: u64,
}

impl IngestionLoop {
    pub fn new(settings: IngestSettings) -> Self {
        Self {
            settings,
            buffer: TelemetryBuffer::new(settings.buffer_capacity),
            throttle: EmissionThrottle::new(),
            malformed: SampledCounter::new(settings.malformed_report_every),
            streaming: false,
            stats: IngestStats::default(),
            seen_dropped: 0,
        }
    }

    pub fn buffer(&self) -> &TelemetryBuffer {
        &self.buffer
    }

    /// Drop every buffered sample
    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
        info!("Telemetry buffer cleared");
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Switch cadence; a mode change restarts the emission throttle
    pub fn set_streaming(&mut self, streaming: bool) {
        if self.streaming != streaming {
            self.throttle.reset();
        }
        self.streaming = streaming;
    }

    /// Interval the host should wait before the next tick
    pub fn next_interval(&self) -> Duration {
        if self.streaming {
            self.settings.streaming_interval
        } else {
            self.settings.idle_interval
        }
    }

    fn emit_interval(&self) -> Duration {
        if self.streaming {
            self.settings.streaming_emit_interval
        } else {
            self.settings.idle_emit_interval
        }
    }

    /// Process up to `max_lines_per_tick` queued lines
    ///
    /// Returns the number of lines handled.
    pub fn tick(
        &mut self,
        queue: &LineQueue,
        sync: &mut ConfigSync,
        sink: &mut dyn TelemetrySink,
    ) -> usize {
        self.tick_at(Instant::now(), queue, sync, sink)
    }

    /// [`tick`](Self::tick) with an explicit clock reading
    pub fn tick_at(
        &mut self,
        now: Instant,
        queue: &LineQueue,
        sync: &mut ConfigSync,
        sink: &mut dyn TelemetrySink,
    ) -> usize {
        self.report_overflow(queue, sink);

        let mut handled = 0;
        let mut newest_sample = false;
        while handled < self.settings.max_lines_per_tick {
            let Some(line) = queue.pop() else {
                break;
            };
            handled += 1;
            newest_sample |= self.handle_line(&line, sync, sink);
        }
        self.stats.lines_processed += handled as u64;

        if newest_sample && self.throttle.try_emit(now, self.emit_interval()) {
            if let Some(sample) = self.buffer.latest() {
                sink.on_sample(sample);
                self.stats.samples_emitted += 1;
            }
        }

        handled
    }

    fn report_overflow(&mut self, queue: &LineQueue, sink: &mut dyn TelemetrySink) {
        let dropped = queue.dropped();
        if dropped > self.seen_dropped {
            let overflow = QueueOverflow {
                dropped: dropped - self.seen_dropped,
            };
            self.seen_dropped = dropped;
            self.stats.overflow_dropped += overflow.dropped;
            warn!("{}", overflow);
            sink.on_error(ErrorKind::QueueOverflow, &overflow.to_string());
        }
    }

    /// Returns `true` if the line added a sample to the buffer
    fn handle_line(
        &mut self,
        line: &DecodedLine,
        sync: &mut ConfigSync,
        sink: &mut dyn TelemetrySink,
    ) -> bool {
        match classify(&line.text) {
            LineKind::Telemetry(fields) => match parse_telemetry(fields, line.received_at) {
                Ok(sample) => {
                    self.buffer.push(sample);
                    self.stats.samples_accepted += 1;
                    true
                }
                Err(e) => {
                    self.stats.malformed_lines += 1;
                    if self.malformed.record() {
                        let message = format!(
                            "Invalid data line ({} malformed so far): {} - line was: {}",
                            self.malformed.count(),
                            e,
                            line.text
                        );
                        warn!("{}", message);
                        sink.on_error(ErrorKind::Parse, &message);
                    }
                    false
                }
            },
            LineKind::ConfigSnapshot(fields) => {
                self.stats.config_snapshots += 1;
                match sync.apply_snapshot(fields) {
                    Ok(config) => sink.on_config(&config),
                    Err(e) => {
                        let message =
                            format!("Config parsing error: {} - line was: {}", e, line.text);
                        warn!("{}", message);
                        sink.on_error(ErrorKind::Parse, &message);
                    }
                }
                false
            }
            other => {
                if let Some((kind, text)) = other.as_status() {
                    debug!("Device {:?}: {}", kind, text);
                    sink.on_status(kind, text);
                }
                false
            }
        }
    }
}

impl Default for IngestionLoop {
    fn default() -> Self {
        Self::new(IngestSettings::default())
    }
}
