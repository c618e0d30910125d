//! Dedicated reader thread
//!
//! One worker per connection. It polls the link, decodes each frame and pushes
//! the text onto the hand-off queue. It never touches domain state; a fatal
//! read error is handed back to the owner as a disconnect request, any other
//! read error is counted and retried on the next poll.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::queue::{DecodedLine, LineQueue};
use super::SerialLink;
use crate::protocol::codec;

/// Default pause between polls of the link
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Default time a single `read_line` waits for a complete line
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// How long `stop` waits for the thread to exit
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Latin-1 fallbacks and recoverable read errors are logged once per this
/// many occurrences
const FALLBACK_LOG_EVERY: u64 = 100;

/// Timing parameters of the reader loop
#[derive(Debug, Clone, Copy)]
pub struct ReaderSettings {
    pub poll_interval: Duration,
    pub read_timeout: Duration,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// State shared between the worker thread and its owner
#[derive(Debug, Default)]
struct Control {
    running: AtomicBool,
    disconnect_request: Mutex<Option<String>>,
    lines_read: AtomicU64,
    lossy_decodes: AtomicU64,
    read_errors: AtomicU64,
}

/// Handle to the reader thread of one connection
#[derive(Debug)]
pub struct ReaderWorker {
    control: Arc<Control>,
    handle: Option<JoinHandle<()>>,
}

impl ReaderWorker {
    /// Spawn the reader thread
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to create the thread.
    pub fn spawn(
        link: Arc<SerialLink>,
        queue: Arc<LineQueue>,
        settings: ReaderSettings,
    ) -> std::io::Result<Self> {
        let control = Arc::new(Control {
            running: AtomicBool::new(true),
            ..Control::default()
        });

        let handle = {
            let control = Arc::clone(&control);
            thread::Builder::new()
                .name("imu-reader".to_string())
                .spawn(move || run(&link, &queue, &control, settings))?
        };

        Ok(Self {
            control,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.control.running.load(Ordering::Acquire)
    }

    /// Disconnect request left by the thread after a fatal read error
    pub fn take_disconnect_request(&self) -> Option<String> {
        self.control.disconnect_request.lock().take()
    }

    /// Lines pushed onto the queue so far
    pub fn lines_read(&self) -> u64 {
        self.control.lines_read.load(Ordering::Relaxed)
    }

    /// Frames that needed the Latin-1 fallback
    pub fn lossy_decodes(&self) -> u64 {
        self.control.lossy_decodes.load(Ordering::Relaxed)
    }

    /// Recoverable read errors skipped so far
    pub fn read_errors(&self) -> u64 {
        self.control.read_errors.load(Ordering::Relaxed)
    }

    /// Signal the thread to stop and wait up to `grace` for it to exit
    ///
    /// Returns `true` if the thread exited in time. A thread that overruns is
    /// detached.
    pub fn stop(&mut self, grace: Duration) -> bool {
        self.control.running.store(false, Ordering::Release);

        let Some(handle) = self.handle.take() else {
            return true;
        };

        let deadline = Instant::now() + grace;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("Reader thread did not stop within {:?}, detaching", grace);
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }

        if handle.join().is_err() {
            warn!("Reader thread panicked");
        }
        true
    }
}

impl Drop for ReaderWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop(SHUTDOWN_GRACE);
        }
    }
}

fn run(link: &SerialLink, queue: &LineQueue, control: &Control, settings: ReaderSettings) {
    debug!("Reader thread started for {}", link.device_path());

    'outer: while control.running.load(Ordering::Acquire) {
        thread::sleep(settings.poll_interval);

        let mut timeout = settings.read_timeout;
        loop {
            if !control.running.load(Ordering::Acquire) {
                break 'outer;
            }

            let frame = match link.read_line(timeout) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) if e.is_fatal() => {
                    warn!("Read error on {}: {}", link.device_path(), e);
                    *control.disconnect_request.lock() = Some(e.to_string());
                    control.running.store(false, Ordering::Release);
                    break 'outer;
                }
                Err(e) => {
                    let n = control.read_errors.fetch_add(1, Ordering::Relaxed);
                    if n % FALLBACK_LOG_EVERY == 0 {
                        warn!(
                            "Read error on {}: {} ({} so far), retrying",
                            link.device_path(),
                            e,
                            n + 1
                        );
                    }
                    break;
                }
            };
            // Drain whatever else is already buffered without waiting
            timeout = Duration::ZERO;

            let outcome = codec::decode(&frame);
            if outcome.lossy_fallback {
                let n = control.lossy_decodes.fetch_add(1, Ordering::Relaxed);
                if n % FALLBACK_LOG_EVERY == 0 {
                    debug!("Received non-UTF-8 data, decoded as Latin-1 ({} so far)", n + 1);
                }
            }
            if outcome.text.is_empty() {
                continue;
            }

            if !control.running.load(Ordering::Acquire) {
                break 'outer;
            }
            queue.push(DecodedLine {
                text: outcome.text,
                received_at: Utc::now(),
            });
            control.lines_read.fetch_add(1, Ordering::Relaxed);
        }
    }

    info!("Serial reading thread stopped");
}
