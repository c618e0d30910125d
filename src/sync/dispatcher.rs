//! Serialised command writes
//!
//! Every outgoing command goes through one [`CommandDispatcher`]. Taking
//! `&mut self` guarantees two commands never interleave on the wire.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::{CommandError, WriteError};
use crate::protocol::commands::Command;
use crate::serial::SerialLink;

/// Default time allowed for one command write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Writes commands to the device
#[derive(Debug)]
pub struct CommandDispatcher {
    link: Arc<SerialLink>,
    write_timeout: Duration,
    /// Fatal write failure waiting for the owner to act on
    fatal: Option<String>,
    commands_sent: u64,
}

impl CommandDispatcher {
    pub fn new(link: Arc<SerialLink>, write_timeout: Duration) -> Self {
        Self {
            link,
            write_timeout,
            fatal: None,
            commands_sent: 0,
        }
    }

    /// Send one command
    ///
    /// Pending input is discarded first so the next response lines belong to
    /// this command.
    ///
    /// # Errors
    ///
    /// - `NotConnected` if the link is not connected
    /// - `Timeout` if the write did not complete within the write timeout
    /// - `Io` for any other write failure
    pub fn send(&mut self, command: &Command) -> Result<usize, CommandError> {
        if !self.link.is_connected() {
            return Err(CommandError::NotConnected);
        }

        self.link.flush_input().map_err(|e| self.record(e))?;

        let frame = command.encode();
        let written = self
            .link
            .write(&frame, self.write_timeout)
            .map_err(|e| self.record(e))?;

        self.commands_sent += 1;
        debug!("Sent command: {}", command);
        Ok(written)
    }

    /// Latch fatal failures and convert to the caller-facing error
    fn record(&mut self, err: WriteError) -> CommandError {
        match &err {
            WriteError::Io { message, fatal: true } => {
                error!("Fatal write error on {}: {}", self.link.device_path(), message);
                self.fatal.get_or_insert_with(|| message.clone());
            }
            WriteError::Timeout => warn!("Command write timed out after {:?}", self.write_timeout),
            _ => {}
        }
        err.into()
    }

    /// Take the latched fatal write error, if any
    pub fn take_fatal(&mut self) -> Option<String> {
        self.fatal.take()
    }

    pub fn commands_sent(&self) -> u64 {
        self.commands_sent
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }
}
