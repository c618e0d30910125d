//! Trait abstraction for serial port operations to enable testing

use std::io::{self, Read, Write};
use std::time::Duration;

/// Trait for serial port I/O operations
///
/// Every method is expected to return promptly: `read` is only called for
/// bytes that `bytes_to_read` reported as available, and `write_all` is
/// bounded by the timeout set just before it.
pub trait SerialPortIO: Send {
    /// Number of bytes waiting in the input buffer
    fn bytes_to_read(&mut self) -> io::Result<usize>;

    /// Read available bytes into `buf`
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all data to the port
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    fn flush(&mut self) -> io::Result<()>;

    /// Set the timeout applied to subsequent reads and writes
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard pending input
    fn clear_input(&mut self) -> io::Result<()>;

    /// Discard pending input and output
    fn clear_all(&mut self) -> io::Result<()>;
}

/// Wrapper around a `serialport::SerialPort` that implements SerialPortIO
pub struct HardwarePort {
    port: Box<dyn serialport::SerialPort>,
}

impl HardwarePort {
    pub fn new(port: Box<dyn serialport::SerialPort>) -> Self {
        Self { port }
    }
}

fn to_io(err: serialport::Error) -> io::Error {
    io::Error::from(err)
}

impl SerialPortIO for HardwarePort {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        self.port.bytes_to_read().map(|n| n as usize).map_err(to_io)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut self.port, buf)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.port, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(&mut self.port)
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(to_io)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(serialport::ClearBuffer::Input).map_err(to_io)
    }

    fn clear_all(&mut self) -> io::Result<()> {
        self.port.clear(serialport::ClearBuffer::All).map_err(to_io)
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Mock serial port for testing
    ///
    /// Clones share state, so a test keeps one clone to feed input and
    /// inspect writes while the link owns the other.
    #[derive(Clone, Default)]
    pub struct MockSerialPort {
        pub inbound: Arc<Mutex<VecDeque<u8>>>,
        pub written_data: Arc<Mutex<Vec<Vec<u8>>>>,
        pub read_error: Arc<Mutex<Option<io::ErrorKind>>>,
        pub write_error: Arc<Mutex<Option<io::ErrorKind>>>,
        pub input_clears: Arc<Mutex<usize>>,
        pub full_clears: Arc<Mutex<usize>>,
        pub last_timeout: Arc<Mutex<Option<Duration>>>,
    }

    impl MockSerialPort {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue bytes for the link to read
        pub fn feed(&self, data: &[u8]) {
            self.inbound.lock().extend(data.iter().copied());
        }

        pub fn get_written_data(&self) -> Vec<Vec<u8>> {
            self.written_data.lock().clone()
        }

        /// Written commands as text, terminators stripped
        pub fn written_lines(&self) -> Vec<String> {
            self.get_written_data()
                .iter()
                .map(|bytes| String::from_utf8_lossy(bytes).trim_end().to_string())
                .collect()
        }

        pub fn set_read_error(&self, error: io::ErrorKind) {
            *self.read_error.lock() = Some(error);
        }

        pub fn set_write_error(&self, error: io::ErrorKind) {
            *self.write_error.lock() = Some(error);
        }

        pub fn input_clear_count(&self) -> usize {
            *self.input_clears.lock()
        }
    }

    impl SerialPortIO for MockSerialPort {
        fn bytes_to_read(&mut self) -> io::Result<usize> {
            if let Some(error) = *self.read_error.lock() {
                return Err(io::Error::new(error, "Mock read error"));
            }
            Ok(self.inbound.lock().len())
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(error) = *self.read_error.lock() {
                return Err(io::Error::new(error, "Mock read error"));
            }
            let mut inbound = self.inbound.lock();
            let n = buf.len().min(inbound.len());
            for (slot, byte) in buf.iter_mut().zip(inbound.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }

        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            if let Some(error) = *self.write_error.lock() {
                return Err(io::Error::new(error, "Mock write error"));
            }
            self.written_data.lock().push(data.to_vec());
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            *self.last_timeout.lock() = Some(timeout);
            Ok(())
        }

        fn clear_input(&mut self) -> io::Result<()> {
            self.inbound.lock().clear();
            *self.input_clears.lock() += 1;
            Ok(())
        }

        fn clear_all(&mut self) -> io::Result<()> {
            self.inbound.lock().clear();
            *self.full_clears.lock() += 1;
            Ok(())
        }
    }
}
