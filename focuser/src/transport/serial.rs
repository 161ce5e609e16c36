//! Serial port transport backed by the `serialport` crate.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, trace};

use super::Transport;
use crate::error::{FocuserError, FocuserResult};

/// Default baud rate for Owlto controllers.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Per-call read timeout on the port itself. The overall response deadline is
/// enforced in [`SerialTransport::read_until`].
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Blocking serial link, 8N1, no flow control.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialTransport {
    /// Open the serial port at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`FocuserError::Serial`] if the port cannot be opened.
    pub fn open(path: &str, baud_rate: u32) -> FocuserResult<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(PORT_POLL_TIMEOUT)
            .open()?;

        debug!("Opened {} at {} baud", path, baud_rate);

        Ok(Self {
            port,
            path: path.to_string(),
        })
    }

    /// Path the port was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> FocuserResult<()> {
        self.port.write_all(bytes).map_err(FocuserError::Write)?;
        self.port.flush().map_err(FocuserError::Write)?;
        Ok(())
    }

    fn read_until(
        &mut self,
        delimiter: u8,
        max_len: usize,
        timeout: Duration,
    ) -> FocuserResult<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 1];
        let mut bytes = Vec::with_capacity(max_len);

        loop {
            if Instant::now() >= deadline {
                return Err(FocuserError::Timeout(timeout));
            }

            match self.port.read(&mut buf) {
                Ok(0) => continue,
                Ok(_) => {
                    bytes.push(buf[0]);
                    if buf[0] == delimiter {
                        break;
                    }
                    if bytes.len() >= max_len {
                        return Err(FocuserError::Overflow {
                            max_len,
                            received: String::from_utf8_lossy(&bytes).into_owned(),
                        });
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(FocuserError::Read(e)),
            }
        }

        trace!("{} recv {} bytes", self.path, bytes.len());
        Ok(bytes)
    }

    fn clear_buffers(&mut self) -> FocuserResult<()> {
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }
}
