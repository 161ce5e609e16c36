//! Byte-stream transport boundary.
//!
//! The session never touches a serial port directly. It talks to a [`Transport`],
//! which is a synchronous, exclusively owned byte pipe with three operations:
//! write a command, read a delimited response, and discard anything pending in the
//! buffers. [`SerialTransport`] is the real implementation; [`LoopbackTransport`]
//! replays scripted responses for tests.

mod loopback;
mod serial;

use std::time::Duration;

use crate::error::FocuserResult;

pub use loopback::LoopbackTransport;
pub use serial::{SerialTransport, DEFAULT_BAUD_RATE};

/// Maximum response length read from the controller, in bytes.
pub const MAX_RESPONSE_LEN: usize = 32;

/// Default timeout for a single delimited read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Synchronous byte-oriented link to a focuser controller.
pub trait Transport {
    /// Write the whole buffer to the device.
    fn write_all(&mut self, bytes: &[u8]) -> FocuserResult<()>;

    /// Read until `delimiter` is seen (inclusive), at most `max_len` bytes.
    ///
    /// Returns [`FocuserError::Timeout`](crate::FocuserError::Timeout) if the
    /// delimiter does not arrive within `timeout`, and
    /// [`FocuserError::Overflow`](crate::FocuserError::Overflow) if `max_len`
    /// bytes arrive without one.
    fn read_until(
        &mut self,
        delimiter: u8,
        max_len: usize,
        timeout: Duration,
    ) -> FocuserResult<Vec<u8>>;

    /// Discard unread input and unsent output.
    fn clear_buffers(&mut self) -> FocuserResult<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> FocuserResult<()> {
        (**self).write_all(bytes)
    }

    fn read_until(
        &mut self,
        delimiter: u8,
        max_len: usize,
        timeout: Duration,
    ) -> FocuserResult<Vec<u8>> {
        (**self).read_until(delimiter, max_len, timeout)
    }

    fn clear_buffers(&mut self) -> FocuserResult<()> {
        (**self).clear_buffers()
    }
}
