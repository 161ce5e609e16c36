//! Scripted transport for tests and dry runs.

use std::collections::VecDeque;
use std::time::Duration;

use super::Transport;
use crate::error::{FocuserError, FocuserResult};

#[derive(Debug)]
enum Scripted {
    Reply(Vec<u8>),
    Timeout,
}

/// Transport that records every write and answers reads from a queue.
///
/// Reads pop the next scripted reply; an empty queue behaves like a device that
/// never answers and yields [`FocuserError::Timeout`].
///
/// ```
/// use focuser::transport::{LoopbackTransport, Transport};
/// use std::time::Duration;
///
/// let mut link = LoopbackTransport::new();
/// link.push_reply("[1234]");
/// link.write_all(b"<GPOS>").unwrap();
/// let reply = link.read_until(b']', 32, Duration::from_secs(3)).unwrap();
/// assert_eq!(reply, b"[1234]");
/// assert_eq!(link.writes(), ["<GPOS>"]);
/// ```
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    replies: VecDeque<Scripted>,
    writes: Vec<String>,
    reads: usize,
    clears: usize,
    fail_writes: bool,
}

impl LoopbackTransport {
    /// Create an empty loopback with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next read.
    pub fn push_reply(&mut self, reply: &str) {
        self.replies.push_back(Scripted::Reply(reply.as_bytes().to_vec()));
    }

    /// Queue a read that times out.
    pub fn push_timeout(&mut self) {
        self.replies.push_back(Scripted::Timeout);
    }

    /// Make every following write fail (or succeed again).
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Commands written so far, in order.
    pub fn writes(&self) -> &[String] {
        &self.writes
    }

    /// Forget recorded writes and counters; scripted replies are kept.
    pub fn reset_log(&mut self) {
        self.writes.clear();
        self.reads = 0;
        self.clears = 0;
    }

    /// Number of read attempts so far.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Number of buffer clears so far.
    pub fn clears(&self) -> usize {
        self.clears
    }

    /// Scripted replies not yet consumed.
    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }
}

impl Transport for LoopbackTransport {
    fn write_all(&mut self, bytes: &[u8]) -> FocuserResult<()> {
        if self.fail_writes {
            return Err(FocuserError::Write(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "loopback write failure",
            )));
        }
        self.writes.push(String::from_utf8_lossy(bytes).into_owned());
        Ok(())
    }

    fn read_until(
        &mut self,
        delimiter: u8,
        max_len: usize,
        timeout: Duration,
    ) -> FocuserResult<Vec<u8>> {
        self.reads += 1;
        match self.replies.pop_front() {
            Some(Scripted::Reply(bytes)) => {
                let end = bytes
                    .iter()
                    .position(|&b| b == delimiter)
                    .map(|i| i + 1)
                    .unwrap_or(bytes.len());
                if end > max_len {
                    return Err(FocuserError::Overflow {
                        max_len,
                        received: String::from_utf8_lossy(&bytes[..max_len]).into_owned(),
                    });
                }
                Ok(bytes[..end].to_vec())
            }
            Some(Scripted::Timeout) | None => Err(FocuserError::Timeout(timeout)),
        }
    }

    fn clear_buffers(&mut self) -> FocuserResult<()> {
        self.clears += 1;
        Ok(())
    }
}
