//! Error types shared by the transport, protocol and session layers.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to a focuser.
///
/// Every variant is terminal for the operation that produced it. Nothing in this
/// crate retries; a failed poll simply leaves the cached state alone until the
/// next tick.
#[derive(Error, Debug)]
pub enum FocuserError {
    /// Writing a command to the transport failed.
    #[error("Serial write error: {0}")]
    Write(#[source] std::io::Error),

    /// Reading a response from the transport failed.
    #[error("Serial read error: {0}")]
    Read(#[source] std::io::Error),

    /// No delimiter arrived before the read timeout expired.
    #[error("Timeout after {0:?} waiting for response")]
    Timeout(Duration),

    /// The response filled the read budget without a delimiter.
    #[error("Response exceeded {max_len} bytes without delimiter: {received:?}")]
    Overflow {
        /// Read budget in bytes
        max_len: usize,
        /// Bytes received so far (lossy UTF-8)
        received: String,
    },

    /// Response did not match the dialect's expected pattern.
    #[error("Unexpected response {raw:?} (expected {expected})")]
    Parse {
        /// Human-readable description of the expected pattern
        expected: &'static str,
        /// Raw response as received
        raw: String,
    },

    /// The initial position query did not produce a valid answer.
    #[error("Handshake failed: {0}")]
    Handshake(#[source] Box<FocuserError>),

    /// The selected device model has no wire encoding for this command.
    #[error("{model} does not support {command}")]
    Unsupported {
        /// Command name
        command: &'static str,
        /// Device model name
        model: &'static str,
    },

    /// A setting was outside the range the device accepts.
    #[error("{name} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Setting name
        name: &'static str,
        /// Rejected value
        value: i64,
        /// Minimum allowed value
        min: i64,
        /// Maximum allowed value
        max: i64,
    },

    /// Opening or configuring the serial port failed.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Configuration is semantically invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O error (config load/save).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An operation needing a live device was attempted before connecting.
    #[error("Focuser not connected")]
    NotConnected,
}

/// Result type for focuser operations.
pub type FocuserResult<T> = Result<T, FocuserError>;

impl FocuserError {
    /// Returns true for errors raised by the byte-stream transport itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FocuserError::Write(_)
                | FocuserError::Read(_)
                | FocuserError::Timeout(_)
                | FocuserError::Overflow { .. }
        )
    }
}
