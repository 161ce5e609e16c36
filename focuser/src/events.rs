//! Notifications from a session to its host.

use crossbeam_channel::Sender;
use serde::Serialize;
use tracing::trace;

use crate::session::PropertyState;

/// State change reported by a [`FocuserSession`](crate::FocuserSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "value", rename_all = "snake_case")]
pub enum FocuserEvent {
    /// Handshake succeeded and parameters were fetched
    Connected {
        /// Absolute position in ticks
        position: i64,
        /// Travel limit in ticks
        max_position: i64,
    },
    /// Position moved by more than the notify threshold
    PositionChanged(i64),
    /// A move finished; the focuser is at this position
    PositionReached(i64),
    /// Travel limit changed
    MaxPositionChanged(i64),
    /// A timed move was stopped and all motion states reset to idle
    TimedMoveFinished,
    /// Calibration state changed
    CalibrationStateChanged(PropertyState),
    /// Stallguard threshold read from the device
    StallguardChanged(i32),
}

/// Receiver of session notifications.
pub trait EventSink {
    /// Deliver one event. Must not block.
    fn emit(&self, event: FocuserEvent);
}

impl EventSink for Sender<FocuserEvent> {
    fn emit(&self, event: FocuserEvent) {
        if self.send(event).is_err() {
            trace!("Event receiver dropped, discarding {:?}", event);
        }
    }
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: FocuserEvent) {}
}
