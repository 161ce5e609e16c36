//! Host integration loop.
//!
//! A [`Runner`] owns a connected [`FocuserSession`] and is the only thing that
//! touches it. User requests arrive on a channel; between requests the runner
//! wakes for the periodic poll and for any timed-move stop that falls due.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{info, warn};

use crate::error::{FocuserError, FocuserResult};
use crate::session::{FocusDirection, FocuserSession, PropertyState};
use crate::transport::Transport;

/// A user-initiated request for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRequest {
    /// Move to an absolute position
    MoveAbsolute(u32),
    /// Move by a number of ticks
    MoveRelative {
        /// Direction of travel
        direction: FocusDirection,
        /// Distance in ticks
        ticks: u32,
    },
    /// Run toward one end for a fixed time
    MoveTimed {
        /// Direction of travel
        direction: FocusDirection,
        /// How long to run before aborting
        duration: Duration,
    },
    /// Redefine the current position
    Sync(u32),
    /// Stop now
    Abort,
    /// Invert motor direction
    SetReverse(bool),
    /// Start calibration
    Calibrate,
    /// Discard calibration
    ResetCalibration,
    /// Set stallguard threshold
    SetStallguard(i32),
    /// Set motor move current
    SetMoveCurrent(u32),
    /// Override travel limit
    SetMaxPosition(u32),
    /// Stop the runner
    Shutdown,
}

impl<T: Transport> FocuserSession<T> {
    /// Apply one host request.
    ///
    /// Moves report their resulting property state; other requests report Ok
    /// or the error that stopped them. [`HostRequest::Shutdown`] is a no-op here.
    pub fn handle(&mut self, request: HostRequest) -> FocuserResult<PropertyState> {
        match request {
            HostRequest::MoveAbsolute(target) => return Ok(self.move_absolute(target)),
            HostRequest::MoveRelative { direction, ticks } => {
                return Ok(self.move_relative(direction, ticks))
            }
            HostRequest::MoveTimed {
                direction,
                duration,
            } => return Ok(self.move_timed(direction, duration)),
            HostRequest::Sync(ticks) => self.sync(ticks)?,
            HostRequest::Abort => self.abort()?,
            HostRequest::SetReverse(enabled) => self.set_reverse(enabled)?,
            HostRequest::Calibrate => self.calibrate()?,
            HostRequest::ResetCalibration => self.reset_calibration()?,
            HostRequest::SetStallguard(threshold) => self.set_stallguard(threshold)?,
            HostRequest::SetMoveCurrent(current) => self.set_move_current(current)?,
            HostRequest::SetMaxPosition(ticks) => self.set_max_position(ticks),
            HostRequest::Shutdown => return Ok(PropertyState::Idle),
        }
        Ok(PropertyState::Ok)
    }
}

/// Single-threaded event loop around one session.
pub struct Runner<T: Transport> {
    session: FocuserSession<T>,
    requests: Receiver<HostRequest>,
    poll_interval: Duration,
}

impl<T: Transport> Runner<T> {
    /// Drive `session` from `requests`, polling every `poll_interval`.
    ///
    /// # Errors
    ///
    /// Returns [`FocuserError::NotConnected`] if the handshake has not been done.
    pub fn new(
        session: FocuserSession<T>,
        requests: Receiver<HostRequest>,
        poll_interval: Duration,
    ) -> FocuserResult<Self> {
        if !session.is_connected() {
            return Err(FocuserError::NotConnected);
        }
        Ok(Self {
            session,
            requests,
            poll_interval,
        })
    }

    /// Run until [`HostRequest::Shutdown`] or every sender is dropped, then hand
    /// the session back.
    pub fn run(mut self) -> FocuserSession<T> {
        let mut next_poll = Instant::now() + self.poll_interval;

        loop {
            let wake_at = self
                .session
                .next_timer_deadline()
                .map_or(next_poll, |stop| stop.min(next_poll));
            let wait = wake_at.saturating_duration_since(Instant::now());

            match self.requests.recv_timeout(wait) {
                Ok(HostRequest::Shutdown) => {
                    info!("Focuser runner shutting down");
                    break;
                }
                Ok(request) => match self.session.handle(request) {
                    Ok(PropertyState::Alert) => warn!("{:?} failed", request),
                    Ok(_) => {}
                    Err(e) => warn!("{:?} failed: {}", request, e),
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("All request senders dropped, stopping focuser runner");
                    break;
                }
            }

            let now = Instant::now();
            self.session.fire_due_timers(now);

            if now >= next_poll {
                self.session.poll_tick();
                next_poll += self.poll_interval;
                if next_poll <= now {
                    next_poll = now + self.poll_interval;
                }
            }
        }

        self.session
    }
}

impl<T: Transport + Send + 'static> Runner<T> {
    /// Run on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<FocuserSession<T>>> {
        std::thread::Builder::new()
            .name("focuser-runner".to_string())
            .spawn(move || self.run())
    }
}
