//! Focuser session: command sequencing and polled device state.
//!
//! A [`FocuserSession`] owns one transport and one [`Dialect`]. It has no thread
//! of its own; the host calls into it when the user asks for something and on a
//! periodic timer ([`poll_tick`](FocuserSession::poll_tick)). The device never
//! acknowledges that a move finished, so the poll is what turns a Busy move back
//! into Ok.
//!
//! # Example
//!
//! ```
//! use focuser::events::NullSink;
//! use focuser::protocol::DeviceModel;
//! use focuser::session::{FocuserSession, PropertyState, SessionOptions};
//! use focuser::transport::LoopbackTransport;
//! use std::time::Duration;
//!
//! let mut link = LoopbackTransport::new();
//! link.push_reply("[1234]"); // handshake
//! link.push_reply("[1234]"); // position
//! link.push_reply("[60000]"); // max position
//! link.push_reply("[0]"); // stallguard
//!
//! let options = SessionOptions {
//!     handshake_delay: Duration::ZERO,
//!     ..SessionOptions::for_model(DeviceModel::OwltoFocus)
//! };
//! let mut session = FocuserSession::new(link, DeviceModel::OwltoFocus, Box::new(NullSink))
//!     .with_options(options);
//! session.connect()?;
//! assert_eq!(session.position(), 1234);
//! assert_eq!(session.max_position(), 60000);
//!
//! session.transport_mut().push_reply("[000500]"); // target acknowledged
//! assert_eq!(session.move_absolute(500), PropertyState::Busy);
//! # Ok::<(), focuser::FocuserError>(())
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{FocuserError, FocuserResult};
use crate::events::{EventSink, FocuserEvent};
use crate::protocol::{Capabilities, Command, DeviceModel, Dialect};
use crate::transport::{Transport, DEFAULT_READ_TIMEOUT, MAX_RESPONSE_LEN};

/// Position changes at or below this many ticks are not reported.
pub const DEFAULT_NOTIFY_THRESHOLD: i64 = 5;

/// Allowed stallguard threshold range.
pub const STALLGUARD_RANGE: (i32, i32) = (-64, 64);

/// Allowed motor move current range.
pub const MOVE_CURRENT_RANGE: (u32, u32) = (0, 32);

/// State of one host-visible property.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PropertyState {
    /// Nothing requested
    #[default]
    Idle,
    /// Last request completed
    Ok,
    /// Request in progress
    Busy,
    /// Last request failed
    Alert,
}

/// Direction of a relative or timed move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FocusDirection {
    /// Toward position 0
    Inward,
    /// Toward the travel limit
    Outward,
}

/// The motion properties a host displays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MotionFlags {
    /// Absolute move
    pub absolute: PropertyState,
    /// Relative move
    pub relative: PropertyState,
    /// Timed move
    pub timed: PropertyState,
}

impl MotionFlags {
    /// Aggregate state: Busy beats Alert beats Ok beats Idle.
    pub fn aggregate(&self) -> PropertyState {
        let states = [self.absolute, self.relative, self.timed];
        [
            PropertyState::Busy,
            PropertyState::Alert,
            PropertyState::Ok,
        ]
        .into_iter()
        .find(|s| states.contains(s))
        .unwrap_or(PropertyState::Idle)
    }
}

/// Tunables for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Wait before the handshake query
    pub handshake_delay: Duration,
    /// Timeout for one delimited read
    pub read_timeout: Duration,
    /// Read budget per response in bytes
    pub max_response_len: usize,
    /// Minimum position change (exclusive) that is reported
    pub notify_threshold: i64,
}

impl SessionOptions {
    /// Defaults for a device model.
    pub fn for_model(model: DeviceModel) -> Self {
        Self {
            handshake_delay: model.handshake_delay(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_response_len: MAX_RESPONSE_LEN,
            notify_threshold: DEFAULT_NOTIFY_THRESHOLD,
        }
    }
}

/// Point-in-time view of a session, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FocuserStatus {
    /// Device model
    pub model: DeviceModel,
    /// Whether the handshake succeeded
    pub connected: bool,
    /// Last polled position
    pub position: i64,
    /// Last commanded target
    pub target: i64,
    /// Travel limit
    pub max_position: i64,
    /// Aggregate motion state
    pub motion: PropertyState,
    /// Per-property motion states
    pub flags: MotionFlags,
    /// Calibration state
    pub calibration: PropertyState,
    /// Stallguard threshold, if read
    pub stallguard: Option<i32>,
    /// Number of timed stops waiting to fire
    pub pending_timed_stops: usize,
}

/// One focuser controller and its best-known state.
pub struct FocuserSession<T: Transport> {
    transport: T,
    dialect: Box<dyn Dialect>,
    sink: Box<dyn EventSink + Send>,
    options: SessionOptions,
    connected: bool,
    position: i64,
    last_reported: i64,
    target: i64,
    max_position: i64,
    flags: MotionFlags,
    calibration: PropertyState,
    stallguard: Option<i32>,
    move_current: Option<u32>,
    reversed: bool,
    timed_stops: Vec<Instant>,
}

impl<T: Transport> FocuserSession<T> {
    /// Create a disconnected session for `model` talking over `transport`.
    pub fn new(transport: T, model: DeviceModel, sink: Box<dyn EventSink + Send>) -> Self {
        Self {
            transport,
            dialect: model.dialect(),
            sink,
            options: SessionOptions::for_model(model),
            connected: false,
            position: 0,
            last_reported: 0,
            target: 0,
            max_position: i64::from(model.default_max_position()),
            flags: MotionFlags::default(),
            calibration: PropertyState::Idle,
            stallguard: None,
            move_current: None,
            reversed: false,
            timed_stops: Vec::new(),
        }
    }

    /// Replace the default tunables.
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    // ==================== Accessors ====================

    /// Device model.
    pub fn model(&self) -> DeviceModel {
        self.dialect.model()
    }

    /// Operations the device model supports.
    pub fn capabilities(&self) -> Capabilities {
        self.dialect.capabilities()
    }

    /// Whether the handshake succeeded and polling is active.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Last polled position in ticks.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Last commanded target in ticks.
    pub fn target(&self) -> i64 {
        self.target
    }

    /// Travel limit in ticks.
    pub fn max_position(&self) -> i64 {
        self.max_position
    }

    /// Aggregate state of the move properties.
    pub fn motion_state(&self) -> PropertyState {
        self.flags.aggregate()
    }

    /// Per-property move states.
    pub fn flags(&self) -> MotionFlags {
        self.flags
    }

    /// Calibration state.
    pub fn calibration_state(&self) -> PropertyState {
        self.calibration
    }

    /// Stallguard threshold last read or written.
    pub fn stallguard(&self) -> Option<i32> {
        self.stallguard
    }

    /// Move current last written.
    pub fn move_current(&self) -> Option<u32> {
        self.move_current
    }

    /// Whether the motor direction was inverted.
    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    /// Snapshot of everything above.
    pub fn status(&self) -> FocuserStatus {
        FocuserStatus {
            model: self.model(),
            connected: self.connected,
            position: self.position,
            target: self.target,
            max_position: self.max_position,
            motion: self.motion_state(),
            flags: self.flags,
            calibration: self.calibration,
            stallguard: self.stallguard,
            pending_timed_stops: self.timed_stops.len(),
        }
    }

    /// Borrow the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give the transport back.
    pub fn into_transport(self) -> T {
        self.transport
    }

    // ==================== Wire Exchange ====================

    /// Send one command and, if the dialect says it is answered, read the reply.
    ///
    /// Buffers are cleared before the write and after the read so a stale reply
    /// from an earlier timeout cannot be mistaken for this one.
    pub fn send_command(&mut self, command: Command) -> FocuserResult<Option<Vec<u8>>> {
        let frame = self.dialect.encode(&command)?;

        self.clear_buffers();
        debug!("CMD <{}>", frame.text);

        if let Err(e) = self.transport.write_all(frame.text.as_bytes()) {
            error!("{}", e);
            return Err(e);
        }

        if !frame.expects_reply {
            return Ok(None);
        }

        let response = self
            .transport
            .read_until(
                self.dialect.delimiter(),
                self.options.max_response_len,
                self.options.read_timeout,
            )
            .inspect_err(|e| error!("{}", e))?;

        debug!("RES <{}>", String::from_utf8_lossy(&response).trim_end());
        self.clear_buffers();

        Ok(Some(response))
    }

    fn clear_buffers(&mut self) {
        if let Err(e) = self.transport.clear_buffers() {
            warn!("Failed to flush serial buffers: {}", e);
        }
    }

    /// Send a query and decode its integer payload.
    fn query_value(&mut self, command: Command) -> FocuserResult<i64> {
        let response = self
            .send_command(command)?
            .ok_or(FocuserError::Parse {
                expected: "a reply",
                raw: String::new(),
            })?;
        self.dialect.decode_value(&response).inspect_err(|e| {
            error!("Unknown error: {} value ({})", command.name(), e);
        })
    }

    /// Query the device position and update the cache.
    pub fn read_position(&mut self) -> FocuserResult<i64> {
        let position = self.query_value(Command::GetPosition)?;
        self.position = position;
        Ok(position)
    }

    /// Query the device travel limit and update the cache.
    pub fn read_max_position(&mut self) -> FocuserResult<i64> {
        let max = self.query_value(Command::GetMaxPosition)?;
        self.max_position = max;
        Ok(max)
    }

    /// Query the stallguard threshold and report it.
    pub fn read_stallguard(&mut self) -> FocuserResult<i32> {
        let threshold = self.fetch_stallguard()?;
        self.sink.emit(FocuserEvent::StallguardChanged(threshold));
        Ok(threshold)
    }

    fn fetch_stallguard(&mut self) -> FocuserResult<i32> {
        let raw = self.query_value(Command::GetStallguard)?;
        let threshold = i32::try_from(raw).map_err(|_| FocuserError::OutOfRange {
            name: "stallguard",
            value: raw,
            min: i64::from(STALLGUARD_RANGE.0),
            max: i64::from(STALLGUARD_RANGE.1),
        })?;
        self.stallguard = Some(threshold);
        Ok(threshold)
    }

    /// Ask whether the motor is running.
    pub fn is_moving(&mut self) -> FocuserResult<bool> {
        let response = self
            .send_command(Command::IsMoving)?
            .ok_or(FocuserError::Parse {
                expected: "a reply",
                raw: String::new(),
            })?;
        self.dialect.decode_moving(&response).inspect_err(|e| {
            error!("Unknown error: isMoving value ({})", e);
        })
    }

    // ==================== Connection ====================

    /// Perform the handshake and fetch the focus parameters.
    ///
    /// # Errors
    ///
    /// Returns [`FocuserError::Handshake`] wrapping the underlying failure if the
    /// position query cannot be written, times out, or does not parse.
    pub fn connect(&mut self) -> FocuserResult<()> {
        let name = self.model().display_name();

        if !self.options.handshake_delay.is_zero() {
            std::thread::sleep(self.options.handshake_delay);
        }

        let position = match self.query_value(Command::GetPosition) {
            Ok(position) => position,
            Err(e) => {
                error!("ACK - getPosition failed");
                info!(
                    "Error retrieving data from {}, please ensure the controller is powered and the port is correct.",
                    name
                );
                return Err(FocuserError::Handshake(Box::new(e)));
            }
        };

        info!("POS:{}", position);
        info!("{} is online. Getting focus parameters...", name);

        self.position = position;
        self.connected = true;
        self.fetch_focus_params();
        self.last_reported = self.position;

        self.sink.emit(FocuserEvent::Connected {
            position: self.position,
            max_position: self.max_position,
        });
        if let Some(threshold) = self.stallguard {
            self.sink.emit(FocuserEvent::StallguardChanged(threshold));
        }
        info!("{} parameters updated, focuser ready for use.", name);
        Ok(())
    }

    /// Read every parameter the model exposes. Failures are logged, not fatal.
    /// Nothing is emitted here; `connect` reports the results after `Connected`.
    fn fetch_focus_params(&mut self) {
        self.calibration = PropertyState::Idle;
        let caps = self.capabilities();

        if let Err(e) = self.read_position() {
            warn!("Failed to read position: {}", e);
        }

        if caps.contains(Capabilities::MAX_POSITION) {
            if let Err(e) = self.read_max_position() {
                warn!("Failed to read max position: {}", e);
            }
        }

        if caps.contains(Capabilities::STALLGUARD) {
            if let Err(e) = self.fetch_stallguard() {
                warn!("Failed to read stallguard threshold: {}", e);
            }
        }
    }

    /// Stop polling. Pending timed stops are dropped.
    pub fn disconnect(&mut self) {
        self.connected = false;
        self.timed_stops.clear();
        info!("{} disconnected", self.model().display_name());
    }

    // ==================== Motion ====================

    fn start_move(&mut self, target: u32) -> FocuserResult<()> {
        for command in self.dialect.move_sequence(target) {
            self.send_command(command)?;
        }
        Ok(())
    }

    /// Move to an absolute position. Not checked against the travel limit.
    ///
    /// Returns Busy if the command was sent, Alert if it failed.
    pub fn move_absolute(&mut self, target: u32) -> PropertyState {
        self.target = i64::from(target);
        self.flags.absolute = match self.start_move(target) {
            Ok(()) => PropertyState::Busy,
            Err(e) => {
                error!("Absolute move to {} failed: {}", target, e);
                PropertyState::Alert
            }
        };
        self.flags.absolute
    }

    /// Move by `delta` ticks, clamped to `[0, max_position]`.
    pub fn move_relative(&mut self, direction: FocusDirection, delta: u32) -> PropertyState {
        let target = self.relative_target(direction, delta);
        self.target = i64::from(target);
        self.flags.relative = match self.start_move(target) {
            Ok(()) => PropertyState::Busy,
            Err(e) => {
                error!("Relative move to {} failed: {}", target, e);
                PropertyState::Alert
            }
        };
        self.flags.relative
    }

    /// Target of a relative move from the cached position.
    pub fn relative_target(&self, direction: FocusDirection, delta: u32) -> u32 {
        let delta = i64::from(delta);
        let unclamped = match direction {
            FocusDirection::Inward => self.position.saturating_sub(delta),
            FocusDirection::Outward => self.position.saturating_add(delta),
        };
        let max = self.max_position.clamp(0, i64::from(u32::MAX));
        // Lossless: clamped into [0, u32::MAX] above.
        unclamped.clamp(0, max) as u32
    }

    /// Run toward one end of travel and stop after `duration`.
    ///
    /// The stop fires from [`fire_due_timers`](Self::fire_due_timers). Issuing
    /// another move does not cancel it: every scheduled stop fires, aborting
    /// whatever motion is underway at that moment.
    pub fn move_timed(&mut self, direction: FocusDirection, duration: Duration) -> PropertyState {
        let target = match direction {
            FocusDirection::Inward => 0,
            FocusDirection::Outward => self.max_position.clamp(0, i64::from(u32::MAX)) as u32,
        };
        self.target = i64::from(target);

        if let Err(e) = self.start_move(target) {
            warn!("Timed move toward {} failed to start: {}", target, e);
        }

        self.timed_stops.push(Instant::now() + duration);
        self.flags.timed = PropertyState::Busy;
        PropertyState::Busy
    }

    /// Earliest pending timed stop.
    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.timed_stops.iter().min().copied()
    }

    /// Fire every timed stop due at or before `now`. Returns how many fired.
    pub fn fire_due_timers(&mut self, now: Instant) -> usize {
        let before = self.timed_stops.len();
        self.timed_stops.retain(|due| *due > now);
        let due = before - self.timed_stops.len();
        for _ in 0..due {
            self.finish_timed_move();
        }
        due
    }

    fn finish_timed_move(&mut self) {
        if let Err(e) = self.abort() {
            warn!("Abort after timed move failed: {}", e);
        }
        self.flags = MotionFlags::default();
        self.sink.emit(FocuserEvent::TimedMoveFinished);
    }

    /// Redefine the current position as `ticks` without moving.
    ///
    /// The cached position is left alone until the next poll reads it back.
    pub fn sync(&mut self, ticks: u32) -> FocuserResult<()> {
        self.send_command(Command::Sync(ticks))?;
        Ok(())
    }

    /// Stop immediately. Whether motion actually stopped is not checked.
    pub fn abort(&mut self) -> FocuserResult<()> {
        self.send_command(Command::Abort)?;
        Ok(())
    }

    /// Invert (or restore) the motor direction.
    pub fn set_reverse(&mut self, enabled: bool) -> FocuserResult<()> {
        self.send_command(Command::SetReverse(enabled))?;
        self.reversed = enabled;
        Ok(())
    }

    // ==================== Calibration & Driver Settings ====================

    /// Start the travel calibration routine.
    pub fn calibrate(&mut self) -> FocuserResult<()> {
        self.calibration_command(Command::Calibrate)
    }

    /// Discard the stored calibration and start over.
    pub fn reset_calibration(&mut self) -> FocuserResult<()> {
        self.calibration_command(Command::ResetCalibration)
    }

    fn calibration_command(&mut self, command: Command) -> FocuserResult<()> {
        let result = self.send_command(command).map(|_| ());
        self.calibration = if result.is_ok() {
            PropertyState::Busy
        } else {
            PropertyState::Alert
        };
        self.sink
            .emit(FocuserEvent::CalibrationStateChanged(self.calibration));
        result
    }

    /// Set the stallguard threshold (−64..=64).
    pub fn set_stallguard(&mut self, threshold: i32) -> FocuserResult<()> {
        let (min, max) = STALLGUARD_RANGE;
        if !(min..=max).contains(&threshold) {
            return Err(FocuserError::OutOfRange {
                name: "stallguard",
                value: i64::from(threshold),
                min: i64::from(min),
                max: i64::from(max),
            });
        }
        self.send_command(Command::SetStallguard(threshold))?;
        self.stallguard = Some(threshold);
        self.sink.emit(FocuserEvent::StallguardChanged(threshold));
        Ok(())
    }

    /// Set the motor move current (0..=32).
    pub fn set_move_current(&mut self, current: u32) -> FocuserResult<()> {
        let (min, max) = MOVE_CURRENT_RANGE;
        if !(min..=max).contains(&current) {
            return Err(FocuserError::OutOfRange {
                name: "move current",
                value: i64::from(current),
                min: i64::from(min),
                max: i64::from(max),
            });
        }
        self.send_command(Command::SetMoveCurrent(current))?;
        self.move_current = Some(current);
        Ok(())
    }

    /// Override the travel limit used for clamping and timed moves.
    ///
    /// The controllers have no command to store this; it only affects the host.
    pub fn set_max_position(&mut self, ticks: u32) {
        self.max_position = i64::from(ticks);
        self.sink.emit(FocuserEvent::MaxPositionChanged(self.max_position));
    }

    // ==================== Polling ====================

    /// Periodic refresh. Does nothing while disconnected.
    pub fn poll_tick(&mut self) {
        if !self.connected {
            return;
        }

        match self.read_position() {
            Ok(position) => {
                let threshold = self.options.notify_threshold.max(0).unsigned_abs();
                if position.abs_diff(self.last_reported) > threshold {
                    self.sink.emit(FocuserEvent::PositionChanged(position));
                    self.last_reported = position;
                }
            }
            Err(e) if e.is_transport() => warn!("Position poll failed: {}", e),
            Err(e) => error!("Position poll returned garbage: {}", e),
        }

        let moving_requested = self.flags.absolute == PropertyState::Busy
            || self.flags.relative == PropertyState::Busy
            || self.calibration == PropertyState::Busy;
        if !moving_requested {
            return;
        }

        match self.is_moving() {
            Ok(true) => {}
            Ok(false) => {
                self.flags.absolute = PropertyState::Ok;
                self.flags.relative = PropertyState::Ok;
                if self.calibration == PropertyState::Busy {
                    self.calibration = PropertyState::Ok;
                    self.sink
                        .emit(FocuserEvent::CalibrationStateChanged(self.calibration));
                }
                self.last_reported = self.position;
                self.sink.emit(FocuserEvent::PositionReached(self.position));
                info!("Focuser reached requested position.");
            }
            Err(e) => warn!("Motion poll failed, keeping busy state: {}", e),
        }
    }
}
