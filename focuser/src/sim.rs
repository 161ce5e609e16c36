//! Simulated Owlto controller.
//!
//! [`SimulatedFocuser`] is a [`Transport`] that decodes the commands written to
//! it with the same [`Dialect`] the session uses, and answers the way the
//! firmware would. Motion is stepped, not timed: each position query advances a
//! moving focuser by [`step`](SimulatedFocuser::with_step) ticks toward its
//! target, so a poll loop sees a move progress and finish deterministically.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{FocuserError, FocuserResult};
use crate::protocol::{Command, DeviceModel, Dialect};
use crate::transport::Transport;

/// Default ticks advanced per position query.
pub const DEFAULT_SIM_STEP: i64 = 250;

/// In-memory focuser controller speaking one dialect.
pub struct SimulatedFocuser {
    dialect: Box<dyn Dialect>,
    position: i64,
    target: i64,
    max_position: i64,
    step: i64,
    moving: bool,
    reversed: bool,
    stallguard: i32,
    move_current: u32,
    silent: bool,
    output: VecDeque<u8>,
    received: Vec<Command>,
}

impl SimulatedFocuser {
    /// A device of `model` at position 0 with the model's default travel.
    pub fn new(model: DeviceModel) -> Self {
        Self {
            dialect: model.dialect(),
            position: 0,
            target: 0,
            max_position: i64::from(model.default_max_position()),
            step: DEFAULT_SIM_STEP,
            moving: false,
            reversed: false,
            stallguard: 0,
            move_current: 16,
            silent: false,
            output: VecDeque::new(),
            received: Vec::new(),
        }
    }

    /// Start at `position`.
    pub fn with_position(mut self, position: i64) -> Self {
        self.position = position;
        self.target = position;
        self
    }

    /// Report `max_position` as the travel limit.
    pub fn with_max_position(mut self, max_position: i64) -> Self {
        self.max_position = max_position;
        self
    }

    /// Advance `step` ticks per position query while moving.
    pub fn with_step(mut self, step: i64) -> Self {
        self.step = step.max(1);
        self
    }

    /// Stop answering (unplugged cable, wrong port).
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Current simulated position.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Target of the last move.
    pub fn target(&self) -> i64 {
        self.target
    }

    /// Whether the motor is running.
    pub fn is_moving(&self) -> bool {
        self.moving
    }

    /// Whether the direction was inverted.
    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    /// Current stallguard threshold.
    pub fn stallguard(&self) -> i32 {
        self.stallguard
    }

    /// Current move current.
    pub fn move_current(&self) -> u32 {
        self.move_current
    }

    /// Every command decoded so far.
    pub fn received(&self) -> &[Command] {
        &self.received
    }

    fn advance(&mut self) {
        if !self.moving {
            return;
        }
        if self.target.abs_diff(self.position) <= self.step.unsigned_abs() {
            self.position = self.target;
            self.moving = false;
        } else if self.target > self.position {
            self.position = self.position.saturating_add(self.step);
        } else {
            self.position = self.position.saturating_sub(self.step);
        }
    }

    fn reply(&mut self, value: i64) {
        let text = self.dialect.encode_value(value);
        self.output.extend(text.bytes());
    }

    fn execute(&mut self, command: Command) -> FocuserResult<()> {
        let answered = self.dialect.encode(&command)?.expects_reply;

        match command {
            Command::GetPosition => {
                self.advance();
                self.reply(self.position);
            }
            Command::GetMaxPosition => self.reply(self.max_position),
            Command::IsMoving => self.reply(i64::from(self.moving)),
            Command::GetStallguard => self.reply(i64::from(self.stallguard)),
            Command::MoveAbsolute(target) => {
                self.target = i64::from(target).clamp(0, self.max_position);
                // Dialects without a separate start command move immediately.
                if self.dialect.move_sequence(target).len() == 1 {
                    self.moving = self.target != self.position;
                }
                if answered {
                    self.reply(i64::from(target));
                }
            }
            Command::StartMove => self.moving = self.target != self.position,
            Command::Sync(ticks) => {
                self.position = i64::from(ticks);
                self.target = self.position;
                self.moving = false;
            }
            Command::SetReverse(enabled) => self.reversed = enabled,
            Command::Calibrate | Command::ResetCalibration => {
                self.target = 0;
                self.moving = self.position != 0;
            }
            Command::SetStallguard(threshold) => self.stallguard = threshold,
            Command::SetMoveCurrent(current) => self.move_current = current,
            Command::Abort => {
                self.target = self.position;
                self.moving = false;
            }
        }

        self.received.push(command);
        Ok(())
    }
}

impl Transport for SimulatedFocuser {
    fn write_all(&mut self, bytes: &[u8]) -> FocuserResult<()> {
        if self.silent {
            return Ok(());
        }
        let text = String::from_utf8_lossy(bytes);
        match self.dialect.parse_command(&text) {
            Some(command) => {
                debug!("sim: {:?}", command);
                self.execute(command)
            }
            None => {
                warn!("sim: ignoring unrecognised command {:?}", text);
                Ok(())
            }
        }
    }

    fn read_until(
        &mut self,
        delimiter: u8,
        max_len: usize,
        timeout: Duration,
    ) -> FocuserResult<Vec<u8>> {
        if self.output.is_empty() {
            return Err(FocuserError::Timeout(timeout));
        }
        let mut response = Vec::new();
        while let Some(byte) = self.output.pop_front() {
            response.push(byte);
            if byte == delimiter {
                return Ok(response);
            }
            if response.len() >= max_len {
                break;
            }
        }
        if response.len() >= max_len {
            Err(FocuserError::Overflow {
                max_len,
                received: String::from_utf8_lossy(&response).into_owned(),
            })
        } else {
            Err(FocuserError::Timeout(timeout))
        }
    }

    fn clear_buffers(&mut self) -> FocuserResult<()> {
        self.output.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    const TIMEOUT: Duration = Duration::from_secs(3);

    fn query(sim: &mut SimulatedFocuser, command: Command) -> i64 {
        let frame = sim.dialect.encode(&command).unwrap();
        sim.write_all(frame.text.as_bytes()).unwrap();
        let delimiter = sim.dialect.delimiter();
        let reply = sim.read_until(delimiter, 32, TIMEOUT).unwrap();
        sim.dialect.decode_value(&reply).unwrap()
    }

    fn send(sim: &mut SimulatedFocuser, command: Command) {
        let frame = sim.dialect.encode(&command).unwrap();
        sim.write_all(frame.text.as_bytes()).unwrap();
        sim.clear_buffers().unwrap();
    }

    #[test]
    fn test_answers_position_in_every_dialect() {
        for model in DeviceModel::iter() {
            let mut sim = SimulatedFocuser::new(model).with_position(1234);
            assert_eq!(query(&mut sim, Command::GetPosition), 1234, "{model}");
        }
    }

    #[test]
    fn test_move_progresses_per_query() {
        let mut sim = SimulatedFocuser::new(DeviceModel::OwltoFocus).with_step(100);
        send(&mut sim, Command::MoveAbsolute(250));
        assert!(!sim.is_moving());
        send(&mut sim, Command::StartMove);
        assert!(sim.is_moving());

        assert_eq!(query(&mut sim, Command::GetPosition), 100);
        assert_eq!(query(&mut sim, Command::GetPosition), 200);
        assert_eq!(query(&mut sim, Command::IsMoving), 1);
        assert_eq!(query(&mut sim, Command::GetPosition), 250);
        assert_eq!(query(&mut sim, Command::IsMoving), 0);
    }

    #[test]
    fn test_single_command_move_starts_immediately() {
        let mut sim = SimulatedFocuser::new(DeviceModel::WilliamOpticsOwlto);
        send(&mut sim, Command::MoveAbsolute(1000));
        assert!(sim.is_moving());
        assert_eq!(sim.target(), 1000);
    }

    #[test]
    fn test_sync_and_abort() {
        let mut sim = SimulatedFocuser::new(DeviceModel::OwltoFocusClassic);
        send(&mut sim, Command::Sync(5000));
        assert_eq!(sim.position(), 5000);

        send(&mut sim, Command::MoveAbsolute(9000));
        send(&mut sim, Command::StartMove);
        query(&mut sim, Command::GetPosition);
        send(&mut sim, Command::Abort);
        assert!(!sim.is_moving());
        assert_eq!(sim.target(), sim.position());
    }

    #[test]
    fn test_silent_device_times_out() {
        let mut sim = SimulatedFocuser::new(DeviceModel::OwltoFocus);
        sim.set_silent(true);
        sim.write_all(b"<GPOS>").unwrap();
        assert!(matches!(
            sim.read_until(b']', 32, TIMEOUT),
            Err(FocuserError::Timeout(_))
        ));
        assert!(sim.received().is_empty());
    }

    #[test]
    fn test_move_target_clamped_to_travel() {
        let mut sim = SimulatedFocuser::new(DeviceModel::OwltoFocus).with_max_position(1000);
        send(&mut sim, Command::MoveAbsolute(5000));
        assert_eq!(sim.target(), 1000);
    }

    #[test]
    fn test_advance_from_far_position_does_not_overflow() {
        let mut sim = SimulatedFocuser::new(DeviceModel::OwltoFocus)
            .with_position(i64::MIN)
            .with_step(i64::MAX);
        send(&mut sim, Command::MoveAbsolute(1000));
        send(&mut sim, Command::StartMove);

        sim.advance();
        assert_eq!(sim.position(), -1);
        assert!(sim.is_moving());

        sim.advance();
        assert_eq!(sim.position(), 1000);
        assert!(!sim.is_moving());
    }
}
