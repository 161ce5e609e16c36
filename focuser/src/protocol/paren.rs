//! William Optics Owlto framing: bare `CODE:arg` commands, `(n)` replies
//! terminated by a newline.
//!
//! A single `M:` command both sets the target and starts the motor, and it is
//! not answered.

use super::{scan_int, Capabilities, Command, DeviceModel, Dialect, Frame};
use crate::error::{FocuserError, FocuserResult};

/// Response terminator.
pub const DELIMITER: u8 = b'\n';

/// Parenthesis-framed dialect (`P:` / `(n)`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ParenDialect;

impl Dialect for ParenDialect {
    fn model(&self) -> DeviceModel {
        DeviceModel::WilliamOpticsOwlto
    }

    fn delimiter(&self) -> u8 {
        DELIMITER
    }

    fn encode(&self, command: &Command) -> FocuserResult<Frame> {
        Ok(match *command {
            Command::GetPosition => Frame::query("P:"),
            Command::GetMaxPosition => Frame::query("MP:"),
            Command::IsMoving => Frame::query("IM:"),
            Command::MoveAbsolute(target) => Frame::write(format!("M:{target:06}")),
            Command::Sync(ticks) => Frame::write(format!("SP:{ticks:06}")),
            Command::Abort => Frame::write("A:"),
            Command::StartMove
            | Command::SetReverse(_)
            | Command::Calibrate
            | Command::ResetCalibration
            | Command::GetStallguard
            | Command::SetStallguard(_)
            | Command::SetMoveCurrent(_) => {
                return Err(FocuserError::Unsupported {
                    command: command.name(),
                    model: DeviceModel::WilliamOpticsOwlto.as_str(),
                })
            }
        })
    }

    fn decode_value(&self, response: &[u8]) -> FocuserResult<i64> {
        let text = String::from_utf8_lossy(response);
        scan_int(&text, "(").ok_or_else(|| FocuserError::Parse {
            expected: "(<int>)",
            raw: text.into_owned(),
        })
    }

    fn encode_value(&self, value: i64) -> String {
        format!("({value})\n")
    }

    fn parse_command(&self, text: &str) -> Option<Command> {
        let (code, arg) = text.split_once(':')?;
        let number = || arg.parse::<u32>().ok();
        let command = match code {
            "P" if arg.is_empty() => Command::GetPosition,
            "MP" if arg.is_empty() => Command::GetMaxPosition,
            "IM" if arg.is_empty() => Command::IsMoving,
            "M" => Command::MoveAbsolute(number()?),
            "SP" => Command::Sync(number()?),
            "A" if arg.is_empty() => Command::Abort,
            _ => return None,
        };
        Some(command)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ABS_MOVE
            | Capabilities::REL_MOVE
            | Capabilities::TIMED_MOVE
            | Capabilities::SYNC
            | Capabilities::ABORT
            | Capabilities::MAX_POSITION
    }

    fn move_sequence(&self, target: u32) -> Vec<Command> {
        vec![Command::MoveAbsolute(target)]
    }
}
