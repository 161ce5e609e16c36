//! Owlto Focus classic framing: `CODE:arg#` commands, `:n#` replies.

use super::{scan_int, Capabilities, Command, DeviceModel, Dialect, Frame};
use crate::error::{FocuserError, FocuserResult};

/// Response terminator.
pub const DELIMITER: u8 = b'#';

/// Colon/hash-framed dialect (`P:#` / `:n#`).
///
/// This firmware has no max-position or stallguard queries and no calibration
/// reset.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColonDialect;

impl ColonDialect {
    fn unsupported(command: &Command) -> FocuserError {
        FocuserError::Unsupported {
            command: command.name(),
            model: DeviceModel::OwltoFocusClassic.as_str(),
        }
    }
}

impl Dialect for ColonDialect {
    fn model(&self) -> DeviceModel {
        DeviceModel::OwltoFocusClassic
    }

    fn delimiter(&self) -> u8 {
        DELIMITER
    }

    fn encode(&self, command: &Command) -> FocuserResult<Frame> {
        Ok(match *command {
            Command::GetPosition => Frame::query("P:#"),
            Command::IsMoving => Frame::query("IM:#"),
            Command::MoveAbsolute(target) => Frame::query(format!("STARG:{target:06}#")),
            Command::StartMove => Frame::write("SMOV:#"),
            Command::Sync(ticks) => Frame::write(format!("SP:{ticks:06}#")),
            Command::SetReverse(enabled) => Frame::write(format!("INV:{}#", u8::from(enabled))),
            Command::Calibrate => Frame::write("CALIBRATE:#"),
            Command::Abort => Frame::write("A:#"),
            Command::GetMaxPosition
            | Command::ResetCalibration
            | Command::GetStallguard
            | Command::SetStallguard(_)
            | Command::SetMoveCurrent(_) => return Err(Self::unsupported(command)),
        })
    }

    fn decode_value(&self, response: &[u8]) -> FocuserResult<i64> {
        let text = String::from_utf8_lossy(response);
        scan_int(&text, ":").ok_or_else(|| FocuserError::Parse {
            expected: ":<int>#",
            raw: text.into_owned(),
        })
    }

    fn encode_value(&self, value: i64) -> String {
        format!(":{value}#")
    }

    fn parse_command(&self, text: &str) -> Option<Command> {
        let (code, arg) = text.strip_suffix('#')?.split_once(':')?;
        let number = || arg.parse::<i64>().ok();
        let command = match code {
            "P" if arg.is_empty() => Command::GetPosition,
            "IM" if arg.is_empty() => Command::IsMoving,
            "STARG" => Command::MoveAbsolute(u32::try_from(number()?).ok()?),
            "SMOV" if arg.is_empty() => Command::StartMove,
            "SP" => Command::Sync(u32::try_from(number()?).ok()?),
            "INV" => Command::SetReverse(number()? != 0),
            "CALIBRATE" if arg.is_empty() => Command::Calibrate,
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
            | Capabilities::REVERSE
            | Capabilities::ABORT
            | Capabilities::CALIBRATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let d = ColonDialect;
        assert_eq!(d.encode(&Command::GetPosition).unwrap(), Frame::query("P:#"));
        assert_eq!(
            d.encode(&Command::MoveAbsolute(1500)).unwrap(),
            Frame::query("STARG:001500#")
        );
        assert_eq!(d.encode(&Command::StartMove).unwrap(), Frame::write("SMOV:#"));
        assert_eq!(d.encode(&Command::SetReverse(false)).unwrap().text, "INV:0#");
        assert_eq!(d.encode(&Command::Calibrate).unwrap().text, "CALIBRATE:#");
    }

    #[test]
    fn test_unsupported_commands() {
        let err = ColonDialect.encode(&Command::GetMaxPosition).unwrap_err();
        assert!(matches!(
            err,
            FocuserError::Unsupported {
                command: "GetMaxPosition",
                model: "owlto-focus-classic"
            }
        ));
        assert!(!ColonDialect
            .capabilities()
            .contains(Capabilities::MAX_POSITION));
    }

    #[test]
    fn test_decode() {
        let d = ColonDialect;
        assert_eq!(d.decode_value(b":1234#").unwrap(), 1234);
        assert!(d.decode_value(b"[1234]").is_err());
        assert!(d.decode_moving(b":1#").unwrap());
        assert!(!d.decode_moving(b":0#").unwrap());
    }

    #[test]
    fn test_parse_command_rejects_garbage() {
        let d = ColonDialect;
        assert_eq!(d.parse_command("INV:1#"), Some(Command::SetReverse(true)));
        assert_eq!(d.parse_command("P:"), None);
        assert_eq!(d.parse_command("SP:abc#"), None);
    }
}
