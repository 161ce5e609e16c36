//! Owlto Focus bracket framing.
//!
//! Commands are wrapped in angle brackets with a four letter code and an
//! optional zero-padded argument: `<GPOS>`, `<SPOS005000>`. Replies are a
//! bracketed integer terminated by `]`: `[1234]`.
//!
//! This firmware also exposes stallguard and motor current settings, and splits
//! an absolute move into "set target" (`<STAR...>`, answered) and "start"
//! (`<SMOV>`, not answered).

use super::{scan_int, split_code_arg, Capabilities, Command, DeviceModel, Dialect, Frame};
use crate::error::{FocuserError, FocuserResult};

/// Response terminator.
pub const DELIMITER: u8 = b']';

/// Bracket-framed dialect (`<CMD>` / `[n]`).
#[derive(Debug, Clone, Copy, Default)]
pub struct BracketDialect;

impl Dialect for BracketDialect {
    fn model(&self) -> DeviceModel {
        DeviceModel::OwltoFocus
    }

    fn delimiter(&self) -> u8 {
        DELIMITER
    }

    fn encode(&self, command: &Command) -> FocuserResult<Frame> {
        Ok(match *command {
            Command::GetPosition => Frame::query("<GPOS>"),
            Command::GetMaxPosition => Frame::query("<GMXP>"),
            Command::IsMoving => Frame::query("<GMOV>"),
            Command::GetStallguard => Frame::query("<GSGV>"),
            Command::MoveAbsolute(target) => Frame::query(format!("<STAR{target:06}>")),
            Command::StartMove => Frame::write("<SMOV>"),
            Command::Sync(ticks) => Frame::write(format!("<SPOS{ticks:06}>")),
            Command::SetReverse(enabled) => Frame::write(format!("<SINV{}>", u8::from(enabled))),
            Command::Calibrate => Frame::write("<CALI>"),
            Command::ResetCalibration => Frame::write("<RCAL>"),
            Command::SetStallguard(threshold) => Frame::write(format!("<SSGV{threshold:06}>")),
            Command::SetMoveCurrent(current) => Frame::write(format!("<SMVC{current:06}>")),
            Command::Abort => Frame::write("<ABRT>"),
        })
    }

    fn decode_value(&self, response: &[u8]) -> FocuserResult<i64> {
        let text = String::from_utf8_lossy(response);
        scan_int(&text, "[").ok_or_else(|| FocuserError::Parse {
            expected: "[<int>]",
            raw: text.into_owned(),
        })
    }

    fn encode_value(&self, value: i64) -> String {
        format!("[{value}]")
    }

    fn parse_command(&self, text: &str) -> Option<Command> {
        let body = text.strip_prefix('<')?.strip_suffix('>')?;
        let (code, arg) = split_code_arg(body);
        let command = match (code, arg) {
            ("GPOS", None) => Command::GetPosition,
            ("GMXP", None) => Command::GetMaxPosition,
            ("GMOV", None) => Command::IsMoving,
            ("GSGV", None) => Command::GetStallguard,
            ("STAR", Some(v)) => Command::MoveAbsolute(u32::try_from(v).ok()?),
            ("SMOV", None) => Command::StartMove,
            ("SPOS", Some(v)) => Command::Sync(u32::try_from(v).ok()?),
            ("SINV", Some(v)) => Command::SetReverse(v != 0),
            ("CALI", None) => Command::Calibrate,
            ("RCAL", None) => Command::ResetCalibration,
            ("SSGV", Some(v)) => Command::SetStallguard(i32::try_from(v).ok()?),
            ("SMVC", Some(v)) => Command::SetMoveCurrent(u32::try_from(v).ok()?),
            ("ABRT", None) => Command::Abort,
            _ => return None,
        };
        Some(command)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_fixed_width_arguments() {
        let d = BracketDialect;
        assert_eq!(d.encode(&Command::MoveAbsolute(42)).unwrap(), Frame::query("<STAR000042>"));
        assert_eq!(d.encode(&Command::Sync(5000)).unwrap().text, "<SPOS005000>");
        assert_eq!(d.encode(&Command::SetReverse(true)).unwrap().text, "<SINV1>");
        assert_eq!(d.encode(&Command::SetStallguard(-64)).unwrap().text, "<SSGV-00064>");
        assert_eq!(d.encode(&Command::SetMoveCurrent(16)).unwrap().text, "<SMVC000016>");
    }

    #[test]
    fn test_only_queries_expect_reply() {
        let d = BracketDialect;
        assert!(d.encode(&Command::GetPosition).unwrap().expects_reply);
        assert!(d.encode(&Command::MoveAbsolute(1)).unwrap().expects_reply);
        assert!(!d.encode(&Command::StartMove).unwrap().expects_reply);
        assert!(!d.encode(&Command::Abort).unwrap().expects_reply);
        assert!(!d.encode(&Command::Calibrate).unwrap().expects_reply);
    }

    #[test]
    fn test_decode_value() {
        let d = BracketDialect;
        assert_eq!(d.decode_value(b"[1234]").unwrap(), 1234);
        assert_eq!(d.decode_value(b"[-12]").unwrap(), -12);
        let err = d.decode_value(b"(1234)").unwrap_err();
        assert!(matches!(err, FocuserError::Parse { raw, .. } if raw == "(1234)"));
    }

    #[test]
    fn test_decode_moving_is_exact() {
        let d = BracketDialect;
        assert!(d.decode_moving(b"[1]").unwrap());
        assert!(!d.decode_moving(b"[0]").unwrap());
        assert!(d.decode_moving(b"[2]").is_err());
        assert!(d.decode_moving(b"[01]").is_err());
    }

    #[test]
    fn test_move_sequence_sets_target_then_starts() {
        assert_eq!(
            BracketDialect.move_sequence(900),
            vec![Command::MoveAbsolute(900), Command::StartMove]
        );
    }

    #[test]
    fn test_parse_device_side_commands() {
        let d = BracketDialect;
        assert_eq!(d.parse_command("<SSGV-00064>"), Some(Command::SetStallguard(-64)));
        assert_eq!(d.parse_command("<RCAL>"), Some(Command::ResetCalibration));
        assert_eq!(d.parse_command("<SINV0>"), Some(Command::SetReverse(false)));
        assert_eq!(d.parse_command("GPOS"), None);
        assert_eq!(d.parse_command("<NOPE>"), None);
    }
}
