//! Owlto controller wire protocols.
//!
//! Three incompatible ASCII framings exist for what is essentially the same
//! firmware command set. Each is a [`Dialect`]: it knows how to turn a
//! [`Command`] into the bytes written to the port, which byte terminates a
//! response, and how to pull an integer back out of that response.
//!
//! | Operation        | [`bracket`]        | [`colon`]             | [`paren`]      |
//! |------------------|--------------------|-----------------------|----------------|
//! | get position     | `<GPOS>` → `[n]`   | `P:#` → `:n#`         | `P:` → `(n)`   |
//! | get max position | `<GMXP>`           | n/a                   | `MP:`          |
//! | is moving        | `<GMOV>`           | `IM:#`                | `IM:`          |
//! | move absolute    | `<STARnnnnnn>` + `<SMOV>` | `STARG:nnnnnn#` + `SMOV:#` | `M:nnnnnn` |
//! | sync             | `<SPOSnnnnnn>`     | `SP:nnnnnn#`          | `SP:nnnnnn`    |
//! | reverse          | `<SINVn>`          | `INV:n#`              | n/a            |
//! | calibrate        | `<CALI>`           | `CALIBRATE:#`         | n/a            |
//! | abort            | `<ABRT>`           | `A:#`                 | `A:`           |
//!
//! Select a dialect by [`DeviceModel`]:
//!
//! ```
//! use focuser::protocol::{Command, DeviceModel};
//!
//! let dialect = DeviceModel::OwltoFocus.dialect();
//! let frame = dialect.encode(&Command::Sync(5000)).unwrap();
//! assert_eq!(frame.text, "<SPOS005000>");
//! assert!(!frame.expects_reply);
//! assert_eq!(dialect.decode_value(b"[1234]").unwrap(), 1234);
//! ```

pub mod bracket;
pub mod colon;
pub mod paren;

use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{FocuserError, FocuserResult};

pub use bracket::BracketDialect;
pub use colon::ColonDialect;
pub use paren::ParenDialect;

/// High-level operations understood by Owlto controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
pub enum Command {
    /// Query absolute position
    GetPosition,
    /// Query upper travel limit
    GetMaxPosition,
    /// Query whether the motor is running
    IsMoving,
    /// Set the target position (and, for some dialects, start moving)
    MoveAbsolute(u32),
    /// Start motion toward the previously set target
    StartMove,
    /// Redefine the current position without moving
    Sync(u32),
    /// Invert the motor direction
    SetReverse(bool),
    /// Start the travel calibration routine
    Calibrate,
    /// Discard calibration data
    ResetCalibration,
    /// Query stallguard threshold
    GetStallguard,
    /// Set stallguard threshold
    SetStallguard(i32),
    /// Set motor move current
    SetMoveCurrent(u32),
    /// Stop immediately
    Abort,
}

impl Command {
    /// Variant name, for logs and errors.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// One encoded command ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// ASCII text written to the port, delimiters included
    pub text: String,
    /// Whether the controller answers this command
    pub expects_reply: bool,
}

impl Frame {
    /// A command the controller answers.
    pub fn query(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            expects_reply: true,
        }
    }

    /// A write-only command.
    pub fn write(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            expects_reply: false,
        }
    }
}

bitflags! {
    /// Operations a device model supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u16 {
        const ABS_MOVE = 1 << 0;
        const REL_MOVE = 1 << 1;
        const TIMED_MOVE = 1 << 2;
        const SYNC = 1 << 3;
        const REVERSE = 1 << 4;
        const ABORT = 1 << 5;
        const CALIBRATE = 1 << 6;
        const CALIBRATION_RESET = 1 << 7;
        const MAX_POSITION = 1 << 8;
        const STALLGUARD = 1 << 9;
        const MOVE_CURRENT = 1 << 10;
    }
}

/// Strategy for encoding commands and decoding responses of one device family.
pub trait Dialect: Send {
    /// Device model this dialect belongs to.
    fn model(&self) -> DeviceModel;

    /// Byte that terminates every response.
    fn delimiter(&self) -> u8;

    /// Encode a command, or fail with [`FocuserError::Unsupported`].
    fn encode(&self, command: &Command) -> FocuserResult<Frame>;

    /// Extract the integer payload from a response.
    fn decode_value(&self, response: &[u8]) -> FocuserResult<i64>;

    /// Render an integer payload the way the controller sends it.
    fn encode_value(&self, value: i64) -> String;

    /// Decode a command frame back into a [`Command`] (device side).
    fn parse_command(&self, text: &str) -> Option<Command>;

    /// Operations this model supports.
    fn capabilities(&self) -> Capabilities;

    /// Commands that move the focuser to `target`.
    fn move_sequence(&self, target: u32) -> Vec<Command> {
        vec![Command::MoveAbsolute(target), Command::StartMove]
    }

    /// Decode an is-moving reply. Only exact `1`/`0` payloads are accepted.
    fn decode_moving(&self, response: &[u8]) -> FocuserResult<bool> {
        let text = String::from_utf8_lossy(response);
        let text = text.trim_end_matches(['\r', '\n']);
        if text == self.encode_value(1).trim_end_matches(['\r', '\n']) {
            Ok(true)
        } else if text == self.encode_value(0).trim_end_matches(['\r', '\n']) {
            Ok(false)
        } else {
            Err(FocuserError::Parse {
                expected: "moving flag 0 or 1",
                raw: text.to_string(),
            })
        }
    }
}

/// Supported controller families.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DeviceModel {
    /// Owlto Focus, bracket framing (`<GPOS>` / `[n]`)
    #[default]
    OwltoFocus,
    /// Owlto Focus, colon/hash framing (`P:#` / `:n#`)
    OwltoFocusClassic,
    /// William Optics Owlto, parenthesis framing (`P:` / `(n)`)
    WilliamOpticsOwlto,
}

impl DeviceModel {
    /// Kebab-case identifier.
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Human-readable device name.
    pub fn display_name(self) -> &'static str {
        match self {
            DeviceModel::OwltoFocus | DeviceModel::OwltoFocusClassic => "WO Owlto Focus",
            DeviceModel::WilliamOpticsOwlto => "William Optics Owlto",
        }
    }

    /// Build the wire dialect for this model.
    pub fn dialect(self) -> Box<dyn Dialect> {
        match self {
            DeviceModel::OwltoFocus => Box::new(BracketDialect),
            DeviceModel::OwltoFocusClassic => Box::new(ColonDialect),
            DeviceModel::WilliamOpticsOwlto => Box::new(ParenDialect),
        }
    }

    /// Travel limit assumed until the device reports one.
    pub fn default_max_position(self) -> u32 {
        match self {
            DeviceModel::OwltoFocus | DeviceModel::OwltoFocusClassic => 100_000,
            DeviceModel::WilliamOpticsOwlto => 300_000,
        }
    }

    /// Settle time before the handshake query.
    ///
    /// The Owlto Focus firmware resets when the port opens and ignores commands
    /// for about two seconds.
    pub fn handshake_delay(self) -> Duration {
        match self {
            DeviceModel::OwltoFocus | DeviceModel::OwltoFocusClassic => Duration::from_secs(2),
            DeviceModel::WilliamOpticsOwlto => Duration::ZERO,
        }
    }
}

/// Parse `<prefix><int>` the way `sscanf("<prefix>%d")` does.
///
/// Leading whitespace before the number is skipped and anything after the digits
/// is ignored. Returns `None` if the prefix does not match, no digits follow, or
/// the value does not fit the controller's 32-bit integer.
pub(crate) fn scan_int(text: &str, prefix: &str) -> Option<i64> {
    let rest = text.strip_prefix(prefix)?.trim_start();
    let (negative, digits) = match rest.as_bytes().first()? {
        b'-' => (true, &rest[1..]),
        b'+' => (false, &rest[1..]),
        _ => (false, rest),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let magnitude: i64 = digits[..end].parse().ok()?;
    let value = if negative { -magnitude } else { magnitude };
    i32::try_from(value).ok().map(i64::from)
}

/// Split `<CODE><digits>` into code and optional numeric argument.
pub(crate) fn split_code_arg(body: &str) -> (&str, Option<i64>) {
    let split = body
        .find(|c: char| c.is_ascii_digit() || c == '-')
        .unwrap_or(body.len());
    let (code, arg) = body.split_at(split);
    (code, arg.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_scan_int_like_sscanf() {
        assert_eq!(scan_int("[1234]", "["), Some(1234));
        assert_eq!(scan_int("[-64]", "["), Some(-64));
        assert_eq!(scan_int("[ 7]", "["), Some(7));
        assert_eq!(scan_int("[12x]", "["), Some(12));
        assert_eq!(scan_int("(1234)", "["), None);
        assert_eq!(scan_int("[]", "["), None);
        assert_eq!(scan_int("[-]", "["), None);
        assert_eq!(scan_int("", "["), None);
    }

    #[test]
    fn test_scan_int_rejects_values_outside_i32() {
        assert_eq!(scan_int("[2147483647]", "["), Some(i64::from(i32::MAX)));
        assert_eq!(scan_int("[-2147483648]", "["), Some(i64::from(i32::MIN)));
        assert_eq!(scan_int("[2147483648]", "["), None);
        assert_eq!(scan_int("[9223372036854775807]", "["), None);
        assert_eq!(scan_int("[99999999999999999999999]", "["), None);
    }

    #[test]
    fn test_split_code_arg() {
        assert_eq!(split_code_arg("SPOS005000"), ("SPOS", Some(5000)));
        assert_eq!(split_code_arg("SSGV-00064"), ("SSGV", Some(-64)));
        assert_eq!(split_code_arg("GPOS"), ("GPOS", None));
    }

    #[test]
    fn test_model_names_round_trip() {
        for model in DeviceModel::iter() {
            assert_eq!(DeviceModel::from_str(model.as_str()).unwrap(), model);
            assert_eq!(model.dialect().model(), model);
        }
        assert_eq!(DeviceModel::OwltoFocusClassic.to_string(), "owlto-focus-classic");
    }

    #[test]
    fn test_every_model_can_move_and_abort() {
        for model in DeviceModel::iter() {
            let caps = model.dialect().capabilities();
            assert!(caps.contains(
                Capabilities::ABS_MOVE
                    | Capabilities::REL_MOVE
                    | Capabilities::TIMED_MOVE
                    | Capabilities::SYNC
                    | Capabilities::ABORT
            ));
        }
    }

    #[test]
    fn test_parse_command_inverts_encode() {
        let commands = [
            Command::GetPosition,
            Command::IsMoving,
            Command::MoveAbsolute(4321),
            Command::Sync(5000),
            Command::Abort,
        ];
        for model in DeviceModel::iter() {
            let dialect = model.dialect();
            for command in commands {
                let frame = dialect.encode(&command).unwrap();
                assert_eq!(
                    dialect.parse_command(&frame.text),
                    Some(command),
                    "{model}: {:?}",
                    frame.text
                );
            }
        }
    }
}
