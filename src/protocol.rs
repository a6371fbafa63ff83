//! Outbound half of the wire protocol.
//!
//! Every command is one text line: `key=value`, `key=v0,v1,...` for integer
//! sequences, or a bare `key` for action words. The transport appends the
//! single `\r` terminator. There is no escaping, checksum or acknowledgement.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Keys starting with this prefix carry remote status, not robot actuation.
pub const ADMIN_PREFIX: &str = "no-pass.";

pub const KEY_LEFT_US: &str = "left_us";
pub const KEY_RIGHT_US: &str = "right_us";
pub const KEY_HEAD_COLOR1: &str = "head_color1";
pub const KEY_HEAD_COLOR2: &str = "head_color2";
pub const KEY_ARMS: &str = "arms";
pub const KEY_REMOTE_STATUS: &str = "no-pass.remote.status";

pub const ARM_JOINTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandValue {
    /// Bare action word, sent as just the key.
    None,
    Int(i64),
    Text(String),
    /// Integers joined by a bare comma.
    Sequence(Vec<i32>),
}

impl From<i64> for CommandValue {
    fn from(value: i64) -> Self {
        CommandValue::Int(value)
    }
}

impl From<u16> for CommandValue {
    fn from(value: u16) -> Self {
        CommandValue::Int(i64::from(value))
    }
}

impl From<&str> for CommandValue {
    fn from(value: &str) -> Self {
        CommandValue::Text(value.to_string())
    }
}

impl From<String> for CommandValue {
    fn from(value: String) -> Self {
        CommandValue::Text(value)
    }
}

impl From<Vec<i32>> for CommandValue {
    fn from(value: Vec<i32>) -> Self {
        CommandValue::Sequence(value)
    }
}

impl From<&[i32]> for CommandValue {
    fn from(value: &[i32]) -> Self {
        CommandValue::Sequence(value.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub key: String,
    pub value: CommandValue,
}

impl Command {
    pub fn new(key: impl Into<String>, value: impl Into<CommandValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn action(word: impl Into<String>) -> Self {
        Self {
            key: word.into(),
            value: CommandValue::None,
        }
    }

    /// The `left_us`/`right_us` pair that drives both motors.
    pub fn drive(left_us: u16, right_us: u16) -> [Command; 2] {
        [
            Command::new(KEY_LEFT_US, left_us),
            Command::new(KEY_RIGHT_US, right_us),
        ]
    }

    /// Safety-stop pair: both motors to the neutral pulse width.
    pub fn motor_stop(neutral_us: u16) -> [Command; 2] {
        Self::drive(neutral_us, neutral_us)
    }

    /// Head LED color for channel 1 or 2. Other channels fall back to 1.
    pub fn head_color(channel: u8, color: impl Into<String>) -> Self {
        let key = if channel == 2 { KEY_HEAD_COLOR2 } else { KEY_HEAD_COLOR1 };
        let color: String = color.into();
        Command::new(key, color)
    }

    pub fn arms(positions: [i32; ARM_JOINTS]) -> Self {
        Command::new(KEY_ARMS, positions.to_vec())
    }

    pub fn connection_status(connected: bool) -> Self {
        let status = if connected { "connected" } else { "disconnected" };
        Command::new(KEY_REMOTE_STATUS, status)
    }

    pub fn is_administrative(&self) -> bool {
        self.key.starts_with(ADMIN_PREFIX)
    }

    pub fn encode(&self) -> String {
        encode(&self.key, &self.value)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Render one command line, without the trailing `\r`.
pub fn encode(key: &str, value: &CommandValue) -> String {
    let mut line = String::with_capacity(key.len() + 16);
    line.push_str(key);

    match value {
        CommandValue::None => {}
        CommandValue::Int(v) => {
            line.push('=');
            line.push_str(&v.to_string());
        }
        CommandValue::Text(text) => {
            line.push('=');
            line.push_str(text);
        }
        CommandValue::Sequence(values) => {
            line.push('=');
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    line.push(',');
                }
                line.push_str(&v.to_string());
            }
        }
    }

    line
}

/// An encoded line plus the pause the sender owes the robot after writing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacedLine {
    pub line: String,
    pub delay: Duration,
}

pub fn encode_with_delay(key: &str, value: &CommandValue, delay: Duration) -> PacedLine {
    PacedLine {
        line: encode(key, value),
        delay,
    }
}

/// Parse operator input such as `90,90,180` into a command value.
///
/// Empty input is a bare action, a comma list of integers is a sequence, a
/// single integer is an integer, anything else is sent verbatim as text.
pub fn parse_value(input: &str) -> CommandValue {
    let input = input.trim();
    if input.is_empty() {
        return CommandValue::None;
    }

    if input.contains(',') {
        let parsed: Result<Vec<i32>, _> = input.split(',').map(|s| s.trim().parse::<i32>()).collect();
        return match parsed {
            Ok(values) => CommandValue::Sequence(values),
            Err(_) => CommandValue::Text(input.to_string()),
        };
    }

    match input.parse::<i64>() {
        Ok(v) => CommandValue::Int(v),
        Err(_) => CommandValue::Text(input.to_string()),
    }
}
