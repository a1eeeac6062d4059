//! Provides definitions and implementations for a single program step.
//!
//! ## Main Structures and Enumerations:
//!
//! - `OpCode`: An enumeration of the control-flow directives understood by the PulseBlaster
//!   instruction pointer, numbered exactly as SpinAPI numbers them.
//!
//! - `Instruction`: One column of the program table: a note, an op code with its op data,
//!   a duration, and one TTL channel mask per board.
//!
//! ## Features:
//!
//! - Op codes round-trip through their SpinAPI name (`"LONG_DELAY"`) and numeric code (`7`).
//! - Channel masks are stored per board and edited bit by bit through [`Instruction::set_channel`].
//! - The binary TTL pattern strings used by the config file are produced and parsed here.

use std::fmt;
use std::str::FromStr;

use crate::error::PersistenceError;
use crate::utils::{BoardSpec, Duration};

/// Control-flow directive of one instruction. Supported op codes: `CONTINUE`, `STOP`, `LOOP`,
/// `END_LOOP`, `JSR`, `RTS`, `BRANCH`, `LONG_DELAY`, `WAIT`.
#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpCode {
    CONTINUE = 0,
    STOP = 1,
    LOOP = 2,
    END_LOOP = 3,
    JSR = 4,
    RTS = 5,
    BRANCH = 6,
    LONG_DELAY = 7,
    WAIT = 8,
}

impl OpCode {
    pub const ALL: [OpCode; 9] = [
        OpCode::CONTINUE,
        OpCode::STOP,
        OpCode::LOOP,
        OpCode::END_LOOP,
        OpCode::JSR,
        OpCode::RTS,
        OpCode::BRANCH,
        OpCode::LONG_DELAY,
        OpCode::WAIT,
    ];

    /// Numeric code passed to the board.
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<OpCode> {
        OpCode::ALL.get(usize::try_from(code).ok()?).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            OpCode::CONTINUE => "CONTINUE",
            OpCode::STOP => "STOP",
            OpCode::LOOP => "LOOP",
            OpCode::END_LOOP => "END_LOOP",
            OpCode::JSR => "JSR",
            OpCode::RTS => "RTS",
            OpCode::BRANCH => "BRANCH",
            OpCode::LONG_DELAY => "LONG_DELAY",
            OpCode::WAIT => "WAIT",
        }
    }

    /// Op codes that leave the instruction pointer running past the end of the program.
    pub fn can_end_program(self) -> bool {
        !matches!(
            self,
            OpCode::CONTINUE | OpCode::LOOP | OpCode::END_LOOP | OpCode::LONG_DELAY | OpCode::WAIT
        )
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for OpCode {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        OpCode::ALL
            .iter()
            .find(|op| op.name() == s)
            .copied()
            .ok_or_else(|| PersistenceError::InvalidValue {
                section: String::new(),
                key: "op code".to_string(),
                value: s.to_string(),
            })
    }
}

/// One program step, shared by all boards except for its channel masks.
///
/// `channel_mask[b]` holds the TTL output pattern of board `b`: bit `k` set means channel `k`
/// is high for the duration of this instruction.
///
/// # Examples
///
/// ```
/// use pbcompiler_backend::instruction::*;
/// use pbcompiler_backend::utils::*;
///
/// let mut instr = Instruction::new(2, Duration::us(1.0), OpCode::CONTINUE, 0);
/// instr.set_channel(1, 3, true);
/// assert_eq!(instr.channel_mask, vec![0, 0b1000]);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub note: String,
    pub op_code: OpCode,
    pub op_data: u32,
    pub duration: Duration,
    pub channel_mask: Vec<u32>,
}

impl Instruction {
    pub fn new(board_count: usize, duration: Duration, op_code: OpCode, op_data: u32) -> Self {
        Instruction {
            note: String::new(),
            op_code,
            op_data,
            duration,
            channel_mask: vec![0; board_count],
        }
    }

    /// Surrounding whitespace is dropped.
    pub fn with_note(mut self, note: &str) -> Self {
        self.note = note.trim().to_string();
        self
    }

    /// Resolved duration in nanoseconds.
    pub fn duration_ns(&self) -> f64 {
        self.duration.as_ns()
    }

    pub fn channel(&self, board: usize, channel: usize) -> bool {
        let bit = channel_bit(channel);
        self.channel_mask
            .get(board)
            .map_or(false, |mask| mask & bit != 0)
    }

    /// Sets or clears one channel bit. Bounds are the caller's responsibility; see
    /// [`crate::Program::set_channel`] for the checked version.
    pub fn set_channel(&mut self, board: usize, channel: usize, on: bool) {
        let bit = channel_bit(channel);
        if let Some(mask) = self.channel_mask.get_mut(board) {
            if on {
                *mask |= bit;
            } else {
                *mask &= !bit;
            }
        }
    }

    /// Pads with blank boards or truncates so that exactly `board_count` masks remain.
    pub fn resize_boards(&mut self, board_count: usize) {
        self.channel_mask.resize(board_count, 0);
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let masks = self
            .channel_mask
            .iter()
            .map(|m| format!("{:#x}", m))
            .collect::<Vec<String>>()
            .join(", ");
        write!(
            f,
            "[{} {}, {}, [{}]]",
            self.op_code, self.op_data, self.duration, masks
        )
    }
}

fn channel_bit(channel: usize) -> u32 {
    u32::try_from(channel)
        .ok()
        .and_then(|c| 1u32.checked_shl(c))
        .unwrap_or(0)
}

/// Renders a channel mask as `0b` followed by one digit per channel, highest channel first.
///
/// ```
/// use pbcompiler_backend::instruction::ttl_pattern;
/// use pbcompiler_backend::utils::BoardSpec;
/// assert_eq!(ttl_pattern(0b101, &BoardSpec::default()), "0b000000000000000000000101");
/// ```
pub fn ttl_pattern(mask: u32, spec: &BoardSpec) -> String {
    format!("0b{:0width$b}", mask, width = spec.channels_per_board)
}

/// Parses a pattern written by [`ttl_pattern`]. Missing leading digits read as low channels.
pub fn parse_ttl_pattern(pattern: &str, spec: &BoardSpec) -> Result<u32, PersistenceError> {
    let invalid = || PersistenceError::InvalidValue {
        section: String::new(),
        key: "ttl output pattern".to_string(),
        value: pattern.to_string(),
    };
    let digits = pattern.trim().strip_prefix("0b").ok_or_else(invalid)?;
    if digits.is_empty() || digits.len() > spec.channels_per_board {
        return Err(invalid());
    }
    u32::from_str_radix(digits, 2).map_err(|_| invalid())
}
