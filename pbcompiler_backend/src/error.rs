//! Error types of the compiler core.
//!
//! [`ValidationError`] covers everything that can be wrong with a program or a scan setup
//! before it reaches hardware; each variant names the offending instruction or scan slot.
//! [`PersistenceError`] covers reading and writing the config and sequence files.
//! Both are plain values: callers inspect them and decide whether to proceed.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::instruction::OpCode;

/// Which end of a scan slot's range a check refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanBound {
    Start,
    End,
}

impl fmt::Display for ScanBound {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScanBound::Start => write!(f, "start"),
            ScanBound::End => write!(f, "end"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("The program has no instructions")]
    EmptyProgram,

    #[error("The first instruction can't have op code WAIT")]
    FirstInstructionWait,

    #[error("The last instruction (Instr {index}) can't have op code {op_code}; CONTINUE, LOOP, END_LOOP, LONG_DELAY and WAIT are not allowed")]
    IllegalLastOpCode { index: usize, op_code: OpCode },

    #[error("Instr {index}: the shortest acceptable pulse width is {min_ns} ns, got {duration_ns} ns")]
    PulseTooShort {
        index: usize,
        duration_ns: f64,
        min_ns: f64,
    },

    #[error("Instr {index}: duration {value} ns is not a multiple of the {resolution_ns} ns time resolution")]
    ResolutionViolation {
        index: usize,
        value: f64,
        resolution_ns: f64,
    },

    #[error("Scan Instr {slot}: Instr # {instr_index} doesn't exist (program has {instruction_count} instructions)")]
    ScanSlotOutOfRange {
        slot: usize,
        instr_index: usize,
        instruction_count: usize,
    },

    #[error("Scan Instr {slot}: {bound} duration {duration_ns} ns is shorter than the {min_ns} ns pulse width")]
    ScanPulseTooShort {
        slot: usize,
        bound: ScanBound,
        duration_ns: f64,
        min_ns: f64,
    },

    #[error("Scan Instr {slot}: {bound} duration {value} ns is not a multiple of the {resolution_ns} ns time resolution")]
    ScanResolutionViolation {
        slot: usize,
        bound: ScanBound,
        value: f64,
        resolution_ns: f64,
    },

    #[error("A scan needs at least one scan instruction")]
    NoScanSlots,

    #[error("Sample number must be at least 2, got {0}")]
    SampleCountTooSmall(usize),

    #[error("Repetition number must be at least 1, got {0}")]
    RepeatCountTooSmall(usize),

    #[error("Instruction index {index} out of range (program has {instruction_count} instructions)")]
    InstructionOutOfRange {
        index: usize,
        instruction_count: usize,
    },

    #[error("Board index {board} out of range ({board_count} boards)")]
    BoardOutOfRange { board: usize, board_count: usize },

    #[error("Channel {channel} out of range ({channels_per_board} channels per board)")]
    ChannelOutOfRange {
        channel: usize,
        channels_per_board: usize,
    },

    #[error("Channel mask {mask:#b} has bits above channel {channels_per_board}")]
    MaskOutOfRange {
        mask: u32,
        channels_per_board: usize,
    },

    #[error("Op data {op_data} out of range [0, {max}]")]
    OpDataOutOfRange { op_data: u32, max: u32 },

    #[error("Board {board} channel {channel}: label '{label}' can't contain ','")]
    LabelWithSeparator {
        board: usize,
        channel: usize,
        label: String,
    },
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File {0} already exists")]
    AlreadyExists(PathBuf),

    #[error("Line {line}: {text}")]
    Syntax { line: usize, text: String },

    #[error("Missing section [{0}]")]
    MissingSection(String),

    #[error("Missing key '{key}' in section [{section}]")]
    MissingKey { section: String, key: String },

    #[error("Invalid value '{value}' for key '{key}' in section [{section}]")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
