//! The program module holds the in-memory sequencer program shared by all boards.
//!
//! ## Overview
//!
//! A [`Program`] is an ordered list of [`Instruction`]s. Every instruction carries one channel
//! mask per board, so the same control flow (op codes, op data, durations) drives all boards
//! while each board outputs its own TTL pattern.
//!
//! Instruction positions are stable: scan slots refer to instructions by index, so the program
//! only grows and shrinks at its end ([`Program::add_instr`], [`Program::pop_instr`]). All
//! other edits go through checked setters that return a [`ValidationError`] instead of
//! panicking on a bad index.
//!
//! [`ChannelLabels`] keeps the free-text connection label of every channel of every board.

use crate::error::ValidationError;
use crate::instruction::*;
use crate::utils::*;

/// Ordered instructions for `board_count` boards, checked against a [`BoardSpec`].
///
/// # Example
/// ```
/// use pbcompiler_backend::*;
///
/// let mut prog = Program::new(1, BoardSpec::default());
/// prog.add_instr();
/// prog.set_channel(0, 0, 3, true).unwrap();
/// prog.set_duration(0, Duration::us(2.0)).unwrap();
/// prog.set_op_code(0, OpCode::BRANCH).unwrap();
/// assert_eq!(prog.instr(0).unwrap().duration_ns(), 2000.0);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    board_count: usize,
    spec: BoardSpec,
    instructions: Vec<Instruction>,
}

impl Program {
    pub fn new(board_count: usize, spec: BoardSpec) -> Self {
        Self {
            board_count,
            spec,
            instructions: Vec::new(),
        }
    }

    /// A program with `count` default instructions, see [`Program::default_instruction`].
    pub fn with_default_instructions(board_count: usize, spec: BoardSpec, count: usize) -> Self {
        let mut prog = Self::new(board_count, spec);
        for _ in 0..count {
            prog.add_instr();
        }
        prog
    }

    pub fn board_count(&self) -> usize {
        self.board_count
    }

    pub fn spec(&self) -> &BoardSpec {
        &self.spec
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// 10 ms, `CONTINUE`, op data 0, no note, all channels low.
    pub fn default_instruction(&self) -> Instruction {
        Instruction::new(self.board_count, Duration::ms(10.0), OpCode::CONTINUE, 0)
    }

    pub fn instr(&self, index: usize) -> Result<&Instruction, ValidationError> {
        let instruction_count = self.instructions.len();
        self.instructions
            .get(index)
            .ok_or(ValidationError::InstructionOutOfRange {
                index,
                instruction_count,
            })
    }

    fn instr_(&mut self, index: usize) -> Result<&mut Instruction, ValidationError> {
        let instruction_count = self.instructions.len();
        self.instructions
            .get_mut(index)
            .ok_or(ValidationError::InstructionOutOfRange {
                index,
                instruction_count,
            })
    }

    /// Appends a default instruction and returns its index.
    pub fn add_instr(&mut self) -> usize {
        let instr = self.default_instruction();
        self.add_instruction(instr)
    }

    /// Appends `instr`, resizing its channel masks to this program's board count, and returns
    /// its index.
    pub fn add_instruction(&mut self, mut instr: Instruction) -> usize {
        instr.resize_boards(self.board_count);
        self.instructions.push(instr);
        self.instructions.len() - 1
    }

    /// Removes the last instruction. A program never shrinks below one instruction through this
    /// method; `None` is returned instead.
    pub fn pop_instr(&mut self) -> Option<Instruction> {
        if self.instructions.len() <= 1 {
            return None;
        }
        self.instructions.pop()
    }

    /// Stores `note` without surrounding whitespace. Line breaks and any other characters are
    /// kept.
    pub fn set_note(&mut self, index: usize, note: &str) -> Result<(), ValidationError> {
        self.instr_(index)?.note = note.trim().to_string();
        Ok(())
    }

    pub fn set_op_code(&mut self, index: usize, op_code: OpCode) -> Result<(), ValidationError> {
        self.instr_(index)?.op_code = op_code;
        Ok(())
    }

    pub fn set_op_data(&mut self, index: usize, op_data: u32) -> Result<(), ValidationError> {
        let max = self.spec.max_op_data;
        if op_data > max {
            return Err(ValidationError::OpDataOutOfRange { op_data, max });
        }
        self.instr_(index)?.op_data = op_data;
        Ok(())
    }

    /// Sets the duration as entered. Pulse-width rules are not checked here but in
    /// [`crate::compiler::validate`], so that a program can be edited through invalid states.
    pub fn set_duration(&mut self, index: usize, duration: Duration) -> Result<(), ValidationError> {
        self.instr_(index)?.duration = duration;
        Ok(())
    }

    /// Writes a duration given in nanoseconds, expressed in the unit the instruction already
    /// uses. This is how a scan step lands in the program.
    pub fn set_duration_ns(&mut self, index: usize, ns: f64) -> Result<(), ValidationError> {
        let instr = self.instr_(index)?;
        instr.duration.value = ns_to_value(ns, instr.duration.unit);
        Ok(())
    }

    fn check_board_channel(&self, board: usize, channel: usize) -> Result<(), ValidationError> {
        if board >= self.board_count {
            return Err(ValidationError::BoardOutOfRange {
                board,
                board_count: self.board_count,
            });
        }
        if channel >= self.spec.channels_per_board {
            return Err(ValidationError::ChannelOutOfRange {
                channel,
                channels_per_board: self.spec.channels_per_board,
            });
        }
        Ok(())
    }

    pub fn set_channel(
        &mut self,
        index: usize,
        board: usize,
        channel: usize,
        on: bool,
    ) -> Result<(), ValidationError> {
        self.check_board_channel(board, channel)?;
        self.instr_(index)?.set_channel(board, channel, on);
        Ok(())
    }

    pub fn set_channel_mask(
        &mut self,
        index: usize,
        board: usize,
        mask: u32,
    ) -> Result<(), ValidationError> {
        self.check_board_channel(board, 0)?;
        if mask & !self.spec.full_mask() != 0 {
            return Err(ValidationError::MaskOutOfRange {
                mask,
                channels_per_board: self.spec.channels_per_board,
            });
        }
        self.instr_(index)?.channel_mask[board] = mask;
        Ok(())
    }

    /// Sets every channel of every instruction low.
    pub fn clear_channels(&mut self) {
        self.instructions
            .iter_mut()
            .for_each(|instr| instr.channel_mask.iter_mut().for_each(|m| *m = 0));
    }
}

/// Connection labels of every channel, `labels()[board][channel]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelLabels {
    labels: Vec<Vec<String>>,
}

impl ChannelLabels {
    pub fn new(board_count: usize, spec: &BoardSpec) -> Self {
        Self {
            labels: vec![vec![String::new(); spec.channels_per_board]; board_count],
        }
    }

    pub fn board_count(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[Vec<String>] {
        &self.labels
    }

    pub fn board(&self, board: usize) -> Option<&[String]> {
        self.labels.get(board).map(|b| b.as_slice())
    }

    pub fn get(&self, board: usize, channel: usize) -> Option<&str> {
        self.labels.get(board)?.get(channel).map(|s| s.as_str())
    }

    /// Labels are stored trimmed. A `,` is refused: config files list a board's labels
    /// comma-separated.
    pub fn set(&mut self, board: usize, channel: usize, label: &str) -> Result<(), ValidationError> {
        let board_count = self.labels.len();
        let row = self
            .labels
            .get_mut(board)
            .ok_or(ValidationError::BoardOutOfRange { board, board_count })?;
        let channels_per_board = row.len();
        let slot = row.get_mut(channel).ok_or(ValidationError::ChannelOutOfRange {
            channel,
            channels_per_board,
        })?;
        let label = label.trim();
        if label.contains(',') {
            return Err(ValidationError::LabelWithSeparator {
                board,
                channel,
                label: label.to_string(),
            });
        }
        *slot = label.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn prog() -> Program {
        Program::with_default_instructions(2, BoardSpec::default(), 3)
    }

    #[test]
    fn default_instructions() {
        let prog = prog();
        assert_eq!(prog.len(), 3);
        let instr = prog.instr(2).unwrap();
        assert_eq!(instr.duration, Duration::ms(10.0));
        assert_eq!(instr.op_code, OpCode::CONTINUE);
        assert_eq!(instr.channel_mask, vec![0, 0]);
    }

    #[test]
    /// The program only changes length at its end and never drops its last instruction.
    fn append_and_pop_at_end() {
        let mut prog = prog();
        prog.set_note(0, "first").unwrap();
        assert_eq!(prog.add_instr(), 3);
        assert!(prog.pop_instr().is_some());
        assert!(prog.pop_instr().is_some());
        assert!(prog.pop_instr().is_some());
        assert!(prog.pop_instr().is_none());
        assert_eq!(prog.len(), 1);
        assert_eq!(prog.instr(0).unwrap().note, "first");
    }

    #[test]
    fn add_instruction_resizes_masks() {
        let mut prog = prog();
        let instr = Instruction::new(5, Duration::ns(100.0), OpCode::STOP, 0);
        let idx = prog.add_instruction(instr);
        assert_eq!(prog.instr(idx).unwrap().channel_mask.len(), 2);
    }

    #[test]
    fn checked_setters() {
        let mut prog = prog();
        assert_eq!(
            prog.set_note(3, "x"),
            Err(ValidationError::InstructionOutOfRange {
                index: 3,
                instruction_count: 3
            })
        );
        assert_eq!(
            prog.set_channel(0, 2, 0, true),
            Err(ValidationError::BoardOutOfRange {
                board: 2,
                board_count: 2
            })
        );
        assert_eq!(
            prog.set_channel(0, 1, 24, true),
            Err(ValidationError::ChannelOutOfRange {
                channel: 24,
                channels_per_board: 24
            })
        );
        assert_eq!(
            prog.set_op_data(0, 1001),
            Err(ValidationError::OpDataOutOfRange {
                op_data: 1001,
                max: 1000
            })
        );
        assert!(prog.set_channel_mask(0, 0, 1 << 24).is_err());
        prog.set_channel_mask(0, 1, 0xFF_FFFF).unwrap();
        prog.set_op_data(1, 1000).unwrap();
        assert_eq!(prog.instr(0).unwrap().channel_mask, vec![0, 0xFF_FFFF]);
        prog.clear_channels();
        assert_eq!(prog.instr(0).unwrap().channel_mask, vec![0, 0]);
    }

    #[test]
    /// Scan values arrive in ns and are stored in the instruction's own unit.
    fn duration_ns_keeps_unit() {
        let mut prog = prog();
        prog.set_duration(1, Duration::us(1.0)).unwrap();
        prog.set_duration_ns(1, 2500.0).unwrap();
        assert_eq!(prog.instr(1).unwrap().duration, Duration::us(2.5));
        prog.set_duration_ns(0, 20_000_000.0).unwrap();
        assert_eq!(prog.instr(0).unwrap().duration, Duration::ms(20.0));
    }

    #[test]
    fn labels() {
        let mut labels = ChannelLabels::new(2, &BoardSpec::default());
        labels.set(1, 23, " camera trigger ").unwrap();
        assert_eq!(labels.get(1, 23), Some("camera trigger"));
        assert_eq!(labels.get(0, 0), Some(""));
        assert!(labels.set(2, 0, "x").is_err());
        assert!(labels.set(0, 24, "x").is_err());
    }

    #[test]
    /// A comma would split into two labels in a saved config.
    fn label_separator_refused() {
        let mut labels = ChannelLabels::new(1, &BoardSpec::default());
        labels.set(0, 3, "AOM").unwrap();
        assert_eq!(
            labels.set(0, 3, "AOM, shutter"),
            Err(ValidationError::LabelWithSeparator {
                board: 0,
                channel: 3,
                label: "AOM, shutter".to_string()
            })
        );
        assert_eq!(labels.get(0, 3), Some("AOM"));
    }

    #[test]
    fn notes_trimmed() {
        let mut prog = prog();
        prog.set_note(1, "  load MOT\nthen wait\t ").unwrap();
        assert_eq!(prog.instr(1).unwrap().note, "load MOT\nthen wait");
    }
}
